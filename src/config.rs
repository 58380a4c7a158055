use crate::error::{EngineError, Result};
use crate::revenue::RevenueSource;
use crate::schema::{DocumentType, Nature};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only tables and thresholds injected into every component.
///
/// Every field falls back to the Brazilian MEI defaults, so a JSON document
/// only needs to carry the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(description = "Annual gross-revenue ceiling of the MEI regime, in BRL")]
    pub annual_ceiling: f64,

    #[schemars(description = "Monthly reference ceiling (annual / 12), in BRL. Never raises alerts.")]
    pub monthly_ceiling: f64,

    #[schemars(description = "Share of the annual ceiling from which the 'atencao' alert is raised (0-1]")]
    pub alert_threshold: f64,

    pub tables: DocumentTables,

    pub keywords: ExtractionKeywords,

    pub corrections: CorrectionVocabulary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceGroup {
    pub slug: String,
    pub label: String,
}

impl SourceGroup {
    fn new(slug: &str, label: &str) -> Self {
        Self {
            slug: slug.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabeledKey {
    pub key: String,
    pub label: String,
}

impl LabeledKey {
    fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
        }
    }
}

/// Per-document-type presentation tables.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DocumentTables {
    pub document_labels: BTreeMap<DocumentType, String>,
    pub source_groups: BTreeMap<DocumentType, SourceGroup>,
    #[schemars(description = "Source group of document types missing from source_groups")]
    pub fallback_source_group: SourceGroup,
    pub default_categories: BTreeMap<DocumentType, String>,
    pub default_natures: BTreeMap<DocumentType, Nature>,
    pub breakdown_labels: BTreeMap<RevenueSource, String>,
    #[schemars(description = "Origin slug written by the text structuring step")]
    pub origins: BTreeMap<DocumentType, String>,
}

/// Key-name heuristics used to read schema-free payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtractionKeywords {
    pub value_keys: Vec<String>,
    pub date_keys: Vec<String>,
    pub nature_keys: Vec<String>,
    pub category_keys: Vec<String>,
    pub cnpj_keys: Vec<String>,

    #[schemars(description = "A normalized key containing any of these fragments bears an amount")]
    pub amount_fragments: Vec<String>,

    #[schemars(description = "Key fragments marking identifiers that must never be read as money")]
    pub identifier_fragments: Vec<String>,

    #[schemars(description = "Whole-word key tokens marking identifiers")]
    pub identifier_tokens: Vec<String>,

    #[schemars(description = "Digit-only strings at least this long are identifiers")]
    pub identifier_min_digits: usize,

    pub operational_fragments: Vec<String>,

    #[schemars(description = "Key fragments whose values may carry a date, competence or period")]
    pub period_fragments: Vec<String>,

    #[schemars(description = "Extras consulted for the calendar year or competence of a document")]
    pub period_extras: Vec<String>,

    pub taxable_profit_extras: Vec<String>,

    pub taxable_profit_fragments: Vec<String>,

    pub declaration_currency_fields: Vec<LabeledKey>,

    pub declaration_text_fields: Vec<LabeledKey>,

    #[schemars(description = "Annual declaration keys read as exempt profit by the overview")]
    pub exempt_profit_keys: Vec<String>,

    #[schemars(description = "Annual declaration keys read as taxable profit by the overview")]
    pub taxable_profit_keys: Vec<String>,
}

/// Vocabulary of the chat correction heuristics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CorrectionVocabulary {
    #[schemars(description = "Ordered (normalized keyword, category label) pairs; first match wins")]
    pub category_keywords: Vec<LabeledKey>,

    pub document_labels: BTreeMap<DocumentType, String>,

    pub field_labels: BTreeMap<String, String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            annual_ceiling: 81_000.0,
            monthly_ceiling: 6_750.0,
            alert_threshold: 0.9,
            tables: DocumentTables::default(),
            keywords: ExtractionKeywords::default(),
            corrections: CorrectionVocabulary::default(),
        }
    }
}

impl Default for DocumentTables {
    fn default() -> Self {
        use DocumentType::*;

        let document_labels = [
            (IssuedInvoice, "Nota Fiscal emitida"),
            (ReceivedInvoice, "Nota Fiscal recebida"),
            (BankStatement, "Informe bancário"),
            (IncomeStatement, "Informe de rendimentos"),
            (DeductibleExpense, "Documento de despesa dedutível"),
            (AnnualDeclaration, "DASN-SIMEI"),
            (PriorTaxReceipt, "Recibo do IR"),
            (IdentityDocument, "Documento de identificação"),
            (AddressProof, "Comprovante de endereço"),
        ]
        .into_iter()
        .map(|(t, label)| (t, label.to_string()))
        .collect();

        let source_groups = [
            (IssuedInvoice, SourceGroup::new("nota_fiscal", "Notas Fiscais")),
            (ReceivedInvoice, SourceGroup::new("nota_fiscal", "Notas Fiscais")),
            (
                BankStatement,
                SourceGroup::new("informes_financeiros", "Informes bancários"),
            ),
            (
                IncomeStatement,
                SourceGroup::new("informes_financeiros", "Informes de rendimentos"),
            ),
            (
                DeductibleExpense,
                SourceGroup::new("despesas_dedutiveis", "Documentos de despesas dedutíveis"),
            ),
            (AnnualDeclaration, SourceGroup::new("dasn_simei", "DASN-SIMEI")),
        ]
        .into_iter()
        .collect();

        let default_categories = [
            (IssuedInvoice, "faturamento MEI"),
            (ReceivedInvoice, "despesa operacional"),
            (BankStatement, "rendimento bancário"),
            (IncomeStatement, "rendimento bancário"),
            (DeductibleExpense, "despesa dedutível"),
            (AnnualDeclaration, "lucro MEI"),
        ]
        .into_iter()
        .map(|(t, category)| (t, category.to_string()))
        .collect();

        let default_natures = [
            (IssuedInvoice, Nature::Revenue),
            (BankStatement, Nature::Revenue),
            (IncomeStatement, Nature::Revenue),
            (AnnualDeclaration, Nature::Revenue),
            (ReceivedInvoice, Nature::Expense),
            (DeductibleExpense, Nature::Expense),
        ]
        .into_iter()
        .collect();

        let breakdown_labels = [
            (RevenueSource::IssuedInvoices, "Notas fiscais emitidas"),
            (
                RevenueSource::OperationalIncome,
                "Informes de rendimentos (receita operacional MEI)",
            ),
            (
                RevenueSource::DeclaredTaxableProfit,
                "Lucro tributável informado na DASN-SIMEI",
            ),
        ]
        .into_iter()
        .map(|(source, label)| (source, label.to_string()))
        .collect();

        let origins = [
            (IssuedInvoice, "nota"),
            (ReceivedInvoice, "nota"),
            (BankStatement, "banco"),
            (DeductibleExpense, "despesa"),
            (IncomeStatement, "rendimentos"),
            (AnnualDeclaration, "lucro_mei"),
        ]
        .into_iter()
        .map(|(t, origin)| (t, origin.to_string()))
        .collect();

        Self {
            document_labels,
            source_groups,
            fallback_source_group: SourceGroup::new(
                "documentos_auxiliares",
                "Documentos auxiliares",
            ),
            default_categories,
            default_natures,
            breakdown_labels,
            origins,
        }
    }
}

impl Default for ExtractionKeywords {
    fn default() -> Self {
        Self {
            value_keys: strings(&[
                "valor",
                "value",
                "valor_total",
                "amount",
                "valor_bruto",
                "total",
            ]),
            date_keys: strings(&[
                "data",
                "date",
                "data_competencia",
                "competencia",
                "data_emissao",
                "periodo",
            ]),
            nature_keys: strings(&["natureza", "tipo_natureza"]),
            category_keys: strings(&["categoria", "category", "tipo", "tipo_documento"]),
            cnpj_keys: strings(&["cnpj_emitente", "cnpj", "cnpj_origem"]),
            amount_fragments: strings(&["valor", "total", "montante", "quantia"]),
            identifier_fragments: strings(&[
                "chave",
                "metadata",
                "metadado",
                "identificador",
                "identificacao",
                "codigo",
                "cod",
                "numero",
                "num",
            ]),
            identifier_tokens: strings(&["id"]),
            identifier_min_digits: 8,
            operational_fragments: strings(&[
                "receita_operacional",
                "operacional_mei",
                "mei_operacional",
            ]),
            period_fragments: strings(&[
                "data",
                "date",
                "competencia",
                "periodo",
                "referencia",
                "mes",
                "month",
                "ano",
                "year",
            ]),
            period_extras: strings(&[
                "ano_calendario",
                "ano-calendario",
                "ano_calendario_mei",
                "competencia",
                "periodo_apuracao",
            ]),
            taxable_profit_extras: strings(&["lucro_tributavel", "lucro_tributavel_mei"]),
            taxable_profit_fragments: strings(&["lucro_tributavel", "lucro"]),
            declaration_currency_fields: vec![
                LabeledKey::new("lucro_isento", "Lucro isento"),
                LabeledKey::new("lucro_isento_mei", "Lucro isento"),
                LabeledKey::new("lucro_tributavel", "Lucro tributável"),
                LabeledKey::new("lucro_tributavel_mei", "Lucro tributável"),
                LabeledKey::new("receita_bruta_total", "Receita bruta total"),
            ],
            declaration_text_fields: vec![
                LabeledKey::new("ano_calendario", "Ano-calendário"),
                LabeledKey::new("periodo_apuracao", "Período de apuração"),
            ],
            exempt_profit_keys: strings(&["lucro_isento", "parcela_isenta"]),
            taxable_profit_keys: strings(&["lucro_tributavel", "lucro_tributavel_parcela"]),
        }
    }
}

impl Default for CorrectionVocabulary {
    fn default() -> Self {
        let category_keywords = vec![
            LabeledKey::new("saude", "saúde"),
            LabeledKey::new("educacao", "educação"),
            LabeledKey::new("educacional", "educação"),
            LabeledKey::new("transporte", "transporte"),
            LabeledKey::new("alimentacao", "alimentação"),
            LabeledKey::new("moradia", "moradia"),
            LabeledKey::new("odontologico", "odontológica"),
            LabeledKey::new("medico", "saúde"),
            LabeledKey::new("medica", "saúde"),
            LabeledKey::new("medicina", "saúde"),
        ];

        let document_labels = [
            (DocumentType::IssuedInvoice, "nota fiscal emitida"),
            (DocumentType::ReceivedInvoice, "nota fiscal recebida"),
            (DocumentType::DeductibleExpense, "despesa dedutível"),
            (DocumentType::AnnualDeclaration, "declaração DASN-SIMEI"),
        ]
        .into_iter()
        .map(|(t, label)| (t, label.to_string()))
        .collect();

        let field_labels = [
            ("valor", "valor"),
            ("data", "data"),
            ("natureza", "natureza"),
            ("categoria", "categoria"),
            ("lucro_tributavel", "lucro tributável"),
            ("lucro_isento", "lucro isento"),
            ("receita_bruta_total", "receita bruta total"),
        ]
        .into_iter()
        .map(|(field, label)| (field.to_string(), label.to_string()))
        .collect();

        Self {
            category_keywords,
            document_labels,
            field_labels,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.annual_ceiling.is_finite() && self.annual_ceiling > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "annual_ceiling must be positive, got {}",
                self.annual_ceiling
            )));
        }
        if !(self.monthly_ceiling.is_finite() && self.monthly_ceiling > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "monthly_ceiling must be positive, got {}",
                self.monthly_ceiling
            )));
        }
        if !(self.alert_threshold > 0.0 && self.alert_threshold <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "alert_threshold must be within (0, 1], got {}",
                self.alert_threshold
            )));
        }
        if self.keywords.amount_fragments.is_empty() {
            return Err(EngineError::InvalidConfig(
                "amount_fragments cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn document_label(&self, document_type: DocumentType) -> String {
        self.tables
            .document_labels
            .get(&document_type)
            .cloned()
            .unwrap_or_else(|| document_type.title())
    }

    pub fn source_group(&self, document_type: DocumentType) -> &SourceGroup {
        self.tables
            .source_groups
            .get(&document_type)
            .unwrap_or(&self.tables.fallback_source_group)
    }

    pub fn breakdown_label(&self, source: RevenueSource) -> String {
        self.tables
            .breakdown_labels
            .get(&source)
            .cloned()
            .unwrap_or_else(|| source.key().to_string())
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(EngineConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.annual_ceiling, 81_000.0);
        assert_eq!(config.monthly_ceiling, 6_750.0);
        assert_eq!(
            config.document_label(DocumentType::IssuedInvoice),
            "Nota Fiscal emitida"
        );
        assert_eq!(
            config.source_group(DocumentType::IdentityDocument).slug,
            "documentos_auxiliares"
        );
    }

    #[test]
    fn test_partial_json_override_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"annual_ceiling": 145000.0}"#).unwrap();
        assert_eq!(config.annual_ceiling, 145_000.0);
        assert_eq!(config.monthly_ceiling, 6_750.0);
        assert_eq!(config.keywords.identifier_min_digits, 8);
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let result = EngineConfig::from_json_str(r#"{"alert_threshold": 1.5}"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));

        let result = EngineConfig::from_json_str(r#"{"monthly_ceiling": 0}"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_serializes_with_type_codes() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        assert!(json.contains("\"NOTA_FISCAL_EMITIDA\":\"Nota Fiscal emitida\""));
        assert!(EngineConfig::schema_as_json().unwrap().contains("annual_ceiling"));
    }
}
