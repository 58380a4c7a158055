use crate::config::EngineConfig;
use crate::details::{DocumentDetails, DocumentNormalizer};
use crate::error::{EngineError, Result};
use crate::extractor::{find_nested_amount, has_operational_flag, AmountExtractor};
use crate::schema::{DocumentRecord, DocumentType};
use crate::utils::{contains_any, normalize_key, normalize_text, round_cents};
use crate::value::{
    extract_month_year, extract_month_year_str, extract_year, extract_year_str, format_currency,
    month_of, parse_amount_str,
};
use chrono::Datelike;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

const EXCLUDED_DOCUMENTS_NOTE: &str = "Documentos de despesas, documentos de identificação, \
comprovantes de endereço e recibos de IR anteriores não entram no cálculo de faturamento, \
mas podem ser usados para outras análises.";

/// Breakdown bucket a revenue-bearing document contributes to.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
pub enum RevenueSource {
    #[serde(rename = "NOTA_FISCAL_EMITIDA")]
    IssuedInvoices,
    #[serde(rename = "INFORME_RENDIMENTOS")]
    OperationalIncome,
    #[serde(rename = "LUCRO_TRIBUTAVEL_DASN")]
    DeclaredTaxableProfit,
}

impl RevenueSource {
    pub fn key(&self) -> &'static str {
        match self {
            RevenueSource::IssuedInvoices => "NOTA_FISCAL_EMITIDA",
            RevenueSource::OperationalIncome => "INFORME_RENDIMENTOS",
            RevenueSource::DeclaredTaxableProfit => "LUCRO_TRIBUTAVEL_DASN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SourceBreakdown {
    pub document_type: RevenueSource,
    pub label: String,
    pub total: f64,
    pub total_formatado: String,
    pub documentos: Vec<Uuid>,
    pub quantidade_documentos: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Atencao,
    Critico,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LimitAlert {
    pub nivel: AlertLevel,
    #[schemars(description = "Share of the annual ceiling already used, in percent (2 decimals)")]
    pub percentual_utilizado: f64,
    pub percentual_formatado: String,
    pub mensagem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RevenueSummary {
    pub ano: i32,
    pub faturamento_total: f64,
    pub faturamento_total_formatado: String,
    pub limite_anual: f64,
    pub limite_anual_formatado: String,
    pub destaque: String,
    pub detalhamento: BTreeMap<RevenueSource, SourceBreakdown>,
    pub observacoes: Vec<String>,
    pub documentos_considerados: Vec<String>,
    pub alerta_limite: Option<LimitAlert>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyRevenueSummary {
    pub ano: i32,
    pub mes: u32,
    #[schemars(description = "Period as MM/YYYY")]
    pub referencia: String,
    pub faturamento_total: f64,
    pub faturamento_total_formatado: String,
    pub limite_mensal: f64,
    pub limite_mensal_formatado: String,
    pub destaque: String,
    pub detalhamento: BTreeMap<RevenueSource, SourceBreakdown>,
    pub observacoes: Vec<String>,
    pub documentos_considerados: Vec<String>,
}

/// Calendar period a document is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPeriod {
    pub year: i32,
    pub month: Option<u32>,
}

impl ResolvedPeriod {
    fn month(year: i32, month: u32) -> Self {
        Self {
            year,
            month: Some(month),
        }
    }

    fn year(year: i32) -> Self {
        Self { year, month: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetPeriod {
    Year(i32),
    Month(i32, u32),
}

impl TargetPeriod {
    fn matches(&self, period: ResolvedPeriod) -> bool {
        match *self {
            TargetPeriod::Year(year) => period.year == year,
            TargetPeriod::Month(year, month) => period.year == year && period.month == Some(month),
        }
    }
}

#[derive(Default)]
struct Totals {
    total: f64,
    buckets: BTreeMap<RevenueSource, (f64, Vec<Uuid>)>,
}

/// Applies per-document-type revenue rules over a user's documents.
pub struct RevenueAggregator<'a> {
    config: &'a EngineConfig,
    normalizer: DocumentNormalizer<'a>,
}

impl<'a> RevenueAggregator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            normalizer: DocumentNormalizer::new(config),
        }
    }

    pub fn annual_summary(&self, documents: &[DocumentRecord], year: i32) -> RevenueSummary {
        let totals = self.accumulate(documents, TargetPeriod::Year(year));
        let faturamento_total = round_cents(totals.total);
        let (detalhamento, documentos_considerados) = self.breakdown(totals.buckets);

        let total_formatted = format_currency(faturamento_total);
        let limit_formatted = format_currency(self.config.annual_ceiling);

        RevenueSummary {
            ano: year,
            faturamento_total,
            faturamento_total_formatado: total_formatted.clone(),
            limite_anual: self.config.annual_ceiling,
            limite_anual_formatado: limit_formatted.clone(),
            destaque: format!("Faturamento Anual: {} / {}", total_formatted, limit_formatted),
            detalhamento,
            observacoes: vec![EXCLUDED_DOCUMENTS_NOTE.to_string()],
            documentos_considerados,
            alerta_limite: self.limit_alert(faturamento_total),
        }
    }

    /// Same rules as the annual summary, restricted to one month. Never
    /// raises a limit alert.
    pub fn monthly_summary(
        &self,
        documents: &[DocumentRecord],
        year: i32,
        month: u32,
    ) -> Result<MonthlyRevenueSummary> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::InvalidInput(format!(
                "month must be between 1 and 12, got {}",
                month
            )));
        }

        let totals = self.accumulate(documents, TargetPeriod::Month(year, month));
        let faturamento_total = round_cents(totals.total);
        let (detalhamento, documentos_considerados) = self.breakdown(totals.buckets);

        let referencia = format!("{:02}/{}", month, year);
        let total_formatted = format_currency(faturamento_total);
        let limit_formatted = format_currency(self.config.monthly_ceiling);
        let tolerance_note = format!(
            "O limite mensal de {} é uma referência (1/12 do teto anual). Ultrapassá-lo em um mês \
             é tolerado desde que o faturamento anual permaneça dentro de {}.",
            limit_formatted,
            format_currency(self.config.annual_ceiling)
        );

        Ok(MonthlyRevenueSummary {
            ano: year,
            mes: month,
            destaque: format!(
                "Faturamento Mensal ({}): {} / {}",
                referencia, total_formatted, limit_formatted
            ),
            referencia,
            faturamento_total,
            faturamento_total_formatado: total_formatted,
            limite_mensal: self.config.monthly_ceiling,
            limite_mensal_formatado: limit_formatted,
            detalhamento,
            observacoes: vec![EXCLUDED_DOCUMENTS_NOTE.to_string(), tolerance_note],
            documentos_considerados,
        })
    }

    fn accumulate(&self, documents: &[DocumentRecord], target: TargetPeriod) -> Totals {
        let mut totals = Totals::default();

        for document in documents.iter().filter(|d| d.is_completed()) {
            let details = self.normalizer.build_document_details(document);

            let period = self.resolve_period(&details);
            if !target.matches(period) {
                debug!(
                    "Skipping document {}: period {:?} outside {:?}",
                    document.id, period, target
                );
                continue;
            }

            let Some((source, amount)) = self.contribution(document, &details) else {
                continue;
            };

            debug!(
                "Document {} contributes {:.2} to {}",
                document.id,
                amount,
                source.key()
            );
            totals.total += amount;
            let bucket = totals.buckets.entry(source).or_default();
            bucket.0 += amount;
            bucket.1.push(document.id);
        }

        totals
    }

    /// Revenue bucket and amount of a document, or `None` when its type or
    /// content keeps it out of the revenue total.
    fn contribution(
        &self,
        document: &DocumentRecord,
        details: &DocumentDetails,
    ) -> Option<(RevenueSource, f64)> {
        match document.document_type {
            DocumentType::IssuedInvoice => self
                .document_amount(details)
                .map(|amount| (RevenueSource::IssuedInvoices, amount)),
            DocumentType::IncomeStatement => {
                if !self.is_operational_income(details) {
                    debug!("Income statement {} is not operational revenue", document.id);
                    return None;
                }
                self.document_amount(details)
                    .map(|amount| (RevenueSource::OperationalIncome, amount))
            }
            DocumentType::AnnualDeclaration => self
                .taxable_profit(details)
                .map(|amount| (RevenueSource::DeclaredTaxableProfit, amount)),
            _ => None,
        }
    }

    fn document_amount(&self, details: &DocumentDetails) -> Option<f64> {
        details.valor.or_else(|| {
            let payload = details.raw_extracted_data.as_ref()?;
            AmountExtractor::new(&self.config.keywords)
                .extract_amounts(payload)
                .into_iter()
                .reduce(f64::max)
        })
    }

    pub fn is_operational_income(&self, details: &DocumentDetails) -> bool {
        let category_flag = details
            .categoria
            .as_deref()
            .is_some_and(|category| normalize_text(category).contains("operacional"));

        category_flag
            || details.raw_extracted_data.as_ref().is_some_and(|payload| {
                has_operational_flag(payload, &self.config.keywords.operational_fragments)
            })
    }

    pub fn taxable_profit(&self, details: &DocumentDetails) -> Option<f64> {
        let keywords = &self.config.keywords;
        keywords
            .taxable_profit_extras
            .iter()
            .filter_map(|key| details.extra(key))
            .flat_map(|extra| extra.values())
            .find_map(parse_amount_str)
            .or_else(|| {
                let payload = details.raw_extracted_data.as_ref()?;
                find_nested_amount(payload, &keywords.taxable_profit_fragments)
            })
    }

    /// Normalized date, then period extras, then period-bearing payload keys,
    /// then the creation timestamp. The first step yielding anything wins.
    pub fn resolve_period(&self, details: &DocumentDetails) -> ResolvedPeriod {
        if let Some(date) = details.data {
            let (year, month) = month_of(date);
            return ResolvedPeriod::month(year, month);
        }

        let from_extras = self
            .config
            .keywords
            .period_extras
            .iter()
            .filter_map(|key| details.extra(key))
            .flat_map(|extra| extra.values())
            .find_map(period_from_text);
        if let Some(period) = from_extras {
            return period;
        }

        let from_payload = details
            .raw_extracted_data
            .as_ref()
            .and_then(|payload| self.scan_period(payload));
        if let Some(period) = from_payload {
            return period;
        }

        ResolvedPeriod::month(details.created_at.year(), details.created_at.month())
    }

    fn scan_period(&self, payload: &Value) -> Option<ResolvedPeriod> {
        match payload {
            Value::Object(map) => map.iter().find_map(|(key, value)| {
                let normalized = normalize_key(key);
                contains_any(&normalized, &self.config.keywords.period_fragments)
                    .then(|| period_from_value(value))
                    .flatten()
                    .or_else(|| self.scan_period(value))
            }),
            Value::Array(items) => items.iter().find_map(|item| self.scan_period(item)),
            _ => None,
        }
    }

    fn breakdown(
        &self,
        buckets: BTreeMap<RevenueSource, (f64, Vec<Uuid>)>,
    ) -> (BTreeMap<RevenueSource, SourceBreakdown>, Vec<String>) {
        let detalhamento: BTreeMap<RevenueSource, SourceBreakdown> = buckets
            .into_iter()
            .filter(|(_, (total, _))| *total > 0.0)
            .map(|(source, (total, documentos))| {
                let breakdown = SourceBreakdown {
                    document_type: source,
                    label: self.config.breakdown_label(source),
                    total: round_cents(total),
                    total_formatado: format_currency(total),
                    quantidade_documentos: documentos.len(),
                    documentos,
                };
                (source, breakdown)
            })
            .collect();

        let mut labels: Vec<String> = detalhamento.values().map(|b| b.label.clone()).collect();
        labels.sort();
        labels.dedup();

        (detalhamento, labels)
    }

    pub fn limit_alert(&self, total: f64) -> Option<LimitAlert> {
        let ceiling = self.config.annual_ceiling;
        let ratio = total / ceiling;
        if ratio < self.config.alert_threshold {
            return None;
        }

        let percentual = round_cents(ratio * 100.0);
        let percentual_formatado = format!("{:.2}%", percentual);
        let ceiling_formatted = format_currency(ceiling);

        let (nivel, mensagem) = if ratio >= 1.0 {
            (
                AlertLevel::Critico,
                format!(
                    "O limite anual do MEI de {} foi ultrapassado ({} utilizado). Procure um \
                     contador para avaliar o desenquadramento e regularizar o excedente.",
                    ceiling_formatted, percentual_formatado
                ),
            )
        } else {
            (
                AlertLevel::Atencao,
                format!(
                    "Você já utilizou {} do limite anual do MEI de {}. Acima de {:.0}% do teto, \
                     planeje o faturamento dos próximos meses para não ultrapassar o limite.",
                    percentual_formatado,
                    ceiling_formatted,
                    self.config.alert_threshold * 100.0
                ),
            )
        };

        Some(LimitAlert {
            nivel,
            percentual_utilizado: percentual,
            percentual_formatado,
            mensagem,
        })
    }
}

fn period_from_text(text: &str) -> Option<ResolvedPeriod> {
    extract_month_year_str(text)
        .map(|(year, month)| ResolvedPeriod::month(year, month))
        .or_else(|| extract_year_str(text).map(ResolvedPeriod::year))
}

fn period_from_value(value: &Value) -> Option<ResolvedPeriod> {
    extract_month_year(value)
        .map(|(year, month)| ResolvedPeriod::month(year, month))
        .or_else(|| extract_year(value).map(ResolvedPeriod::year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProcessingStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn completed(
        document_type: DocumentType,
        data: Value,
        created: (i32, u32, u32),
    ) -> DocumentRecord {
        let created_at = Utc
            .with_ymd_and_hms(created.0, created.1, created.2, 12, 0, 0)
            .unwrap();
        DocumentRecord::new(Uuid::new_v4(), document_type)
            .with_extracted_data(data)
            .with_status(ProcessingStatus::Completed)
            .with_created_at(created_at)
    }

    fn period_of(config: &EngineConfig, document: &DocumentRecord) -> ResolvedPeriod {
        let details = DocumentNormalizer::new(config).build_document_details(document);
        RevenueAggregator::new(config).resolve_period(&details)
    }

    #[test]
    fn test_alert_levels_at_boundaries() {
        let config = EngineConfig::default();
        let aggregator = RevenueAggregator::new(&config);

        assert!(aggregator.limit_alert(72_899.99).is_none());

        let attention = aggregator.limit_alert(72_900.0).unwrap();
        assert_eq!(attention.nivel, AlertLevel::Atencao);
        assert_eq!(attention.percentual_formatado, "90.00%");
        assert!(attention.mensagem.contains("90%"));

        let near = aggregator.limit_alert(80_999.99).unwrap();
        assert_eq!(near.nivel, AlertLevel::Atencao);

        let critical = aggregator.limit_alert(81_000.0).unwrap();
        assert_eq!(critical.nivel, AlertLevel::Critico);
        assert_eq!(critical.percentual_utilizado, 100.0);
        assert!(critical.mensagem.contains("ultrapassado"));
    }

    #[test]
    fn test_period_resolution_precedence() {
        let config = EngineConfig::default();

        let dated = completed(
            DocumentType::IssuedInvoice,
            json!({"data": "2024-03-10"}),
            (2025, 1, 1),
        );
        assert_eq!(period_of(&config, &dated), ResolvedPeriod::month(2024, 3));

        let declared = completed(
            DocumentType::AnnualDeclaration,
            json!({"lucro_tributavel": "3.500,50", "ano_calendario": "2024"}),
            (2025, 4, 5),
        );
        assert_eq!(period_of(&config, &declared), ResolvedPeriod::year(2024));

        let competence = completed(
            DocumentType::AnnualDeclaration,
            json!({"lucro_tributavel": "1.250,00", "competencia": "01/2024"}),
            (2024, 1, 30),
        );
        assert_eq!(period_of(&config, &competence), ResolvedPeriod::month(2024, 1));

        let nested = completed(
            DocumentType::IncomeStatement,
            json!({"fonte": {"periodo_referencia": "Março de 2023"}, "valor": 10}),
            (2024, 6, 1),
        );
        assert_eq!(period_of(&config, &nested), ResolvedPeriod::month(2023, 3));

        let undated = completed(DocumentType::IssuedInvoice, json!({"valor": 10}), (2022, 8, 9));
        assert_eq!(period_of(&config, &undated), ResolvedPeriod::month(2022, 8));
    }

    #[test]
    fn test_year_only_period_never_matches_a_month() {
        let config = EngineConfig::default();
        let aggregator = RevenueAggregator::new(&config);
        let documents = vec![completed(
            DocumentType::AnnualDeclaration,
            json!({"lucro_tributavel": "3.500,50", "ano_calendario": "2024"}),
            (2024, 1, 5),
        )];

        let annual = aggregator.annual_summary(&documents, 2024);
        assert_eq!(annual.faturamento_total, 3500.5);

        let monthly = aggregator.monthly_summary(&documents, 2024, 1).unwrap();
        assert_eq!(monthly.faturamento_total, 0.0);
        assert!(monthly.detalhamento.is_empty());
    }

    #[test]
    fn test_invoice_without_primary_value_uses_largest_candidate() {
        let config = EngineConfig::default();
        let aggregator = RevenueAggregator::new(&config);
        let documents = vec![completed(
            DocumentType::IssuedInvoice,
            json!({
                "data": "2024-05-02",
                "itens": [{"valor_item": "300,00"}, {"valor_item": "450,00"}]
            }),
            (2024, 5, 2),
        )];

        let summary = aggregator.annual_summary(&documents, 2024);
        assert_eq!(summary.faturamento_total, 450.0);
    }

    #[test]
    fn test_non_revenue_and_pending_documents_are_ignored() {
        let config = EngineConfig::default();
        let aggregator = RevenueAggregator::new(&config);
        let mut pending = completed(
            DocumentType::IssuedInvoice,
            json!({"valor": 500.0}),
            (2024, 2, 2),
        );
        pending.status = ProcessingStatus::Pending;

        let documents = vec![
            pending,
            completed(DocumentType::DeductibleExpense, json!({"valor": 900.0}), (2024, 2, 2)),
            completed(DocumentType::BankStatement, json!({"valor": 700.0}), (2024, 2, 2)),
            completed(DocumentType::IssuedInvoice, json!({"valor": -50.0}), (2024, 2, 2)),
        ];

        let summary = aggregator.annual_summary(&documents, 2024);
        assert_eq!(summary.faturamento_total, -50.0);
        assert!(summary.detalhamento.is_empty());
        assert!(summary.documentos_considerados.is_empty());
        assert!(summary.alerta_limite.is_none());
    }

    #[test]
    fn test_monthly_rejects_invalid_month() {
        let config = EngineConfig::default();
        let aggregator = RevenueAggregator::new(&config);
        assert!(matches!(
            aggregator.monthly_summary(&[], 2024, 13),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            aggregator.monthly_summary(&[], 2024, 0),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_category_marks_income_as_operational() {
        let config = EngineConfig::default();
        let aggregator = RevenueAggregator::new(&config);
        let documents = vec![completed(
            DocumentType::IncomeStatement,
            json!({"valor": "1.000,00", "categoria": "Receita Operacional", "data": "2024-07-01"}),
            (2024, 7, 1),
        )];

        let summary = aggregator.annual_summary(&documents, 2024);
        let bucket = &summary.detalhamento[&RevenueSource::OperationalIncome];
        assert_eq!(bucket.total, 1000.0);
        assert_eq!(bucket.label, "Informes de rendimentos (receita operacional MEI)");
    }
}
