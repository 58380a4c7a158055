//! Keyword heuristics turning a chat message into a structured correction.
//!
//! Decisions follow a fixed priority chain: document type, then category,
//! then declaration profit fields, then date, then amount, then nature. The
//! parser declines (returns `None`) whenever a step it depends on fails.

use crate::config::CorrectionVocabulary;
use crate::schema::DocumentType;
use crate::utils::{contains_token, normalize_text};
use crate::value::{format_currency, parse_amount_str};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const AMOUNT_PATTERN: &str = r"\d{1,3}(?:[.\s]\d{3})*,\d{2}|\d{1,3}(?:\.\d{3})+|\d+[.,]\d+|\d+";

static CURRENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("({})", AMOUNT_PATTERN)).expect("valid currency regex"));

static PREFIXED_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"r\$\s*({})", AMOUNT_PATTERN)).expect("valid currency regex")
});

static DOT_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:\.\d{3})+$").expect("valid grouping regex"));

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})").expect("valid date regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Currency,
    Date,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionIntent {
    UpdateCategory,
    UpdateValue,
    UpdateDate,
    UpdateNature,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionCommand {
    pub document_type: DocumentType,
    pub field: String,
    /// Number for currency commands, ISO date string for dates, text otherwise.
    pub value: Value,
    /// The value as the user typed it, lightly formatted.
    pub value_text: String,
    pub value_kind: ValueKind,
    pub intent: CorrectionIntent,
}

impl CorrectionCommand {
    fn text(
        document_type: DocumentType,
        field: &str,
        text: &str,
        intent: CorrectionIntent,
    ) -> Self {
        Self {
            document_type,
            field: field.to_string(),
            value: json!(text),
            value_text: text.to_string(),
            value_kind: ValueKind::Text,
            intent,
        }
    }

    fn currency(document_type: DocumentType, field: &str, amount: f64) -> Self {
        Self {
            document_type,
            field: field.to_string(),
            value: json!(amount),
            value_text: format_currency(amount),
            value_kind: ValueKind::Currency,
            intent: CorrectionIntent::UpdateValue,
        }
    }
}

pub struct CorrectionParser<'a> {
    vocabulary: &'a CorrectionVocabulary,
}

impl<'a> CorrectionParser<'a> {
    pub fn new(vocabulary: &'a CorrectionVocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn parse(&self, message: &str) -> Option<CorrectionCommand> {
        let normalized = normalize_text(message);
        if normalized.is_empty() {
            return None;
        }

        let document_type = detect_document_type(&normalized)?;

        if let Some(category) = self.extract_category(&normalized) {
            return Some(CorrectionCommand::text(
                document_type,
                "categoria",
                &category,
                CorrectionIntent::UpdateCategory,
            ));
        }

        if document_type == DocumentType::AnnualDeclaration {
            let field = detect_profit_field(&normalized)?;
            let amount = extract_currency(&normalized)?;
            return Some(CorrectionCommand::currency(document_type, field, amount));
        }

        if let Some((iso, pretty)) = extract_date(&normalized) {
            return Some(CorrectionCommand {
                document_type,
                field: "data".to_string(),
                value: json!(iso),
                value_text: pretty,
                value_kind: ValueKind::Date,
                intent: CorrectionIntent::UpdateDate,
            });
        }

        if let Some(amount) = extract_currency(&normalized) {
            return Some(CorrectionCommand::currency(document_type, "valor", amount));
        }

        extract_nature(&normalized).map(|nature| {
            CorrectionCommand::text(
                document_type,
                "natureza",
                nature,
                CorrectionIntent::UpdateNature,
            )
        })
    }

    /// Human label such as `despesa dedutível – valor: R$ 300,00`.
    pub fn describe(&self, command: &CorrectionCommand) -> String {
        let value = match (command.value_kind, command.value.as_f64()) {
            (ValueKind::Currency, Some(amount)) => format_currency(amount),
            _ => command.value_text.clone(),
        };
        format!(
            "{} – {}: {}",
            self.document_label(command.document_type),
            self.field_label(&command.field),
            value
        )
    }

    pub fn document_label(&self, document_type: DocumentType) -> String {
        self.vocabulary
            .document_labels
            .get(&document_type)
            .cloned()
            .unwrap_or_else(|| "documento".to_string())
    }

    pub fn field_label(&self, field: &str) -> String {
        self.vocabulary
            .field_labels
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }

    fn extract_category(&self, normalized: &str) -> Option<String> {
        let keywords = &self.vocabulary.category_keywords;

        let direct = keywords.iter().find(|entry| {
            normalized.contains(entry.key.as_str())
                && !normalized.contains(&format!("nao {}", entry.key))
        });
        if let Some(entry) = direct {
            return Some(entry.label.clone());
        }

        let (_, after) = normalized.split_once("categoria")?;
        keywords
            .iter()
            .filter_map(|entry| after.find(entry.key.as_str()).map(|pos| (pos, entry)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, entry)| entry.label.clone())
    }
}

fn detect_document_type(normalized: &str) -> Option<DocumentType> {
    let has = |fragment: &str| normalized.contains(fragment);

    if has("dasn") || has("lucro") {
        return Some(DocumentType::AnnualDeclaration);
    }
    if has("despesa dedut") || has("dedutivel") {
        return Some(DocumentType::DeductibleExpense);
    }
    if has("despesa") && !has("nota") {
        return Some(DocumentType::DeductibleExpense);
    }
    if has("nota") || contains_token(normalized, "nf") {
        if has("recebid") || has("compra") || has("fornecedor") || has("despesa") {
            return Some(DocumentType::ReceivedInvoice);
        }
        return Some(DocumentType::IssuedInvoice);
    }
    if has("receita") {
        return Some(DocumentType::IssuedInvoice);
    }
    None
}

fn detect_profit_field(normalized: &str) -> Option<&'static str> {
    if normalized.contains("tribut") {
        Some("lucro_tributavel")
    } else if normalized.contains("isento") {
        Some("lucro_isento")
    } else if normalized.contains("brut") {
        Some("receita_bruta_total")
    } else {
        None
    }
}

fn extract_nature(normalized: &str) -> Option<&'static str> {
    if normalized.contains("receita") && !contains_token(normalized, "nao") {
        return Some("receita");
    }
    if normalized.contains("despesa") {
        if let Some((before, _)) = normalized.split_once("nao e") {
            if before.contains("despesa") {
                return None;
            }
        }
        return Some("despesa");
    }
    None
}

/// Amount the user asked for. A number written after `R$` wins over any
/// bare number earlier in the message, such as a year.
fn extract_currency(normalized: &str) -> Option<f64> {
    let captures = PREFIXED_CURRENCY
        .captures(normalized)
        .or_else(|| CURRENCY.captures(normalized))?;
    correction_amount(captures.get(1)?.as_str())
}

/// `1.500` and `12.000` are thousands in chat messages, not decimals.
fn correction_amount(raw: &str) -> Option<f64> {
    if DOT_GROUPED.is_match(raw) {
        return raw.replace('.', "").parse::<f64>().ok();
    }
    parse_amount_str(raw)
}

/// First `D/M/Y` date as `(ISO, DD/MM/YYYY)`. Two-digit years pivot at 69:
/// `00..=68` map to 2000s, `69..=99` to 1900s.
fn extract_date(normalized: &str) -> Option<(String, String)> {
    let raw = DATE.captures(normalized)?.get(1)?.as_str().replace('-', "/");
    let mut parts = raw.split('/');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year_text = parts.next()?;
    let year: i32 = match year_text.len() {
        4 => year_text.parse().ok()?,
        2 => {
            let short: i32 = year_text.parse().ok()?;
            if short <= 68 {
                2000 + short
            } else {
                1900 + short
            }
        }
        _ => return None,
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some((
        date.format("%Y-%m-%d").to_string(),
        date.format("%d/%m/%Y").to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(message: &str) -> Option<CorrectionCommand> {
        let vocabulary = CorrectionVocabulary::default();
        CorrectionParser::new(&vocabulary).parse(message)
    }

    #[test]
    fn test_deductible_expense_value() {
        let command = parse("Corrija a despesa dedutível para R$ 300,00").unwrap();
        assert_eq!(command.document_type, DocumentType::DeductibleExpense);
        assert_eq!(command.field, "valor");
        assert_eq!(command.value, json!(300.0));
        assert_eq!(command.value_text, "R$ 300,00");
        assert_eq!(command.value_kind, ValueKind::Currency);
        assert_eq!(command.intent, CorrectionIntent::UpdateValue);
    }

    #[test]
    fn test_declaration_requires_field_and_amount() {
        let command = parse("Atualize o lucro tributável para R$ 15.500,00").unwrap();
        assert_eq!(command.document_type, DocumentType::AnnualDeclaration);
        assert_eq!(command.field, "lucro_tributavel");
        assert_eq!(command.value, json!(15500.0));

        let gross = parse("A receita bruta da DASN é 60000").unwrap();
        assert_eq!(gross.field, "receita_bruta_total");
        assert_eq!(gross.value, json!(60000.0));
        assert_eq!(gross.value_text, "R$ 60.000,00");

        assert_eq!(parse("Atualize o lucro para R$ 10,00"), None);
        assert_eq!(parse("O lucro isento está errado"), None);
    }

    #[test]
    fn test_dot_grouped_amounts_are_thousands() {
        let command = parse("Corrija a nota fiscal para R$ 1.500").unwrap();
        assert_eq!(command.value, json!(1500.0));
        assert_eq!(command.value_text, "R$ 1.500,00");

        let command = parse("Corrija a despesa dedutível para R$ 12.000").unwrap();
        assert_eq!(command.value, json!(12000.0));
        assert_eq!(command.value_text, "R$ 12.000,00");

        let command = parse("Corrija a despesa para 1.250.000").unwrap();
        assert_eq!(command.value, json!(1250000.0));

        let command = parse("Corrija a despesa para R$ 1.5").unwrap();
        assert_eq!(command.value, json!(1.5));
    }

    #[test]
    fn test_amount_after_currency_symbol_beats_year() {
        let command = parse("Atualize o lucro tributável de 2024 para R$ 15.500,00").unwrap();
        assert_eq!(command.field, "lucro_tributavel");
        assert_eq!(command.value, json!(15500.0));
        assert_eq!(command.value_text, "R$ 15.500,00");

        let command = parse("Corrija a despesa de 2023 para R$ 80").unwrap();
        assert_eq!(command.value, json!(80.0));
    }

    #[test]
    fn test_category_takes_priority_and_respects_negation() {
        let command = parse("Essa nota é despesa de saúde, não de educação").unwrap();
        assert_eq!(command.document_type, DocumentType::ReceivedInvoice);
        assert_eq!(command.field, "categoria");
        assert_eq!(command.value, json!("saúde"));
        assert_eq!(command.intent, CorrectionIntent::UpdateCategory);

        let negated = parse("A despesa não saúde, categoria transporte de R$ 50,00").unwrap();
        assert_eq!(negated.value_text, "transporte");
    }

    #[test]
    fn test_date_before_amount() {
        let command = parse("A nota fiscal emitida é de 05/02/24 no valor de R$ 900,00").unwrap();
        assert_eq!(command.document_type, DocumentType::IssuedInvoice);
        assert_eq!(command.field, "data");
        assert_eq!(command.value, json!("2024-02-05"));
        assert_eq!(command.value_text, "05/02/2024");
        assert_eq!(command.value_kind, ValueKind::Date);
    }

    #[test]
    fn test_nature_update() {
        let command = parse("Essa nota recebida é receita").unwrap();
        assert_eq!(command.document_type, DocumentType::ReceivedInvoice);
        assert_eq!(command.field, "natureza");
        assert_eq!(command.value, json!("receita"));
        assert_eq!(command.intent, CorrectionIntent::UpdateNature);
    }

    #[test]
    fn test_unrelated_messages_are_declined() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("Qual é o meu faturamento anual?"), None);
        assert_eq!(parse("Confira o informe"), None);
        assert_eq!(parse("A nota está certa"), None);
    }

    #[test]
    fn test_describe() {
        let vocabulary = CorrectionVocabulary::default();
        let parser = CorrectionParser::new(&vocabulary);

        let command = parser.parse("Atualize o lucro tributável para R$ 15.500,00").unwrap();
        assert_eq!(
            parser.describe(&command),
            "declaração DASN-SIMEI – lucro tributável: R$ 15.500,00"
        );

        let command = parser.parse("Corrija a despesa dedutível para 300").unwrap();
        assert_eq!(parser.describe(&command), "despesa dedutível – valor: R$ 300,00");

        let command = parser.parse("Corrija a nota fiscal para R$ 1.500").unwrap();
        assert_eq!(parser.describe(&command), "nota fiscal emitida – valor: R$ 1.500,00");

        assert_eq!(parser.document_label(DocumentType::BankStatement), "documento");
        assert_eq!(parser.field_label("cnpj"), "cnpj");
    }
}
