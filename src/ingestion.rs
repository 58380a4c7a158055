//! Turns raw OCR text into the schema-free payload the normalizer reads.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::schema::{DocumentType, Nature};
use crate::value::parse_amount_str;
use chrono::NaiveDate;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const EXCERPT_CHARS: usize = 1000;

static CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:R\$)?\s*((?:\d{1,3}(?:\.\d{3})+|\d+)(?:,\d{2}|\.\d{2}))")
        .expect("valid currency regex")
});

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2}/\d{2}/\d{4})").expect("valid date regex"));

static CNPJ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b").expect("valid cnpj regex")
});

/// One financial fact read from the text of a revenue or expense document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredEntry {
    pub tipo_documento: DocumentType,
    pub natureza: Nature,
    #[schemars(description = "Origin slug, e.g. nota, banco, despesa")]
    pub origem: String,
    #[schemars(description = "Largest currency amount found in the text")]
    pub valor: Option<f64>,
    #[schemars(description = "First valid DD/MM/YYYY date in the text, as ISO")]
    pub data_competencia: Option<NaiveDate>,
    #[schemars(description = "First CNPJ in NN.NNN.NNN/NNNN-NN form")]
    pub cnpj_emitente: Option<String>,
}

impl StructuredEntry {
    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(StructuredEntry);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

/// Revenue and expense documents become a one-entry list; any other type
/// keeps only a metadata excerpt.
pub fn build_structured_data(
    config: &EngineConfig,
    text: &str,
    document_type: Option<DocumentType>,
) -> Result<Value> {
    let nature = document_type.and_then(|t| config.tables.default_natures.get(&t).copied());

    let (Some(document_type), Some(nature)) = (document_type, nature) else {
        let excerpt: String = text.trim().chars().take(EXCERPT_CHARS).collect();
        return Ok(json!({
            "metadata": {
                "document_type": document_type.map_or("DESCONHECIDO", |t| t.code()),
                "text_excerpt": excerpt,
            }
        }));
    };

    let entry = StructuredEntry {
        tipo_documento: document_type,
        natureza: nature,
        origem: config
            .tables
            .origins
            .get(&document_type)
            .cloned()
            .unwrap_or_else(|| "documento".to_string()),
        valor: largest_amount(text),
        data_competencia: first_date(text),
        cnpj_emitente: CNPJ.find(text).map(|m| m.as_str().to_string()),
    };
    debug!(
        "Structured {} text: valor={:?} data={:?}",
        document_type.code(),
        entry.valor,
        entry.data_competencia
    );

    Ok(Value::Array(vec![serde_json::to_value(entry)?]))
}

/// Largest amount whose match is not immediately followed by a digit or `/`.
fn largest_amount(text: &str) -> Option<f64> {
    CURRENCY
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let next = text[whole.end()..].chars().next();
            if matches!(next, Some(c) if c.is_ascii_digit() || c == '/') {
                return None;
            }
            parse_amount_str(caps.get(1)?.as_str())
        })
        .reduce(f64::max)
}

fn first_date(text: &str) -> Option<NaiveDate> {
    DATE.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%d/%m/%Y").ok())
}
