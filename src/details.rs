use crate::config::{EngineConfig, LabeledKey};
use crate::history::WRAPPED_VALUE_KEY;
use crate::schema::{DocumentRecord, DocumentType, ExtractedDataVersion, ProcessingStatus};
use crate::utils::capitalize;
use crate::value::{float_repr, format_currency, parse_amount, parse_date};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

const CNPJ_EXTRA_KEY: &str = "cnpj_emitente";

/// A document-type-specific sub-field shown next to the main value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtraField {
    pub label: String,
    pub valor: Option<String>,
    pub valor_formatado: Option<String>,
}

impl ExtraField {
    fn currency(label: &str, amount: f64) -> Self {
        Self {
            label: label.to_string(),
            valor: Some(float_repr(amount)),
            valor_formatado: Some(format_currency(amount)),
        }
    }

    fn text(label: &str, text: String) -> Self {
        Self {
            label: label.to_string(),
            valor: Some(text.clone()),
            valor_formatado: Some(text),
        }
    }

    /// Raw value when present, otherwise the formatted one.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.valor.iter().chain(self.valor_formatado.iter()).map(String::as_str)
    }
}

/// Canonical, read-only view of a document. Rebuilt on every read.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DocumentDetails {
    pub id: Uuid,
    pub document_type: DocumentType,
    pub document_label: String,
    pub status: ProcessingStatus,
    pub source_group: String,
    pub source_group_label: String,
    pub origem_legivel: String,
    pub valor: Option<f64>,
    pub valor_formatado: Option<String>,
    #[schemars(description = "ISO date (YYYY-MM-DD)")]
    pub data: Option<NaiveDate>,
    #[schemars(description = "Date as DD/MM/YYYY")]
    pub data_formatada: Option<String>,
    pub natureza: Option<String>,
    pub categoria: Option<String>,
    pub resumo: String,
    pub extras: BTreeMap<String, ExtraField>,
    pub raw_extracted_data: Option<Value>,
    pub history: Vec<ExtractedDataVersion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentDetails {
    pub fn extra(&self, key: &str) -> Option<&ExtraField> {
        self.extras.get(key)
    }
}

pub struct DocumentNormalizer<'a> {
    config: &'a EngineConfig,
}

impl<'a> DocumentNormalizer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn build_document_details(&self, document: &DocumentRecord) -> DocumentDetails {
        let keywords = &self.config.keywords;
        let document_type = document.document_type;

        let empty = Map::new();
        let entry = document
            .extracted_data
            .as_ref()
            .and_then(primary_entry)
            .unwrap_or(&empty);

        let valor = extract_first(entry, &keywords.value_keys).and_then(parse_amount);
        let valor_formatado = valor.map(format_currency);

        let data = extract_first(entry, &keywords.date_keys).and_then(parse_date);
        let data_formatada = data.map(|d| d.format("%d/%m/%Y").to_string());

        let natureza = extract_first(entry, &keywords.nature_keys)
            .and_then(non_empty_text)
            .map(|nature| nature.to_lowercase())
            .or_else(|| {
                self.config
                    .tables
                    .default_natures
                    .get(&document_type)
                    .map(|nature| nature.as_str().to_string())
            });

        let categoria = extract_first(entry, &keywords.category_keys)
            .and_then(non_empty_text)
            .or_else(|| {
                self.config
                    .tables
                    .default_categories
                    .get(&document_type)
                    .cloned()
            });

        let document_label = self.config.document_label(document_type);
        let group = self.config.source_group(document_type);

        let mut extras = BTreeMap::new();
        if document_type == DocumentType::AnnualDeclaration {
            extras.extend(declaration_extras(
                entry,
                &keywords.declaration_currency_fields,
                &keywords.declaration_text_fields,
            ));
        }
        if let Some(cnpj) = extract_first(entry, &keywords.cnpj_keys).and_then(non_empty_text) {
            extras
                .entry(CNPJ_EXTRA_KEY.to_string())
                .or_insert_with(|| ExtraField::text("CNPJ", cnpj));
        }

        let resumo = build_summary(
            document_type,
            &document_label,
            data_formatada.as_deref(),
            natureza.as_deref(),
            valor_formatado.as_deref(),
            &extras,
        );

        DocumentDetails {
            id: document.id,
            document_type,
            document_label,
            status: document.status,
            source_group: group.slug.clone(),
            source_group_label: group.label.clone(),
            origem_legivel: format!("Informações extraídas de {}", group.label),
            valor,
            valor_formatado,
            data,
            data_formatada,
            natureza,
            categoria,
            resumo,
            extras,
            raw_extracted_data: document.extracted_data.clone(),
            history: document.extracted_data_history.clone(),
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// The map the normalizer reads fields from: the first map of an `entries`
/// list, the first map of a top-level list (also when wrapped by
/// [`flatten_payload`](crate::history::flatten_payload)), or the payload map itself.
pub fn primary_entry(payload: &Value) -> Option<&Map<String, Value>> {
    match payload {
        Value::Object(map) => {
            if let Some(list) = wrapped_list(map) {
                return list.iter().find_map(Value::as_object);
            }
            match map.get("entries") {
                Some(Value::Array(items)) => items.iter().find_map(Value::as_object).or(Some(map)),
                _ => Some(map),
            }
        }
        Value::Array(items) => items.iter().find_map(Value::as_object),
        _ => None,
    }
}

/// Writes `field` into the primary entry of a flattened payload and returns
/// the value it replaced.
pub fn set_primary_field(
    payload: &mut Map<String, Value>,
    field: &str,
    value: Value,
) -> Option<Value> {
    let list_key = if wrapped_list(payload).is_some() {
        WRAPPED_VALUE_KEY
    } else {
        "entries"
    };
    if let Some(Value::Array(items)) = payload.get_mut(list_key) {
        if let Some(entry) = items.iter_mut().find_map(Value::as_object_mut) {
            return entry.insert(field.to_string(), value);
        }
    }
    payload.insert(field.to_string(), value)
}

fn wrapped_list(map: &Map<String, Value>) -> Option<&Vec<Value>> {
    if map.len() != 1 {
        return None;
    }
    map.get(WRAPPED_VALUE_KEY).and_then(Value::as_array)
}

/// Value of the first synonym present in `entry`. Exact key matches win over
/// case-insensitive ones.
pub fn extract_first<'v>(entry: &'v Map<String, Value>, keys: &[String]) -> Option<&'v Value> {
    keys.iter().find_map(|key| {
        entry.get(key).or_else(|| {
            let wanted = key.to_lowercase();
            entry
                .iter()
                .find(|(existing, _)| existing.to_lowercase() == wanted)
                .map(|(_, value)| value)
        })
    })
}

/// Text rendering of a scalar, `None` for null, containers and blank strings.
fn non_empty_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn declaration_extras(
    entry: &Map<String, Value>,
    currency_fields: &[LabeledKey],
    text_fields: &[LabeledKey],
) -> BTreeMap<String, ExtraField> {
    let mut extras = BTreeMap::new();

    for field in currency_fields {
        let amount = extract_first(entry, std::slice::from_ref(&field.key)).and_then(parse_amount);
        if let Some(amount) = amount {
            extras.insert(field.key.clone(), ExtraField::currency(&field.label, amount));
        }
    }

    for field in text_fields {
        let text = extract_first(entry, std::slice::from_ref(&field.key)).and_then(non_empty_text);
        if let Some(text) = text {
            extras.insert(field.key.clone(), ExtraField::text(&field.label, text));
        }
    }

    extras
}

fn build_summary(
    document_type: DocumentType,
    label: &str,
    date: Option<&str>,
    nature: Option<&str>,
    value: Option<&str>,
    extras: &BTreeMap<String, ExtraField>,
) -> String {
    let base = match date {
        Some(date) => format!("{} em {}", label, date),
        None => label.to_string(),
    };

    let detail = if document_type == DocumentType::AnnualDeclaration {
        let formatted = |keys: [&str; 2]| {
            keys.iter()
                .filter_map(|key| extras.get(*key))
                .find_map(|extra| extra.valor_formatado.clone())
        };
        let mut parts = Vec::new();
        if let Some(exempt) = formatted(["lucro_isento", "lucro_isento_mei"]) {
            parts.push(format!("Lucro isento: {}", exempt));
        }
        if let Some(taxable) = formatted(["lucro_tributavel", "lucro_tributavel_mei"]) {
            parts.push(format!("Lucro tributável: {}", taxable));
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    } else {
        match (nature, value) {
            (Some(nature), Some(value)) => Some(format!("{}: {}", capitalize(nature), value)),
            (None, Some(value)) => Some(format!("Valor: {}", value)),
            _ => None,
        }
    };

    match detail {
        Some(detail) if base.is_empty() => detail,
        Some(detail) => format!("{} – {}", base, detail),
        None => base,
    }
}
