//! Locates monetary amounts inside payloads of unknown shape.
//!
//! A scalar is a candidate amount iff its immediate parent key is
//! target-bearing (contains one of the configured amount fragments) and is not
//! identifier-like. Sequence items take the key of the nearest enclosing map
//! entry as their parent; a map nested under a key is judged by its own keys.

use crate::config::ExtractionKeywords;
use crate::utils::{contains_any, contains_token, normalize_key};
use crate::value::{is_truthy, parse_amount};
use serde_json::Value;

pub struct AmountExtractor<'a> {
    keywords: &'a ExtractionKeywords,
}

impl<'a> AmountExtractor<'a> {
    pub fn new(keywords: &'a ExtractionKeywords) -> Self {
        Self { keywords }
    }

    /// Candidate amounts in depth-first payload order. When nothing matches,
    /// the payload itself is tried as a single scalar.
    pub fn extract_amounts(&self, payload: &Value) -> Vec<f64> {
        let amounts = self.visit(payload, None);
        if amounts.is_empty() {
            return parse_amount(payload).into_iter().collect();
        }
        amounts
    }

    fn visit(&self, node: &Value, parent_key: Option<&str>) -> Vec<f64> {
        match node {
            Value::Object(map) => {
                let mut amounts = Vec::new();
                for (key, value) in map {
                    let normalized = normalize_key(key);
                    amounts.extend(self.visit(value, Some(&normalized)));
                }
                amounts
            }
            Value::Array(items) => items
                .iter()
                .flat_map(|item| self.visit(item, parent_key))
                .collect(),
            scalar => match parent_key {
                Some(key) if self.is_target(key) && !self.is_identifier_like(key, scalar) => {
                    parse_amount(scalar).into_iter().collect()
                }
                _ => Vec::new(),
            },
        }
    }

    pub fn is_target(&self, normalized_key: &str) -> bool {
        contains_any(normalized_key, &self.keywords.amount_fragments)
    }

    /// Registration numbers, access keys and similar metadata that must never
    /// be read as money.
    pub fn is_identifier_like(&self, normalized_key: &str, value: &Value) -> bool {
        if contains_any(normalized_key, &self.keywords.identifier_fragments) {
            return true;
        }
        if self
            .keywords
            .identifier_tokens
            .iter()
            .any(|token| contains_token(normalized_key, token))
        {
            return true;
        }
        if let Value::String(text) = value {
            let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            return digits.len() >= self.keywords.identifier_min_digits
                && digits.chars().all(|c| c.is_ascii_digit());
        }
        false
    }
}

/// First parseable amount stored under a key containing any of `fragments`,
/// searched depth-first in payload order.
pub fn find_nested_amount(payload: &Value, fragments: &[String]) -> Option<f64> {
    match payload {
        Value::Object(map) => map.iter().find_map(|(key, value)| {
            let normalized = normalize_key(key);
            contains_any(&normalized, fragments)
                .then(|| parse_amount(value))
                .flatten()
                .or_else(|| find_nested_amount(value, fragments))
        }),
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_nested_amount(item, fragments)),
        _ => None,
    }
}

/// True if some key containing an operational fragment holds a truthy value
/// or a description mentioning operational revenue.
pub fn has_operational_flag(payload: &Value, fragments: &[String]) -> bool {
    match payload {
        Value::Object(map) => map.iter().any(|(key, value)| {
            let normalized = normalize_key(key);
            let flagged = contains_any(&normalized, fragments)
                && (is_truthy(value) || describes_operational_revenue(value));
            flagged || has_operational_flag(value, fragments)
        }),
        Value::Array(items) => items
            .iter()
            .any(|item| has_operational_flag(item, fragments)),
        _ => false,
    }
}

fn describes_operational_revenue(value: &Value) -> bool {
    match value {
        Value::String(text) => {
            let lowered = text.to_lowercase();
            lowered.contains("operacional") && lowered.contains("receita")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(payload: Value) -> Vec<f64> {
        let keywords = ExtractionKeywords::default();
        AmountExtractor::new(&keywords).extract_amounts(&payload)
    }

    fn total(payload: Value) -> f64 {
        extract(payload).iter().sum()
    }

    #[test]
    fn test_flat_entries() {
        assert_eq!(extract(json!([{"valor": 1500.0}, {"valor": "500,00"}])), vec![1500.0, 500.0]);
        assert_eq!(extract(json!([{"valor_total": "200,50"}])), vec![200.5]);
    }

    #[test]
    fn test_nested_amounts_in_complex_payloads() {
        let payload = json!({
            "itens": [
                {"detalhes": {"valor_unitario": "100,00"}},
                {"parcelas": [{"montante": 200}]},
            ],
            "resumo": [
                {"valores": {"quantia": "50,00"}},
                {"subtotais": [{"total_liquido": 25}]},
            ],
        });
        assert_eq!(total(payload), 375.0);
    }

    #[test]
    fn test_sequence_items_inherit_enclosing_key() {
        let payload = json!({
            "dados": {
                "itens": [
                    {"detalhes": {"valor": "1.200,00"}},
                    {"detalhes": {"montante": 300}},
                    {"detalhes": {"valores": ["150,25", 50]}},
                ],
                "resumo": {"subtotal": {"quantia_liquida": "99,75"}},
            }
        });
        assert!((total(payload) - 1800.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_immediate_ancestor_does_not_count() {
        let payload = json!({"valores": {"descricao": "Servico", "aliquota": 5}});
        assert!(extract(payload).is_empty());
    }

    #[test]
    fn test_identifier_like_values_are_skipped() {
        let payload = json!({
            "numero_nota_valor": 123456,
            "chave_total": "35240112345678000199550010000012341000012345",
            "total_id": 42,
            "valor_documento": "12345678",
            "valor": "350,00",
        });
        assert_eq!(extract(payload), vec![350.0]);
    }

    #[test]
    fn test_scalar_fallback() {
        assert_eq!(extract(json!("R$ 1.234,56")), vec![1234.56]);
        assert_eq!(extract(json!(99)), vec![99.0]);
        assert!(extract(json!({"descricao": "sem valores"})).is_empty());
        assert!(extract(json!(null)).is_empty());
    }

    #[test]
    fn test_find_nested_amount() {
        let fragments = vec!["lucro_tributavel".to_string(), "lucro".to_string()];
        let payload = json!({"declaracao": [{"ano": 2024}, {"Lucro Tributável": "3.500,75"}]});
        assert_eq!(find_nested_amount(&payload, &fragments), Some(3500.75));
        assert_eq!(find_nested_amount(&json!({"lucro": "n/a"}), &fragments), None);
    }

    #[test]
    fn test_operational_flag_detection() {
        let fragments = ExtractionKeywords::default().operational_fragments;
        assert!(has_operational_flag(&json!({"receita_operacional_mei": true}), &fragments));
        assert!(!has_operational_flag(&json!({"receita_operacional_mei": false}), &fragments));
        assert!(has_operational_flag(
            &json!({"fontes": [{"classificacao_mei_operacional": "sim"}]}),
            &fragments
        ));
        assert!(has_operational_flag(
            &json!({"tipo_receita_operacional": "Receita operacional do MEI"}),
            &fragments
        ));
        assert!(!has_operational_flag(&json!({"origem": "operacional"}), &fragments));
    }
}
