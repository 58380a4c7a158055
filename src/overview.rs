use crate::config::EngineConfig;
use crate::details::primary_entry;
use crate::extractor::AmountExtractor;
use crate::schema::{DocumentRecord, DocumentType};
use crate::utils::normalize_key;
use crate::value::parse_amount;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const TAXABLE_PROFIT_KEY: &str = "LUCRO_TRIBUTAVEL_DASN";

const REVENUE_TYPES: [DocumentType; 3] = [
    DocumentType::IssuedInvoice,
    DocumentType::IncomeStatement,
    DocumentType::BankStatement,
];

const EXPENSE_TYPES: [DocumentType; 2] =
    [DocumentType::ReceivedInvoice, DocumentType::DeductibleExpense];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SummaryBucket {
    pub total: f64,
    pub breakdown: BTreeMap<String, f64>,
}

impl SummaryBucket {
    pub fn add(&mut self, key: &str, amount: f64) {
        self.total += amount;
        *self.breakdown.entry(key.to_string()).or_insert(0.0) += amount;
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.breakdown.get(key).copied()
    }
}

/// Loose revenue/expense totals used as conversational context. Unlike the
/// revenue summary, every completed document counts regardless of period.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FinancialOverview {
    pub revenues: SummaryBucket,
    pub expenses: SummaryBucket,
    #[schemars(description = "Exempt and taxable profit read from annual declarations")]
    pub mei_info: BTreeMap<String, f64>,
}

impl FinancialOverview {
    pub fn has_revenues(&self) -> bool {
        self.revenues.total > 0.0
    }

    pub fn has_expenses(&self) -> bool {
        self.expenses.total > 0.0
    }

    pub fn has_mei_details(&self) -> bool {
        !self.mei_info.is_empty()
    }

    pub fn exempt_profit(&self) -> Option<f64> {
        self.mei_info.get("lucro_isento").copied()
    }

    pub fn taxable_profit(&self) -> Option<f64> {
        self.mei_info.get("lucro_tributavel").copied()
    }
}

pub fn build_overview(config: &EngineConfig, documents: &[DocumentRecord]) -> FinancialOverview {
    let extractor = AmountExtractor::new(&config.keywords);
    let mut overview = FinancialOverview::default();

    for document in documents.iter().filter(|d| d.is_completed()) {
        let Some(payload) = document.extracted_data.as_ref() else {
            continue;
        };
        let code = document.document_type.code();

        if REVENUE_TYPES.contains(&document.document_type) {
            for amount in extractor.extract_amounts(payload) {
                overview.revenues.add(code, amount);
            }
        }

        if EXPENSE_TYPES.contains(&document.document_type) {
            for amount in extractor.extract_amounts(payload) {
                overview.expenses.add(code, amount);
            }
        }

        if document.document_type == DocumentType::AnnualDeclaration {
            let profits = declared_profits(config, payload);
            if let Some(taxable) = profits.get("lucro_tributavel") {
                overview.revenues.add(TAXABLE_PROFIT_KEY, *taxable);
            }
            overview.mei_info.extend(profits);
        }
    }

    overview
}

fn declared_profits(config: &EngineConfig, payload: &Value) -> BTreeMap<String, f64> {
    let mut profits = BTreeMap::new();
    let Some(map) = primary_entry(payload) else {
        return profits;
    };

    for (key, value) in map {
        let normalized = normalize_key(key);
        let target = if config.keywords.exempt_profit_keys.contains(&normalized) {
            "lucro_isento"
        } else if config.keywords.taxable_profit_keys.contains(&normalized) {
            "lucro_tributavel"
        } else {
            continue;
        };
        if let Some(amount) = parse_amount(value) {
            profits.insert(target.to_string(), amount);
        }
    }

    profits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProcessingStatus;
    use serde_json::json;
    use uuid::Uuid;

    fn completed(document_type: DocumentType, data: Value) -> DocumentRecord {
        DocumentRecord::new(Uuid::new_v4(), document_type)
            .with_extracted_data(data)
            .with_status(ProcessingStatus::Completed)
    }

    #[test]
    fn test_aggregates_revenues_expenses_and_mei_details() {
        let config = EngineConfig::default();
        let documents = vec![
            completed(DocumentType::IssuedInvoice, json!([{"valor": 1500.0}, {"valor": "500,00"}])),
            completed(DocumentType::DeductibleExpense, json!([{"valor_total": "200,50"}])),
            completed(
                DocumentType::AnnualDeclaration,
                json!({"lucro_isento": "12.500,00", "lucro_tributável": "3.500,75"}),
            ),
        ];

        let overview = build_overview(&config, &documents);

        assert!((overview.revenues.total - (1500.0 + 500.0 + 3500.75)).abs() < 1e-9);
        assert!((overview.expenses.total - 200.5).abs() < 1e-9);
        assert_eq!(overview.exempt_profit(), Some(12500.0));
        assert_eq!(overview.taxable_profit(), Some(3500.75));
        assert_eq!(overview.revenues.get("NOTA_FISCAL_EMITIDA"), Some(2000.0));
        assert_eq!(overview.revenues.get(TAXABLE_PROFIT_KEY), Some(3500.75));
        assert!(overview.expenses.get("DESPESA_DEDUTIVEL").is_some());
        assert!(overview.has_mei_details());
    }

    #[test]
    fn test_skips_incomplete_and_auxiliary_documents() {
        let config = EngineConfig::default();
        let mut failed = completed(DocumentType::IssuedInvoice, json!({"valor": 100.0}));
        failed.status = ProcessingStatus::Failed;
        let documents = vec![
            failed,
            completed(DocumentType::IdentityDocument, json!({"valor": 10.0})),
        ];

        let overview = build_overview(&config, &documents);
        assert!(!overview.has_revenues());
        assert!(!overview.has_expenses());
        assert!(!overview.has_mei_details());
    }
}
