use crate::utils::titleize;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
pub enum DocumentType {
    #[serde(rename = "NOTA_FISCAL_EMITIDA")]
    #[schemars(description = "Invoice issued by the micro-entrepreneur (revenue)")]
    IssuedInvoice,

    #[serde(rename = "NOTA_FISCAL_RECEBIDA")]
    #[schemars(description = "Invoice received from a supplier (expense)")]
    ReceivedInvoice,

    #[serde(rename = "INFORME_BANCARIO")]
    #[schemars(description = "Bank statement")]
    BankStatement,

    #[serde(rename = "INFORME_RENDIMENTOS")]
    #[schemars(description = "Income statement; counts as revenue only when flagged operational")]
    IncomeStatement,

    #[serde(rename = "DESPESA_DEDUTIVEL")]
    #[schemars(description = "Receipt of a deductible expense")]
    DeductibleExpense,

    #[serde(rename = "DASN_SIMEI")]
    #[schemars(description = "Annual MEI declaration (DASN-SIMEI) with exempt and taxable profit")]
    AnnualDeclaration,

    #[serde(rename = "RECIBO_IR_ANTERIOR")]
    #[schemars(description = "Receipt of a prior income tax filing")]
    PriorTaxReceipt,

    #[serde(rename = "DOC_IDENTIFICACAO")]
    #[schemars(description = "Identity document")]
    IdentityDocument,

    #[serde(rename = "COMPROVANTE_ENDERECO")]
    #[schemars(description = "Proof of address")]
    AddressProof,
}

impl DocumentType {
    pub const ALL: [DocumentType; 9] = [
        DocumentType::IssuedInvoice,
        DocumentType::ReceivedInvoice,
        DocumentType::BankStatement,
        DocumentType::IncomeStatement,
        DocumentType::DeductibleExpense,
        DocumentType::AnnualDeclaration,
        DocumentType::PriorTaxReceipt,
        DocumentType::IdentityDocument,
        DocumentType::AddressProof,
    ];

    /// Wire code, e.g. `NOTA_FISCAL_EMITIDA`.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::IssuedInvoice => "NOTA_FISCAL_EMITIDA",
            DocumentType::ReceivedInvoice => "NOTA_FISCAL_RECEBIDA",
            DocumentType::BankStatement => "INFORME_BANCARIO",
            DocumentType::IncomeStatement => "INFORME_RENDIMENTOS",
            DocumentType::DeductibleExpense => "DESPESA_DEDUTIVEL",
            DocumentType::AnnualDeclaration => "DASN_SIMEI",
            DocumentType::PriorTaxReceipt => "RECIBO_IR_ANTERIOR",
            DocumentType::IdentityDocument => "DOC_IDENTIFICACAO",
            DocumentType::AddressProof => "COMPROVANTE_ENDERECO",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Fallback label when no configured label exists.
    pub fn title(&self) -> String {
        titleize(self.code())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum ProcessingStatus {
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "processando")]
    Processing,
    #[serde(rename = "concluido")]
    Completed,
    #[serde(rename = "falhou")]
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum Nature {
    #[serde(rename = "receita")]
    Revenue,
    #[serde(rename = "despesa")]
    Expense,
}

impl Nature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Nature::Revenue => "receita",
            Nature::Expense => "despesa",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    System,
    User,
}

/// A single leaf-level difference between two snapshots.
///
/// `None` means the key was absent on that side; `Some(Value::Null)` means it
/// was present with an explicit null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FieldChange {
    #[schemars(description = "Dotted path of the changed leaf, or __root__ for scalar payloads")]
    pub field_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedDataVersion {
    #[schemars(description = "1-based, strictly increasing version number")]
    pub version: u32,

    pub author_type: AuthorType,

    #[serde(default)]
    pub author_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    #[schemars(description = "Full normalized payload as of this version")]
    pub data_snapshot: Map<String, Value>,

    #[serde(default)]
    pub changes: Vec<FieldChange>,
}

/// A processed document as kept by the external store. The engine reads it
/// and mutates only `extracted_data`, its history, the status fields and
/// `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DocumentRecord {
    pub id: Uuid,

    pub user_id: Uuid,

    pub document_type: DocumentType,

    pub status: ProcessingStatus,

    #[schemars(description = "Schema-free payload produced by the OCR/LLM extraction step")]
    #[serde(default)]
    pub extracted_data: Option<Value>,

    #[schemars(description = "Raw OCR text of the document")]
    #[serde(default)]
    pub extracted_text: Option<String>,

    #[schemars(description = "Append-only audit trail of the extracted payload")]
    #[serde(default)]
    pub extracted_data_history: Vec<ExtractedDataVersion>,

    #[serde(default)]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(user_id: Uuid, document_type: DocumentType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            document_type,
            status: ProcessingStatus::Processing,
            extracted_data: None,
            extracted_text: None,
            extracted_data_history: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_extracted_data(mut self, data: Value) -> Self {
        self.extracted_data = Some(data);
        self
    }

    #[must_use]
    pub fn with_extracted_text(mut self, text: impl Into<String>) -> Self {
        self.extracted_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }

    pub fn latest_version(&self) -> u32 {
        self.extracted_data_history
            .last()
            .map(|v| v.version)
            .unwrap_or(0)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DocumentRecord)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_type_codes_round_trip() {
        for doc_type in DocumentType::ALL {
            assert_eq!(DocumentType::from_code(doc_type.code()), Some(doc_type));
            let encoded = serde_json::to_value(doc_type).unwrap();
            assert_eq!(encoded, json!(doc_type.code()));
        }
        assert_eq!(DocumentType::from_code("dasn_simei"), Some(DocumentType::AnnualDeclaration));
        assert_eq!(DocumentType::from_code("OUTRO"), None);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(ProcessingStatus::Completed).unwrap(), json!("concluido"));
        assert_eq!(serde_json::to_value(AuthorType::User).unwrap(), json!("user"));
        assert_eq!(serde_json::to_value(Nature::Expense).unwrap(), json!("despesa"));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = DocumentRecord::schema_as_json().unwrap();
        assert!(schema_json.contains("extracted_data_history"));
        assert!(schema_json.contains("NOTA_FISCAL_EMITIDA"));
    }

    #[test]
    fn test_absent_change_values_are_omitted() {
        let change = FieldChange {
            field_path: "valor".to_string(),
            previous_value: None,
            current_value: Some(json!(150.0)),
        };
        let encoded = serde_json::to_value(&change).unwrap();
        assert_eq!(encoded, json!({"field_path": "valor", "current_value": 150.0}));
    }
}
