use crate::config::ExtractionKeywords;
use crate::corrections::CorrectionCommand;
use crate::details::{extract_first, primary_entry, set_primary_field};
use crate::error::Result;
use crate::history::flatten_payload;
use crate::schema::{AuthorType, DocumentType};
use crate::store::DocumentStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionResult {
    pub document_id: Uuid,
    pub document_type: DocumentType,
    pub field: String,
    pub previous_value: Option<Value>,
    pub current_value: Value,
    /// Version holding the corrected value.
    pub version: u32,
    /// False when the document already held the requested value.
    pub changed: bool,
    pub data_snapshot: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DocumentNotFound,
    ApplyFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::DocumentNotFound => "document_not_found",
            FailureReason::ApplyFailed => "apply_failed",
        }
    }
}

/// Result of applying a correction. Failures are values, the conversation
/// carries on either way.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    Applied(CorrectionResult),
    NotApplied {
        reason: FailureReason,
        document_type: DocumentType,
        field: String,
        document_id: Option<Uuid>,
    },
}

impl CorrectionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CorrectionOutcome::Applied(_))
    }
}

pub struct CorrectionApplier<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    keywords: &'a ExtractionKeywords,
}

impl<'a, S: DocumentStore + ?Sized> CorrectionApplier<'a, S> {
    pub fn new(store: &'a S, keywords: &'a ExtractionKeywords) -> Self {
        Self { store, keywords }
    }

    /// Writes the command's value into the latest document of its type and
    /// records a user-authored version.
    pub fn apply(&self, user_id: Uuid, command: &CorrectionCommand) -> Result<CorrectionOutcome> {
        let Some(mut document) = self
            .store
            .find_latest_by_type(user_id, command.document_type)?
        else {
            info!(
                "No {} document found for user {} to correct",
                command.document_type.code(),
                user_id
            );
            return Ok(self.not_applied(FailureReason::DocumentNotFound, command, None));
        };

        let original = document.extracted_data.clone().unwrap_or(Value::Null);
        let previous_value = primary_entry(&original)
            .and_then(|entry| extract_first(entry, &self.lookup_keys(&command.field)))
            .cloned();

        let mut payload = flatten_payload(&original);
        set_primary_field(&mut payload, &command.field, command.value.clone());

        let recorded =
            document.record_version(&Value::Object(payload), AuthorType::User, Some(user_id));

        if recorded.is_some() {
            if let Err(err) = self.store.save(document.clone()) {
                warn!("Failed to save correction on document {}: {}", document.id, err);
                return Ok(self.not_applied(
                    FailureReason::ApplyFailed,
                    command,
                    Some(document.id),
                ));
            }
            info!(
                "Applied correction of '{}' on document {}",
                command.field, document.id
            );
        }

        let data_snapshot = document
            .extracted_data_history
            .last()
            .map(|version| version.data_snapshot.clone())
            .unwrap_or_else(|| flatten_payload(&original));

        Ok(CorrectionOutcome::Applied(CorrectionResult {
            document_id: document.id,
            document_type: document.document_type,
            field: command.field.clone(),
            previous_value,
            current_value: command.value.clone(),
            version: recorded.unwrap_or_else(|| document.latest_version()),
            changed: recorded.is_some(),
            data_snapshot,
        }))
    }

    /// The field itself, then the synonyms the normalizer reads it from.
    fn lookup_keys(&self, field: &str) -> Vec<String> {
        let synonyms: &[String] = match field {
            "valor" => &self.keywords.value_keys,
            "data" => &self.keywords.date_keys,
            "natureza" => &self.keywords.nature_keys,
            "categoria" => &self.keywords.category_keys,
            _ => &[],
        };
        std::iter::once(field.to_string())
            .chain(synonyms.iter().cloned())
            .collect()
    }

    fn not_applied(
        &self,
        reason: FailureReason,
        command: &CorrectionCommand,
        document_id: Option<Uuid>,
    ) -> CorrectionOutcome {
        CorrectionOutcome::NotApplied {
            reason,
            document_type: command.document_type,
            field: command.field.clone(),
            document_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{CorrectionIntent, ValueKind};
    use crate::error::EngineError;
    use crate::schema::{DocumentRecord, ProcessingStatus};
    use crate::store::InMemoryDocumentStore;
    use serde_json::json;

    fn value_command(document_type: DocumentType, amount: f64) -> CorrectionCommand {
        CorrectionCommand {
            document_type,
            field: "valor".to_string(),
            value: json!(amount),
            value_text: format!("R$ {}", amount),
            value_kind: ValueKind::Currency,
            intent: CorrectionIntent::UpdateValue,
        }
    }

    fn apply(
        store: &impl DocumentStore,
        user: Uuid,
        command: &CorrectionCommand,
    ) -> CorrectionOutcome {
        let keywords = ExtractionKeywords::default();
        CorrectionApplier::new(store, &keywords)
            .apply(user, command)
            .unwrap()
    }

    struct ReadOnlyStore(InMemoryDocumentStore);

    impl DocumentStore for ReadOnlyStore {
        fn get(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
            self.0.get(id)
        }

        fn save(&self, _document: DocumentRecord) -> Result<DocumentRecord> {
            Err(EngineError::Store("read-only".to_string()))
        }

        fn list_by_user(
            &self,
            user_id: Uuid,
            document_type: Option<DocumentType>,
        ) -> Result<Vec<DocumentRecord>> {
            self.0.list_by_user(user_id, document_type)
        }
    }

    #[test]
    fn test_applies_and_versions_correction() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::DeductibleExpense)
            .with_extracted_data(json!({"entries": [{"valor": "250,00", "categoria": "saúde"}]}))
            .with_status(ProcessingStatus::Completed);
        let id = document.id;
        let store = InMemoryDocumentStore::with_documents([document]);

        let outcome = apply(&store, user, &value_command(DocumentType::DeductibleExpense, 300.0));

        let CorrectionOutcome::Applied(result) = outcome else {
            panic!("correction should apply");
        };
        assert_eq!(result.document_id, id);
        assert_eq!(result.previous_value, Some(json!("250,00")));
        assert_eq!(result.current_value, json!(300.0));
        assert_eq!(result.version, 1);
        assert!(result.changed);
        assert_eq!(
            Value::Object(result.data_snapshot),
            json!({"entries": [{"valor": 300.0, "categoria": "saúde"}]})
        );

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.extracted_data_history.len(), 1);
        assert_eq!(stored.extracted_data_history[0].author_type, AuthorType::User);
        assert_eq!(stored.extracted_data_history[0].changes[0].field_path, "entries");
    }

    #[test]
    fn test_previous_value_follows_value_synonyms() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::IssuedInvoice)
            .with_extracted_data(json!({
                "valor_total": "1.200,00",
                "data_emissao": "2025-01-10"
            }));
        let store = InMemoryDocumentStore::with_documents([document]);

        let outcome = apply(&store, user, &value_command(DocumentType::IssuedInvoice, 1300.0));
        let CorrectionOutcome::Applied(result) = outcome else {
            panic!("correction should apply");
        };
        assert_eq!(result.previous_value, Some(json!("1.200,00")));
        assert_eq!(result.data_snapshot.get("valor"), Some(&json!(1300.0)));
        assert!(result.changed);
    }

    #[test]
    fn test_repeated_correction_is_unchanged() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::IssuedInvoice)
            .with_extracted_data(json!({"valor": 300.0}));
        let store = InMemoryDocumentStore::with_documents([document]);

        let outcome = apply(&store, user, &value_command(DocumentType::IssuedInvoice, 300.0));
        match outcome {
            CorrectionOutcome::Applied(result) => {
                assert!(!result.changed);
                assert_eq!(result.version, 0);
                assert_eq!(result.previous_value, Some(json!(300.0)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_missing_document_is_not_an_error() {
        let store = InMemoryDocumentStore::new();
        let command = value_command(DocumentType::DeductibleExpense, 1.0);
        let outcome = apply(&store, Uuid::new_v4(), &command);
        assert_eq!(
            outcome,
            CorrectionOutcome::NotApplied {
                reason: FailureReason::DocumentNotFound,
                document_type: DocumentType::DeductibleExpense,
                field: "valor".to_string(),
                document_id: None,
            }
        );
    }

    #[test]
    fn test_save_failure_is_reported_as_apply_failed() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::IssuedInvoice)
            .with_extracted_data(json!({"valor": 10.0}));
        let id = document.id;
        let store = ReadOnlyStore(InMemoryDocumentStore::with_documents([document]));

        let outcome = apply(&store, user, &value_command(DocumentType::IssuedInvoice, 20.0));
        assert!(!outcome.is_applied());
        match outcome {
            CorrectionOutcome::NotApplied {
                reason, document_id, ..
            } => {
                assert_eq!(reason, FailureReason::ApplyFailed);
                assert_eq!(document_id, Some(id));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
