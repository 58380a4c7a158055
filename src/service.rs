use crate::applier::{CorrectionApplier, CorrectionOutcome};
use crate::config::EngineConfig;
use crate::corrections::CorrectionCommand;
use crate::details::{DocumentDetails, DocumentNormalizer};
use crate::error::{EngineError, Result};
use crate::ingestion::build_structured_data;
use crate::overview::{build_overview, FinancialOverview};
use crate::revenue::{MonthlyRevenueSummary, RevenueAggregator, RevenueSummary};
use crate::schema::{AuthorType, DocumentRecord, DocumentType, ProcessingStatus};
use crate::store::DocumentStore;
use chrono::{Datelike, Utc};
use log::{info, warn};
use serde_json::Value;
use uuid::Uuid;

/// Entry point used by the outer API layer. Every call reads fresh data from
/// the store; nothing is cached between calls.
pub struct DocumentService<S: DocumentStore> {
    store: S,
    config: EngineConfig,
}

impl<S: DocumentStore> DocumentService<S> {
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn with_default_config(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get_job_details(&self, job_id: Uuid, user_id: Uuid) -> Result<DocumentDetails> {
        let document = self.fetch_owned(job_id, user_id)?;
        Ok(self.details(&document))
    }

    /// Replaces the extracted payload with a user edit and records a version
    /// when it differs from the current one.
    pub fn update_extracted_data(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        payload: Value,
    ) -> Result<DocumentDetails> {
        if !payload.is_object() {
            return Err(EngineError::InvalidInput(
                "extracted data must be a JSON object".to_string(),
            ));
        }

        let mut document = self.fetch_owned(job_id, user_id)?;
        match document.record_version(&payload, AuthorType::User, Some(user_id)) {
            Some(version) => info!("Document {} updated to version {}", job_id, version),
            None => info!("Document {} unchanged by update", job_id),
        }

        let saved = self.store.save(document)?;
        Ok(self.details(&saved))
    }

    pub fn get_annual_revenue_summary(
        &self,
        user_id: Uuid,
        year: Option<i32>,
    ) -> Result<RevenueSummary> {
        let year = year.unwrap_or_else(|| Utc::now().year());
        info!("Building annual revenue summary for user {} ({})", user_id, year);

        let documents = self.store.list_by_user(user_id, None)?;
        Ok(RevenueAggregator::new(&self.config).annual_summary(&documents, year))
    }

    pub fn get_monthly_revenue_summary(
        &self,
        user_id: Uuid,
        year: Option<i32>,
        month: Option<u32>,
    ) -> Result<MonthlyRevenueSummary> {
        let today = Utc::now();
        let year = year.unwrap_or_else(|| today.year());
        let month = month.unwrap_or_else(|| today.month());
        info!(
            "Building monthly revenue summary for user {} ({:02}/{})",
            user_id, month, year
        );

        let aggregator = RevenueAggregator::new(&self.config);
        if !(1..=12).contains(&month) {
            return aggregator.monthly_summary(&[], year, month);
        }
        let documents = self.store.list_by_user(user_id, None)?;
        aggregator.monthly_summary(&documents, year, month)
    }

    pub fn list_user_documents(
        &self,
        user_id: Uuid,
        document_type: Option<DocumentType>,
    ) -> Result<Vec<DocumentRecord>> {
        self.store.list_by_user(user_id, document_type)
    }

    /// Stores the extraction result of a finished OCR job as a system-authored
    /// version and marks the document completed.
    pub fn complete_extraction(
        &self,
        job_id: Uuid,
        payload: Value,
        extracted_text: Option<String>,
    ) -> Result<DocumentDetails> {
        let mut document = self.fetch(job_id)?;

        document.record_version(&payload, AuthorType::System, None);
        document.status = ProcessingStatus::Completed;
        document.error_message = None;
        if extracted_text.is_some() {
            document.extracted_text = extracted_text;
        }
        document.updated_at = Utc::now();

        let saved = self.store.save(document)?;
        info!("Extraction of document {} completed", job_id);
        Ok(self.details(&saved))
    }

    /// Structures raw OCR text for the document's type and completes the job
    /// with it.
    pub fn complete_from_text(&self, job_id: Uuid, text: &str) -> Result<DocumentDetails> {
        let document = self.fetch(job_id)?;
        let payload = build_structured_data(&self.config, text, Some(document.document_type))?;
        self.complete_extraction(job_id, payload, Some(text.to_string()))
    }

    pub fn fail_extraction(&self, job_id: Uuid, message: &str) -> Result<()> {
        let mut document = self.fetch(job_id)?;
        document.status = ProcessingStatus::Failed;
        document.error_message = Some(message.to_string());
        document.updated_at = Utc::now();

        self.store.save(document)?;
        warn!("Extraction of document {} failed: {}", job_id, message);
        Ok(())
    }

    pub fn financial_overview(&self, user_id: Uuid) -> Result<FinancialOverview> {
        let documents = self.store.list_by_user(user_id, None)?;
        Ok(build_overview(&self.config, &documents))
    }

    pub fn apply_correction(
        &self,
        user_id: Uuid,
        command: &CorrectionCommand,
    ) -> Result<CorrectionOutcome> {
        CorrectionApplier::new(&self.store, &self.config.keywords).apply(user_id, command)
    }

    fn details(&self, document: &DocumentRecord) -> DocumentDetails {
        DocumentNormalizer::new(&self.config).build_document_details(document)
    }

    fn fetch(&self, job_id: Uuid) -> Result<DocumentRecord> {
        self.store
            .get(job_id)?
            .ok_or(EngineError::NotFound(job_id))
    }

    fn fetch_owned(&self, job_id: Uuid, user_id: Uuid) -> Result<DocumentRecord> {
        let document = self.fetch(job_id)?;
        if document.user_id != user_id {
            return Err(EngineError::Forbidden {
                document_id: job_id,
                user_id,
            });
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use serde_json::json;

    fn service_with(document: DocumentRecord) -> DocumentService<InMemoryDocumentStore> {
        DocumentService::with_default_config(InMemoryDocumentStore::with_documents([document]))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig {
            annual_ceiling: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            DocumentService::new(InMemoryDocumentStore::new(), config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_update_requires_object_payload() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::IssuedInvoice);
        let id = document.id;
        let service = service_with(document);

        let result = service.update_extracted_data(id, user, json!([1, 2]));
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_complete_and_fail_extraction() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::IssuedInvoice);
        let id = document.id;
        let service = service_with(document);

        let details = service
            .complete_extraction(id, json!([{"valor": 80.0}]), Some("texto".to_string()))
            .unwrap();
        assert_eq!(details.status, ProcessingStatus::Completed);
        assert_eq!(details.history.len(), 1);
        assert_eq!(details.history[0].author_type, AuthorType::System);
        assert_eq!(details.valor, Some(80.0));
        assert_eq!(details.raw_extracted_data, Some(json!({"value": [{"valor": 80.0}]})));

        service.fail_extraction(id, "OCR indisponível").unwrap();
        let stored = service.store().get(id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("OCR indisponível"));
        assert_eq!(stored.extracted_data_history.len(), 1);

        assert!(matches!(
            service.fail_extraction(Uuid::new_v4(), "x"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_complete_from_text() {
        let user = Uuid::new_v4();
        let document = DocumentRecord::new(user, DocumentType::DeductibleExpense);
        let id = document.id;
        let service = service_with(document);

        let details = service
            .complete_from_text(id, "Consulta médica em 12/04/2024 no valor de R$ 420,00")
            .unwrap();
        let stored = service.store().get(id).unwrap().unwrap();
        assert_eq!(
            stored.extracted_text.as_deref(),
            Some("Consulta médica em 12/04/2024 no valor de R$ 420,00")
        );
        assert_eq!(details.natureza.as_deref(), Some("despesa"));
        assert_eq!(details.valor, Some(420.0));
        assert_eq!(details.data_formatada.as_deref(), Some("12/04/2024"));
    }
}
