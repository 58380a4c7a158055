//! # MEI Financial Engine
//!
//! Turns the schema-free payloads produced by OCR/LLM extraction of Brazilian
//! MEI (micro-entrepreneur) tax documents into auditable financial facts.
//!
//! ## Core Concepts
//!
//! - **Document Details**: A canonical, read-only view (value, date, nature, category,
//!   summary) rebuilt from whatever shape the extraction payload has
//! - **Revenue Summary**: Annual and monthly gross revenue against the MEI ceilings,
//!   with a limit alert once usage reaches the configured threshold
//! - **Version History**: Every edit to extracted data is diffed at leaf level and
//!   appended as a numbered, attributed version
//! - **Chat Corrections**: Portuguese chat messages such as "corrija o valor da
//!   despesa para R$ 300" become structured corrections applied to the latest
//!   document of that type
//!
//! ## Example
//!
//! ```rust,ignore
//! use mei_financial_engine::*;
//! use serde_json::json;
//!
//! let user = uuid::Uuid::new_v4();
//! let invoice = DocumentRecord::new(user, DocumentType::IssuedInvoice)
//!     .with_extracted_data(json!({"valor": "1.500,00", "data_emissao": "2025-03-10"}))
//!     .with_status(ProcessingStatus::Completed);
//!
//! let service = DocumentService::with_default_config(
//!     InMemoryDocumentStore::with_documents([invoice]),
//! );
//! let summary = service.get_annual_revenue_summary(user, Some(2025)).unwrap();
//! assert_eq!(summary.faturamento_total, 1500.0);
//!
//! let reply = ChatService::new(&service)
//!     .answer_question(user, "Corrija o valor da nota fiscal para R$ 1.800,00")
//!     .unwrap();
//! println!("{}", reply.answer);
//! ```

pub mod applier;
pub mod chat;
pub mod config;
pub mod corrections;
pub mod details;
pub mod error;
pub mod extractor;
pub mod history;
pub mod ingestion;
pub mod overview;
pub mod revenue;
pub mod schema;
pub mod service;
pub mod store;
pub mod utils;
pub mod value;

pub use applier::{CorrectionApplier, CorrectionOutcome, CorrectionResult, FailureReason};
pub use chat::{
    ChatReply, ChatService, ContextChunk, ContextRetriever, UsageEvent, UsageRecorder,
    DEFAULT_TOP_K,
};
pub use config::{
    CorrectionVocabulary, DocumentTables, EngineConfig, ExtractionKeywords, LabeledKey,
    SourceGroup,
};
pub use corrections::{CorrectionCommand, CorrectionIntent, CorrectionParser, ValueKind};
pub use details::{DocumentDetails, DocumentNormalizer, ExtraField};
pub use error::{EngineError, Result};
pub use extractor::AmountExtractor;
pub use history::{diff, flatten_payload};
pub use ingestion::{build_structured_data, StructuredEntry};
pub use overview::{build_overview, FinancialOverview, SummaryBucket};
pub use revenue::{
    AlertLevel, LimitAlert, MonthlyRevenueSummary, ResolvedPeriod, RevenueAggregator,
    RevenueSource, RevenueSummary, SourceBreakdown,
};
pub use schema::*;
pub use service::DocumentService;
pub use store::{DocumentStore, InMemoryDocumentStore};
pub use value::{format_currency, parse_amount, parse_date};

/// Canonical view of a document under the default configuration.
pub fn document_details(document: &DocumentRecord) -> DocumentDetails {
    let config = EngineConfig::default();
    DocumentNormalizer::new(&config).build_document_details(document)
}

/// Annual revenue summary of a document set under the default configuration.
pub fn annual_revenue_summary(documents: &[DocumentRecord], year: i32) -> RevenueSummary {
    let config = EngineConfig::default();
    RevenueAggregator::new(&config).annual_summary(documents, year)
}
