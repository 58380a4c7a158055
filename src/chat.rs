//! Conversational entry point: either applies a correction typed in chat or
//! answers with the user's overview and the most relevant document excerpts.

use crate::applier::CorrectionOutcome;
use crate::corrections::{CorrectionCommand, CorrectionParser};
use crate::error::Result;
use crate::overview::{FinancialOverview, TAXABLE_PROFIT_KEY};
use crate::revenue::RevenueSource;
use crate::service::DocumentService;
use crate::schema::DocumentRecord;
use crate::store::DocumentStore;
use crate::utils::normalize_text;
use crate::value::format_currency;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

pub const DEFAULT_TOP_K: usize = 5;
const EXCERPT_LIMIT: usize = 220;
const USAGE_OPERATION: &str = "chat";
const DOCUMENT_SOURCE: &str = "mongo_document";

const NOT_FOUND_MESSAGE: &str = "Não encontrei nenhum documento desse tipo para ajustar agora. \
     Confira se o arquivo já foi processado e tente novamente.";
const APPLY_FAILED_MESSAGE: &str =
    "Não consegui aplicar essa correção porque o documento não foi localizado.";
const NO_DATA_INTRO: &str =
    "Não localizei dados consolidados dos seus documentos. Ainda assim, segue uma orientação geral.";
const NO_CHUNKS_TEXT: &str =
    "Não localizamos trechos específicos dos seus documentos com o perfil buscado.";
const GUIDANCE: &str = "Analise se os valores acima estão coerentes com suas obrigações fiscais e, \
     em caso de dúvida, considere registrar todas as despesas e receitas na plataforma ou consultar um contador.";

/// A retrieved piece of document text with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextChunk {
    pub id: String,
    pub source: String,
    pub source_id: Option<String>,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Similarity search over the user's indexed documents.
pub trait ContextRetriever {
    fn find_similar(
        &self,
        user_id: Uuid,
        question: &str,
        limit: usize,
    ) -> Result<Vec<ContextChunk>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub user_id: Uuid,
    pub tokens: usize,
    pub operation_type: String,
    pub occurred_at: DateTime<Utc>,
}

/// Billing sink. Called off the response path; errors are only logged.
pub trait UsageRecorder {
    fn record(&self, event: &UsageEvent) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub answer: String,
    pub debug: Value,
}

pub struct ChatService<'a, S: DocumentStore> {
    documents: &'a DocumentService<S>,
    retriever: Option<Arc<dyn ContextRetriever + Send + Sync>>,
    usage: Option<Arc<dyn UsageRecorder + Send + Sync>>,
    top_k: usize,
}

impl<'a, S: DocumentStore> ChatService<'a, S> {
    pub fn new(documents: &'a DocumentService<S>) -> Self {
        Self {
            documents,
            retriever: None,
            usage: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever + Send + Sync>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_usage_recorder(mut self, recorder: Arc<dyn UsageRecorder + Send + Sync>) -> Self {
        self.usage = Some(recorder);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn answer_question(&self, user_id: Uuid, question: &str) -> Result<ChatReply> {
        let parser = CorrectionParser::new(&self.documents.config().corrections);

        let reply = match parser.parse(question) {
            Some(command) => {
                info!("Chat message from user {} parsed as a correction", user_id);
                self.handle_correction(&parser, user_id, question, &command)?
            }
            None => self.answer_with_context(user_id, question)?,
        };

        self.dispatch_usage(user_id, question, &reply.answer);
        Ok(reply)
    }

    fn handle_correction(
        &self,
        parser: &CorrectionParser<'_>,
        user_id: Uuid,
        question: &str,
        command: &CorrectionCommand,
    ) -> Result<ChatReply> {
        let outcome = self.documents.apply_correction(user_id, command)?;

        let (answer, correction) = match outcome {
            CorrectionOutcome::Applied(result) => {
                let mut correction = Map::new();
                correction.insert("applied".to_string(), json!(true));
                correction.insert(
                    "command".to_string(),
                    json!({
                        "document_type": command.document_type,
                        "field": command.field,
                        "value": command.value,
                        "value_text": command.value_text,
                        "intent": command.intent,
                    }),
                );
                if let Value::Object(fields) = serde_json::to_value(&result)? {
                    correction.extend(fields);
                }
                let answer = format!(
                    "Certo! Atualizei {}. A nova versão foi registrada no histórico do documento.",
                    parser.describe(command)
                );
                (answer, Value::Object(correction))
            }
            CorrectionOutcome::NotApplied {
                reason,
                document_type,
                field,
                document_id,
            } => {
                let mut correction = json!({
                    "applied": false,
                    "reason": reason.as_str(),
                    "document_type": document_type,
                    "field": field,
                    "requested_value": command.value_text,
                });
                if let Some(id) = document_id {
                    correction["document_id"] = json!(id);
                }
                let answer = match document_id {
                    Some(_) => APPLY_FAILED_MESSAGE,
                    None => NOT_FOUND_MESSAGE,
                };
                (answer.to_string(), correction)
            }
        };

        Ok(ChatReply {
            answer,
            debug: json!({
                "question": question,
                "correction": correction,
            }),
        })
    }

    fn answer_with_context(&self, user_id: Uuid, question: &str) -> Result<ChatReply> {
        let overview = self.documents.financial_overview(user_id)?;
        let chunks = self.retrieve(user_id, question);
        debug!(
            "Answering user {} with {} context chunks",
            user_id,
            chunks.len()
        );

        let answer = compose_answer(question, &overview, &chunks);
        Ok(ChatReply {
            answer,
            debug: json!({
                "question": question,
                "overview": overview,
                "chunks": chunks,
            }),
        })
    }

    /// Top `top_k` chunks by score, merging the retriever's results with the
    /// text of the user's most recent documents. A failing source is skipped.
    fn retrieve(&self, user_id: Uuid, question: &str) -> Vec<ContextChunk> {
        let mut chunks = match self.retriever.as_ref() {
            Some(retriever) => match retriever.find_similar(user_id, question, self.top_k) {
                Ok(chunks) => chunks,
                Err(err) => {
                    warn!("Context retrieval failed for user {}: {}", user_id, err);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        match self.documents.list_user_documents(user_id, None) {
            Ok(documents) => chunks.extend(self.document_chunks(documents, question)),
            Err(err) => warn!("Could not load documents of user {}: {}", user_id, err),
        }

        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        chunks.truncate(self.top_k);
        chunks
    }

    fn document_chunks(
        &self,
        mut documents: Vec<DocumentRecord>,
        question: &str,
    ) -> Vec<ContextChunk> {
        documents.sort_by_key(|document| Reverse(document.updated_at));
        documents
            .into_iter()
            .take(self.top_k)
            .filter_map(|document| {
                let text = document.extracted_text.filter(|text| !text.trim().is_empty())?;
                let mut metadata = Map::new();
                metadata.insert(
                    "document_type".to_string(),
                    json!(document.document_type.code()),
                );
                Some(ContextChunk {
                    id: format!("mongo::{}", document.id),
                    source: DOCUMENT_SOURCE.to_string(),
                    source_id: Some(document.id.to_string()),
                    score: word_overlap(question, &text),
                    content: text,
                    metadata,
                })
            })
            .collect()
    }

    fn dispatch_usage(&self, user_id: Uuid, question: &str, answer: &str) {
        let Some(recorder) = self.usage.clone() else {
            return;
        };

        let event = UsageEvent {
            user_id,
            tokens: estimate_tokens(question) + estimate_tokens(answer),
            operation_type: USAGE_OPERATION.to_string(),
            occurred_at: Utc::now(),
        };

        thread::spawn(move || {
            if let Err(err) = recorder.record(&event) {
                warn!("Failed to record usage for user {}: {}", event.user_id, err);
            }
        });
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Cosine similarity of the two texts' normalized word sets.
fn word_overlap(question: &str, text: &str) -> f64 {
    let words = |raw: &str| -> HashSet<String> {
        normalize_text(raw)
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().count() > 2)
            .map(str::to_string)
            .collect()
    };
    let (asked, found) = (words(question), words(text));
    if asked.is_empty() || found.is_empty() {
        return 0.0;
    }
    let shared = asked.intersection(&found).count() as f64;
    shared / ((asked.len() * found.len()) as f64).sqrt()
}

fn positive(amount: Option<f64>) -> Option<f64> {
    amount.filter(|value| *value != 0.0)
}

fn compose_answer(question: &str, overview: &FinancialOverview, chunks: &[ContextChunk]) -> String {
    let mut intro = Vec::new();

    if overview.has_revenues() {
        let mut parts = Vec::new();
        if let Some(total) = positive(overview.revenues.get(RevenueSource::IssuedInvoices.key())) {
            parts.push(format!(
                "suas Notas Fiscais emitidas ({})",
                format_currency(total)
            ));
        }
        let operational = overview.revenues.get(RevenueSource::OperationalIncome.key());
        if let Some(total) = positive(operational) {
            parts.push(format!(
                "seus informes de rendimentos ({})",
                format_currency(total)
            ));
        }
        let taxable = overview
            .taxable_profit()
            .or_else(|| overview.revenues.get(TAXABLE_PROFIT_KEY));
        if let Some(total) = positive(taxable) {
            parts.push(format!(
                "o lucro tributável declarado na DASN-SIMEI ({})",
                format_currency(total)
            ));
        }
        if !parts.is_empty() {
            intro.push(format!("Com base em {}", parts.join(" e ")));
        }
    }

    if let Some(exempt) = overview.exempt_profit() {
        intro.push(format!(
            "considerando também o lucro isento informado na DASN-SIMEI ({})",
            format_currency(exempt)
        ));
    }

    if overview.has_expenses() {
        intro.push(format!(
            "e nas suas despesas dedutíveis ({})",
            format_currency(overview.expenses.total)
        ));
    }

    let intro_text = if intro.is_empty() {
        NO_DATA_INTRO.to_string()
    } else {
        format!("{}, segue uma orientação personalizada.", intro.join(", "))
    };

    let context_text = if chunks.is_empty() {
        NO_CHUNKS_TEXT.to_string()
    } else {
        let excerpts: Vec<String> = chunks
            .iter()
            .map(|chunk| format!("[{}] {}", chunk.source, excerpt(&chunk.content)))
            .collect();
        format!("Principais trechos considerados: {}", excerpts.join(" | "))
    };

    format!(
        "{}\n\nPergunta original: {}\n{}\n\nRecomendação: {}",
        intro_text, question, context_text, GUIDANCE
    )
}

fn excerpt(content: &str) -> String {
    let flat = content.trim().replace('\n', " ");
    if flat.chars().count() > EXCERPT_LIMIT {
        let head: String = flat.chars().take(EXCERPT_LIMIT - 3).collect();
        format!("{}...", head)
    } else {
        flat
    }
}
