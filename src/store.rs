use crate::error::{EngineError, Result};
use crate::schema::{DocumentRecord, DocumentType};
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Persistence port for processed documents.
pub trait DocumentStore {
    fn get(&self, id: Uuid) -> Result<Option<DocumentRecord>>;

    fn save(&self, document: DocumentRecord) -> Result<DocumentRecord>;

    /// Documents of a user, optionally restricted to one type, oldest first.
    fn list_by_user(
        &self,
        user_id: Uuid,
        document_type: Option<DocumentType>,
    ) -> Result<Vec<DocumentRecord>>;

    /// Most recently updated document of the given type.
    fn find_latest_by_type(
        &self,
        user_id: Uuid,
        document_type: DocumentType,
    ) -> Result<Option<DocumentRecord>> {
        Ok(self
            .list_by_user(user_id, Some(document_type))?
            .into_iter()
            .max_by_key(|document| document.updated_at))
    }
}

/// Thread-safe store keeping every document in memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<Uuid, DocumentRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = DocumentRecord>) -> Self {
        let documents = documents
            .into_iter()
            .map(|document| (document.id, document))
            .collect();
        Self {
            documents: RwLock::new(documents),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Uuid, DocumentRecord>>> {
        self.documents
            .read()
            .map_err(|_| EngineError::Store("document store lock poisoned".to_string()))
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn save(&self, document: DocumentRecord) -> Result<DocumentRecord> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| EngineError::Store("document store lock poisoned".to_string()))?;
        documents.insert(document.id, document.clone());
        Ok(document)
    }

    fn list_by_user(
        &self,
        user_id: Uuid,
        document_type: Option<DocumentType>,
    ) -> Result<Vec<DocumentRecord>> {
        let mut documents: Vec<DocumentRecord> = self
            .read()?
            .values()
            .filter(|d| d.user_id == user_id)
            .filter(|d| document_type.map_or(true, |t| d.document_type == t))
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }
}
