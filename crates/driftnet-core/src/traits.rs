use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Document, RawContent};

/// Fetches and extracts text from a URL (HTTP, rendering, PDF/OCR live behind this).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RawContent, AppError>> + Send;
}

/// Persists fully processed documents.
pub trait DocumentStore: Send + Sync + Clone {
    /// Save a processed document. Returns its id.
    fn save(&self, document: &Document) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<Document>, AppError>> + Send;

    /// The document already saved for a frontier entry, if any.
    fn find_by_entry(
        &self,
        entry_id: Uuid,
    ) -> impl Future<Output = Result<Option<Document>, AppError>> + Send;
}

/// A no-op DocumentStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl DocumentStore for NullStore {
    async fn save(&self, document: &Document) -> Result<Uuid, AppError> {
        Ok(document.id)
    }

    async fn get(&self, _id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(None)
    }

    async fn find_by_entry(&self, _entry_id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(None)
    }
}
