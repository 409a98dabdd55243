//! Test utilities: mock implementations of the collaborator traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Document, RawContent};
use crate::orchestrator::{OrchestratorEvent, OrchestratorReporter};
use crate::router::ProviderClient;
use crate::traits::{DocumentStore, Fetcher};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum MockResponse {
    Page(RawContent),
    Status(u16),
    Network(String),
}

/// Mock fetcher serving canned responses per URL.
///
/// Unknown URLs (robots.txt included) answer HTTP 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.respond(url, MockResponse::Page(RawContent::text(url, body)))
    }

    pub fn with_links(self, url: &str, body: &str, links: &[&str]) -> Self {
        let links = links.iter().map(|l| l.to_string()).collect();
        self.respond(
            url,
            MockResponse::Page(RawContent::text(url, body).with_links(links)),
        )
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.respond(url, MockResponse::Status(status))
    }

    pub fn with_network_error(self, url: &str, message: &str) -> Self {
        self.respond(url, MockResponse::Network(message.to_string()))
    }

    /// Delays every fetch of `url` (tokio time).
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
        self
    }

    fn respond(self, url: &str, response: MockResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    /// Every URL fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<RawContent, AppError> {
        self.fetched.lock().unwrap().push(url.to_string());
        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(MockResponse::Page(raw)) => Ok(raw),
            Some(MockResponse::Status(status)) => Err(AppError::HttpStatus {
                status,
                url: url.to_string(),
            }),
            Some(MockResponse::Network(message)) => Err(AppError::NetworkError(message)),
            None => Err(AppError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Mock translation provider.
///
/// Known inputs map to fixed outputs; anything else comes back tagged
/// with the provider id.
pub struct MockProvider {
    id: String,
    translations: HashMap<String, String>,
    fail_status: Option<u16>,
    failures_left: Mutex<u32>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn translating(id: &str, pairs: &[(&str, &str)]) -> Self {
        Self {
            id: id.to_string(),
            translations: pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            fail_status: None,
            failures_left: Mutex::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with `status`.
    pub fn failing(id: &str, status: u16) -> Self {
        Self {
            fail_status: Some(status),
            failures_left: Mutex::new(u32::MAX),
            ..Self::translating(id, &[])
        }
    }

    /// Fails `failures` times with `status`, then translates.
    pub fn flaky(id: &str, failures: u32, status: u16, pairs: &[(&str, &str)]) -> Self {
        Self {
            fail_status: Some(status),
            failures_left: Mutex::new(failures),
            ..Self::translating(id, pairs)
        }
    }

    /// Number of times the provider was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, text: &str, _source_lang: &str, _target_lang: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.fail_status {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left = left.saturating_sub(1);
                return Err(AppError::provider(&self.id, status, "mock provider failure"));
            }
        }

        Ok(self
            .translations
            .get(text)
            .cloned()
            .unwrap_or_else(|| format!("[{}] {}", self.id, text)))
    }
}

// ---------------------------------------------------------------------------
// MockDocumentStore
// ---------------------------------------------------------------------------

/// Mock store that records saved documents.
#[derive(Clone, Default)]
pub struct MockDocumentStore {
    saved: Arc<Mutex<Vec<Document>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save fails with a database error.
    pub fn failing(message: &str) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Vec::new())),
            fail_with: Arc::new(Mutex::new(Some(message.to_string()))),
        }
    }

    pub fn saved(&self) -> Vec<Document> {
        self.saved.lock().unwrap().clone()
    }
}

impl DocumentStore for MockDocumentStore {
    async fn save(&self, document: &Document) -> Result<Uuid, AppError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(AppError::DatabaseError(message));
        }
        self.saved.lock().unwrap().push(document.clone());
        Ok(document.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn find_by_entry(&self, entry_id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.entry_id == entry_id)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that records event names, skipping idle polls.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl OrchestratorReporter for RecordingReporter {
    fn report(&self, event: OrchestratorEvent<'_>) {
        let name = match event {
            OrchestratorEvent::Idle => return,
            OrchestratorEvent::Started { .. } => "started",
            OrchestratorEvent::ItemClaimed { .. } => "item_claimed",
            OrchestratorEvent::ItemFinished { .. } => "item_finished",
            OrchestratorEvent::ItemAborted { .. } => "item_aborted",
            OrchestratorEvent::ShuttingDown { .. } => "shutting_down",
            OrchestratorEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}
