use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobId;
use crate::router::Tier;

/// Output of the external fetch layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawContent {
    /// Final URL after redirects.
    pub url: String,
    /// Extracted text ready for fingerprinting and translation.
    pub body: String,
    pub content_type: Option<String>,
    /// Outgoing links discovered by the fetcher, enqueued one level deeper.
    #[serde(default)]
    pub links: Vec<String>,
}

impl RawContent {
    pub fn text(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            content_type: Some("text/plain".to_string()),
            links: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }
}

/// A fully processed item, handed to storage once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub job_id: JobId,
    pub entry_id: Uuid,
    pub url: String,
    pub normalized_url: String,
    /// Hex SHA-256 of the original text.
    pub content_hash: String,
    pub simhash: u64,
    pub original_text: String,
    pub translated_text: String,
    pub provider: String,
    pub source_lang: String,
    pub target_lang: String,
    pub tier: Tier,
    /// Owner of a similar document when the near-duplicate policy is `Flag`.
    pub near_duplicate_of: Option<String>,
    pub created_at: DateTime<Utc>,
}
