pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod frontier;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod reliability;
pub mod robots;
pub mod router;
pub mod service;
pub mod traits;
pub mod urlnorm;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::EngineConfig;
pub use error::{AppError, ErrorClass};
pub use events::{EventBus, EventMessage, MemoryEventBus};
pub use fingerprint::{ContentFingerprint, DedupOutcome, FingerprintStore};
pub use frontier::{CompletionOutcome, EnqueueOutcome, FrontierEntry, FrontierStore, NewFrontierEntry};
pub use job::{JobConfig, JobId, JobStatusCounts};
pub use models::{Document, RawContent};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorReporter, TracingReporter};
pub use router::{ProviderClient, Tier, TranslatedText, TranslationRouter};
pub use service::IngestionService;
pub use traits::{DocumentStore, Fetcher, NullStore};
