pub mod config;
pub mod database;
pub mod dead_letter_repository;
pub mod document_repository;
pub mod fingerprint_repository;
pub mod frontier_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use dead_letter_repository::PgDeadLetterRepository;
pub use document_repository::PgDocumentRepository;
pub use fingerprint_repository::PgFingerprintRepository;
pub use frontier_repository::PgFrontierRepository;
