//! Content enrichment and moderation pipeline.
//!
//! Scanners find content that still needs work, typed queues carry it to
//! worker pools, and workers call an AI provider through a retrying gateway.
//! Moderation results land in reports that admins review over HTTP.

pub mod background_jobs;
pub mod cache;
pub mod config;
pub mod content_store;
pub mod discovery;
pub mod gateway;
pub mod moderation;
pub mod notifications;
pub mod pipeline;
pub mod server;
pub mod server_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use content_store::{ContentStore, SqliteContentStore};
pub use server::{run_server, RequestsLoggingLevel};
pub use server_store::{ServerStore, SqliteServerStore};
