//! Concrete background jobs.

pub mod audit_log_cleanup;
pub mod discovery_scan;

pub use audit_log_cleanup::AuditLogCleanupJob;
pub use discovery_scan::DiscoveryScanJob;
