//! Periodic discovery of content that still needs enrichment.

mod scanner;

pub use scanner::DiscoveryScanner;
