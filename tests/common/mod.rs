//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.

mod pipeline;
mod provider;

pub use pipeline::{wait_until, TestPipeline};
#[allow(unused_imports)]
pub use provider::FakeProvider;
