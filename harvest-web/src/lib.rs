//! Scraping core: policy gate, extraction, fetch strategies and the
//! orchestrator that chains them for one request.
//!
//! - [`policy`]: robots.txt evaluation, failing open on retrieval problems
//! - [`extract`]: email and business-listing extraction from HTML
//! - [`fetch`]: static HTTP retrieval
//! - [`render`]: browser retrieval and the maps search flow
//! - [`orchestrator`]: per-request state machine producing one result
pub mod browser;
pub mod extract;
pub mod fetch;
pub mod orchestrator;
pub mod policy;
pub mod render;

pub use orchestrator::{Orchestrator, OrchestratorOptions};
