//! Common types and utilities shared across Harvest crates.
//!
//! This crate defines the per-request data model, the error taxonomy, and
//! the logging initialiser used by every binary and test in the workspace.
//!
//! # Overview
//!
//! - [`ExtractionTarget`]: what a request asks to scrape (URL or keyword)
//! - [`PolicyDecision`]: outcome of the robots.txt check, with its source
//! - [`EmailSet`] and [`BusinessRecord`]: the two success payloads
//! - [`Extraction`] and [`ExtractionResult`]: the per-request result union
//! - [`HarvestError`] and [`ErrorKind`]: typed terminal failures
//! - [`observability`]: centralised tracing/logging initialisation
//!
//! # Examples
//!
//! ```rust
//! use harvest_common::{ErrorKind, ExtractionTarget};
//!
//! let target = ExtractionTarget::url("https://example.com/contact").unwrap();
//! assert!(matches!(target, ExtractionTarget::Url(_)));
//!
//! let err = ExtractionTarget::url("ftp://example.com").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InvalidInput);
//! ```

mod error;
mod model;
pub mod observability;

pub use error::{ErrorKind, HarvestError};
pub use model::{
    BusinessRecord, EmailSet, Extraction, ExtractionResult, ExtractionTarget, Field,
    PolicyDecision, PolicySource, NOT_AVAILABLE,
};
