use serde::{Deserialize, Serialize};

/// Coarse classification of a terminal failure.
///
/// Callers use the kind to tell "no data" apart from "not permitted" and
/// to pick a response status; the detail text is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    PolicyDenied,
    ControlNotFound,
    Blocked,
    Timeout,
    FetchFailed,
}

/// Error types produced by the extraction core.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HarvestError {
    /// The target was malformed (bad scheme, missing field, bad selector).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The site's crawl policy refused the target.
    #[error("scraping not allowed by robots.txt: {0}")]
    PolicyDenied(String),

    /// An expected page control was absent (markup drift or a block page).
    #[error("page control not found: {0}")]
    ControlNotFound(String),

    /// The browser landed on a bot-challenge or block page.
    #[error("blocked by the target site: {0}")]
    Blocked(String),

    /// A bounded wait exceeded its budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Generic network or transport failure.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::PolicyDenied(_) => ErrorKind::PolicyDenied,
            Self::ControlNotFound(_) => ErrorKind::ControlNotFound,
            Self::Blocked(_) => ErrorKind::Blocked,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::FetchFailed(_) => ErrorKind::FetchFailed,
        }
    }

    /// The human-readable detail without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::InvalidInput(d)
            | Self::PolicyDenied(d)
            | Self::ControlNotFound(d)
            | Self::Blocked(d)
            | Self::Timeout(d)
            | Self::FetchFailed(d) => d,
        }
    }
}
