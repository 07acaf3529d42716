use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::HarvestError;

/// Marker recorded for a business field the page did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

/// What a single request asks to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionTarget {
    /// A page to mine for email addresses. Always `http` or `https`.
    Url(Url),
    /// A free-text search submitted to the maps listing page.
    Keyword(String),
}

impl ExtractionTarget {
    /// Validate a raw URL string; only `http`/`https` with a host are accepted.
    pub fn url(raw: &str) -> Result<Self, HarvestError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(HarvestError::InvalidInput("URL is required".into()));
        }
        let url = Url::parse(raw)
            .map_err(|e| HarvestError::InvalidInput(format!("invalid URL {raw:?}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(HarvestError::InvalidInput(format!(
                    "unsupported URL scheme {other:?}"
                )))
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(HarvestError::InvalidInput(format!("URL {raw:?} has no host")));
        }
        Ok(Self::Url(url))
    }

    /// Validate a search keyword; surrounding whitespace is trimmed.
    pub fn keyword(raw: &str) -> Result<Self, HarvestError> {
        let keyword = raw.trim();
        if keyword.is_empty() {
            return Err(HarvestError::InvalidInput("Keyword is required".into()));
        }
        Ok(Self::Keyword(keyword.to_string()))
    }
}

impl fmt::Display for ExtractionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Keyword(k) => write!(f, "keyword:{k}"),
        }
    }
}

/// Where a [`PolicyDecision`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PolicySource {
    /// The policy file was served and evaluated (or its status was authoritative).
    Fetched { status: u16 },
    /// The site has no policy file (non-auth 4xx).
    Missing { status: u16 },
    /// The policy file could not be retrieved or read; the gate failed open.
    Unavailable { cause: String },
}

/// Allow/deny verdict for one target, computed fresh per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(flatten)]
    pub source: PolicySource,
}

impl PolicyDecision {
    pub fn fetched(allowed: bool, status: u16) -> Self {
        Self {
            allowed,
            source: PolicySource::Fetched { status },
        }
    }

    pub fn missing(status: u16) -> Self {
        Self {
            allowed: true,
            source: PolicySource::Missing { status },
        }
    }

    /// Fail-open decision used whenever the check itself could not complete.
    pub fn fail_open(cause: impl Into<String>) -> Self {
        Self {
            allowed: true,
            source: PolicySource::Unavailable {
                cause: cause.into(),
            },
        }
    }
}

/// Deduplicated email addresses, compared by exact string equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailSet(BTreeSet<String>);

impl EmailSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the address was already present.
    pub fn insert(&mut self, email: impl Into<String>) -> bool {
        self.0.insert(email.into())
    }

    pub fn contains(&self, email: &str) -> bool {
        self.0.contains(email)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for EmailSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for EmailSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for EmailSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One optional text field of a [`BusinessRecord`].
///
/// Serializes as the text itself or as [`NOT_AVAILABLE`]; never as an empty
/// string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field(Option<String>);

impl Field {
    /// Whitespace is collapsed; blank input becomes "not available".
    pub fn new(raw: Option<&str>) -> Self {
        let value = raw
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty());
        Self(value)
    }

    pub fn missing() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or(NOT_AVAILABLE)
    }
}

impl From<&str> for Field {
    fn from(raw: &str) -> Self {
        Self::new(Some(raw))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == NOT_AVAILABLE {
            Ok(Self::missing())
        } else {
            Ok(Self::new(Some(&raw)))
        }
    }
}

/// A single listing scraped from a result card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: Field,
    pub address: Field,
    pub phone: Field,
    pub website: Field,
}

/// Success payload of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    Emails(EmailSet),
    Businesses(Vec<BusinessRecord>),
}

/// Exactly one of a success payload or a typed failure.
pub type ExtractionResult = Result<Extraction, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn url_target_requires_http_scheme() {
        assert!(ExtractionTarget::url("http://example.com").is_ok());
        assert!(ExtractionTarget::url(" https://example.com/a?b=c ").is_ok());

        for bad in ["", "example.com", "ftp://example.com", "mailto:a@b.com", "file:///etc/hosts"] {
            let err = ExtractionTarget::url(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{bad}");
        }
    }

    #[test]
    fn keyword_target_is_trimmed() {
        let target = ExtractionTarget::keyword("  coffee shop ").unwrap();
        assert!(matches!(target, ExtractionTarget::Keyword(ref k) if k == "coffee shop"));
        assert!(ExtractionTarget::keyword("   ").is_err());
    }

    #[test]
    fn email_set_deduplicates_exactly() {
        let set: EmailSet = ["a@b.com", "a@b.com", "A@b.com"].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains("A@b.com"));
    }

    #[test]
    fn missing_field_serializes_as_marker() {
        let record = BusinessRecord {
            name: Field::from("Blue Bottle"),
            address: Field::new(Some("   ")),
            phone: Field::missing(),
            website: Field::from(" bluebottle.com "),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "Blue Bottle",
                "address": "N/A",
                "phone": "N/A",
                "website": "bluebottle.com",
            })
        );
    }

    #[test]
    fn fail_open_decision_is_allowed() {
        let decision = PolicyDecision::fail_open("connection refused");
        assert!(decision.allowed);
        assert!(matches!(decision.source, PolicySource::Unavailable { .. }));
    }
}
