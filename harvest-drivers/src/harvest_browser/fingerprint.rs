use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Snapshot of user agent, viewport, and locale characteristics presented by
/// one browser session.
pub struct UserAgentProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub languages: Vec<String>,
}

impl UserAgentProfile {
    pub fn new(user_agent: impl Into<String>, viewport: (u32, u32), languages: Vec<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            viewport,
            languages,
        }
    }

    /// Value for the `--lang` switch; falls back to `en-US`.
    pub fn lang_switch(&self) -> String {
        if self.languages.is_empty() {
            "en-US".to_string()
        } else {
            self.languages.join(",")
        }
    }
}
