//! robots.txt gate.
//!
//! The gate fails open: any problem retrieving or reading the policy file
//! yields an allowed decision and a warning, never an error.

use std::time::Duration;

use async_trait::async_trait;
use harvest_common::PolicyDecision;
use harvest_config::PolicyConfig;
use harvest_http::{HttpClient, HttpError, RequestOpts};
use url::Url;

const POLICY_PATH: &str = "/robots.txt";

#[async_trait]
pub trait PolicyCheck: Send + Sync {
    /// Decide whether `target` may be fetched. Never fails.
    async fn check(&self, target: &Url) -> PolicyDecision;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    /// Parse robots.txt content. Unknown or malformed lines are ignored.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        let mut seen_rule = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // A user-agent line after rules opens a new group.
                    if seen_rule || current.is_none() {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(Group::default());
                        seen_rule = false;
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    seen_rule = true;
                    // An empty pattern matches nothing.
                    if !value.is_empty() {
                        group.rules.push(Rule {
                            allow: directive == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        if let Some(group) = current {
            groups.push(group);
        }

        Self { groups }
    }

    /// Check whether `path` (path plus query) is allowed for `user_agent`.
    ///
    /// Groups naming the agent apply; otherwise the `*` groups do. The most
    /// specific (longest) matching rule wins and `Allow` wins ties.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        if path == POLICY_PATH {
            return true;
        }
        let agent = user_agent.trim().to_ascii_lowercase();
        let named: Vec<&Group> = if agent == "*" {
            Vec::new()
        } else {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())))
                .collect()
        };
        let applicable: Vec<&Group> = if named.is_empty() {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect()
        } else {
            named
        };

        let mut best: Option<&Rule> = None;
        for rule in applicable.iter().flat_map(|g| g.rules.iter()) {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            best = match best {
                Some(b) if b.pattern.len() > rule.pattern.len() => Some(b),
                Some(b) if b.pattern.len() == rule.pattern.len() && b.allow => Some(b),
                _ => Some(rule),
            };
        }
        best.is_none_or(|rule| rule.allow)
    }
}

/// Match a robots pattern (`*` wildcard, trailing `$` anchor) against a path prefix.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    wildcard_match(pattern.as_bytes(), path.as_bytes(), anchored)
}

/// Row-by-row match over pattern bytes; `reach[j]` holds when the pattern so
/// far matches the first `j` path bytes. Runs in O(pattern × path).
fn wildcard_match(pattern: &[u8], path: &[u8], anchored: bool) -> bool {
    let mut reach = vec![false; path.len() + 1];
    reach[0] = true;
    for &c in pattern {
        if c == b'*' {
            let mut seen = false;
            for slot in reach.iter_mut() {
                seen |= *slot;
                *slot = seen;
            }
        } else {
            for j in (1..=path.len()).rev() {
                reach[j] = reach[j - 1] && path[j - 1] == c;
            }
            reach[0] = false;
        }
        if !reach.contains(&true) {
            return false;
        }
    }
    if anchored {
        reach[path.len()]
    } else {
        reach.contains(&true)
    }
}

/// Location of the policy file for `target`'s origin.
pub fn policy_url(target: &Url) -> Option<Url> {
    let mut url = target.join(POLICY_PATH).ok()?;
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Some(url)
}

/// Path plus query, the string rules are matched against.
fn policy_path(target: &Url) -> String {
    match target.query() {
        Some(q) => format!("{}?{}", target.path(), q),
        None => target.path().to_string(),
    }
}

/// Live robots.txt check over HTTP.
pub struct PolicyGate {
    http: HttpClient,
    user_agent: String,
    timeout: Duration,
}

impl PolicyGate {
    pub fn new(http: HttpClient, config: &PolicyConfig) -> Self {
        Self {
            http,
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
        }
    }

    fn evaluate(&self, target: &Url, result: Result<harvest_http::TextResponse, HttpError>) -> PolicyDecision {
        match result {
            Ok(resp) => {
                let textual = resp
                    .content_type
                    .as_deref()
                    .is_none_or(|ct| ct.starts_with("text/"));
                if !textual {
                    return PolicyDecision::fail_open(format!(
                        "policy file has non-text content type {:?}",
                        resp.content_type.unwrap_or_default()
                    ));
                }
                let rules = RobotsRules::parse(&resp.body);
                let allowed = rules.is_allowed(&self.user_agent, &policy_path(target));
                PolicyDecision::fetched(allowed, resp.status)
            }
            Err(HttpError::Api { status, .. }) if matches!(status.as_u16(), 401 | 403) => {
                PolicyDecision::fetched(false, status.as_u16())
            }
            Err(HttpError::Api { status, .. }) if status.is_client_error() => {
                PolicyDecision::missing(status.as_u16())
            }
            Err(err) => PolicyDecision::fail_open(err.to_string()),
        }
    }
}

#[async_trait]
impl PolicyCheck for PolicyGate {
    async fn check(&self, target: &Url) -> PolicyDecision {
        let Some(robots) = policy_url(target) else {
            return PolicyDecision::fail_open(format!("cannot derive policy URL for {target}"));
        };
        let opts = RequestOpts {
            timeout: Some(self.timeout),
            retries: Some(0),
            ..Default::default()
        };
        let result = self.http.get_text(&robots, opts).await;
        let decision = self.evaluate(target, result);

        match &decision.source {
            harvest_common::PolicySource::Unavailable { cause } => {
                tracing::warn!(
                    target: "harvest.policy",
                    robots = %robots,
                    %cause,
                    "policy.fetch_failed.fail_open"
                );
            }
            source => {
                tracing::debug!(
                    target: "harvest.policy",
                    robots = %robots,
                    allowed = decision.allowed,
                    ?source,
                    "policy.evaluated"
                );
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic() {
        let rules = RobotsRules::parse(
            r#"
User-agent: *
Disallow: /private/
Disallow: /admin/ # staff only
Allow: /public/

Sitemap: https://example.com/sitemap.xml
            "#,
        );

        assert!(rules.is_allowed("*", "/public/page"));
        assert!(!rules.is_allowed("*", "/private/page"));
        assert!(!rules.is_allowed("*", "/admin/"));
        assert!(rules.is_allowed("*", "/other/page"));
    }

    #[test]
    fn longest_match_wins() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /private/\nAllow: /private/public/\n",
        );
        assert!(!rules.is_allowed("*", "/private/secret"));
        assert!(rules.is_allowed("*", "/private/public/page"));
    }

    #[test]
    fn allow_wins_ties() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /page\nAllow: /page\n");
        assert!(rules.is_allowed("*", "/page"));
    }

    #[test]
    fn wildcards_and_anchor() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /*.pdf$\nDisallow: /search*q=\n",
        );
        assert!(!rules.is_allowed("*", "/files/report.pdf"));
        assert!(rules.is_allowed("*", "/files/report.pdf.html"));
        assert!(!rules.is_allowed("*", "/search?lang=en&q=coffee"));
        assert!(rules.is_allowed("*", "/search?lang=en"));
    }

    #[test]
    fn many_wildcards_match_in_linear_passes() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /*a*a*a*a*a*a*a*a*a*b\n");
        let long = format!("/{}", "a".repeat(200));
        let started = std::time::Instant::now();
        assert!(rules.is_allowed("*", &long));
        assert!(!rules.is_allowed("*", &format!("{long}b")));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn wildcard_matches_prefix_unless_anchored() {
        assert!(pattern_matches("/a*c", "/abc/more"));
        assert!(pattern_matches("/a*c$", "/abbbc"));
        assert!(!pattern_matches("/a*c$", "/abcd"));
        assert!(pattern_matches("*", ""));
        assert!(pattern_matches("", "/anything"));
        assert!(!pattern_matches("/x", "/"));
    }

    #[test]
    fn wildcard_agent_ignores_named_groups() {
        let rules = RobotsRules::parse(
            "User-agent: badbot\nDisallow: /\n\nUser-agent: *\nDisallow: /tmp/\n",
        );
        assert!(rules.is_allowed("*", "/contact"));
        assert!(!rules.is_allowed("*", "/tmp/x"));
        assert!(!rules.is_allowed("BadBot/2.1", "/contact"));
    }

    #[test]
    fn grouped_agents_share_rules() {
        let rules = RobotsRules::parse("User-agent: a\nUser-agent: *\nDisallow: /shared\n");
        assert!(!rules.is_allowed("*", "/shared/x"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.is_allowed("*", "/anything"));
        assert!(RobotsRules::parse("").is_allowed("*", "/any/path"));
        assert!(RobotsRules::parse("<html>not a policy</html>").is_allowed("*", "/"));
    }

    #[test]
    fn disallow_all_still_permits_policy_file() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\n");
        assert!(!rules.is_allowed("*", "/"));
        assert!(rules.is_allowed("*", "/robots.txt"));
    }

    #[test]
    fn policy_url_uses_origin() {
        let target = Url::parse("https://user:pw@example.com:8443/team/contact?x=1#top").unwrap();
        let robots = policy_url(&target).unwrap();
        assert_eq!(robots.as_str(), "https://example.com:8443/robots.txt");
        assert_eq!(policy_path(&target), "/team/contact?x=1");
    }
}
