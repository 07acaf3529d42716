use super::fingerprint::UserAgentProfile;

/// Construct Chrome command-line arguments for one disposable session.
pub fn build_launch_arguments(
    profile: &UserAgentProfile,
    headless: bool,
    proxy: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--disable-extensions".to_string(),
        "--disable-plugins-discovery".to_string(),
        "--no-first-run".to_string(),
        format!("--user-agent={}", profile.user_agent),
        format!("--window-size={},{}", profile.viewport.0, profile.viewport.1),
        format!("--lang={}", profile.lang_switch()),
    ];
    if headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    if let Some(proxy) = proxy.map(str::trim).filter(|p| !p.is_empty()) {
        args.push(format!("--proxy-server={proxy}"));
    }
    args
}

/// JavaScript evasions applied after each navigation to reduce automation signals.
pub struct StealthScripts;

impl StealthScripts {
    /// Evasions consistent with `profile`, so `navigator.languages` agrees
    /// with the `--lang` launch argument.
    pub fn core_evasions(profile: &UserAgentProfile) -> String {
        let languages = serde_json::to_string(&profile.languages).unwrap_or_else(|_| "[]".into());
        format!(
            r#"
            Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
            Object.defineProperty(navigator, 'plugins', {{ get: () => [1,2,3] }});
            Object.defineProperty(navigator, 'languages', {{
                get: () => {languages}
            }});
            if (!window.chrome) window.chrome = {{ runtime: {{}} }};
        "#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserAgentProfile {
        UserAgentProfile::new("Harvest/1.0", (1280, 800), vec!["en-GB".into()])
    }

    #[test]
    fn headless_with_proxy() {
        let args = build_launch_arguments(&profile(), true, Some("http://proxy:3128"));
        assert!(args.contains(&"--user-agent=Harvest/1.0".to_string()));
        assert!(args.contains(&"--window-size=1280,800".to_string()));
        assert!(args.contains(&"--lang=en-GB".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--proxy-server=http://proxy:3128".to_string()));
    }

    #[test]
    fn evasions_report_profile_languages() {
        let profile = UserAgentProfile::new("Harvest/1.0", (1280, 800), vec!["de-DE".into(), "de".into()]);
        let script = StealthScripts::core_evasions(&profile);
        assert!(script.contains(r#"get: () => ["de-DE","de"]"#));
        assert!(!script.contains("en-US"));
    }

    #[test]
    fn headed_without_proxy() {
        let args = build_launch_arguments(&profile(), false, Some("  "));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
    }
}
