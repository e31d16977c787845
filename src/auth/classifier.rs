//! Pattern detection over single lines of terminal output.

use super::types::MenuOption;
use crate::config::BridgeConfig;
use once_cell::sync::Lazy;
use regex::Regex;

/// `[1] label`, `1) label`, `1. label`, optionally behind a selection cursor
static OPTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[>❯›]\s*)?(?:\[(\d+)\]\s*|(\d+)[.)]\s+)(.*)$").unwrap()
});

/// URL token up to whitespace, quotes or brackets
static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'`<>()\[\]{}]+"#).unwrap());

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

#[derive(Debug, Clone)]
pub struct OutputClassifier {
    success_markers: Vec<String>,
    allowed_hosts: Vec<String>,
}

impl OutputClassifier {
    pub fn new(success_markers: Vec<String>, allowed_hosts: Vec<String>) -> Self {
        Self {
            success_markers: success_markers.into_iter().filter(|m| !m.is_empty()).collect(),
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.markers(), config.login_url_hosts.clone())
    }

    pub fn detect_option(&self, line: &str) -> Option<MenuOption> {
        detect_option(line)
    }

    pub fn detect_login_url(&self, line: &str) -> Option<String> {
        URL_PATTERN
            .find_iter(line)
            .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION))
            .find(|candidate| self.is_allowed(candidate))
            .map(str::to_string)
    }

    pub fn is_success_marker(&self, text: &str) -> bool {
        self.success_markers.iter().any(|marker| text.contains(marker.as_str()))
    }

    fn is_allowed(&self, candidate: &str) -> bool {
        let Ok(parsed) = url::Url::parse(candidate) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

pub fn detect_option(line: &str) -> Option<MenuOption> {
    let caps = OPTION_PATTERN.captures(line)?;
    let value = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let label = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
    if label.is_empty() {
        return None;
    }
    Some(MenuOption::new(value, label))
}
