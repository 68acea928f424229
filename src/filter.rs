//! Content filtering (§4.2): stateless predicates and redactors driven
//! entirely by configuration. Invalid regexes are tolerated — skipped
//! silently, never fatal — matching the original implementation's
//! `except re.error: continue` behaviour.

use globset::Glob;
use regex::Regex;

use crate::config::{Config, ExclusionsConfig};

const FILTERED: &str = "[FILTERED]";

pub fn should_skip_turn(user_message: &str, config: &Config) -> bool {
    let exc = &config.capture.exclusions;
    if !exc.enabled {
        return false;
    }
    exc.content_patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .any(|re| re.is_match(user_message))
}

pub fn should_skip_file(file_path: &str, config: &Config) -> bool {
    let exc = &config.capture.exclusions;
    if !exc.enabled {
        return false;
    }
    exc.file_patterns.iter().any(|pattern| {
        Glob::new(pattern)
            .map(|g| g.compile_matcher().is_match(file_path))
            .unwrap_or(false)
    })
}

pub fn should_skip_tool(tool_name: &str, config: &Config) -> bool {
    let exc = &config.capture.exclusions;
    if !exc.enabled {
        return false;
    }
    exc.tool_names.iter().any(|t| t == tool_name)
}

/// Redact sensitive patterns before storage, composing left-to-right over
/// the configured pattern list.
pub fn redact_content(text: &str, config: &Config) -> String {
    redact_with(text, &config.capture.exclusions)
}

fn redact_with(text: &str, exc: &ExclusionsConfig) -> String {
    if !exc.enabled {
        return text.to_string();
    }
    let mut out = text.to_string();
    for pattern in &exc.redact_patterns {
        if let Ok(re) = Regex::new(pattern) {
            out = re.replace_all(&out, FILTERED).into_owned();
        }
    }
    out
}

/// Redact sensitive patterns at query-display time, independent of
/// capture-time redaction.
pub fn redact_for_query(text: &str, config: &Config) -> String {
    let qr = &config.filtering.query_redaction;
    if !qr.enabled {
        return text.to_string();
    }
    let mut out = text.to_string();
    for pattern in &qr.patterns {
        if let Ok(re) = Regex::new(pattern) {
            out = re.replace_all(&out, qr.replacement.as_str()).into_owned();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> Config {
        let mut config = Config::default();
        config.capture.exclusions.enabled = true;
        config
    }

    #[test]
    fn disabled_exclusions_never_skip() {
        let config = Config::default();
        assert!(!should_skip_turn("password=secret", &config));
    }

    #[test]
    fn skip_turn_matches_content_pattern() {
        let mut config = enabled_config();
        config.capture.exclusions.content_patterns = vec![r"password\s*=".to_string()];
        assert!(should_skip_turn("password=secret", &config));
        assert!(!should_skip_turn("fix the login bug", &config));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let mut config = enabled_config();
        config.capture.exclusions.content_patterns = vec!["(unclosed".to_string()];
        assert!(!should_skip_turn("anything", &config));
    }

    #[test]
    fn skip_file_matches_glob() {
        let mut config = enabled_config();
        config.capture.exclusions.file_patterns = vec!["*.env".to_string()];
        assert!(should_skip_file(".env", &config));
        assert!(!should_skip_file("src/main.rs", &config));
    }

    #[test]
    fn redact_content_replaces_matches() {
        let mut config = enabled_config();
        config.capture.exclusions.redact_patterns = vec![r"token\s*=\s*\S+".to_string()];
        let redacted = redact_content("fix token=abc123 issue", &config);
        assert_eq!(redacted, "fix [FILTERED] issue");
        assert!(!redacted.contains("abc123"));
    }

    #[test]
    fn query_redaction_is_independent_of_capture_redaction() {
        let mut config = Config::default();
        config.filtering.query_redaction.enabled = true;
        config.filtering.query_redaction.patterns = vec![r"\d{3}-\d{2}-\d{4}".to_string()];
        let redacted = redact_for_query("ssn 123-45-6789", &config);
        assert_eq!(redacted, "ssn [FILTERED]");
    }
}
