use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
pub const DEFAULT_DOWNLOAD_STAGGER: Duration = Duration::from_millis(300);

/// Engine settings. There is no config file; everything comes from the
/// environment and may be overridden by the front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub download_stagger: Duration,
    pub standard_model: Option<String>,
    pub high_model: Option<String>,
    pub revoke_tier_on_refine_auth_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            download_stagger: DEFAULT_DOWNLOAD_STAGGER,
            standard_model: None,
            high_model: None,
            revoke_tier_on_refine_auth_failure: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let api_base = non_empty("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base);
        let request_timeout = non_empty("STUDIO_REQUEST_TIMEOUT_S")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .map(|value| Duration::from_secs_f64(value.clamp(15.0, 300.0)))
            .unwrap_or(defaults.request_timeout);
        let download_stagger = non_empty("STUDIO_DOWNLOAD_STAGGER_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.download_stagger);
        let revoke_tier_on_refine_auth_failure = non_empty("STUDIO_REVOKE_ON_REFINE_AUTH")
            .and_then(|value| parse_bool(&value))
            .unwrap_or(false);

        Self {
            api_base,
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
            request_timeout,
            download_stagger,
            standard_model: non_empty("STUDIO_STANDARD_MODEL"),
            high_model: non_empty("STUDIO_HIGH_MODEL"),
            revoke_tier_on_refine_auth_failure,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{EngineConfig, DEFAULT_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.download_stagger, Duration::from_millis(300));
    }

    #[test]
    fn environment_overrides_are_trimmed_and_clamped() {
        let config = config_from(&[
            ("GEMINI_API_BASE", " http://localhost:9000/v1beta/ "),
            ("GOOGLE_API_KEY", "fallback-key"),
            ("STUDIO_REQUEST_TIMEOUT_S", "2"),
            ("STUDIO_DOWNLOAD_STAGGER_MS", "0"),
            ("STUDIO_HIGH_MODEL", "dryrun-image-hd"),
            ("STUDIO_REVOKE_ON_REFINE_AUTH", "yes"),
        ]);
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
        assert_eq!(config.api_key.as_deref(), Some("fallback-key"));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.download_stagger, Duration::ZERO);
        assert_eq!(config.high_model.as_deref(), Some("dryrun-image-hd"));
        assert!(config.revoke_tier_on_refine_auth_failure);
    }

    #[test]
    fn gemini_key_wins_over_google_key() {
        let config = config_from(&[("GEMINI_API_KEY", "primary"), ("GOOGLE_API_KEY", "other")]);
        assert_eq!(config.api_key.as_deref(), Some("primary"));
    }
}
