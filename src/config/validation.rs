//! Config errors, the `--interval` parser and `${VAR}` expansion for store
//! credentials.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read kilnmon config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("malformed kilnmon config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A value parsed but cannot drive the sampler or the store.
    #[error("invalid kilnmon config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

/// Parse a polling interval given on the command line or in
/// `KILNMON_INTERVAL`.
///
/// ```
/// use kilnmon::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("100ms").unwrap().as_millis(), 100);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("interval is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid interval '{s}': {e}"))
}

/// Substitute `${VAR}` / `${VAR:-default}` in the store `url`, `org`,
/// `bucket` and `token`, so the InfluxDB token can live in the environment.
///
/// An unset variable without a default becomes the empty string, which for
/// `token` means unauthenticated writes.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_REF: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let pattern = ENV_REF.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env reference pattern is a valid regex")
    });

    pattern
        .replace_all(input, |caps: &regex::Captures| {
            let fallback = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| fallback.to_string())
        })
        .into_owned()
}
