//! Process-wide defaults loaded from `AWSKIT_*` environment variables.
use std::env;
use std::str::FromStr;

use tracing::warn;

/// Prefix shared by every recognized environment variable.
const ENV_PREFIX: &str = "AWSKIT_";

/// Connection settings and process-wide defaults for containers and
/// templates.
///
/// Environment values are defaults; explicit configuration always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqsConfig {
    /// Endpoint override, e.g. a LocalStack URL.
    pub endpoint_url: Option<String>,
    /// AWS region.
    pub region: Option<String>,
    /// Static access key id; falls back to the ambient credential chain when
    /// unset.
    pub access_key_id: Option<String>,
    /// Static secret access key.
    pub secret_access_key: Option<String>,
    /// Static session token.
    pub session_token: Option<String>,
    /// Default per-receive visibility timeout, in seconds.
    pub default_visibility_timeout: Option<i32>,
    /// Default long-poll wait, in seconds.
    pub default_wait_time: Option<i32>,
    /// Default bound on in-flight messages per container.
    pub default_max_concurrent: Option<usize>,
    /// Log level hint for the hosting application's subscriber setup. The
    /// library itself never installs a subscriber.
    pub log_level: Option<String>,
}

impl SqsConfig {
    /// Loads defaults from `AWSKIT_*` environment variables.
    pub fn from_env() -> Self {
        SqsConfig {
            endpoint_url: env_string("ENDPOINT_URL"),
            region: env_string("REGION"),
            access_key_id: env_string("ACCESS_KEY_ID"),
            secret_access_key: env_string("SECRET_ACCESS_KEY"),
            session_token: env_string("SESSION_TOKEN"),
            default_visibility_timeout: env_parsed("DEFAULT_VISIBILITY_TIMEOUT"),
            default_wait_time: env_parsed("DEFAULT_WAIT_TIME"),
            default_max_concurrent: env_parsed("DEFAULT_MAX_CONCURRENT"),
            log_level: env_string("LOG_LEVEL"),
        }
    }
}

/// Loads an [`SqsConfig`] from the environment.
pub fn load_config_from_env() -> SqsConfig {
    SqsConfig::from_env()
}

fn env_string(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: FromStr>(suffix: &str) -> Option<T> {
    let raw = env_string(suffix)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(
                variable = format!("{ENV_PREFIX}{suffix}"),
                value = raw,
                "ignoring unparseable environment value"
            );
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_prefixed_variables() {
        std::env::set_var("AWSKIT_ENDPOINT_URL", "http://localhost:4566");
        std::env::set_var("AWSKIT_DEFAULT_MAX_CONCURRENT", "7");
        let config = load_config_from_env();
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.default_max_concurrent, Some(7));
        std::env::remove_var("AWSKIT_ENDPOINT_URL");
        std::env::remove_var("AWSKIT_DEFAULT_MAX_CONCURRENT");
    }

    #[test]
    fn unparseable_values_are_ignored() {
        std::env::set_var("AWSKIT_DEFAULT_WAIT_TIME", "soon");
        let config = load_config_from_env();
        assert_eq!(config.default_wait_time, None);
        std::env::remove_var("AWSKIT_DEFAULT_WAIT_TIME");
    }
}
