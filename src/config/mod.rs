//! Engine configuration loaded from defaults or environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::DEFAULT_SWEEP_INTERVAL;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 9099;

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Settings for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Period of the cache's background sweep.
    pub sweep_interval: Duration,
}

impl EngineConfig {
    /// Loads the configuration from the environment.
    ///
    /// # Environment Variables
    /// - `JOKER_HOST`: bind interface (default: `0.0.0.0`)
    /// - `JOKER_PORT`: bind port (default: 9099)
    /// - `JOKER_SWEEP_INTERVAL_SECS`: cache sweep period in seconds (default: 30)
    ///
    /// Missing or unparsable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("JOKER_HOST").unwrap_or(defaults.host),
            port: parse_var("JOKER_PORT").unwrap_or(defaults.port),
            sweep_interval: parse_var::<u64>("JOKER_SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// `host:port` string suitable for [`Server::bind`](crate::server::Server::bind).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.port, 9099);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.address(), "0.0.0.0:9099");
    }

    #[test]
    fn from_env_without_variables_uses_defaults() {
        // None of the JOKER_* variables are set by the test harness.
        if env::vars().any(|(name, _)| name.starts_with("JOKER_")) {
            return;
        }
        assert_eq!(EngineConfig::from_env(), EngineConfig::default());
    }
}
