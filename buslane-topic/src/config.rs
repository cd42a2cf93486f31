use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("unsupported provider name")]
    UnsupportedProvider,
}

/// Broker backend selector. `local` runs against the process-wide in-memory
/// broker; `hosted` expects the embedding service to inject its own gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Hosted,
    Local,
}

impl FromStr for Provider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, ProviderError> {
        match s {
            "hosted" => Ok(Provider::Hosted),
            "local" => Ok(Provider::Local),
            _ => Err(ProviderError::UnsupportedProvider),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct CoreConfig {
    #[envconfig(from = "BUS_PROVIDER", default = "hosted")]
    pub provider: Provider,

    #[envconfig(from = "BUS_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    #[envconfig(from = "BUS_MAX_CONCURRENT_MESSAGES", default = "1")]
    pub max_concurrent_messages: usize,

    #[envconfig(from = "BUS_RECEIVE_WAIT_MS", default = "5000")]
    pub receive_wait: EnvMsDuration,

    #[envconfig(from = "BUS_IDLE_POLL_MS", default = "10000")]
    pub idle_poll: EnvMsDuration,

    #[envconfig(from = "BUS_RENEWAL_INTERVAL_MS", default = "15000")]
    pub renewal_interval: EnvMsDuration,

    #[envconfig(from = "BUS_MAX_RENEWAL_DURATION_SECS", default = "86400")]
    pub max_renewal_duration: EnvSecsDuration,
}

impl CoreConfig {
    /// Snapshot of the knobs one consumption loop runs with. A cap of zero
    /// could never dispatch anything, so it is clamped to one.
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            max_concurrent_messages: self.max_concurrent_messages.max(1),
            receive_wait: self.receive_wait.0,
            idle_poll: self.idle_poll.0,
            renewal_interval: self.renewal_interval.0,
            max_renewal_duration: self.max_renewal_duration.0,
        }
    }
}

/// Runtime knobs for one consumption loop, built from `CoreConfig` or
/// directly by embedding code.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Concurrency cap: how many messages may be processing at once.
    pub max_concurrent_messages: usize,
    /// Upper bound on one broker receive call.
    pub receive_wait: time::Duration,
    /// Sleep between polls while saturated or after a transient receive error.
    pub idle_poll: time::Duration,
    /// How often each in-flight message's lease is renewed. Must stay shorter
    /// than the broker's lease length.
    pub renewal_interval: time::Duration,
    /// Ceiling on renewing a single message's lease, bounding stuck handlers.
    pub max_renewal_duration: time::Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        ConsumerSettings {
            max_concurrent_messages: 1,
            receive_wait: time::Duration::from_secs(5),
            idle_poll: time::Duration::from_secs(10),
            renewal_interval: time::Duration::from_secs(15),
            max_renewal_duration: time::Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvSecsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecsDurationError;

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvSecsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvSecsDurationError)?;

        Ok(EnvSecsDuration(time::Duration::from_secs(secs)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.provider, Provider::Hosted);
        assert_eq!(config.connection_string, None);
        assert_eq!(config.max_concurrent_messages, 1);

        let settings = config.consumer_settings();
        assert_eq!(settings.receive_wait, time::Duration::from_secs(5));
        assert_eq!(settings.idle_poll, time::Duration::from_secs(10));
        assert_eq!(settings.renewal_interval, time::Duration::from_secs(15));
        assert_eq!(
            settings.max_renewal_duration,
            time::Duration::from_secs(86400)
        );
    }

    #[test]
    fn test_reads_environment_values() {
        let env = HashMap::from([
            ("BUS_PROVIDER".to_owned(), "local".to_owned()),
            ("BUS_MAX_CONCURRENT_MESSAGES".to_owned(), "8".to_owned()),
            ("BUS_RECEIVE_WAIT_MS".to_owned(), "250".to_owned()),
            ("BUS_MAX_RENEWAL_DURATION_SECS".to_owned(), "60".to_owned()),
        ]);
        let config = CoreConfig::init_from_hashmap(&env).unwrap();
        assert_eq!(config.provider, Provider::Local);
        assert_eq!(config.max_concurrent_messages, 8);
        assert_eq!(config.receive_wait.0, time::Duration::from_millis(250));
        assert_eq!(
            config.max_renewal_duration.0,
            time::Duration::from_secs(60)
        );
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let env = HashMap::from([("BUS_PROVIDER".to_owned(), "kafka".to_owned())]);
        assert!(CoreConfig::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let env = HashMap::from([("BUS_MAX_CONCURRENT_MESSAGES".to_owned(), "0".to_owned())]);
        let config = CoreConfig::init_from_hashmap(&env).unwrap();
        assert_eq!(config.consumer_settings().max_concurrent_messages, 1);
    }
}
