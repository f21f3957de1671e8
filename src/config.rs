use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Events retained per webhook.
    pub event_capacity: usize,
    /// Slots in each webhook's live-update feed before watchers lag.
    pub stream_buffer: usize,
    pub keepalive: Duration,
    pub max_body_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
            event_capacity: 100,
            stream_buffer: 256,
            keepalive: Duration::from_secs(30),
            max_body_bytes: 2 * 1024 * 1024,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            host: parse(&lookup, "HOST", defaults.host)?,
            port: parse(&lookup, "PORT", defaults.port)?,
            event_capacity: positive(&lookup, "EVENT_CAPACITY", defaults.event_capacity)?,
            stream_buffer: positive(&lookup, "STREAM_BUFFER", defaults.stream_buffer)?,
            keepalive: Duration::from_secs(positive(
                &lookup,
                "STREAM_KEEPALIVE_SECS",
                defaults.keepalive.as_secs(),
            )?),
            max_body_bytes: positive(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            log_format,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default + ToString,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.addr().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("EVENT_CAPACITY", "10"),
            ("STREAM_KEEPALIVE_SECS", "5"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.event_capacity, 10);
        assert_eq!(config.keepalive, Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            Config::from_lookup(lookup(&[("PORT", "http")])),
            Err(ConfigError::Invalid { key: "PORT", value: "http".into() })
        );
        assert_eq!(
            Config::from_lookup(lookup(&[("EVENT_CAPACITY", "0")])),
            Err(ConfigError::Invalid { key: "EVENT_CAPACITY", value: "0".into() })
        );
        assert_eq!(
            Config::from_lookup(lookup(&[("MAX_BODY_BYTES", "0")])),
            Err(ConfigError::Invalid { key: "MAX_BODY_BYTES", value: "0".into() })
        );
        assert!(Config::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
    }
}
