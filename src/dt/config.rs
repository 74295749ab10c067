use crate::error::{Error, Result};

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::Deserialize;
use std::time::Duration;

/// Retry interval used when `lock_retry_interval` is missing or unparseable
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

lazy_static! {
    static ref RE_DURATION: Regex =
        Regex::new(r"^(?:(?:\d+\.?\d*|\.\d+)(?:ns|us|µs|μs|ms|s|m|h))+$").unwrap();
    static ref RE_DURATION_PART: Regex =
        Regex::new(r"(\d+\.?\d*|\.\d+)(ns|us|µs|μs|ms|s|m|h)").unwrap();
}

/// Distributed transaction filter configuration
#[derive(Clone, Debug, PartialEq)]
pub struct FilterConfig {
    /// The proxy's address, as registered with the coordinator
    pub addressing: String,
    /// Wait between attempts when rows are locked by another branch
    pub lock_retry_interval: Duration,
    /// Attempts made when rows are locked by another branch
    pub lock_retry_times: usize,
}

/// The configuration as written, before durations are parsed
#[derive(Debug, Deserialize)]
struct RawFilterConfig {
    #[serde(default)]
    addressing: String,
    #[serde(default)]
    lock_retry_interval: Option<String>,
    #[serde(default)]
    lock_retry_times: Option<i64>,
}

impl FilterConfig {
    /// Loads the configuration from a file, overridden by `ATPROXY_*`
    /// environment variables (e.g. `ATPROXY_LOCK_RETRY_TIMES=10`).
    pub fn load(file: &str) -> Result<Self> {
        let c = config::Config::builder()
            .add_source(config::File::with_name(file))
            .add_source(config::Environment::with_prefix("ATPROXY"))
            .build()?;
        Self::from_config(&c)
    }

    /// Reads the configuration from a filter's config section
    pub fn from_config(c: &config::Config) -> Result<Self> {
        let raw: RawFilterConfig = c.clone().try_deserialize()?;
        let lock_retry_interval = match raw.lock_retry_interval.as_deref().map(parse_duration) {
            Some(Ok(interval)) => interval,
            Some(Err(err)) => {
                log::warn!(
                    "parse distributed transaction filter lock_retry_interval failed, \
                     set to default {:?}, error: {}",
                    DEFAULT_LOCK_RETRY_INTERVAL,
                    err
                );
                DEFAULT_LOCK_RETRY_INTERVAL
            }
            None => DEFAULT_LOCK_RETRY_INTERVAL,
        };
        let lock_retry_times = match raw.lock_retry_times {
            Some(times) if times < 0 => {
                return Err(Error::Config(format!(
                    "lock_retry_times must not be negative, got {}",
                    times
                )))
            }
            Some(times) => times as usize,
            None => 0,
        };
        Ok(Self {
            addressing: raw.addressing,
            lock_retry_interval,
            lock_retry_times,
        })
    }
}

/// Parses a Go-style duration string such as `50ms`, `1.5s` or `1m30s`.
/// A bare `0` is accepted as zero.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if !RE_DURATION.is_match(s) {
        return Err(Error::Config(format!("invalid duration {:?}", s)));
    }
    let mut nanos = 0f64;
    for part in RE_DURATION_PART.captures_iter(s) {
        let value: f64 = part[1].parse()?;
        let unit = match &part[2] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(Error::Config(format!("unknown duration unit {}", unit))),
        };
        nanos += value * unit;
    }
    if nanos > u64::MAX as f64 {
        return Err(Error::Config(format!("duration {:?} overflows", s)));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() -> Result<()> {
        assert_eq!(parse_duration("50ms")?, Duration::from_millis(50));
        assert_eq!(parse_duration("1.5s")?, Duration::from_millis(1500));
        assert_eq!(parse_duration("1m30s")?, Duration::from_secs(90));
        assert_eq!(parse_duration("250us")?, Duration::from_micros(250));
        assert_eq!(parse_duration("0")?, Duration::ZERO);
        assert!(parse_duration("50").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
        Ok(())
    }

    #[test]
    fn from_config() -> Result<()> {
        let c = config::Config::builder()
            .set_override("addressing", "10.0.0.1:13306")?
            .set_override("lock_retry_interval", "20ms")?
            .set_override("lock_retry_times", 30i64)?
            .build()?;
        assert_eq!(
            FilterConfig::from_config(&c)?,
            FilterConfig {
                addressing: "10.0.0.1:13306".into(),
                lock_retry_interval: Duration::from_millis(20),
                lock_retry_times: 30,
            }
        );
        Ok(())
    }

    #[test]
    fn bad_interval_defaults() -> Result<()> {
        let c = config::Config::builder()
            .set_override("addressing", "x")?
            .set_override("lock_retry_interval", "soon")?
            .build()?;
        let cfg = FilterConfig::from_config(&c)?;
        assert_eq!(cfg.lock_retry_interval, DEFAULT_LOCK_RETRY_INTERVAL);
        assert_eq!(cfg.lock_retry_times, 0);
        Ok(())
    }

    #[test]
    fn load_file_with_env_override() -> Result<()> {
        let path = std::env::temp_dir().join(format!("atproxy-filter-{}.toml", std::process::id()));
        let contents = "addressing = \"10.0.0.2:13306\"\n\
                        lock_retry_interval = \"1.5s\"\n\
                        lock_retry_times = 3\n";
        std::fs::write(&path, contents)?;
        std::env::set_var("ATPROXY_LOCK_RETRY_TIMES", "7");
        let loaded = FilterConfig::load(&path.to_string_lossy());
        std::env::remove_var("ATPROXY_LOCK_RETRY_TIMES");
        std::fs::remove_file(&path)?;

        assert_eq!(
            loaded?,
            FilterConfig {
                addressing: "10.0.0.2:13306".into(),
                lock_retry_interval: Duration::from_millis(1500),
                lock_retry_times: 7,
            }
        );
        Ok(())
    }

    #[test]
    fn negative_times_rejected() -> Result<()> {
        let c = config::Config::builder().set_override("lock_retry_times", -1i64)?.build()?;
        assert!(matches!(FilterConfig::from_config(&c), Err(Error::Config(_))));
        Ok(())
    }
}
