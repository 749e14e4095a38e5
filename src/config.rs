use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::engine::AdmissionSettings;
use crate::limits::{MAX_HOLD_DURATION_SECS, MAX_STAY_NIGHTS};

/// `INNKEEP_DATA_DIR` value that selects the non-durable store.
pub const IN_MEMORY: &str = ":memory:";

/// Server settings, read from `INNKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: String,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub hold_duration: Duration,
    pub checkin_grace_days: u32,
    pub reaper_interval: Duration,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: "./data".into(),
            password: "innkeep".into(),
            max_connections: 256,
            compact_threshold: 1000,
            hold_duration: Duration::from_secs(15 * 60),
            checkin_grace_days: 0,
            reaper_interval: Duration::from_secs(60),
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        Self {
            port: parsed(&lookup, "INNKEEP_PORT", defaults.port),
            bind: text("INNKEEP_BIND", defaults.bind),
            data_dir: text("INNKEEP_DATA_DIR", defaults.data_dir),
            password: text("INNKEEP_PASSWORD", defaults.password),
            max_connections: parsed(&lookup, "INNKEEP_MAX_CONNECTIONS", defaults.max_connections)
                .max(1),
            compact_threshold: parsed(&lookup, "INNKEEP_COMPACT_THRESHOLD", defaults.compact_threshold),
            hold_duration: Duration::from_secs(
                parsed(
                    &lookup,
                    "INNKEEP_HOLD_DURATION_SECS",
                    defaults.hold_duration.as_secs(),
                )
                .clamp(1, MAX_HOLD_DURATION_SECS),
            ),
            checkin_grace_days: parsed(&lookup, "INNKEEP_CHECKIN_GRACE_DAYS", defaults.checkin_grace_days),
            reaper_interval: Duration::from_secs(
                parsed(
                    &lookup,
                    "INNKEEP_REAPER_INTERVAL_SECS",
                    defaults.reaper_interval.as_secs(),
                )
                .max(1),
            ),
            tls_cert: lookup("INNKEEP_TLS_CERT"),
            tls_key: lookup("INNKEEP_TLS_KEY"),
            metrics_port: lookup("INNKEEP_METRICS_PORT").and_then(|raw| match raw.parse() {
                Ok(port) => Some(port),
                Err(e) => {
                    warn!(key = "INNKEEP_METRICS_PORT", value = %raw, error = %e, "ignoring invalid setting");
                    None
                }
            }),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.data_dir == IN_MEMORY
    }

    pub fn admission(&self) -> AdmissionSettings {
        AdmissionSettings {
            hold_duration_ms: i64::try_from(self.hold_duration.as_millis()).unwrap_or(i64::MAX),
            checkin_grace_days: self.checkin_grace_days,
            max_stay_nights: MAX_STAY_NIGHTS,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            default
        }
    }
}
