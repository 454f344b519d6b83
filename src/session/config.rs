use crate::env;
use anyhow::{Context, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the snapshot lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Session file location
    pub path: PathBuf,
    /// Autosave interval in milliseconds; `None` disables autosave
    #[serde(
        deserialize_with = "deserialize_autosave",
        skip_serializing_if = "Option::is_none"
    )]
    pub autosave: Option<u64>,
    /// Intercept panics and dump with reason `uncaught-exception`
    pub catch_exceptions: bool,
    /// After a fault dump, terminate with status 1 instead of only flagging
    /// the failure
    pub exit_exceptions: bool,
    /// How long a panicking thread waits for its fault dump
    pub fault_dump_timeout_ms: u64,
    /// Upper bound for shutdown and fault dumps; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_ms: Option<u64>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: env::default_session_file_path(),
            autosave: None,
            catch_exceptions: true,
            exit_exceptions: true,
            fault_dump_timeout_ms: env::session::DEFAULT_FAULT_DUMP_TIMEOUT_MS,
            shutdown_timeout_ms: None,
        }
    }
}

impl SnapshotConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_autosave_ms(mut self, interval_ms: u64) -> Self {
        self.autosave = (interval_ms > 0).then_some(interval_ms);
        self
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        self.autosave
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    pub fn fault_dump_timeout(&self) -> Duration {
        Duration::from_millis(self.fault_dump_timeout_ms)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// Positive numbers enable autosave; `false`, zero, negatives, strings and
/// null all disable it.
fn deserialize_autosave<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct AutosaveVisitor;

    impl<'de> Visitor<'de> for AutosaveVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an interval in milliseconds, or a falsy value")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok((v > 0).then_some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(u64::try_from(v).ok().filter(|v| *v > 0))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok((v.is_finite() && v >= 1.0).then(|| v as u64))
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_str<E: de::Error>(self, _v: &str) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(AutosaveVisitor)
}
