// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job configuration and the parse forms accepted from handler code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default memory reservation for a job: 32 MiB.
pub const DEFAULT_MEMORY_BYTES: u64 = 32 * 1024 * 1024;

/// Default per-attempt wall-clock timeout: 30 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default delay before a failed non-daemon attempt is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid memory size: {0:?}")]
    InvalidMemorySize(String),
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error("invalid priority {0} (expected -1, 0 or 1)")]
    InvalidPriority(i64),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Per-attempt wall-clock limit.
///
/// `Indefinite` is only meaningful for daemons; the scheduler runs such a
/// job under a plain cancelable context with no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Indefinite,
    After(Duration),
}

impl Timeout {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Indefinite => None,
            Timeout::After(d) => Some(*d),
        }
    }
}

// Persisted as milliseconds, null meaning indefinite.
impl Serialize for Timeout {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timeout::Indefinite => serializer.serialize_none(),
            Timeout::After(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        }
    }
}

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ms: Option<u64> = Option::deserialize(deserializer)?;
        Ok(match ms {
            None | Some(0) => Timeout::Indefinite,
            Some(ms) => Timeout::After(Duration::from_millis(ms)),
        })
    }
}

/// Advisory scheduling priority. The scheduler dispatches FIFO; priority is
/// stored and surfaced but only breaks ties between otherwise equal jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_i8(&self) -> i8 {
        match self {
            Priority::Low => -1,
            Priority::Normal => 0,
            Priority::High => 1,
        }
    }

    pub fn try_from_i64(v: i64) -> Result<Self, ConfigError> {
        match v {
            -1 => Ok(Priority::Low),
            0 => Ok(Priority::Normal),
            1 => Ok(Priority::High),
            other => Err(ConfigError::InvalidPriority(other)),
        }
    }
}

crate::simple_display! {
    Priority {
        Low => "low",
        Normal => "normal",
        High => "high",
    }
}

impl Serialize for Priority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i64::deserialize(deserializer)?;
        Priority::try_from_i64(v).map_err(serde::de::Error::custom)
    }
}

mod duration_ms {
    use super::*;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use super::*;

    pub fn serialize<S: serde::Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Configuration supplied at spawn time.
///
/// Immutable for the life of the job except `daemon`, which the scheduler
/// clears on user cancel and on an idle-watcher stop so no restart is
/// scheduled afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub memory_bytes: u64,
    #[serde(rename = "timeout_ms")]
    pub timeout: Timeout,
    pub daemon: bool,
    pub max_attempts: u32,
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    pub priority: Priority,
    #[serde(default)]
    pub unique_key: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(
        rename = "idle_timeout_ms",
        with = "opt_duration_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_channel: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BYTES,
            timeout: Timeout::After(DEFAULT_TIMEOUT),
            daemon: false,
            max_attempts: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
            priority: Priority::Normal,
            unique_key: String::new(),
            data: serde_json::Value::Null,
            idle_timeout: None,
            idle_channel: None,
        }
    }
}

impl JobConfig {
    /// Parse a handler-supplied configuration value.
    ///
    /// `null` and `{}` yield the defaults. Unknown keys are ignored so
    /// handler code can carry its own annotations alongside the job options.
    /// `default_timeout` is applied when the value carries no `timeout` key
    /// (the pool owns the default so `WORKER_DEFAULT_TIMEOUT` is honored).
    pub fn from_value(
        value: &serde_json::Value,
        default_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut config = JobConfig { timeout: Timeout::After(default_timeout), ..Self::default() };
        let obj = match value {
            serde_json::Value::Null => return Ok(config),
            serde_json::Value::Object(obj) => obj,
            other => {
                return Err(ConfigError::InvalidField {
                    field: "config",
                    reason: format!("expected object, got {}", json_kind(other)),
                })
            }
        };

        if let Some(v) = obj.get("memory_bytes").or_else(|| obj.get("memory")) {
            config.memory_bytes = parse_memory_value(v)?;
        }
        if let Some(v) = obj.get("timeout") {
            config.timeout = parse_timeout_value(v)?;
        }
        if let Some(v) = obj.get("daemon") {
            config.daemon = v.as_bool().ok_or_else(|| ConfigError::InvalidField {
                field: "daemon",
                reason: format!("expected bool, got {}", json_kind(v)),
            })?;
        }
        if let Some(v) = obj.get("max_attempts") {
            let n = v.as_i64().ok_or_else(|| ConfigError::InvalidField {
                field: "max_attempts",
                reason: format!("expected integer, got {}", json_kind(v)),
            })?;
            if n < 1 {
                return Err(ConfigError::InvalidField {
                    field: "max_attempts",
                    reason: format!("must be at least 1, got {}", n),
                });
            }
            config.max_attempts = n as u32;
        }
        if let Some(v) = obj.get("retry_delay") {
            config.retry_delay = parse_duration_value(v, "retry_delay")?;
        }
        if let Some(v) = obj.get("priority") {
            let n = v.as_i64().ok_or_else(|| ConfigError::InvalidField {
                field: "priority",
                reason: format!("expected integer, got {}", json_kind(v)),
            })?;
            config.priority = Priority::try_from_i64(n)?;
        }
        if let Some(v) = obj.get("unique_key") {
            config.unique_key = v
                .as_str()
                .ok_or_else(|| ConfigError::InvalidField {
                    field: "unique_key",
                    reason: format!("expected string, got {}", json_kind(v)),
                })?
                .to_string();
        }
        if let Some(v) = obj.get("data") {
            config.data = v.clone();
        }
        if let Some(v) = obj.get("idle_timeout") {
            config.idle_timeout = Some(parse_duration_value(v, "idle_timeout")?);
        }
        if let Some(v) = obj.get("idle_channel") {
            config.idle_channel = Some(
                v.as_str()
                    .ok_or_else(|| ConfigError::InvalidField {
                        field: "idle_channel",
                        reason: format!("expected string, got {}", json_kind(v)),
                    })?
                    .to_string(),
            );
        }

        if config.memory_bytes == 0 {
            config.memory_bytes = DEFAULT_MEMORY_BYTES;
        }
        Ok(config)
    }

    /// True when both idle-watcher inputs are present.
    /// Setting only one of them has no effect.
    pub fn idle_watch(&self) -> Option<(Duration, &str)> {
        match (self.idle_timeout, self.idle_channel.as_deref()) {
            (Some(timeout), Some(channel)) => Some((timeout, channel)),
            _ => None,
        }
    }
}

/// Parse a human-readable memory size.
///
/// Accepts unitless bytes ("1048576") and KB/MB/GB suffixes, each suffix
/// step being ×1024 despite the decimal spelling.
pub fn parse_memory_size(s: &str) -> Result<u64, ConfigError> {
    let trimmed = s.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(rest) = lower.strip_suffix("gb") {
        (rest, 1024u64 * 1024 * 1024)
    } else if let Some(rest) = lower.strip_suffix("mb") {
        (rest, 1024u64 * 1024)
    } else if let Some(rest) = lower.strip_suffix("kb") {
        (rest, 1024u64)
    } else {
        (lower.as_str(), 1u64)
    };
    let digits = digits.trim();
    let n: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidMemorySize(s.to_string()))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| ConfigError::InvalidMemorySize(s.to_string()))
}

/// Parse a timeout string.
///
/// The tokens `""`, `"null"`, `"0"` and `"indefinite"` mean no deadline;
/// anything else must be a humantime duration ("30s", "5m", "1h").
pub fn parse_timeout(s: &str) -> Result<Timeout, ConfigError> {
    match s.trim() {
        "" | "null" | "0" | "indefinite" => Ok(Timeout::Indefinite),
        other => humantime::parse_duration(other)
            .map(Timeout::After)
            .map_err(|_| ConfigError::InvalidDuration(s.to_string())),
    }
}

fn parse_memory_value(v: &serde_json::Value) -> Result<u64, ConfigError> {
    match v {
        serde_json::Value::Number(n) => {
            // Negative requests normalize to the default, same as zero.
            Ok(n.as_u64().unwrap_or(0))
        }
        serde_json::Value::String(s) => parse_memory_size(s),
        other => Err(ConfigError::InvalidMemorySize(json_kind(other).to_string())),
    }
}

fn parse_timeout_value(v: &serde_json::Value) -> Result<Timeout, ConfigError> {
    match v {
        serde_json::Value::Null => Ok(Timeout::Indefinite),
        serde_json::Value::Number(n) if n.as_i64() == Some(0) => Ok(Timeout::Indefinite),
        serde_json::Value::String(s) => parse_timeout(s),
        other => Err(ConfigError::InvalidDuration(json_kind(other).to_string())),
    }
}

fn parse_duration_value(
    v: &serde_json::Value,
    field: &'static str,
) -> Result<Duration, ConfigError> {
    match v {
        // Bare numbers are taken as milliseconds, for programmatic callers.
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(Duration::from_millis)
            .ok_or_else(|| ConfigError::InvalidField {
                field,
                reason: format!("negative duration {}", n),
            }),
        serde_json::Value::String(s) => humantime::parse_duration(s.trim())
            .map_err(|_| ConfigError::InvalidDuration(s.to_string())),
        other => Err(ConfigError::InvalidField {
            field,
            reason: format!("expected duration, got {}", json_kind(other)),
        }),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
