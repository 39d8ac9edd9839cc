//! Quota configuration and per-request quota state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors parsing a quota string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaSpecError {
    #[error("quota must look like <limit>-<S|M|H|D>, got {0:?}")]
    Format(String),
    #[error("quota limit must be a positive integer, got {0:?}")]
    Limit(String),
    #[error("unknown quota period {0:?}, expected S, M, H or D")]
    Period(String),
}

/// `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSpec {
    pub limit: u64,
    pub window: Duration,
}

impl QuotaSpec {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_minute(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

impl Default for QuotaSpec {
    fn default() -> Self {
        Self::per_minute(100)
    }
}

impl FromStr for QuotaSpec {
    type Err = QuotaSpecError;

    /// Parse `"100-M"`: 100 requests per minute.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (limit, period) = s
            .split_once('-')
            .ok_or_else(|| QuotaSpecError::Format(s.to_string()))?;

        let limit: u64 = limit
            .trim()
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| QuotaSpecError::Limit(limit.to_string()))?;

        let secs = match period.trim().to_ascii_uppercase().as_str() {
            "S" => 1,
            "M" => 60,
            "H" => 3600,
            "D" => 86_400,
            other => return Err(QuotaSpecError::Period(other.to_string())),
        };

        Ok(Self::new(limit, Duration::from_secs(secs)))
    }
}

impl fmt::Display for QuotaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = match self.window.as_secs() {
            1 => "S".to_string(),
            60 => "M".to_string(),
            3600 => "H".to_string(),
            86_400 => "D".to_string(),
            n => format!("{}s", n),
        };
        write!(f, "{}-{}", self.limit, period)
    }
}

impl Serialize for QuotaSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuotaSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub admitted: bool,
}

impl QuotaState {
    /// Build the state for a counter value observed after an increment.
    pub fn from_count(limit: u64, count: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at,
            admitted: count <= limit,
        }
    }

    /// Window reset as unix seconds, for the `X-RateLimit-Reset` header.
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}
