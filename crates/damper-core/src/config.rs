#![forbid(unsafe_code)]

//! Damper configuration and its environment loader.
//!
//! | Variable            | Meaning                                      |
//! |---------------------|----------------------------------------------|
//! | `DAMPER_TIMEOUT_MS` | Release delay in ms; `off`/`none`/empty = no delay |

use std::env;
use std::fmt;
use std::time::Duration;

/// Environment variable holding the default release delay.
pub const ENV_DAMPER_TIMEOUT_MS: &str = "DAMPER_TIMEOUT_MS";

/// Construction-time settings for a [`Damper`](crate::Damper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DamperConfig {
    /// Delay between `release()` and the flush of the buffered value.
    /// `None` flushes synchronously.
    pub timeout: Option<Duration>,
}

impl DamperConfig {
    /// Configuration with no release delay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the release delay.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Clear the release delay.
    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, DamperConfigError> {
        Self::from_env_with(|key| env::var(key).ok())
    }

    /// Load configuration through a custom lookup (used by tests).
    pub fn from_env_with<F>(mut get: F) -> Result<Self, DamperConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = get(ENV_DAMPER_TIMEOUT_MS) {
            config.timeout = parse_timeout(&value)?;
        }
        Ok(config)
    }
}

fn parse_timeout(value: &str) -> Result<Option<Duration>, DamperConfigError> {
    let trimmed = value.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "off" | "none" => return Ok(None),
        _ => {}
    }
    trimmed
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| {
            DamperConfigError::new(
                "timeout",
                value,
                "expected non-negative integer milliseconds or off",
            )
        })
}

/// Configuration error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamperConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl DamperConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DamperConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for DamperConfigError {}
