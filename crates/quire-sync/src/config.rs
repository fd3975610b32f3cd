//! Session tunables, loadable from TOML.
//!
//! ```toml
//! watchdog_ms = 5000
//! ack_timeout_ms = 2000
//! pseudo_section_pattern = '(?i)^(.+?)\s*-\s*part\s*\d+$'
//! bibliography_titles = ["references", "bibliography"]
//! ```
//!
//! Every field is optional; missing fields take the defaults from
//! [`constants`](crate::constants).

use std::path::Path;
use std::time::Duration;

use quire_blocks::{DEFAULT_BIBLIOGRAPHY_TITLES, DEFAULT_PSEUDO_SECTION_PATTERN, ParseOptions, PseudoSectionMatcher};
use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::constants::{
    DEFAULT_ACK_TIMEOUT, DEFAULT_EVENT_CAPACITY, DEFAULT_POLL_INTERVAL, DEFAULT_PULL_GRACE,
    DEFAULT_REPARSE_DEBOUNCE, DEFAULT_WATCHDOG,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Watchdog timeout for non-idle states (ms).
    pub watchdog_ms: u64,
    /// Acknowledgement timeout for pushes (ms).
    pub ack_timeout_ms: u64,
    /// Post-push window in which pulled content is not an edit (ms).
    pub pull_grace_ms: u64,
    /// Re-parse debounce (ms).
    pub reparse_debounce_ms: u64,
    /// Surface poll interval (ms).
    pub poll_interval_ms: u64,
    /// Regex recognising pseudo-section titles.
    pub pseudo_section_pattern: String,
    /// Heading titles that open the bibliography region (case-insensitive).
    pub bibliography_titles: Vec<String>,
    /// Session event channel capacity.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watchdog_ms: DEFAULT_WATCHDOG.as_millis() as u64,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT.as_millis() as u64,
            pull_grace_ms: DEFAULT_PULL_GRACE.as_millis() as u64,
            reparse_debounce_ms: DEFAULT_REPARSE_DEBOUNCE.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            pseudo_section_pattern: DEFAULT_PSEUDO_SECTION_PATTERN.to_string(),
            bibliography_titles: DEFAULT_BIBLIOGRAPHY_TITLES.iter().map(|t| t.to_string()).collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("watchdog_ms", self.watchdog_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        self.pseudo_matcher()?;
        Ok(())
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn pull_grace(&self) -> Duration {
        Duration::from_millis(self.pull_grace_ms)
    }

    pub fn reparse_debounce(&self) -> Duration {
        Duration::from_millis(self.reparse_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pseudo_matcher(&self) -> Result<PseudoSectionMatcher, ConfigError> {
        PseudoSectionMatcher::new(&self.pseudo_section_pattern).map_err(|source| {
            ConfigError::InvalidPattern {
                pattern: self.pseudo_section_pattern.clone(),
                source,
            }
        })
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            bibliography_titles: self
                .bibliography_titles
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
        }
    }
}
