// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Event bus configuration.

use crate::config::ProxyOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Dispatch settings for the event bus.
///
/// # Example JSON Configuration
///
/// ```json
/// {
///     "handler_timeout_ms": 2000,
///     "skip_unmatched": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Upper bound for one handler invocation; unbounded when absent.
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,

    /// Skip handlers whose plugin does not watch the request URL.
    #[serde(default = "default_skip_unmatched")]
    pub skip_unmatched: bool,
}

fn default_skip_unmatched() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: None,
            skip_unmatched: default_skip_unmatched(),
        }
    }
}

impl BusConfig {
    /// Create a bus configuration from JSON string.
    pub fn from_json(json: &str) -> Result<Self, BusConfigError> {
        serde_json::from_str(json).map_err(|e| BusConfigError::ParseError(e.to_string()))
    }

    /// Create a bus configuration from TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, BusConfigError> {
        toml::from_str(toml_str).map_err(|e| BusConfigError::ParseError(e.to_string()))
    }

    /// Derive bus settings from the global proxy options.
    pub fn from_options(options: &ProxyOptions) -> Self {
        Self {
            handler_timeout_ms: options.handler_timeout_ms,
            skip_unmatched: options.skip_unmatched_plugins,
        }
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), BusConfigError> {
        if self.handler_timeout_ms == Some(0) {
            return Err(BusConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Errors in bus configuration.
#[derive(Debug, Error)]
pub enum BusConfigError {
    #[error("Failed to parse bus configuration: {0}")]
    ParseError(String),

    #[error("Handler timeout must be greater than zero")]
    InvalidTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert!(config.skip_unmatched);
        assert!(config.handler_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse() {
        let json = BusConfig::from_json(r#"{"handler_timeout_ms": 1500}"#).unwrap();
        assert_eq!(json.handler_timeout(), Some(Duration::from_millis(1500)));
        assert!(json.skip_unmatched);

        let toml = BusConfig::from_toml("skip_unmatched = false").unwrap();
        assert!(!toml.skip_unmatched);

        assert!(BusConfig::from_json("{").is_err());
    }

    #[test]
    fn test_from_options() {
        let options = ProxyOptions {
            handler_timeout_ms: Some(40),
            skip_unmatched_plugins: false,
            ..ProxyOptions::default()
        };
        let config = BusConfig::from_options(&options);
        assert_eq!(config.handler_timeout_ms, Some(40));
        assert!(!config.skip_unmatched);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = BusConfig {
            handler_timeout_ms: Some(0),
            ..BusConfig::default()
        };
        assert!(matches!(config.validate(), Err(BusConfigError::InvalidTimeout)));
    }
}
