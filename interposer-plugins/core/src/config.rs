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

//! Proxy configuration document and plugin descriptors.
//!
//! # Example JSON Configuration
//!
//! ```json
//! {
//!     "urlsToWatch": ["https://api.example.com/**"],
//!     "handlerTimeoutMs": 2000,
//!     "plugins": [
//!         {"name": "Throttle", "enabled": true, "pluginPath": "builtin:throttle", "configSection": "throttle"},
//!         {"name": "Mocks", "enabled": false, "pluginPath": "builtin:mocks"}
//!     ],
//!     "throttle": {"ratePerSecond": 5}
//! }
//! ```
//!
//! Reading the document from disk is left to the caller.

use crate::binder::{ConfigBinder, ConfigSchemaError};
use crate::error::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

const ROOT_SECTION: &str = "<root>";

/// How a plugin whose configuration section does not bind is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigErrorPolicy {
    /// Register the plugin again with an absent section.
    #[default]
    UseDefaults,
    /// Exclude the plugin.
    Exclude,
}

/// Global proxy options, bound from the document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    /// Watch set for plugins that do not declare their own.
    #[serde(default)]
    pub urls_to_watch: Vec<String>,

    /// Upper bound for a single handler invocation.
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,

    /// Skip handlers whose plugin does not watch the request URL.
    #[serde(default = "default_skip_unmatched")]
    pub skip_unmatched_plugins: bool,

    #[serde(default)]
    pub on_config_error: ConfigErrorPolicy,
}

fn default_skip_unmatched() -> bool {
    true
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            urls_to_watch: Vec::new(),
            handler_timeout_ms: None,
            skip_unmatched_plugins: default_skip_unmatched(),
            on_config_error: ConfigErrorPolicy::default(),
        }
    }
}

impl ProxyOptions {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

/// One entry of the `plugins` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Unique plugin name.
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Opaque reference resolved by the plugin loader.
    #[serde(default)]
    pub plugin_path: String,

    /// Top-level key holding this plugin's configuration.
    #[serde(default)]
    pub config_section: Option<String>,

    /// Plugin-specific watch set; falls back to the global one.
    #[serde(default)]
    pub urls_to_watch: Option<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, plugin_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            plugin_path: plugin_path.into(),
            config_section: None,
            urls_to_watch: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_config_section(mut self, section: impl Into<String>) -> Self {
        self.config_section = Some(section.into());
        self
    }

    pub fn with_urls_to_watch<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls_to_watch = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    fn validate(&self, index: usize) -> PluginResult<()> {
        if self.name.trim().is_empty() {
            return Err(PluginError::InvalidDescriptor(format!(
                "plugin at index {} has an empty name",
                index
            )));
        }
        Ok(())
    }
}

/// The global configuration document.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfigDocument {
    root: serde_json::Map<String, Value>,
    plugins: Vec<PluginDescriptor>,
}

impl ProxyConfigDocument {
    /// Parse a document from JSON text.
    pub fn from_json(json: &str) -> PluginResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a document from TOML text.
    pub fn from_toml(toml_str: &str) -> PluginResult<Self> {
        let value: Value = toml::from_str(toml_str)?;
        Self::from_value(value)
    }

    /// Build a document from an already parsed value.
    pub fn from_value(value: Value) -> PluginResult<Self> {
        let root = match value {
            Value::Object(map) => map,
            _ => {
                return Err(PluginError::InvalidDescriptor(
                    "configuration document must be an object".to_string(),
                ))
            }
        };

        let plugins: Vec<PluginDescriptor> = match root.get("plugins") {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| PluginError::InvalidDescriptor(e.to_string()))?,
        };
        for (index, descriptor) in plugins.iter().enumerate() {
            descriptor.validate(index)?;
        }

        Ok(Self { root, plugins })
    }

    /// Descriptors in declared order.
    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// A top-level section by name.
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Global options bound from the document root.
    pub fn options(&self) -> Result<ProxyOptions, ConfigSchemaError> {
        let root = Value::Object(self.root.clone());
        ConfigBinder::bind(ROOT_SECTION, Some(&root))
    }

    /// Names that appear more than once in the descriptor list.
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for descriptor in &self.plugins {
            if !seen.insert(descriptor.name.as_str()) && !duplicates.contains(&descriptor.name.as_str()) {
                duplicates.push(descriptor.name.as_str());
            }
        }
        duplicates
    }
}
