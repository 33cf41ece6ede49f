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

//! Typed binding of plugin configuration sections.
//!
//! A section is shallow-merged over the plugin's defaults: each top-level
//! key present in the section replaces the default value for that field,
//! everything else keeps its default. Missing sections and missing fields
//! are never errors.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A present configuration section does not fit the plugin's schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "invalid config section '{section}'{}: {message}",
    .field.as_deref().map(|f| format!(" (field '{}')", f)).unwrap_or_default()
)]
pub struct ConfigSchemaError {
    /// Name of the section being bound.
    pub section: String,
    /// The offending field, when one can be singled out.
    pub field: Option<String>,
    pub message: String,
}

impl ConfigSchemaError {
    fn new(section: &str, field: Option<String>, message: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            field,
            message: message.into(),
        }
    }
}

/// Binds configuration sections into plugin-defined types.
pub struct ConfigBinder;

impl ConfigBinder {
    /// Bind `section` over `T::default()`.
    pub fn bind<T>(section_name: &str, section: Option<&Value>) -> Result<T, ConfigSchemaError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        Self::bind_with(section_name, section, T::default())
    }

    /// Bind `section` over explicit defaults.
    ///
    /// `null` counts as absent, both for the section and for single fields.
    pub fn bind_with<T>(
        section_name: &str,
        section: Option<&Value>,
        defaults: T,
    ) -> Result<T, ConfigSchemaError>
    where
        T: DeserializeOwned + Serialize,
    {
        let overrides = match section {
            None | Some(Value::Null) => return Ok(defaults),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ConfigSchemaError::new(
                    section_name,
                    None,
                    format!("expected an object, found {}", kind_of(other)),
                ))
            }
        };

        let base = match serde_json::to_value(&defaults) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(ConfigSchemaError::new(
                    section_name,
                    None,
                    format!("defaults serialize to {}, not an object", kind_of(&other)),
                ))
            }
            Err(e) => return Err(ConfigSchemaError::new(section_name, None, e.to_string())),
        };

        let mut merged = base.clone();
        for (key, value) in overrides.iter().filter(|(_, v)| !v.is_null()) {
            merged.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(merged)).map_err(|e| {
            let field = Self::offending_field::<T>(&base, overrides);
            ConfigSchemaError::new(section_name, field, e.to_string())
        })
    }

    /// First override key that fails on its own against the defaults.
    fn offending_field<T: DeserializeOwned>(
        base: &Map<String, Value>,
        overrides: &Map<String, Value>,
    ) -> Option<String> {
        overrides
            .iter()
            .filter(|(_, v)| !v.is_null())
            .find(|(key, value)| {
                let mut probe = base.clone();
                probe.insert((*key).clone(), (*value).clone());
                serde_json::from_value::<T>(Value::Object(probe)).is_err()
            })
            .map(|(key, _)| key.clone())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ThrottleConfig {
        rate_per_second: u32,
        burst: u32,
        retry_after_header: bool,
        message: String,
    }

    impl Default for ThrottleConfig {
        fn default() -> Self {
            Self {
                rate_per_second: 10,
                burst: 20,
                retry_after_header: true,
                message: "Too many requests".to_string(),
            }
        }
    }

    #[test]
    fn test_absent_section_yields_defaults() {
        let config: ThrottleConfig = ConfigBinder::bind("throttle", None).unwrap();
        assert_eq!(config, ThrottleConfig::default());

        let config: ThrottleConfig = ConfigBinder::bind("throttle", Some(&Value::Null)).unwrap();
        assert_eq!(config, ThrottleConfig::default());
    }

    #[test]
    fn test_shallow_merge_over_defaults() {
        let section = json!({ "ratePerSecond": 3, "message": "slow down" });
        let config: ThrottleConfig = ConfigBinder::bind("throttle", Some(&section)).unwrap();

        assert_eq!(config.rate_per_second, 3);
        assert_eq!(config.message, "slow down");
        assert_eq!(config.burst, 20);
        assert!(config.retry_after_header);
    }

    #[test]
    fn test_null_fields_and_unknown_fields_are_ignored() {
        let section = json!({ "burst": null, "color": "blue" });
        let config: ThrottleConfig = ConfigBinder::bind("throttle", Some(&section)).unwrap();
        assert_eq!(config, ThrottleConfig::default());
    }

    #[test]
    fn test_incompatible_field_names_the_field() {
        let section = json!({ "burst": 5, "ratePerSecond": "fast" });
        let err = ConfigBinder::bind::<ThrottleConfig>("throttle", Some(&section)).unwrap_err();

        assert_eq!(err.section, "throttle");
        assert_eq!(err.field.as_deref(), Some("ratePerSecond"));
        assert!(err.to_string().contains("ratePerSecond"));
    }

    #[test]
    fn test_non_object_section_is_rejected() {
        let section = json!([1, 2, 3]);
        let err = ConfigBinder::bind::<ThrottleConfig>("throttle", Some(&section)).unwrap_err();
        assert!(err.field.is_none());
        assert!(err.message.contains("an array"));
    }

    #[test]
    fn test_binding_is_idempotent_and_does_not_mutate_input() {
        let section = json!({ "burst": 1, "retryAfterHeader": false });
        let snapshot = section.clone();

        let first: ThrottleConfig = ConfigBinder::bind("throttle", Some(&section)).unwrap();
        let second: ThrottleConfig = ConfigBinder::bind("throttle", Some(&section)).unwrap();

        assert_eq!(first, second);
        assert_eq!(section, snapshot);
    }

    #[test]
    fn test_bind_with_explicit_defaults() {
        let defaults = ThrottleConfig {
            burst: 99,
            ..ThrottleConfig::default()
        };
        let section = json!({ "ratePerSecond": 1 });
        let config = ConfigBinder::bind_with("throttle", Some(&section), defaults).unwrap();

        assert_eq!(config.burst, 99);
        assert_eq!(config.rate_per_second, 1);
    }
}
