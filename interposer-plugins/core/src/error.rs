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

//! Plugin error types

use crate::binder::ConfigSchemaError;
use crate::matcher::PatternError;
use thiserror::Error;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur in the plugin system
#[derive(Debug, Error)]
pub enum PluginError {
    // Load errors
    #[error("Plugin load failed: {0}")]
    LoadFailed(String),

    #[error("Duplicate plugin name: {0}")]
    DuplicateName(String),

    #[error("Invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    // Registration errors
    #[error("Plugin registration failed: {0}")]
    RegisterFailed(String),

    #[error(transparent)]
    ConfigSchema(#[from] ConfigSchemaError),

    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    // State errors
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidStateTransition(String, String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PluginError {
    /// Create a registration error.
    pub fn register(message: impl Into<String>) -> Self {
        PluginError::RegisterFailed(message.into())
    }

    /// Create a load error.
    pub fn load(message: impl Into<String>) -> Self {
        PluginError::LoadFailed(message.into())
    }

    /// Whether this error happened while producing the plugin instance.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            PluginError::LoadFailed(_) | PluginError::DuplicateName(_)
        )
    }

    /// Whether this is a configuration shape mismatch.
    pub fn is_config_schema(&self) -> bool {
        matches!(self, PluginError::ConfigSchema(_))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        PluginError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(e: toml::de::Error) -> Self {
        PluginError::Serialization(e.to_string())
    }
}
