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

//! Plugin loading.
//!
//! Plugins are compiled into the binary and looked up by their descriptor's
//! `pluginPath` in a registration table.

use crate::config::PluginDescriptor;
use crate::error::{PluginError, PluginResult};
use crate::plugin::ProxyPlugin;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Produces plugin instances from descriptors.
pub trait PluginLoader: Send + Sync {
    fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Box<dyn ProxyPlugin>>;
}

/// Factory stored in a [`StaticLoader`].
pub type PluginFactory =
    Box<dyn Fn(&PluginDescriptor) -> PluginResult<Box<dyn ProxyPlugin>> + Send + Sync>;

/// Registration table from `pluginPath` to factory.
#[derive(Default)]
pub struct StaticLoader {
    factories: HashMap<String, PluginFactory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a plugin path.
    pub fn with<F>(mut self, plugin_path: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginDescriptor) -> PluginResult<Box<dyn ProxyPlugin>> + Send + Sync + 'static,
    {
        self.register(plugin_path, factory);
        self
    }

    /// Register a plugin type constructed with `Default`.
    pub fn with_default<P>(self, plugin_path: impl Into<String>) -> Self
    where
        P: ProxyPlugin + Default + 'static,
    {
        self.with(plugin_path, |_| Ok(Box::new(P::default()) as Box<dyn ProxyPlugin>))
    }

    pub fn register<F>(&mut self, plugin_path: impl Into<String>, factory: F)
    where
        F: Fn(&PluginDescriptor) -> PluginResult<Box<dyn ProxyPlugin>> + Send + Sync + 'static,
    {
        let plugin_path = plugin_path.into();
        if self.factories.insert(plugin_path.clone(), Box::new(factory)).is_some() {
            tracing::warn!(plugin_path = %plugin_path, "Replacing plugin factory");
        }
    }

    pub fn contains(&self, plugin_path: &str) -> bool {
        self.factories.contains_key(plugin_path)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl PluginLoader for StaticLoader {
    fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Box<dyn ProxyPlugin>> {
        let factory = self.factories.get(&descriptor.plugin_path).ok_or_else(|| {
            PluginError::load(format!(
                "no plugin registered under '{}' (plugin '{}')",
                descriptor.plugin_path, descriptor.name
            ))
        })?;

        match catch_unwind(AssertUnwindSafe(|| factory(descriptor))) {
            Ok(Ok(plugin)) => Ok(plugin),
            Ok(Err(PluginError::LoadFailed(message))) => Err(PluginError::LoadFailed(message)),
            Ok(Err(other)) => Err(PluginError::load(other.to_string())),
            Err(_) => Err(PluginError::load(format!(
                "factory for '{}' panicked",
                descriptor.plugin_path
            ))),
        }
    }
}
