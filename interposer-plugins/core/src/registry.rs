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

//! Plugin registry
//!
//! Owns the ordered plugin list. Plugins are loaded and registered in
//! descriptor order; a plugin that fails is excluded and the rest carry on.

use crate::config::{ConfigErrorPolicy, PluginDescriptor, ProxyConfigDocument};
use crate::context::ProxyContext;
use crate::error::{PluginError, PluginResult};
use crate::hooks::EventBus;
use crate::loader::PluginLoader;
use crate::matcher::WatchSet;
use crate::plugin::{PendingSubscription, PluginRegistration, PluginState, ProxyPlugin};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Why a plugin was left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    /// Another descriptor already uses the name
    DuplicateName,
    /// The loader could not produce an instance
    Load,
    /// `register` failed
    Register,
    /// The configuration section did not bind
    ConfigSchema,
}

/// A plugin that did not make it into the active set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedPlugin {
    pub name: String,
    pub kind: ExclusionKind,
    pub error: String,
}

/// Summary of a load pass, for the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Registered plugins, in order.
    pub registered: Vec<String>,
    pub disabled: Vec<String>,
    pub excluded: Vec<ExcludedPlugin>,
    /// Plugins registered with default configuration after a schema error.
    pub defaulted: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.excluded.is_empty() && self.defaulted.is_empty()
    }
}

/// Plugin information for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub plugin_path: String,
    pub state: PluginState,
    /// Number of subscriptions, pending or live
    pub subscriptions: usize,
    /// Error message if excluded
    pub error: Option<String>,
}

struct PluginEntry {
    descriptor: PluginDescriptor,
    state: PluginState,
    instance: Option<Box<dyn ProxyPlugin>>,
    watch: Arc<WatchSet>,
    pending: Vec<PendingSubscription>,
    subscription_count: usize,
    error: Option<String>,
}

impl PluginEntry {
    fn new(descriptor: PluginDescriptor, watch: Arc<WatchSet>) -> Self {
        Self {
            descriptor,
            state: PluginState::Unregistered,
            instance: None,
            watch,
            pending: Vec::new(),
            subscription_count: 0,
            error: None,
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn transition(&mut self, next: PluginState) -> PluginResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(PluginError::InvalidStateTransition(
                self.state.to_string(),
                next.to_string(),
            ));
        }
        tracing::debug!(plugin = %self.descriptor.name, from = %self.state, to = %next, "Plugin state change");
        self.state = next;
        Ok(())
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.descriptor.name.clone(),
            plugin_path: self.descriptor.plugin_path.clone(),
            state: self.state,
            subscriptions: self.subscription_count,
            error: self.error.clone(),
        }
    }
}

/// Ordered collection of plugins and their lifecycle.
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
    proxy: Arc<ProxyContext>,
    report: LoadReport,
}

impl PluginRegistry {
    /// Load and register every plugin of a configuration document.
    ///
    /// Never fails: broken plugins are logged and listed in the report.
    pub async fn load(
        document: &ProxyConfigDocument,
        loader: &dyn PluginLoader,
        proxy: Arc<ProxyContext>,
    ) -> Self {
        let mut registry = Self {
            entries: Vec::with_capacity(document.plugins().len()),
            proxy,
            report: LoadReport::default(),
        };
        let mut seen = HashSet::new();

        for descriptor in document.plugins() {
            if !seen.insert(descriptor.name.clone()) {
                let error = PluginError::DuplicateName(descriptor.name.clone());
                registry.exclude_unlisted(&descriptor.name, ExclusionKind::DuplicateName, &error);
                continue;
            }

            if !descriptor.enabled {
                let mut entry = PluginEntry::new(descriptor.clone(), Arc::new(WatchSet::match_all()));
                entry.state = PluginState::Disabled;
                tracing::info!(plugin = %descriptor.name, "Plugin disabled");
                registry.report.disabled.push(descriptor.name.clone());
                registry.entries.push(entry);
                continue;
            }

            let entry = registry.load_one(descriptor, document, loader).await;
            registry.entries.push(entry);
        }

        tracing::info!(
            registered = registry.report.registered.len(),
            disabled = registry.report.disabled.len(),
            excluded = registry.report.excluded.len(),
            "Plugins loaded"
        );
        registry
    }

    async fn load_one(
        &mut self,
        descriptor: &PluginDescriptor,
        document: &ProxyConfigDocument,
        loader: &dyn PluginLoader,
    ) -> PluginEntry {
        let watch = match &descriptor.urls_to_watch {
            Some(patterns) => match WatchSet::parse(patterns) {
                Ok(watch) => Arc::new(watch),
                Err(e) => {
                    let mut entry = PluginEntry::new(descriptor.clone(), Arc::new(WatchSet::match_all()));
                    self.exclude(&mut entry, ExclusionKind::Register, &PluginError::from(e));
                    return entry;
                }
            },
            None => self.proxy.global_watch_set(),
        };
        let mut entry = PluginEntry::new(descriptor.clone(), watch);

        let mut plugin = match loader.load(descriptor) {
            Ok(plugin) => plugin,
            Err(e) => {
                self.exclude(&mut entry, ExclusionKind::Load, &e);
                return entry;
            }
        };

        let section = descriptor
            .config_section
            .as_deref()
            .and_then(|name| document.section(name))
            .cloned();
        if section.is_none() {
            if let Some(name) = &descriptor.config_section {
                tracing::debug!(plugin = %descriptor.name, section = %name, "Config section absent, using defaults");
            }
        }

        let first = self.register(plugin.as_mut(), &entry, section).await;
        let result = match first {
            Err(PluginError::ConfigSchema(schema)) => {
                match self.proxy.options().on_config_error {
                    ConfigErrorPolicy::UseDefaults => {
                        tracing::warn!(
                            plugin = %descriptor.name,
                            error = %schema,
                            "Invalid plugin configuration, registering with defaults"
                        );
                        // The failed instance may have done part of its work.
                        plugin = match loader.load(descriptor) {
                            Ok(fresh) => fresh,
                            Err(e) => {
                                self.exclude(&mut entry, ExclusionKind::Load, &e);
                                return entry;
                            }
                        };
                        let retried = self.register(plugin.as_mut(), &entry, None).await;
                        if retried.is_ok() {
                            self.report.defaulted.push(descriptor.name.clone());
                        }
                        retried
                    }
                    ConfigErrorPolicy::Exclude => Err(PluginError::ConfigSchema(schema)),
                }
            }
            other => other,
        };

        match result {
            Ok(pending) => {
                if let Err(e) = entry.transition(PluginState::Registered) {
                    self.exclude(&mut entry, ExclusionKind::Register, &e);
                    return entry;
                }
                entry.subscription_count = pending.len();
                entry.pending = pending;
                entry.instance = Some(plugin);
                tracing::info!(
                    plugin = %descriptor.name,
                    subscriptions = entry.subscription_count,
                    "Plugin registered"
                );
                self.report.registered.push(descriptor.name.clone());
            }
            Err(e) => {
                let kind = if e.is_config_schema() {
                    ExclusionKind::ConfigSchema
                } else {
                    ExclusionKind::Register
                };
                self.exclude(&mut entry, kind, &e);
            }
        }
        entry
    }

    /// Call `register` behind a panic boundary and collect subscriptions.
    async fn register(
        &self,
        plugin: &mut dyn ProxyPlugin,
        entry: &PluginEntry,
        section: Option<serde_json::Value>,
    ) -> PluginResult<Vec<PendingSubscription>> {
        let mut registration = PluginRegistration::new(
            entry.name(),
            entry.descriptor.config_section.clone(),
            section,
            entry.watch.clone(),
            self.proxy.clone(),
        );

        match AssertUnwindSafe(plugin.register(&mut registration))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(registration.into_subscriptions()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PluginError::register("register panicked")),
        }
    }

    fn exclude(&mut self, entry: &mut PluginEntry, kind: ExclusionKind, error: &PluginError) {
        entry.state = PluginState::Excluded;
        entry.error = Some(error.to_string());
        entry.pending.clear();
        entry.subscription_count = 0;
        self.exclude_unlisted(entry.name(), kind, error);
    }

    fn exclude_unlisted(&mut self, name: &str, kind: ExclusionKind, error: &PluginError) {
        tracing::error!(plugin = %name, kind = ?kind, error = %error, "Plugin excluded");
        self.report.excluded.push(ExcludedPlugin {
            name: name.to_string(),
            kind,
            error: error.to_string(),
        });
    }

    /// Commit pending subscriptions to the bus, plugin by plugin in order.
    ///
    /// Returns the number of plugins activated.
    pub fn activate(&mut self, bus: &EventBus) -> usize {
        let mut activated = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.state == PluginState::Registered)
        {
            for pending in std::mem::take(&mut entry.pending) {
                bus.subscribe_watched(
                    pending.event,
                    entry.descriptor.name.clone(),
                    entry.watch.clone(),
                    pending.handler,
                );
            }
            if entry.transition(PluginState::Active).is_ok() {
                activated += 1;
            }
        }
        tracing::info!(activated, "Plugins activated");
        activated
    }

    /// Detach and dispose plugins in reverse registration order.
    ///
    /// Returns the names of disposed plugins in the order they were disposed.
    pub async fn shutdown(&mut self, bus: &EventBus) -> Vec<String> {
        let mut disposed = Vec::new();

        for entry in self.entries.iter_mut().rev().filter(|e| {
            matches!(e.state, PluginState::Active | PluginState::Registered)
        }) {
            let name = entry.descriptor.name.clone();
            bus.unsubscribe_plugin(&name);
            entry.pending.clear();

            if let Some(mut plugin) = entry.instance.take() {
                match AssertUnwindSafe(plugin.dispose()).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(plugin = %name, error = %e, "Plugin dispose failed");
                    }
                    Err(_) => {
                        tracing::error!(plugin = %name, "Plugin dispose panicked");
                    }
                }
            }

            if let Err(e) = entry.transition(PluginState::Disposed) {
                tracing::warn!(plugin = %name, error = %e, "Unexpected state on shutdown");
                entry.state = PluginState::Disposed;
            }
            tracing::info!(plugin = %name, "Plugin disposed");
            disposed.push(name);
        }
        disposed
    }

    /// Every known plugin, in descriptor order. Duplicate descriptors are
    /// only listed in the report.
    pub fn entries(&self) -> Vec<PluginInfo> {
        self.entries.iter().map(PluginEntry::info).collect()
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.entries
            .iter()
            .find(|e| e.name() == name)
            .map(|e| e.state)
    }

    pub fn get(&self, name: &str) -> PluginResult<PluginInfo> {
        self.entries
            .iter()
            .find(|e| e.name() == name)
            .map(PluginEntry::info)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Names of active plugins, in registration order.
    pub fn active_plugins(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.state == PluginState::Active)
            .map(|e| e.name())
            .collect()
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn proxy(&self) -> &Arc<ProxyContext> {
        &self.proxy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
