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

//! Plugin trait, registration handle and lifecycle states.

use crate::binder::{ConfigBinder, ConfigSchemaError};
use crate::context::{PluginLogger, ProxyContext};
use crate::error::PluginResult;
use crate::hooks::{LifecycleEvent, SharedHandler};
use crate::matcher::WatchSet;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A proxy extension.
///
/// `register` is called once, sequentially with the other plugins, and
/// is where a plugin binds its configuration and subscribes handlers.
/// Handlers only become live once every plugin has registered.
#[async_trait]
pub trait ProxyPlugin: Send + Sync {
    async fn register(&mut self, registration: &mut PluginRegistration) -> PluginResult<()>;

    /// Release resources on shutdown.
    async fn dispose(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Constructed, `register` not called yet
    Unregistered,
    /// Registered; subscriptions collected but not live
    Registered,
    /// Participating in dispatch
    Active,
    /// Shut down
    Disposed,
    /// `enabled = false` in its descriptor
    Disabled,
    /// Failed to load, register or bind configuration
    Excluded,
}

impl PluginState {
    /// Whether the lifecycle allows moving to `next`.
    pub fn can_transition_to(&self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Unregistered, Registered)
                | (Unregistered, Excluded)
                | (Unregistered, Disabled)
                | (Registered, Active)
                | (Registered, Excluded)
                | (Registered, Disposed)
                | (Active, Disposed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PluginState::Disposed | PluginState::Disabled | PluginState::Excluded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Unregistered => "unregistered",
            PluginState::Registered => "registered",
            PluginState::Active => "active",
            PluginState::Disposed => "disposed",
            PluginState::Disabled => "disabled",
            PluginState::Excluded => "excluded",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler collected during `register`, committed on activation.
#[derive(Clone)]
pub struct PendingSubscription {
    pub event: LifecycleEvent,
    pub handler: SharedHandler,
}

impl fmt::Debug for PendingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSubscription")
            .field("event", &self.event)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// What a plugin sees while registering.
pub struct PluginRegistration {
    plugin_name: String,
    section_name: Option<String>,
    section: Option<serde_json::Value>,
    watch: Arc<WatchSet>,
    proxy: Arc<ProxyContext>,
    subscriptions: Vec<PendingSubscription>,
}

impl PluginRegistration {
    pub fn new(
        plugin_name: impl Into<String>,
        section_name: Option<String>,
        section: Option<serde_json::Value>,
        watch: Arc<WatchSet>,
        proxy: Arc<ProxyContext>,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            section_name,
            section,
            watch,
            proxy,
            subscriptions: Vec::new(),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Raw configuration section, if the descriptor names one and it exists.
    pub fn config_section(&self) -> Option<&serde_json::Value> {
        self.section.as_ref()
    }

    /// Bind the configuration section over `T::default()`.
    pub fn bind_config<T>(&self) -> Result<T, ConfigSchemaError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let label = self.section_name.as_deref().unwrap_or(&self.plugin_name);
        ConfigBinder::bind(label, self.section.as_ref())
    }

    /// The plugin's effective watch set.
    pub fn watch_set(&self) -> Arc<WatchSet> {
        self.watch.clone()
    }

    pub fn proxy(&self) -> Arc<ProxyContext> {
        self.proxy.clone()
    }

    /// Logger tagged with this plugin's name.
    pub fn logger(&self) -> PluginLogger {
        self.proxy.logger(&self.plugin_name)
    }

    /// Subscribe a handler. Order of calls is the order of invocation
    /// among this plugin's handlers for the same event.
    pub fn subscribe(&mut self, event: LifecycleEvent, handler: SharedHandler) {
        self.subscriptions.push(PendingSubscription { event, handler });
    }

    pub fn subscriptions(&self) -> &[PendingSubscription] {
        &self.subscriptions
    }

    pub(crate) fn into_subscriptions(self) -> Vec<PendingSubscription> {
        self.subscriptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoOpHandler;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct EchoConfig {
        prefix: String,
        repeat: u32,
    }

    fn registration(section: Option<serde_json::Value>) -> PluginRegistration {
        PluginRegistration::new(
            "echo",
            Some("echo".to_string()),
            section,
            Arc::new(WatchSet::match_all()),
            Arc::new(ProxyContext::default()),
        )
    }

    #[test]
    fn test_state_transitions() {
        use PluginState::*;

        assert!(Unregistered.can_transition_to(Registered));
        assert!(Registered.can_transition_to(Active));
        assert!(Active.can_transition_to(Disposed));
        assert!(Unregistered.can_transition_to(Excluded));

        assert!(!Unregistered.can_transition_to(Active));
        assert!(!Disabled.can_transition_to(Registered));
        assert!(!Excluded.can_transition_to(Active));
        assert!(!Disposed.can_transition_to(Active));
        assert!(Excluded.is_terminal());
    }

    #[test]
    fn test_bind_config() {
        let reg = registration(Some(serde_json::json!({"prefix": ">> "})));
        let config: EchoConfig = reg.bind_config().unwrap();
        assert_eq!(config.prefix, ">> ");
        assert_eq!(config.repeat, 0);

        let reg = registration(None);
        assert_eq!(reg.bind_config::<EchoConfig>().unwrap(), EchoConfig::default());

        let reg = registration(Some(serde_json::json!({"repeat": "twice"})));
        let err = reg.bind_config::<EchoConfig>().unwrap_err();
        assert_eq!(err.section, "echo");
        assert_eq!(err.field.as_deref(), Some("repeat"));
    }

    #[test]
    fn test_subscriptions_keep_order() {
        let mut reg = registration(None);
        reg.subscribe(LifecycleEvent::BeforeResponse, Arc::new(NoOpHandler::new("second")));
        reg.subscribe(LifecycleEvent::BeforeRequest, Arc::new(NoOpHandler::new("first")));

        let events: Vec<_> = reg.subscriptions().iter().map(|s| s.event).collect();
        assert_eq!(
            events,
            vec![LifecycleEvent::BeforeResponse, LifecycleEvent::BeforeRequest]
        );
        assert_eq!(reg.into_subscriptions().len(), 2);
    }
}
