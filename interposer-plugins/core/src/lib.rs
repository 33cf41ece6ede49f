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

//! Interposer Plugin Framework
//!
//! The extension core of an intercepting HTTP(S) proxy. Every proxy
//! behaviour comes from plugins reacting to request/response lifecycle
//! events.
//!
//! # Architecture
//!
//! - **matcher**: URL watch sets limiting a plugin to part of the traffic
//! - **binder**: typed, defaulted binding of per-plugin config sections
//! - **registry**: ordered plugin list, lifecycle and fault isolation at load
//! - **hooks**: event bus with ordered, isolated, per-session dispatch
//! - **context**: read-only proxy state shared with plugins
//! - **manager**: the host facade the proxy engine talks to
//!
//! Plugins are compiled in and registered in a [`StaticLoader`] table.
//!
//! # Example
//!
//! ```rust,ignore
//! use interposer_plugins::{LifecycleEvent, PluginHost, ProxyConfigDocument, StaticLoader};
//! use interposer_core::ProxyRequest;
//!
//! #[tokio::main]
//! async fn main() {
//!     let document = ProxyConfigDocument::from_json(&std::fs::read_to_string("proxy.json")?)?;
//!     let loader = StaticLoader::new().with_default::<RateLimit>("builtin:rate-limit");
//!
//!     let host = PluginHost::start(&document, &loader).await;
//!     for excluded in &host.report().excluded {
//!         eprintln!("plugin {} excluded: {}", excluded.name, excluded.error);
//!     }
//!
//!     let mut session = host.new_session(ProxyRequest::get("https://api.example.com/v1"));
//!     let outcome = host.publish(LifecycleEvent::BeforeRequest, &mut session).await;
//!     if outcome.is_aborted() {
//!         // fail the request
//!     }
//!
//!     host.shutdown().await;
//! }
//! ```

pub mod binder;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod manager;
pub mod matcher;
pub mod plugin;
pub mod registry;

// Re-exports
pub use binder::{ConfigBinder, ConfigSchemaError};
pub use config::{ConfigErrorPolicy, PluginDescriptor, ProxyConfigDocument, ProxyOptions};
pub use context::{PluginLogger, ProxyContext};
pub use error::{PluginError, PluginResult};
pub use hooks::{
    CallbackHandler, DispatchState, EventBus, EventHandler, HandlerError, HandlerOutcome,
    LifecycleEvent, PublishOutcome,
};
pub use loader::{PluginFactory, PluginLoader, StaticLoader};
pub use manager::PluginHost;
pub use matcher::{matches, PatternError, UrlPattern, WatchSet};
pub use plugin::{PendingSubscription, PluginRegistration, PluginState, ProxyPlugin};
pub use registry::{ExcludedPlugin, ExclusionKind, LoadReport, PluginInfo, PluginRegistry};

/// Plugin API version - plugins must be compatible with this
pub const PLUGIN_API_VERSION: &str = "0.1.0";
