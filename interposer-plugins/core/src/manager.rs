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

//! Plugin host
//!
//! Wires options, context, bus and registry together for the proxy engine.

use crate::config::{ProxyConfigDocument, ProxyOptions};
use crate::context::ProxyContext;
use crate::hooks::{BusConfig, EventBus, EventBusBuilder, LifecycleEvent, PublishOutcome};
use crate::loader::PluginLoader;
use crate::matcher::WatchSet;
use crate::registry::{LoadReport, PluginInfo, PluginRegistry};
use interposer_core::{AbortSignal, ProxyRequest, SessionContext};
use interposer_telemetry::Metrics;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Running plugin framework.
///
/// Shared by every session behind an `Arc`. Only `shutdown` needs write
/// access to the registry; publishing goes straight to the bus.
pub struct PluginHost {
    proxy: Arc<ProxyContext>,
    bus: Arc<EventBus>,
    registry: RwLock<PluginRegistry>,
    report: LoadReport,
}

impl PluginHost {
    /// Load, register and activate the plugins of a document.
    pub async fn start(document: &ProxyConfigDocument, loader: &dyn PluginLoader) -> Self {
        Self::start_inner(document, loader, None).await
    }

    /// Like [`PluginHost::start`], recording dispatch metrics.
    pub async fn start_with_metrics(
        document: &ProxyConfigDocument,
        loader: &dyn PluginLoader,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::start_inner(document, loader, Some(metrics)).await
    }

    async fn start_inner(
        document: &ProxyConfigDocument,
        loader: &dyn PluginLoader,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let options = match document.options() {
            Ok(options) => options,
            Err(e) => {
                tracing::error!(error = %e, "Invalid proxy options, using defaults");
                ProxyOptions::default()
            }
        };

        let proxy = match ProxyContext::new(options.clone()) {
            Ok(proxy) => proxy,
            Err(e) => {
                tracing::error!(error = %e, "Invalid global urlsToWatch, watching all traffic");
                ProxyContext::with_watch_set(options.clone(), WatchSet::match_all())
            }
        };
        let proxy = Arc::new(proxy);

        let mut bus_config = BusConfig::from_options(&options);
        if let Err(e) = bus_config.validate() {
            tracing::warn!(error = %e, "Ignoring handler timeout");
            bus_config.handler_timeout_ms = None;
        }
        let mut builder = EventBusBuilder::new().with_config(bus_config);
        if let Some(metrics) = metrics {
            builder = builder.with_metrics(metrics);
        }
        let bus = Arc::new(builder.build());

        let mut registry = PluginRegistry::load(document, loader, proxy.clone()).await;
        registry.activate(&bus);
        let report = registry.report().clone();

        tracing::info!(
            api_version = crate::PLUGIN_API_VERSION,
            active = registry.active_plugins().len(),
            excluded = report.excluded.len(),
            "Plugin host started"
        );

        Self {
            proxy,
            bus,
            registry: RwLock::new(registry),
            report,
        }
    }

    /// Start a session for an intercepted request.
    pub fn new_session(&self, request: ProxyRequest) -> SessionContext {
        SessionContext::new(request)
    }

    /// Start a session whose abort signal is owned by the transport.
    pub fn new_session_with_abort(
        &self,
        request: ProxyRequest,
        abort: AbortSignal,
    ) -> SessionContext {
        SessionContext::with_abort_signal(request, abort)
    }

    pub async fn publish(
        &self,
        event: LifecycleEvent,
        session: &mut SessionContext,
    ) -> PublishOutcome {
        self.bus.publish(event, session).await
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn proxy_context(&self) -> &Arc<ProxyContext> {
        &self.proxy
    }

    /// What happened while loading.
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub async fn plugins(&self) -> Vec<PluginInfo> {
        self.registry.read().await.entries()
    }

    pub async fn active_plugins(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .active_plugins()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Dispose every plugin in reverse registration order.
    pub async fn shutdown(&self) -> Vec<String> {
        let disposed = self.registry.write().await.shutdown(&self.bus).await;
        tracing::info!(disposed = disposed.len(), "Plugin host stopped");
        disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginResult;
    use crate::hooks::{CallbackHandler, HandlerOutcome};
    use crate::loader::StaticLoader;
    use crate::plugin::{PluginRegistration, PluginState, ProxyPlugin};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Stamp;

    #[async_trait]
    impl ProxyPlugin for Stamp {
        async fn register(&mut self, registration: &mut PluginRegistration) -> PluginResult<()> {
            let name = registration.plugin_name().to_string();
            registration.subscribe(
                LifecycleEvent::BeforeRequest,
                Arc::new(CallbackHandler::new("stamp", move |_, session| {
                    session.request.set_header("x-stamped-by", &name);
                    Ok(HandlerOutcome::Continue)
                })),
            );
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_publish_shutdown() {
        let doc = ProxyConfigDocument::from_json(
            r#"{"plugins": [{"name": "Stamp", "pluginPath": "builtin:stamp"}]}"#,
        )
        .unwrap();
        let loader = StaticLoader::new().with_default::<Stamp>("builtin:stamp");

        let host = PluginHost::start(&doc, &loader).await;
        assert_eq!(host.active_plugins().await, vec!["Stamp"]);
        assert!(host.report().is_clean());

        let mut session = host.new_session(ProxyRequest::get("https://api.example.com/"));
        let outcome = host.publish(LifecycleEvent::BeforeRequest, &mut session).await;
        assert!(outcome.is_completed());
        assert_eq!(session.request.header("x-stamped-by"), Some("Stamp"));

        assert_eq!(host.shutdown().await, vec!["Stamp"]);
        assert_eq!(host.plugins().await[0].state, PluginState::Disposed);
        assert_eq!(host.bus().subscriber_count(LifecycleEvent::BeforeRequest), 0);
    }

    #[tokio::test]
    async fn test_bad_options_fall_back_to_defaults() {
        let doc = ProxyConfigDocument::from_json(
            r#"{"handlerTimeoutMs": "never", "urlsToWatch": ["bogus"], "plugins": []}"#,
        )
        .unwrap();
        let host = PluginHost::start(&doc, &StaticLoader::new()).await;

        assert_eq!(host.proxy_context().options(), &ProxyOptions::default());
        assert!(host.proxy_context().global_watch_set().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_global_pattern_watches_everything() {
        let doc = ProxyConfigDocument::from_json(r#"{"urlsToWatch": ["bogus"]}"#).unwrap();
        let host = PluginHost::start(&doc, &StaticLoader::new()).await;

        assert_eq!(host.proxy_context().options().urls_to_watch, vec!["bogus"]);
        assert!(host.proxy_context().global_watch_set().is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_ignored() {
        let doc = ProxyConfigDocument::from_json(r#"{"handlerTimeoutMs": 0}"#).unwrap();
        let host = PluginHost::start(&doc, &StaticLoader::new()).await;
        assert!(host.bus().config().handler_timeout().is_none());
    }
}
