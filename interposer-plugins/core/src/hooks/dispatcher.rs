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

//! Event bus dispatching lifecycle events to plugin handlers.

use super::config::BusConfig;
use super::events::LifecycleEvent;
use super::handlers::{HandlerError, HandlerOutcome, SharedHandler};
use super::registry::{EventSubscription, SubscriberTable};
use crate::matcher::WatchSet;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use interposer_core::{AbortReason, SessionContext};
use interposer_telemetry::Metrics;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Dispatch state of one (session, event) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    Dispatching,
    /// Every handler ran, failed non-fatally, or was skipped.
    Completed,
    /// A handler stopped the chain for this event.
    ShortCircuited { by: String },
    /// The session was aborted. `by` is `None` when the abort came from
    /// outside the handler chain.
    Aborted { by: Option<String>, reason: String },
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DispatchState::Pending | DispatchState::Dispatching)
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchState::Pending => "pending",
            DispatchState::Dispatching => "dispatching",
            DispatchState::Completed => "completed",
            DispatchState::ShortCircuited { .. } => "short_circuited",
            DispatchState::Aborted { .. } => "aborted",
        }
    }
}

/// How a single subscription fared during one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerStatus {
    Continued,
    ShortCircuited,
    Aborted,
    /// The handler returned an error, timed out or panicked.
    Failed,
    /// The plugin does not watch the request URL.
    Skipped,
    /// The session was aborted from outside while the handler was running.
    Interrupted,
}

/// Per-handler record in a [`PublishOutcome`].
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub plugin: String,
    pub handler: String,
    pub status: HandlerStatus,
    pub elapsed_us: u64,
}

/// A handler failure captured at the handler boundary.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub plugin: String,
    pub event: LifecycleEvent,
    pub error: HandlerError,
    pub at: DateTime<Utc>,
}

/// Result of publishing one event for one session.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub event: LifecycleEvent,
    pub session_id: Uuid,
    pub state: DispatchState,
    pub handlers: Vec<HandlerRecord>,
    pub failures: Vec<HandlerFailure>,
    /// Total dispatch time in microseconds.
    pub total_time_us: u64,
}

impl PublishOutcome {
    fn new(event: LifecycleEvent, session_id: Uuid) -> Self {
        Self {
            event,
            session_id,
            state: DispatchState::Pending,
            handlers: Vec::new(),
            failures: Vec::new(),
            total_time_us: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == DispatchState::Completed
    }

    pub fn is_short_circuited(&self) -> bool {
        matches!(self.state, DispatchState::ShortCircuited { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.state, DispatchState::Aborted { .. })
    }

    /// Plugins whose handler actually ran, in order.
    pub fn invoked(&self) -> Vec<&str> {
        self.handlers
            .iter()
            .filter(|r| r.status != HandlerStatus::Skipped)
            .map(|r| r.plugin.as_str())
            .collect()
    }

    pub fn all_successful(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Invocation {
    Finished(Result<HandlerOutcome, HandlerError>),
    Interrupted,
}

/// Publish/subscribe core.
///
/// # Concurrency Model
///
/// The bus is shared by every session. Subscriptions live in a
/// copy-on-write [`SubscriberTable`]; `publish` takes a snapshot of the
/// event's list and iterates it without holding any lock. Within one
/// session handlers run strictly one after another, each with exclusive
/// access to the session.
pub struct EventBus {
    table: SubscriberTable,
    config: BusConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            table: SubscriberTable::new(),
            config,
            metrics: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Subscribe a handler that sees every URL.
    pub fn subscribe(
        &self,
        event: LifecycleEvent,
        plugin_id: impl Into<String>,
        handler: SharedHandler,
    ) -> u64 {
        self.subscribe_watched(event, plugin_id, Arc::new(WatchSet::match_all()), handler)
    }

    /// Subscribe a handler restricted to a watch set.
    pub fn subscribe_watched(
        &self,
        event: LifecycleEvent,
        plugin_id: impl Into<String>,
        watch: Arc<WatchSet>,
        handler: SharedHandler,
    ) -> u64 {
        let plugin_id = plugin_id.into();
        tracing::debug!(
            plugin = %plugin_id,
            event = %event,
            handler = %handler.name(),
            "Subscribing handler"
        );
        self.table.insert(event, plugin_id, watch, handler)
    }

    /// Remove every subscription of a plugin.
    pub fn unsubscribe_plugin(&self, plugin_id: &str) -> usize {
        let removed = self.table.remove_plugin(plugin_id);
        tracing::debug!(plugin = %plugin_id, removed, "Unsubscribed plugin");
        removed
    }

    pub fn subscriber_count(&self, event: LifecycleEvent) -> usize {
        self.table.count(event)
    }

    /// Plugin ids subscribed to an event, in invocation order.
    pub fn subscribers(&self, event: LifecycleEvent) -> Vec<String> {
        self.table.plugins_for(event)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Publish an event for one session.
    ///
    /// Handlers run in subscription order. The call returns once every
    /// handler has run or been skipped, or the chain was stopped. A session
    /// that is already aborted gets no handler calls at all.
    pub async fn publish(
        &self,
        event: LifecycleEvent,
        session: &mut SessionContext,
    ) -> PublishOutcome {
        let start = Instant::now();
        let mut outcome = PublishOutcome::new(event, session.id);

        if session.is_aborted() {
            outcome.state = aborted_state(session);
            outcome.total_time_us = start.elapsed().as_micros() as u64;
            tracing::debug!(
                event = %event,
                session_id = %session.id,
                "Session already aborted, not dispatching"
            );
            return outcome;
        }

        let subscribers = self.table.snapshot(event);
        outcome.state = DispatchState::Dispatching;

        tracing::debug!(
            event = %event,
            session_id = %session.id,
            handler_count = subscribers.len(),
            "Dispatching event to handlers"
        );

        for subscription in subscribers.iter() {
            if session.is_aborted() {
                outcome.state = aborted_state(session);
                break;
            }

            if self.config.skip_unmatched && !subscription.watch.matches(&session.request.url) {
                outcome.handlers.push(record(subscription, HandlerStatus::Skipped, 0));
                continue;
            }

            let handler_start = Instant::now();
            let invocation = self.invoke(subscription, event, session).await;
            let elapsed_us = handler_start.elapsed().as_micros() as u64;

            if let Some(metrics) = &self.metrics {
                metrics.record_handler(&subscription.plugin_id, event.as_str());
            }

            let result = match invocation {
                Invocation::Finished(result) => result,
                Invocation::Interrupted => {
                    outcome
                        .handlers
                        .push(record(subscription, HandlerStatus::Interrupted, elapsed_us));
                    outcome.state = aborted_state(session);
                    tracing::warn!(
                        plugin = %subscription.plugin_id,
                        event = %event,
                        session_id = %session.id,
                        "Handler interrupted by session abort"
                    );
                    break;
                }
            };

            match result {
                Ok(HandlerOutcome::Continue) => {
                    outcome
                        .handlers
                        .push(record(subscription, HandlerStatus::Continued, elapsed_us));
                }
                Ok(HandlerOutcome::ShortCircuit) => {
                    outcome
                        .handlers
                        .push(record(subscription, HandlerStatus::ShortCircuited, elapsed_us));
                    outcome.state = DispatchState::ShortCircuited {
                        by: subscription.plugin_id.clone(),
                    };
                    tracing::debug!(
                        plugin = %subscription.plugin_id,
                        event = %event,
                        session_id = %session.id,
                        "Handler chain short-circuited"
                    );
                    break;
                }
                Ok(HandlerOutcome::Abort(reason)) => {
                    outcome
                        .handlers
                        .push(record(subscription, HandlerStatus::Aborted, elapsed_us));
                    session.abort(AbortReason::plugin(&subscription.plugin_id, reason));
                    outcome.state = aborted_state(session);
                    tracing::info!(
                        plugin = %subscription.plugin_id,
                        event = %event,
                        session_id = %session.id,
                        "Session aborted by plugin"
                    );
                    break;
                }
                Err(error) => {
                    outcome
                        .handlers
                        .push(record(subscription, HandlerStatus::Failed, elapsed_us));
                    let fatal = error.is_fatal().then(|| error.to_string());
                    self.record_failure(&mut outcome, subscription, session, error);

                    if let Some(reason) = fatal {
                        session.abort(AbortReason::plugin(&subscription.plugin_id, reason));
                        outcome.state = aborted_state(session);
                        break;
                    }
                }
            }
        }

        if outcome.state == DispatchState::Dispatching {
            outcome.state = DispatchState::Completed;
        }
        outcome.total_time_us = start.elapsed().as_micros() as u64;

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(
                event.as_str(),
                outcome.state.label(),
                outcome.total_time_us as f64 / 1000.0,
            );
        }

        tracing::debug!(
            event = %event,
            session_id = %session.id,
            state = outcome.state.label(),
            total_time_us = outcome.total_time_us,
            failure_count = outcome.failures.len(),
            "Event dispatch completed"
        );

        outcome
    }

    /// Run one handler behind the panic, timeout and abort boundaries.
    async fn invoke(
        &self,
        subscription: &EventSubscription,
        event: LifecycleEvent,
        session: &mut SessionContext,
    ) -> Invocation {
        let signal = session.abort_signal().clone();
        let timeout = self.config.handler_timeout();
        let call = AssertUnwindSafe(subscription.handler.handle(event, session)).catch_unwind();

        let guarded = async move {
            let caught = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(caught) => caught,
                    Err(_) => {
                        return Err(HandlerError::Timeout {
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }
                },
                None => call.await,
            };
            caught.unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic))))
        };

        tokio::select! {
            biased;
            result = guarded => Invocation::Finished(result),
            _ = signal.aborted() => Invocation::Interrupted,
        }
    }

    fn record_failure(
        &self,
        outcome: &mut PublishOutcome,
        subscription: &EventSubscription,
        session: &SessionContext,
        error: HandlerError,
    ) {
        if error.is_fatal() {
            tracing::error!(
                plugin = %subscription.plugin_id,
                event = %outcome.event,
                session_id = %session.id,
                error = %error,
                "Fatal handler failure, aborting session"
            );
        } else {
            tracing::warn!(
                plugin = %subscription.plugin_id,
                event = %outcome.event,
                session_id = %session.id,
                error = %error,
                "Handler failed, continuing"
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_failure(&subscription.plugin_id, outcome.event.as_str(), error.kind());
        }

        outcome.failures.push(HandlerFailure {
            plugin: subscription.plugin_id.clone(),
            event: outcome.event,
            error,
            at: Utc::now(),
        });
    }
}

fn record(subscription: &EventSubscription, status: HandlerStatus, elapsed_us: u64) -> HandlerRecord {
    HandlerRecord {
        plugin: subscription.plugin_id.clone(),
        handler: subscription.handler.name().to_string(),
        status,
        elapsed_us,
    }
}

fn aborted_state(session: &SessionContext) -> DispatchState {
    match session.abort_reason() {
        Some(reason) => DispatchState::Aborted {
            by: reason.source,
            reason: reason.message,
        },
        None => DispatchState::Aborted {
            by: None,
            reason: String::new(),
        },
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Builder for creating an EventBus with custom settings.
pub struct EventBusBuilder {
    config: BusConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            metrics: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound every handler invocation.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Skip or run handlers whose plugin does not watch the request URL.
    pub fn with_skip_unmatched(mut self, skip: bool) -> Self {
        self.config.skip_unmatched = skip;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            table: SubscriberTable::new(),
            config: self.config,
            metrics: self.metrics,
        }
    }
}
