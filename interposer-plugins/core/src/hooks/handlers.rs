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

//! Event handler traits and implementations.

use super::events::LifecycleEvent;
use async_trait::async_trait;
use interposer_core::SessionContext;
use std::sync::Arc;
use thiserror::Error;

/// What a handler asks the bus to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Run the next handler.
    Continue,
    /// Skip the remaining handlers for this event only.
    ShortCircuit,
    /// Fail the session; no further handlers or events run.
    Abort(String),
}

impl HandlerOutcome {
    pub fn abort(reason: impl Into<String>) -> Self {
        HandlerOutcome::Abort(reason.into())
    }
}

/// Errors raised by a handler.
///
/// Everything except [`HandlerError::Fatal`] is recorded and dispatch moves
/// on to the next handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler failed fatally: {0}")]
    Fatal(String),

    #[error("Handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        HandlerError::Fatal(message.into())
    }

    /// Whether the error aborts the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Fatal(_))
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Failed(_) => "failed",
            HandlerError::Fatal(_) => "fatal",
            HandlerError::Timeout { .. } => "timeout",
            HandlerError::Panicked(_) => "panicked",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Failed(e.to_string())
    }
}

/// Trait for asynchronous event handlers.
///
/// A handler gets exclusive access to the session for the duration of the
/// call. It may await; the session does not move on to the next handler
/// until it returns.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        event: LifecycleEvent,
        session: &mut SessionContext,
    ) -> Result<HandlerOutcome, HandlerError>;

    /// Get the handler name.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Shared handler reference stored in subscriptions.
pub type SharedHandler = Arc<dyn EventHandler>;

/// A handler that always continues.
pub struct NoOpHandler {
    name: String,
}

impl NoOpHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EventHandler for NoOpHandler {
    async fn handle(
        &self,
        _event: LifecycleEvent,
        _session: &mut SessionContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        Ok(HandlerOutcome::Continue)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler that logs every event it sees.
pub struct LoggingHandler {
    name: String,
}

impl LoggingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(
        &self,
        event: LifecycleEvent,
        session: &mut SessionContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        tracing::info!(
            handler = %self.name,
            event = %event,
            session_id = %session.id,
            method = %session.request.method,
            url = %session.request.url,
            status = ?session.response.as_ref().map(|r| r.status.as_u16()),
            "Lifecycle event"
        );
        Ok(HandlerOutcome::Continue)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler that invokes a synchronous callback.
pub struct CallbackHandler<F>
where
    F: Fn(LifecycleEvent, &mut SessionContext) -> Result<HandlerOutcome, HandlerError>
        + Send
        + Sync,
{
    name: String,
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(LifecycleEvent, &mut SessionContext) -> Result<HandlerOutcome, HandlerError>
        + Send
        + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(LifecycleEvent, &mut SessionContext) -> Result<HandlerOutcome, HandlerError>
        + Send
        + Sync
        + 'static,
{
    async fn handle(
        &self,
        event: LifecycleEvent,
        session: &mut SessionContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        (self.callback)(event, session)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interposer_core::ProxyRequest;

    fn session() -> SessionContext {
        SessionContext::new(ProxyRequest::get("https://api.example.com/v1"))
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new("noop");
        let outcome = handler
            .handle(LifecycleEvent::BeforeRequest, &mut session())
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Continue);
        assert_eq!(handler.name(), "noop");
    }

    #[tokio::test]
    async fn test_logging_handler_observes_every_event() {
        let handler = LoggingHandler::new("audit");
        let mut session = session();
        session.set_response(interposer_core::ProxyResponse::new(http::StatusCode::OK));

        for event in LifecycleEvent::ALL {
            let outcome = handler.handle(event, &mut session).await.unwrap();
            assert_eq!(outcome, HandlerOutcome::Continue);
        }
        assert_eq!(handler.name(), "audit");
        assert_eq!(session.request.url, "https://api.example.com/v1");
        assert!(session.has_response());
        assert!(!session.is_aborted());
    }

    #[tokio::test]
    async fn test_callback_handler_mutates_session() {
        let handler = CallbackHandler::new("tagger", |event, session| {
            session.request.set_header("x-seen-by", "tagger");
            session.set_data("event", serde_json::json!(event.as_str()));
            Ok(HandlerOutcome::ShortCircuit)
        });

        let mut session = session();
        let outcome = handler
            .handle(LifecycleEvent::BeforeRequest, &mut session)
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::ShortCircuit);
        assert_eq!(session.request.header("x-seen-by"), Some("tagger"));
        assert_eq!(
            session.get_data("event"),
            Some(&serde_json::json!("BeforeRequest"))
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(HandlerError::fatal("bad").is_fatal());
        assert!(!HandlerError::failed("meh").is_fatal());
        assert!(!HandlerError::Timeout { timeout_ms: 5 }.is_fatal());
        assert_eq!(HandlerError::Panicked("boom".into()).kind(), "panicked");
        assert_eq!(
            HandlerOutcome::abort("blocked"),
            HandlerOutcome::Abort("blocked".to_string())
        );
    }
}
