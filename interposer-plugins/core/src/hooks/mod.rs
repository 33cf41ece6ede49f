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

//! Lifecycle event pipeline
//!
//! Plugins subscribe handlers to lifecycle events; the proxy engine
//! publishes each event with the session's mutable context:
//!
//! - **BeforeRequest**: inspect, rewrite or answer the request
//! - **BeforeResponse**: inspect or rewrite the upstream response
//! - **AfterResponse**: the client has the response
//! - **AfterRequestLog**: the exchange is complete
//!
//! # Architecture
//!
//! - Subscriber table: event to ordered subscriptions, copy-on-write
//! - Dispatch: O(k) where k = subscriptions for the event, sequential per session
//! - Handler boundary: panics caught, optional timeout, abort signal raced
//!
//! # Example
//!
//! ```rust,ignore
//! use interposer_plugins::hooks::{EventBus, CallbackHandler, HandlerOutcome, LifecycleEvent};
//!
//! let bus = EventBus::with_defaults();
//! bus.subscribe(
//!     LifecycleEvent::BeforeRequest,
//!     "tagger",
//!     Arc::new(CallbackHandler::new("tagger", |_, session| {
//!         session.request.set_header("x-proxied", "1");
//!         Ok(HandlerOutcome::Continue)
//!     })),
//! );
//!
//! let outcome = bus.publish(LifecycleEvent::BeforeRequest, &mut session).await;
//! ```

mod config;
mod dispatcher;
mod events;
mod handlers;
mod registry;

pub use config::{BusConfig, BusConfigError};
pub use dispatcher::{
    DispatchState, EventBus, EventBusBuilder, HandlerFailure, HandlerRecord, HandlerStatus,
    PublishOutcome,
};
pub use events::{LifecycleEvent, UnknownEvent};
pub use handlers::{
    CallbackHandler, EventHandler, HandlerError, HandlerOutcome, LoggingHandler, NoOpHandler,
    SharedHandler,
};
pub use registry::{EventSubscription, SubscriberTable};
