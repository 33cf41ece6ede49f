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

//! Per-session state passed through the plugin pipeline.

use crate::abort::{AbortReason, AbortSignal};
use crate::message::{ProxyRequest, ProxyResponse};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Mutable state of one intercepted exchange.
///
/// A context is owned by the task driving its session. Plugins receive it
/// by `&mut` for the duration of their handler and may modify the request,
/// set or rewrite the response, leave data for later plugins, or abort.
#[derive(Debug)]
pub struct SessionContext {
    /// Unique session identifier.
    pub id: Uuid,
    /// The intercepted request.
    pub request: ProxyRequest,
    /// The response, once the upstream or a plugin has produced one.
    pub response: Option<ProxyResponse>,
    /// Scratch data shared between plugins within this session only.
    pub data: HashMap<String, serde_json::Value>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    abort: AbortSignal,
}

impl SessionContext {
    pub fn new(request: ProxyRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            response: None,
            data: HashMap::new(),
            started_at: Utc::now(),
            abort: AbortSignal::new(),
        }
    }

    /// Create a context wired to an abort signal owned by the transport.
    pub fn with_abort_signal(request: ProxyRequest, abort: AbortSignal) -> Self {
        Self {
            abort,
            ..Self::new(request)
        }
    }

    /// Handle to the abort signal; clones observe and trigger the same abort.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn abort(&self, reason: AbortReason) -> bool {
        self.abort.abort(reason)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort.reason()
    }

    pub fn set_response(&mut self, response: ProxyResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Store a value for later plugins in this session.
    pub fn set_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}
