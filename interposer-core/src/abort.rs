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

//! Session abort signal.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a session was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    /// Plugin that requested the abort, `None` when it came from outside
    /// the plugin chain (transport closed, watchdog).
    pub source: Option<String>,
    /// Human readable reason.
    pub message: String,
}

impl AbortReason {
    /// Abort requested by a plugin.
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: Some(plugin.into()),
            message: message.into(),
        }
    }

    /// Abort requested by the engine or a watchdog.
    pub fn external(message: impl Into<String>) -> Self {
        Self {
            source: None,
            message: message.into(),
        }
    }
}

/// Cloneable abort flag carried by every session.
///
/// Clones share state: the transport or a watchdog keeps a clone and can
/// abort the session while a handler is running. The first reason wins.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<AbortReason>>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the session. Returns `false` if it was already aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded by the first `abort` call.
    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.lock().clone()
    }

    /// Resolves once the session is aborted.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}
