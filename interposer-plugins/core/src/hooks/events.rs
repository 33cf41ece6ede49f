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

//! Proxy lifecycle events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point in a session's processing at which plugins may act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The request arrived and has not been forwarded yet.
    BeforeRequest,
    /// The upstream response arrived and has not been sent to the client yet.
    BeforeResponse,
    /// The response has been sent to the client.
    AfterResponse,
    /// The exchange is complete and ready to be logged.
    AfterRequestLog,
}

impl LifecycleEvent {
    /// Every event, in the order a session goes through them.
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::BeforeRequest,
        LifecycleEvent::BeforeResponse,
        LifecycleEvent::AfterResponse,
        LifecycleEvent::AfterRequestLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::BeforeRequest => "BeforeRequest",
            LifecycleEvent::BeforeResponse => "BeforeResponse",
            LifecycleEvent::AfterResponse => "AfterResponse",
            LifecycleEvent::AfterRequestLog => "AfterRequestLog",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown lifecycle event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lifecycle event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for LifecycleEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleEvent::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}
