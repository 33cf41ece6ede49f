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

//! Interposer Core
//!
//! Data structures shared between the proxy engine and the plugin framework:
//! the per-session context handed to plugins, the intercepted request and
//! response, and the session abort signal.

pub mod abort;
pub mod message;
pub mod session;

pub use abort::{AbortReason, AbortSignal};
pub use message::{ProxyRequest, ProxyResponse};
pub use session::SessionContext;
