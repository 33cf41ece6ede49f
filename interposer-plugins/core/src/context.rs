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

//! Read-only proxy state shared with every plugin.

use crate::config::ProxyOptions;
use crate::error::PluginResult;
use crate::matcher::WatchSet;
use interposer_core::SessionContext;
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

/// Global options, the shared watch set and logging, handed to plugins.
///
/// Plugins only get `&ProxyContext` / `Arc<ProxyContext>`; nothing here
/// lets a plugin change proxy internals.
#[derive(Debug)]
pub struct ProxyContext {
    options: ProxyOptions,
    global_watch: Arc<WatchSet>,
}

impl ProxyContext {
    /// Build a context, compiling the global `urlsToWatch`.
    pub fn new(options: ProxyOptions) -> PluginResult<Self> {
        let global_watch = Arc::new(WatchSet::parse(&options.urls_to_watch)?);
        Ok(Self {
            options,
            global_watch,
        })
    }

    /// Context with an explicit global watch set.
    pub fn with_watch_set(options: ProxyOptions, global_watch: WatchSet) -> Self {
        Self {
            options,
            global_watch: Arc::new(global_watch),
        }
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Watch set used by plugins that do not declare their own.
    pub fn global_watch_set(&self) -> Arc<WatchSet> {
        self.global_watch.clone()
    }

    /// Logger tagged with a plugin name.
    pub fn logger(&self, plugin: &str) -> PluginLogger {
        PluginLogger::new(plugin)
    }
}

impl Default for ProxyContext {
    fn default() -> Self {
        Self::with_watch_set(ProxyOptions::default(), WatchSet::match_all())
    }
}

/// Logger that tags every entry with the plugin and, optionally, the session.
///
/// Entries go through `tracing`, so they land wherever the process
/// subscriber sends them.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin: Arc<str>,
    session_id: Option<Uuid>,
}

impl PluginLogger {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: Arc::from(plugin),
            session_id: None,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Same logger, tagged with a session.
    pub fn for_session(&self, session: &SessionContext) -> Self {
        Self {
            plugin: self.plugin.clone(),
            session_id: Some(session.id),
        }
    }

    pub fn debug(&self, message: impl Display) {
        tracing::debug!(plugin = %self.plugin, session_id = ?self.session_id, "{}", message);
    }

    pub fn info(&self, message: impl Display) {
        tracing::info!(plugin = %self.plugin, session_id = ?self.session_id, "{}", message);
    }

    pub fn warn(&self, message: impl Display) {
        tracing::warn!(plugin = %self.plugin, session_id = ?self.session_id, "{}", message);
    }

    pub fn error(&self, message: impl Display) {
        tracing::error!(plugin = %self.plugin, session_id = ?self.session_id, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use interposer_core::ProxyRequest;

    #[test]
    fn test_global_watch_set_compiled() {
        let options = ProxyOptions {
            urls_to_watch: vec!["https://api.example.com/*".to_string()],
            ..ProxyOptions::default()
        };
        let ctx = ProxyContext::new(options).unwrap();

        assert!(ctx.global_watch_set().matches("https://api.example.com/v1"));
        assert!(!ctx.global_watch_set().matches("https://cdn.example.com/v1"));
    }

    #[test]
    fn test_invalid_global_pattern() {
        let options = ProxyOptions {
            urls_to_watch: vec!["api.example.com".to_string()],
            ..ProxyOptions::default()
        };
        assert!(matches!(
            ProxyContext::new(options),
            Err(PluginError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_logger_tags() {
        let ctx = ProxyContext::default();
        let logger = ctx.logger("throttle");
        assert_eq!(logger.plugin(), "throttle");
        assert!(logger.session_id().is_none());

        let session = SessionContext::new(ProxyRequest::get("https://example.com/"));
        let tagged = logger.for_session(&session);
        assert_eq!(tagged.session_id(), Some(session.id));
        tagged.info("request throttled");
    }
}
