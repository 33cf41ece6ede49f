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

//! Subscriber table mapping lifecycle events to ordered subscriptions.

use super::events::LifecycleEvent;
use super::handlers::SharedHandler;
use crate::matcher::WatchSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One plugin's handler for one event.
#[derive(Clone)]
pub struct EventSubscription {
    /// Name of the subscribing plugin.
    pub plugin_id: String,
    pub event: LifecycleEvent,
    pub handler: SharedHandler,
    /// The plugin's watch set.
    pub watch: Arc<WatchSet>,
    /// Table-wide insertion counter.
    pub sequence: u64,
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("plugin_id", &self.plugin_id)
            .field("event", &self.event)
            .field("handler", &self.handler.name())
            .field("watch", &self.watch.to_strings())
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Ordered subscriptions per event.
///
/// Each event's list is an immutable `Arc<[EventSubscription]>`. Writers
/// build a new list and swap it in; readers clone the `Arc` and iterate
/// without holding the lock, so a publish in progress keeps the list it
/// started with.
#[derive(Default)]
pub struct SubscriberTable {
    by_event: RwLock<HashMap<LifecycleEvent, Arc<[EventSubscription]>>>,
    next_sequence: AtomicU64,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscription at the end of the event's list.
    pub fn insert(
        &self,
        event: LifecycleEvent,
        plugin_id: impl Into<String>,
        watch: Arc<WatchSet>,
        handler: SharedHandler,
    ) -> u64 {
        let mut table = self.by_event.write();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let subscription = EventSubscription {
            plugin_id: plugin_id.into(),
            event,
            handler,
            watch,
            sequence,
        };

        let next: Arc<[EventSubscription]> = match table.get(&event) {
            Some(current) => current
                .iter()
                .cloned()
                .chain(std::iter::once(subscription))
                .collect(),
            None => Arc::from(vec![subscription]),
        };
        table.insert(event, next);
        sequence
    }

    /// Current list for an event.
    pub fn snapshot(&self, event: LifecycleEvent) -> Arc<[EventSubscription]> {
        self.by_event
            .read()
            .get(&event)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Drop every subscription of a plugin. Returns how many were removed.
    pub fn remove_plugin(&self, plugin_id: &str) -> usize {
        let mut table = self.by_event.write();
        let mut removed = 0;

        for list in table.values_mut() {
            let before = list.len();
            if list.iter().any(|s| s.plugin_id == plugin_id) {
                *list = list
                    .iter()
                    .filter(|s| s.plugin_id != plugin_id)
                    .cloned()
                    .collect();
                removed += before - list.len();
            }
        }
        table.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn count(&self, event: LifecycleEvent) -> usize {
        self.by_event.read().get(&event).map_or(0, |list| list.len())
    }

    /// Plugin ids subscribed to an event, in invocation order.
    pub fn plugins_for(&self, event: LifecycleEvent) -> Vec<String> {
        self.snapshot(event)
            .iter()
            .map(|s| s.plugin_id.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.by_event.read().values().map(|list| list.len()).sum()
    }

    pub fn clear(&self) {
        self.by_event.write().clear();
    }
}
