// VMDB - Managed VM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
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

//! Change notifications for observers of the control plane.
//!
//! Managers publish a [`ControlEvent`] after each successful structural
//! mutation, once the mutation is fully applied and the new snapshot is
//! visible. Subscribers receive through a broadcast channel, either with
//! `try_recv` from synchronous code or `recv().await` inside a runtime.

use tokio::sync::broadcast;
use tracing::trace;
use vmdb_common::CompilationId;

use crate::BreakpointId;

/// Default number of undelivered events kept per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The set of client-visible breakpoints, or their state, changed.
    BreakpointsChanged,
    /// The set of client-visible watchpoints, or their state, changed.
    WatchpointsChanged,
    /// A realized breakpoint vanished because its compilation was reclaimed.
    CompilationEvicted {
        /// The bytecode breakpoint that owned the realization.
        breakpoint: BreakpointId,
        /// The reclaimed compilation.
        compilation: CompilationId,
    },
}

/// Fan-out of [`ControlEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber; it sees every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Having no subscriber is not an error.
    pub fn publish(&self, event: ControlEvent) {
        trace!(?event, subscribers = self.tx.receiver_count(), "publishing control event");
        let _ = self.tx.send(event);
    }
}
