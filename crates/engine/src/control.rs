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

//! The control plane facade.
//!
//! [`ControlPlane`] wires a [`BreakpointManager`] and a [`WatchpointManager`] to
//! the debuggee's collaborators and a shared [`EventBus`], and exposes the hooks
//! the process controller calls around each resume cycle.

use std::{io, sync::Arc};

use tokio::sync::broadcast;
use tracing::{debug, info};
use vmdb_common::{Address, Compilation, DebuggerConfig};

use crate::{
    BreakpointHit, BreakpointManager, CompilationResolver, ControlEvent, ControlResult, EventBus,
    HeapInspector, TargetProcess, ThreadContext, WatchpointHit, WatchpointManager,
};

/// Breakpoints and watchpoints of one debuggee.
pub struct ControlPlane {
    config: DebuggerConfig,
    breakpoints: BreakpointManager,
    watchpoints: WatchpointManager,
    events: EventBus,
}

impl ControlPlane {
    /// Build a control plane for one debuggee.
    ///
    /// Fails if the configuration is unusable (e.g. an empty trap instruction).
    pub fn new(
        config: DebuggerConfig,
        process: Arc<dyn TargetProcess>,
        compilations: Arc<dyn CompilationResolver>,
        heap: Arc<dyn HeapInspector>,
    ) -> ControlResult<Self> {
        config.validate()?;
        let events = EventBus::default();
        let breakpoints = BreakpointManager::new(
            Arc::clone(&process),
            compilations,
            config.platform.clone(),
            config.breakpoints.clone(),
            events.clone(),
        );
        let watchpoints =
            WatchpointManager::new(process, heap, config.platform.clone(), events.clone());
        info!(
            watchpoint_capacity = config.platform.watchpoint_capacity,
            trap_len = config.platform.trap_instruction.len(),
            "control plane ready"
        );
        Ok(Self { config, breakpoints, watchpoints, events })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    /// Breakpoint operations.
    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// Watchpoint operations.
    pub fn watchpoints(&self) -> &WatchpointManager {
        &self.watchpoints
    }

    /// Receive every change event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }

    /// Patch every enabled breakpoint into the debuggee. Call right before resuming.
    pub fn before_resume(&self) -> ControlResult<()> {
        self.breakpoints.set_active_all(true)?;
        debug!("breakpoints patched for resume");
        Ok(())
    }

    /// Restore original code and drop transient breakpoints. Call right after the
    /// debuggee stops.
    pub fn after_stop(&self) -> ControlResult<()> {
        self.breakpoints.set_active_all(false)?;
        let removed = self.breakpoints.remove_transient_breakpoints()?;
        debug!(transient_removed = removed, "breakpoints restored after stop");
        Ok(())
    }

    /// A thread stopped on a breakpoint trap.
    pub fn breakpoint_hit(&self, thread: &dyn ThreadContext) -> ControlResult<Option<BreakpointHit>> {
        self.breakpoints.breakpoint_hit(thread)
    }

    /// A thread stopped on a watchpoint trap for `address`.
    pub fn watchpoint_hit(&self, address: Address) -> ControlResult<Option<WatchpointHit>> {
        self.watchpoints.watchpoint_hit(address)
    }

    /// A collection finished. Must be called before the debuggee resumes.
    pub fn on_gc_completed(&self) -> ControlResult<()> {
        self.watchpoints.on_gc_completed()
    }

    /// The debuggee finished compiling a method.
    pub fn on_compilation_completed(&self, compilation: &Compilation) -> ControlResult<usize> {
        self.breakpoints.on_compilation_completed(compilation)
    }

    /// The debuggee reclaimed a compilation's code.
    pub fn on_compilation_evicted(&self, compilation: &Compilation) -> ControlResult<usize> {
        self.breakpoints.on_compilation_evicted(compilation)
    }

    /// The debuggee is gone; forget everything without touching its memory.
    pub fn on_process_terminated(&self) {
        self.breakpoints.on_process_terminated();
        self.watchpoints.on_process_terminated();
    }

    /// Human-readable dump of every breakpoint and watchpoint.
    pub fn write_summary(&self, out: &mut dyn io::Write) -> io::Result<()> {
        self.breakpoints.write_summary(out)?;
        self.watchpoints.write_summary(out)
    }
}
