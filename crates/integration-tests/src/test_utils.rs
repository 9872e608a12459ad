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

//! Test utilities for integration tests
//!
//! A [`Session`] pairs a [`SimulatedVm`] with the [`ControlPlane`] driving it and
//! plays the part of the process controller: it patches breakpoints before each
//! resume, restores code after each stop and translates stops into hit reports.

use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use vmdb_common::{Address, DebuggerConfig};
use vmdb_engine::{
    test_utils::SimulatedVm, BreakpointHit, ControlEvent, ControlPlane, RegisterSnapshot,
    WatchpointHit,
};

/// Test environment initialization
pub mod init {
    /// Initialize logging for a test. Safe to call from every test.
    pub fn init_test_environment() {
        vmdb_common::logging::ensure_test_logging(None);
    }
}

/// Code and heap fixtures shared by the scenarios
pub mod fixtures {
    use vmdb_common::{Address, Compilation, CompilationId, MemoryRegion, MethodKey};

    /// Size of every simulated compilation's code region.
    pub const CODE_SIZE: u64 = 0x100;

    /// `demo.Counter.increment()V`
    pub fn counter_increment() -> MethodKey {
        MethodKey::new("demo.Counter", "increment", "()V")
    }

    /// `demo.Ledger.post(J)V`
    pub fn ledger_post() -> MethodKey {
        MethodKey::new("demo.Ledger", "post", "(J)V")
    }

    /// A compilation of `method` whose code starts at `start`.
    pub fn compilation(id: u64, method: MethodKey, start: u64) -> Compilation {
        Compilation {
            id: CompilationId::new(id),
            method,
            code: MemoryRegion::new(Address::new(start), CODE_SIZE),
        }
    }

    /// `[start, start + size)`
    pub fn region(start: u64, size: u64) -> MemoryRegion {
        MemoryRegion::new(Address::new(start), size)
    }
}

/// A debugging session over a simulated debuggee.
pub struct Session {
    /// The simulated debuggee.
    pub vm: Arc<SimulatedVm>,
    /// The control plane under test.
    pub plane: ControlPlane,
    events: Mutex<broadcast::Receiver<ControlEvent>>,
}

impl Session {
    /// Start a session with the default configuration.
    pub fn start() -> Result<Self> {
        Self::start_with(DebuggerConfig::default())
    }

    /// Start a session with the given configuration.
    pub fn start_with(config: DebuggerConfig) -> Result<Self> {
        init::init_test_environment();
        let vm = SimulatedVm::new();
        let plane = SimulatedVm::control_plane_with(&vm, config)?;
        let events = Mutex::new(plane.subscribe());
        Ok(Self { vm, plane, events })
    }

    /// Patch breakpoints in and let the debuggee run.
    pub fn resume(&self) -> Result<()> {
        self.plane.before_resume()?;
        self.vm.set_running(true);
        debug!("debuggee resumed");
        Ok(())
    }

    /// The debuggee stopped. Breakpoints stay patched until [`Session::settle`].
    pub fn halt(&self) {
        self.vm.set_running(false);
    }

    /// Restore original code and drop transient breakpoints after a stop.
    pub fn settle(&self) -> Result<()> {
        self.plane.after_stop()?;
        debug!("debuggee settled");
        Ok(())
    }

    /// One full resume cycle with `run` acting on the debuggee while it runs.
    pub fn resume_cycle<R>(&self, run: impl FnOnce(&SimulatedVm) -> R) -> Result<R> {
        self.resume()?;
        let result = run(&self.vm);
        self.halt();
        self.settle()?;
        Ok(result)
    }

    /// A thread stopped on the trap planted at `address`.
    pub fn trap_at(&self, address: Address) -> RegisterSnapshot {
        let adjustment = self.plane.config().platform.trap_pc_adjustment;
        self.vm.thread_at(address.plus(adjustment))
    }

    /// Report a breakpoint stop at `address` with the given register values.
    pub fn stop_at(&self, address: Address, registers: &[(&str, u64)]) -> Result<Option<BreakpointHit>> {
        let mut thread = self.trap_at(address);
        for (name, value) in registers {
            thread.set_register(*name, *value);
        }
        Ok(self.plane.breakpoint_hit(&thread)?)
    }

    /// Report a watchpoint stop for an access to `address`.
    pub fn access(&self, address: Address) -> Result<Option<WatchpointHit>> {
        Ok(self.plane.watchpoint_hit(address)?)
    }

    /// Every event published since the last call.
    pub fn drain_events(&self) -> Vec<ControlEvent> {
        let mut receiver = self.events.lock();
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
