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

//! Test utilities: an in-memory debuggee.
//!
//! [`SimulatedVm`] implements every collaborator trait over plain maps so the
//! managers can be exercised without a real process. It models a reentrant VM
//! lock that cannot be taken while the debuggee runs, sparse byte-addressed
//! memory, hardware watchpoint slots, a code cache and a moving heap.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use eyre::{bail, eyre, Result};
use parking_lot::{Condvar, Mutex};
use vmdb_common::{
    Address, Compilation, CompilationId, DebuggerConfig, MemoryRegion, MethodKey, ObjectRef,
    ObjectStatus,
};

use crate::{
    CompilationResolver, ControlPlane, ControlResult, HeapInspector, RegisterSnapshot,
    TargetProcess, ThreadContext, WatchpointSettings,
};

/// Offset of the forwarding-pointer slot from an object's origin.
pub const FORWARDING_POINTER_OFFSET: u64 = 0;

/// Address of the simulated compiler's "compilation completed" hook.
pub const COMPLETED_HOOK: Address = Address::new(0xC0_0000);

/// Address of the simulated compiler's "compilation started" hook.
pub const STARTED_HOOK: Address = Address::new(0xC0_0100);

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Clone, Copy)]
struct SimObject {
    origin: Address,
    size: u64,
    status: ObjectStatus,
}

/// An in-memory debuggee implementing every collaborator trait.
#[derive(Debug, Default)]
pub struct SimulatedVm {
    memory: Mutex<HashMap<Address, u8>>,
    fail_writes: AtomicBool,
    running: AtomicBool,
    lock: Mutex<LockState>,
    released: Condvar,

    watchpoints: Mutex<BTreeMap<(Address, u64), (MemoryRegion, WatchpointSettings)>>,
    refuse_watchpoints: AtomicBool,

    compilations: Mutex<Vec<Compilation>>,
    mappings: Mutex<HashMap<(CompilationId, i32), Vec<Address>>>,
    last_completed: Mutex<Option<Compilation>>,
    holders: Mutex<Vec<String>>,

    collecting: AtomicBool,
    objects: Mutex<HashMap<ObjectRef, SimObject>>,
    forwarding: Mutex<HashMap<Address, Address>>,
}

impl SimulatedVm {
    /// A stopped debuggee with empty memory, no code and no objects.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A control plane over `vm` with the default configuration.
    pub fn control_plane(vm: &Arc<Self>) -> ControlResult<ControlPlane> {
        Self::control_plane_with(vm, DebuggerConfig::default())
    }

    /// A control plane over `vm` with the given configuration.
    pub fn control_plane_with(vm: &Arc<Self>, config: DebuggerConfig) -> ControlResult<ControlPlane> {
        ControlPlane::new(config, vm.clone(), vm.clone(), vm.clone())
    }

    // ----- execution -----

    /// Mark the debuggee running (the VM lock becomes unavailable) or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if !running {
            self.released.notify_all();
        }
    }

    /// A thread stopped with the given instruction pointer.
    pub fn thread_at(&self, instruction_pointer: Address) -> RegisterSnapshot {
        RegisterSnapshot::new(instruction_pointer)
    }

    // ----- memory -----

    /// Fill memory at `address` directly, bypassing the failure switch.
    pub fn poke(&self, address: Address, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        for (i, byte) in bytes.iter().enumerate() {
            memory.insert(address.plus(i as u64), *byte);
        }
    }

    /// Read memory directly; unwritten bytes read as zero.
    pub fn peek(&self, address: Address, len: usize) -> Vec<u8> {
        let memory = self.memory.lock();
        (0..len as u64).map(|i| memory.get(&address.plus(i)).copied().unwrap_or(0)).collect()
    }

    /// Make every subsequent memory write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    // ----- watchpoint slots -----

    /// Regions currently installed as hardware watchpoints, ordered by start address.
    pub fn installed_watchpoints(&self) -> Vec<MemoryRegion> {
        self.watchpoints.lock().values().map(|(region, _)| *region).collect()
    }

    /// Settings installed for the watchpoint at `region`, if any.
    pub fn installed_settings(&self, region: MemoryRegion) -> Option<WatchpointSettings> {
        self.watchpoints.lock().get(&(region.start(), region.size())).map(|(_, settings)| *settings)
    }

    /// Make the platform refuse every subsequent watchpoint installation.
    pub fn refuse_watchpoints(&self, refuse: bool) {
        self.refuse_watchpoints.store(refuse, Ordering::SeqCst);
    }

    // ----- code cache -----

    /// Register a compilation with its bytecode-to-machine mapping.
    pub fn add_compilation(&self, compilation: Compilation, mapping: &[(i32, &[Address])]) {
        let mut mappings = self.mappings.lock();
        for (bci, addresses) in mapping {
            mappings.insert((compilation.id, *bci), addresses.to_vec());
        }
        self.compilations.lock().push(compilation);
    }

    /// Register a compilation and report it as the one just completed.
    pub fn complete_compilation(&self, compilation: Compilation, mapping: &[(i32, &[Address])]) {
        self.add_compilation(compilation.clone(), mapping);
        *self.last_completed.lock() = Some(compilation);
    }

    /// Drop a compilation from the code cache.
    pub fn evict_compilation(&self, id: CompilationId) -> Option<Compilation> {
        let mut compilations = self.compilations.lock();
        let index = compilations.iter().position(|c| c.id == id)?;
        Some(compilations.remove(index))
    }

    /// The most recently published breakpoint holder list.
    pub fn published_holders(&self) -> Vec<String> {
        self.holders.lock().clone()
    }

    // ----- heap -----

    /// Allocate a live object.
    pub fn add_object(&self, object: ObjectRef, origin: Address, size: u64) {
        self.objects.lock().insert(object, SimObject { origin, size, status: ObjectStatus::Live });
    }

    /// Override the status the heap reports for `object`.
    pub fn set_object_status(&self, object: ObjectRef, status: ObjectStatus) {
        if let Some(sim) = self.objects.lock().get_mut(&object) {
            sim.status = status;
        }
    }

    /// Move `object` to `new_origin`, leaving a forwarding pointer at the old one.
    pub fn move_object(&self, object: ObjectRef, new_origin: Address) -> Option<Address> {
        let mut objects = self.objects.lock();
        let sim = objects.get_mut(&object)?;
        let old_origin = sim.origin;
        sim.origin = new_origin;
        self.forwarding.lock().insert(old_origin, new_origin);
        Some(old_origin)
    }

    /// Enter or leave a garbage collection.
    pub fn set_collecting(&self, collecting: bool) {
        self.collecting.store(collecting, Ordering::SeqCst);
    }
}

impl TargetProcess for SimulatedVm {
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>> {
        Ok(self.peek(address, len))
    }

    fn write_bytes(&self, address: Address, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated write failure at {address}");
        }
        self.poke(address, bytes);
        Ok(())
    }

    fn try_lock(&self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        let me = thread::current().id();
        let mut state = self.lock.lock();
        match state.owner {
            Some(owner) if owner != me => false,
            _ => {
                state.owner = Some(me);
                state.depth += 1;
                true
            }
        }
    }

    fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.lock.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth += 1;
    }

    fn unlock(&self) {
        let mut state = self.lock.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_all();
        }
    }

    fn is_locked_by_current(&self) -> bool {
        self.lock.lock().owner == Some(thread::current().id())
    }

    fn activate_watchpoint(&self, region: MemoryRegion, settings: WatchpointSettings) -> Result<bool> {
        if self.refuse_watchpoints.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut watchpoints = self.watchpoints.lock();
        let key = (region.start(), region.size());
        if watchpoints.contains_key(&key) {
            return Ok(false);
        }
        watchpoints.insert(key, (region, settings));
        Ok(true)
    }

    fn deactivate_watchpoint(&self, region: MemoryRegion) -> Result<bool> {
        Ok(self.watchpoints.lock().remove(&(region.start(), region.size())).is_some())
    }
}

impl CompilationResolver for SimulatedVm {
    fn compilations(&self, method: &MethodKey) -> Result<Vec<Compilation>> {
        Ok(self.compilations.lock().iter().filter(|c| &c.method == method).cloned().collect())
    }

    fn machine_addresses(&self, compilation: &Compilation, bci: i32) -> Result<Vec<Address>> {
        Ok(self.mappings.lock().get(&(compilation.id, bci)).cloned().unwrap_or_default())
    }

    fn compilation_completed_hook(&self) -> Option<Address> {
        Some(COMPLETED_HOOK)
    }

    fn compilation_started_hook(&self) -> Option<Address> {
        Some(STARTED_HOOK)
    }

    fn completed_compilation(&self, _thread: &dyn ThreadContext) -> Result<Option<Compilation>> {
        Ok(self.last_completed.lock().take())
    }

    fn publish_breakpoint_holders(&self, holders: &[String]) -> Result<()> {
        *self.holders.lock() = holders.to_vec();
        Ok(())
    }
}

impl HeapInspector for SimulatedVm {
    fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    fn object_status(&self, object: ObjectRef) -> ObjectStatus {
        self.objects.lock().get(&object).map_or(ObjectStatus::Unknown, |sim| sim.status)
    }

    fn object_origin(&self, object: ObjectRef) -> Result<Address> {
        self.objects.lock().get(&object).map(|sim| sim.origin).ok_or_else(|| eyre!("unknown {object}"))
    }

    fn object_size(&self, object: ObjectRef) -> Result<u64> {
        self.objects.lock().get(&object).map(|sim| sim.size).ok_or_else(|| eyre!("unknown {object}"))
    }

    fn forwarding_pointer_offset(&self) -> u64 {
        FORWARDING_POINTER_OFFSET
    }

    fn forwarding_address(&self, old_origin: Address) -> Result<Option<Address>> {
        Ok(self.forwarding.lock().get(&old_origin).copied())
    }
}
