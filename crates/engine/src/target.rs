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

//! Collaborator interfaces onto the debuggee.
//!
//! The control plane never talks to the debuggee directly. Raw memory, the VM
//! lock, hardware watchpoint slots, thread registers, compilation metadata and
//! heap state all come through the traits in this module, so that the outer
//! control program can plug in a live process, a core file, or a simulation.

use std::collections::HashMap;

use eyre::Result;
use vmdb_common::{Address, Compilation, MemoryRegion, MethodKey, ObjectRef, ObjectStatus};

use crate::{ControlError, ControlResult, WatchpointSettings};

/// Memory, locking and watchpoint-slot access to the debuggee process.
///
/// The VM lock is reentrant for the controller that holds it: a thread that
/// already owns the lock may acquire it again, and must release it as many times.
pub trait TargetProcess: Send + Sync {
    /// Read `len` bytes starting at `address`.
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Overwrite debuggee memory at `address`.
    fn write_bytes(&self, address: Address, bytes: &[u8]) -> Result<()>;

    /// Acquire the VM lock without blocking; `false` when the debuggee is running.
    fn try_lock(&self) -> bool;

    /// Acquire the VM lock, waiting if necessary.
    fn lock(&self);

    /// Release one acquisition of the VM lock.
    fn unlock(&self);

    /// Whether the calling controller currently holds the VM lock.
    fn is_locked_by_current(&self) -> bool;

    /// Install a watchpoint in the debuggee. Returns `false` if the platform refused it.
    fn activate_watchpoint(&self, region: MemoryRegion, settings: WatchpointSettings)
        -> Result<bool>;

    /// Remove a previously installed watchpoint. Returns `false` if none was installed there.
    fn deactivate_watchpoint(&self, region: MemoryRegion) -> Result<bool>;

    /// Read a little-endian machine word.
    fn read_word(&self, address: Address, word_size: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, word_size as usize)?;
        Ok(bytes.iter().rev().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }
}

/// Register state of the thread that observed a trap.
pub trait ThreadContext {
    /// Value of the register with the given symbolic name, if the platform has one.
    fn register(&self, name: &str) -> Option<u64>;

    /// The instruction pointer as reported by the platform.
    fn instruction_pointer(&self) -> Address;
}

/// A captured register set, usable wherever a [`ThreadContext`] is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    registers: HashMap<String, u64>,
    instruction_pointer: Address,
}

impl RegisterSnapshot {
    /// Create a snapshot stopped at `instruction_pointer` with no other registers.
    pub fn new(instruction_pointer: Address) -> Self {
        Self { registers: HashMap::new(), instruction_pointer }
    }

    /// Builder-style register assignment.
    pub fn with_register(mut self, name: impl Into<String>, value: u64) -> Self {
        self.registers.insert(name.into(), value);
        self
    }

    /// Set a register value.
    pub fn set_register(&mut self, name: impl Into<String>, value: u64) {
        self.registers.insert(name.into(), value);
    }
}

impl ThreadContext for RegisterSnapshot {
    fn register(&self, name: &str) -> Option<u64> {
        self.registers.get(name).copied()
    }

    fn instruction_pointer(&self) -> Address {
        self.instruction_pointer
    }
}

/// Compilation metadata of the debuggee's code cache.
pub trait CompilationResolver: Send + Sync {
    /// Every compilation of `method` currently in the code cache.
    fn compilations(&self, method: &MethodKey) -> Result<Vec<Compilation>>;

    /// Machine addresses within `compilation` corresponding to bytecode offset `bci`.
    ///
    /// Empty when the offset has no mapping (e.g. optimized away). Method entry
    /// may yield several addresses, one per entry convention.
    fn machine_addresses(&self, compilation: &Compilation, bci: i32) -> Result<Vec<Address>>;

    /// Address in the compiler that the debuggee executes after each compilation completes.
    fn compilation_completed_hook(&self) -> Option<Address>;

    /// Address in the compiler that the debuggee executes before each compilation starts.
    fn compilation_started_hook(&self) -> Option<Address> {
        None
    }

    /// The compilation being reported by a thread stopped at the completion hook.
    fn completed_compilation(&self, thread: &dyn ThreadContext) -> Result<Option<Compilation>>;

    /// Tell the debuggee which types hold bytecode breakpoints, so it reports their compilations.
    fn publish_breakpoint_holders(&self, _holders: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Heap and collector state of the debuggee.
pub trait HeapInspector: Send + Sync {
    /// Whether a garbage collection is in progress.
    fn is_collecting(&self) -> bool;

    /// Current status of `object`.
    fn object_status(&self, object: ObjectRef) -> ObjectStatus;

    /// Current origin of `object`.
    fn object_origin(&self, object: ObjectRef) -> Result<Address>;

    /// Total size of `object` in bytes.
    fn object_size(&self, object: ObjectRef) -> Result<u64>;

    /// Offset from an object's origin of the slot the collector writes a forwarding pointer into.
    fn forwarding_pointer_offset(&self) -> u64;

    /// New origin of the object formerly at `old_origin`, if it has been forwarded.
    fn forwarding_address(&self, old_origin: Address) -> Result<Option<Address>>;
}

/// Holds one acquisition of the VM lock and releases it on drop.
pub struct VmLockGuard<'a> {
    process: &'a dyn TargetProcess,
}

impl<'a> VmLockGuard<'a> {
    /// Acquire without blocking, failing with [`ControlError::VmBusy`] while the debuggee runs.
    pub fn try_acquire(process: &'a dyn TargetProcess) -> ControlResult<Self> {
        if process.try_lock() {
            Ok(Self { process })
        } else {
            Err(ControlError::VmBusy)
        }
    }

    /// Acquire, waiting if necessary. Used on trap and GC paths where the debuggee is stopped.
    pub fn acquire(process: &'a dyn TargetProcess) -> Self {
        process.lock();
        Self { process }
    }
}

impl Drop for VmLockGuard<'_> {
    fn drop(&mut self) {
        self.process.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_snapshot() {
        let snapshot = RegisterSnapshot::new(Address::new(0x4001)).with_register("r1", 5);
        assert_eq!(snapshot.register("r1"), Some(5));
        assert_eq!(snapshot.register("r2"), None);
        assert_eq!(snapshot.instruction_pointer(), Address::new(0x4001));
    }
}
