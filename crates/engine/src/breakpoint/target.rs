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

use tracing::debug;
use vmdb_common::Address;

use crate::{ControlError, ControlResult, TargetProcess};

/// A breakpoint at a machine-code address.
///
/// Several breakpoints of different kinds may share one address. The trap is
/// in debuggee memory exactly while at least one of them is `active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBreakpoint {
    address: Address,
    original_bytes: Option<Vec<u8>>,
    active: bool,
}

impl TargetBreakpoint {
    pub(crate) fn new(address: Address, original_bytes: Option<Vec<u8>>) -> Self {
        Self { address, original_bytes, active: false }
    }

    /// A breakpoint whose trap is already present in debuggee memory.
    pub(crate) fn already_patched(address: Address, trap: &[u8]) -> Self {
        Self { address, original_bytes: Some(trap.to_vec()), active: true }
    }

    /// Address of the trap.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The bytes the trap overwrites, once captured.
    pub fn original_bytes(&self) -> Option<&[u8]> {
        self.original_bytes.as_deref()
    }

    /// Whether this breakpoint currently relies on its trap being patched in.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Capture the bytes under the trap if not yet known.
    pub(crate) fn capture_original(
        &mut self,
        process: &dyn TargetProcess,
        trap_len: usize,
    ) -> ControlResult<()> {
        if self.original_bytes.is_none() {
            self.original_bytes = Some(process.read_bytes(self.address, trap_len)?);
        }
        Ok(())
    }

    /// Patch the trap instruction into the debuggee.
    pub(crate) fn activate(&mut self, process: &dyn TargetProcess, trap: &[u8]) -> ControlResult<()> {
        if self.active {
            return Err(ControlError::AlreadyActive(format!("breakpoint at {}", self.address)));
        }
        self.capture_original(process, trap.len())?;
        process.write_bytes(self.address, trap)?;
        self.active = true;
        debug!(address = %self.address, "patched trap");
        Ok(())
    }

    /// Restore the original bytes.
    pub(crate) fn deactivate(&mut self, process: &dyn TargetProcess) -> ControlResult<()> {
        let original = match (&self.original_bytes, self.active) {
            (Some(original), true) => original,
            _ => return Err(ControlError::NotActive(format!("breakpoint at {}", self.address))),
        };
        process.write_bytes(self.address, original)?;
        self.active = false;
        debug!(address = %self.address, "restored original code");
        Ok(())
    }

    /// Rely on a trap another breakpoint at the same address already patched in.
    pub(crate) fn share_patch(&mut self) -> ControlResult<()> {
        if self.active {
            return Err(ControlError::AlreadyActive(format!("breakpoint at {}", self.address)));
        }
        self.active = true;
        Ok(())
    }

    /// Stop relying on the trap while another breakpoint at the address still needs it.
    pub(crate) fn release_patch(&mut self) -> ControlResult<()> {
        if !self.active {
            return Err(ControlError::NotActive(format!("breakpoint at {}", self.address)));
        }
        self.active = false;
        Ok(())
    }

    /// Forget the patch without touching memory (the code it lived in is gone).
    pub(crate) fn abandon(&mut self) {
        self.active = false;
    }
}
