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

//! Error taxonomy of the control plane.

use thiserror::Error;
use vmdb_common::{CodeLocation, MemoryRegion, ObjectRef, ObjectStatus};

use crate::ConditionError;

/// Errors reported by breakpoint and watchpoint operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The platform cannot hold any more watchpoints.
    #[error("number of watchpoints supported by the platform ({capacity}) exceeded")]
    TooManyWatchpoints {
        /// Platform watchpoint capacity.
        capacity: usize,
    },

    /// The requested region starts at, or overlaps, an existing watchpoint.
    #[error("watchpoint {requested} conflicts with existing watchpoint {existing}")]
    DuplicateWatchpoint {
        /// Region that was requested.
        requested: MemoryRegion,
        /// Region of the watchpoint already in place.
        existing: MemoryRegion,
    },

    /// Watched regions must cover at least one byte and must not wrap around the address space.
    #[error("invalid watchpoint region of {} bytes at {}", .0.size(), .0.start())]
    InvalidRegion(MemoryRegion),

    /// Relocation trackers follow their object watchpoint and are driven by the debugger alone.
    #[error("{0} is maintained by the debugger and cannot be changed directly")]
    ManagedWatchpoint(String),

    /// A breakpoint already exists at the location.
    #[error("breakpoint already exists at {0}")]
    DuplicateBreakpoint(CodeLocation),

    /// The VM lock could not be acquired because the debuggee is running.
    #[error("VM is busy, the process lock could not be acquired")]
    VmBusy,

    /// The entity has been removed; all further operations on it fail.
    #[error("{0} has already been removed")]
    AlreadyRemoved(String),

    /// Attempt to activate something that is already patched into the debuggee.
    #[error("{0} is already active")]
    AlreadyActive(String),

    /// Attempt to deactivate something that is not patched into the debuggee.
    #[error("{0} is not active")]
    NotActive(String),

    /// Transient breakpoints are always enabled and never conditional.
    #[error("{0} is not supported on transient breakpoints")]
    UnsupportedOperationOnTransient(&'static str),

    /// Object-relative watchpoints need a live object.
    #[error("{object} is not live (status {status})")]
    ObjectNotLive {
        /// The object.
        object: ObjectRef,
        /// What the heap reported.
        status: ObjectStatus,
    },

    /// The location has the wrong shape for the requested breakpoint.
    #[error("invalid breakpoint location: {0}")]
    InvalidLocation(String),

    /// The condition text could not be parsed.
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// A collaborator (memory, heap, compilation layer) failed.
    #[error("debuggee access failed: {0}")]
    Process(#[from] eyre::Report),
}

impl ControlError {
    /// Whether the caller can reasonably retry or pick another target.
    ///
    /// Lifecycle misuse, such as mutating a transient breakpoint or a relocation
    /// tracker, is a caller bug and reported as not recoverable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyActive(_)
                | Self::NotActive(_)
                | Self::UnsupportedOperationOnTransient(_)
                | Self::ManagedWatchpoint(_)
        )
    }
}

/// Result alias for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;
