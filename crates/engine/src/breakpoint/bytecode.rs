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

use std::{collections::BTreeSet, fmt};

use vmdb_common::{MethodKey, METHOD_ENTRY_BCI};

use super::BreakpointId;

/// A method position: method plus bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodPosition {
    /// The method.
    pub method: MethodKey,
    /// Bytecode offset, or [`METHOD_ENTRY_BCI`].
    pub bci: i32,
}

impl MethodPosition {
    /// Whether this position is method entry.
    pub fn is_method_entry(&self) -> bool {
        self.bci == METHOD_ENTRY_BCI
    }
}

impl fmt::Display for MethodPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_method_entry() {
            write!(f, "{}@entry", self.method)
        } else {
            write!(f, "{}@{}", self.method, self.bci)
        }
    }
}

/// Realization state of a bytecode breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealizationState {
    /// No target breakpoint exists yet (no compilation, or none could be mapped).
    Unrealized,
    /// At least one target breakpoint is installed.
    Realized,
}

/// A breakpoint at a method position, realized in every compilation of the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeBreakpoint {
    position: MethodPosition,
    targets: BTreeSet<BreakpointId>,
}

impl BytecodeBreakpoint {
    pub(crate) fn new(position: MethodPosition) -> Self {
        Self { position, targets: BTreeSet::new() }
    }

    /// Method position of the breakpoint.
    pub fn position(&self) -> &MethodPosition {
        &self.position
    }

    /// Target breakpoints currently realizing this breakpoint.
    pub fn target_breakpoints(&self) -> &BTreeSet<BreakpointId> {
        &self.targets
    }

    /// Whether any realization exists.
    pub fn state(&self) -> RealizationState {
        if self.targets.is_empty() {
            RealizationState::Unrealized
        } else {
            RealizationState::Realized
        }
    }

    pub(crate) fn add_target(&mut self, target: BreakpointId) {
        self.targets.insert(target);
    }

    pub(crate) fn remove_target(&mut self, target: BreakpointId) -> bool {
        self.targets.remove(&target)
    }

    pub(crate) fn take_targets(&mut self) -> BTreeSet<BreakpointId> {
        std::mem::take(&mut self.targets)
    }
}
