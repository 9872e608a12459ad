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

//! Breakpoint entity model
//!
//! A breakpoint is either a *target* breakpoint, patched into machine code at a
//! fixed address, or a *bytecode* breakpoint, which names a method position and
//! is realized as one target breakpoint per compilation of that method. Both
//! share the kind (client, system, transient), the enabled flag and the
//! optional condition.
//!
//! Breakpoints live in an arena owned by the [`BreakpointManager`] and refer to
//! each other by [`BreakpointId`]: a realized target breakpoint records its
//! owning bytecode breakpoint, and the bytecode breakpoint records the set of
//! target breakpoints it currently owns.

mod bytecode;
pub use bytecode::*;

mod manager;
pub use manager::*;

mod target;
pub use target::*;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vmdb_common::CodeLocation;

use crate::{id::universal_id, Condition, ConditionContext, ControlError, ControlResult};

universal_id! {
    /// Stable identifier of a breakpoint, never reused.
    BreakpointId => 1
}

/// Who owns a breakpoint and how long it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BreakpointKind {
    /// Created and fully controlled by the client.
    Client,
    /// Created by an internal service, invisible to the client.
    System,
    /// Lives for one resume cycle; always enabled, never conditional.
    Transient,
}

impl fmt::Display for BreakpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Client => "client",
            Self::System => "system",
            Self::Transient => "transient",
        };
        f.write_str(name)
    }
}

/// What happens when a breakpoint traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointRole {
    /// Evaluate the condition (own, or the owner's) and halt if it holds.
    User,
    /// The debuggee finished a compilation; realize pending bytecode breakpoints and resume.
    CompilationCompletedHook,
    /// The debuggee is about to compile a method; resume.
    CompilationStartedHook,
}

/// Shape-specific state of a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointDetail {
    /// Patched into machine code.
    Target(TargetBreakpoint),
    /// Realized in every compilation of a method.
    Bytecode(BytecodeBreakpoint),
}

/// A breakpoint, as stored in the arena and published in snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub(crate) id: BreakpointId,
    pub(crate) kind: BreakpointKind,
    pub(crate) location: CodeLocation,
    pub(crate) owner: Option<BreakpointId>,
    pub(crate) description: String,
    pub(crate) enabled: bool,
    pub(crate) condition: Option<Condition>,
    pub(crate) role: BreakpointRole,
    pub(crate) detail: BreakpointDetail,
}

impl Breakpoint {
    /// Unique id.
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    /// Client, system or transient.
    pub fn kind(&self) -> BreakpointKind {
        self.kind
    }

    /// Where the breakpoint stops.
    pub fn location(&self) -> &CodeLocation {
        &self.location
    }

    /// The bytecode breakpoint this target breakpoint realizes, if any.
    pub fn owner(&self) -> Option<BreakpointId> {
        self.owner
    }

    /// Human-readable purpose.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Transient breakpoints are always enabled.
    pub fn is_enabled(&self) -> bool {
        self.kind == BreakpointKind::Transient || self.enabled
    }

    /// The condition gating this breakpoint, if any.
    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Trap behavior.
    pub fn role(&self) -> BreakpointRole {
        self.role
    }

    /// Shape-specific state.
    pub fn detail(&self) -> &BreakpointDetail {
        &self.detail
    }

    /// Target-breakpoint state, if this is one.
    pub fn as_target(&self) -> Option<&TargetBreakpoint> {
        match &self.detail {
            BreakpointDetail::Target(target) => Some(target),
            BreakpointDetail::Bytecode(_) => None,
        }
    }

    /// Bytecode-breakpoint state, if this is one.
    pub fn as_bytecode(&self) -> Option<&BytecodeBreakpoint> {
        match &self.detail {
            BreakpointDetail::Bytecode(bytecode) => Some(bytecode),
            BreakpointDetail::Target(_) => None,
        }
    }

    /// Whether the trap is currently patched into the debuggee. Always false for bytecode breakpoints.
    pub fn is_active(&self) -> bool {
        self.as_target().is_some_and(TargetBreakpoint::is_active)
    }

    pub(crate) fn as_target_mut(&mut self) -> Option<&mut TargetBreakpoint> {
        match &mut self.detail {
            BreakpointDetail::Target(target) => Some(target),
            BreakpointDetail::Bytecode(_) => None,
        }
    }

    pub(crate) fn as_bytecode_mut(&mut self) -> Option<&mut BytecodeBreakpoint> {
        match &mut self.detail {
            BreakpointDetail::Bytecode(bytecode) => Some(bytecode),
            BreakpointDetail::Target(_) => None,
        }
    }

    /// Flip the enabled flag. Physical consequences are the manager's business.
    pub(crate) fn set_enabled_flag(&mut self, enabled: bool) -> ControlResult<()> {
        if self.kind == BreakpointKind::Transient {
            return Err(ControlError::UnsupportedOperationOnTransient("setEnabled"));
        }
        self.enabled = enabled;
        Ok(())
    }

    /// Parse and install a condition; `None` or blank text clears it.
    pub(crate) fn set_condition_text(&mut self, text: Option<&str>) -> ControlResult<()> {
        if self.kind == BreakpointKind::Transient {
            return Err(ControlError::UnsupportedOperationOnTransient("setCondition"));
        }
        self.condition = match text.map(str::trim).filter(|text| !text.is_empty()) {
            Some(text) => Some(Condition::parse(text)?),
            None => None,
        };
        Ok(())
    }

    /// Decide whether a trap at this breakpoint halts the debuggee.
    ///
    /// No condition means always halt. An evaluation failure is logged and
    /// counts as the condition not holding, so the debuggee resumes.
    pub fn handle_trigger(&self, context: &dyn ConditionContext) -> bool {
        evaluate_condition(self, self.condition.as_ref(), context)
    }
}

pub(crate) fn evaluate_condition(
    breakpoint: &Breakpoint,
    condition: Option<&Condition>,
    context: &dyn ConditionContext,
) -> bool {
    match condition {
        None => true,
        Some(condition) => match condition.evaluate(context) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    breakpoint = %breakpoint.id,
                    condition = %condition,
                    error = %err,
                    "breakpoint condition could not be evaluated, resuming"
                );
                false
            }
        },
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} breakpoint {} at {}", self.kind, self.id, self.location)?;
        if !self.is_enabled() {
            f.write_str(" (disabled)")?;
        }
        if self.is_active() {
            f.write_str(" (active)")?;
        }
        if let Some(condition) = &self.condition {
            write!(f, " if {condition}")?;
        }
        if let Some(owner) = self.owner {
            write!(f, " owned by {owner}")?;
        }
        Ok(())
    }
}
