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

//! VMDB Engine - breakpoint and watchpoint control plane
//!
//! This crate keeps the stop-points a client asks for consistent with the
//! debuggee as it runs:
//!
//! - [`condition`]: parser and evaluator for breakpoint conditions
//! - [`breakpoint`]: target (machine address) and bytecode breakpoints
//! - [`watchpoint`]: memory region and object-tracking watchpoints
//! - `realization`: keeps bytecode breakpoints realized in every compilation and
//!   object watchpoints attached to their object across relocations
//! - [`control`]: the [`ControlPlane`] facade wiring managers, collaborators and events
//!
//! All collaborators (process memory, registers, compilation metadata, heap) are
//! consumed through the traits in [`target`].

pub mod breakpoint;
pub use breakpoint::*;

pub mod condition;
pub use condition::*;

pub mod control;
pub use control::*;

pub mod error;
pub use error::*;

pub mod events;
pub use events::*;

mod realization;

pub mod target;
pub use target::*;

pub mod watchpoint;
pub use watchpoint::*;

pub mod test_utils;

mod id;
