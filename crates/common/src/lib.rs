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

//! VMDB Common - Shared functionality for VMDB components
//!
//! This crate provides the value types shared by the control plane and its
//! collaborators (addresses, memory regions, code locations, heap object
//! handles), together with logging setup and on-disk configuration.

/// Common types used throughout VMDB: addresses, regions, code locations and heap objects
pub mod types;

/// On-disk debugger configuration (platform parameters and breakpoint policy)
pub mod config;
/// Logging setup and utilities for consistent logging across VMDB components
pub mod logging;

pub use config::*;
pub use types::*;
