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

//! Realization synchronizer
//!
//! Keeps abstract breakpoints and watchpoints in step with the debuggee: bytecode
//! breakpoints follow compilations in and out of the code cache, and object
//! watchpoints follow their object when the collector moves it.

mod compilation;
pub(crate) use compilation::*;

mod relocation;
pub(crate) use relocation::*;
