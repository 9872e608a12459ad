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

use std::fmt;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Opaque handle to a heap object in the debuggee, stable across relocations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From,
)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// Wraps a raw object handle.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// What the collector knows about an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectStatus {
    /// Reachable at its current origin.
    Live,
    /// Copied elsewhere; its old location holds a forwarding pointer.
    Forwarded,
    /// Collected.
    Dead,
    /// Status cannot be determined right now (e.g. mid-collection).
    Unknown,
}

impl ObjectStatus {
    /// Live or possibly live: neither known to be collected nor known to have moved.
    pub fn is_not_dead(self) -> bool {
        matches!(self, Self::Live | Self::Unknown)
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Live => "LIVE",
            Self::Forwarded => "FORWARDED",
            Self::Dead => "DEAD",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}
