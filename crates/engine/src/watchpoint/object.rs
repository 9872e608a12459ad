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

use serde::{Deserialize, Serialize};
use vmdb_common::ObjectRef;

use super::WatchpointId;

/// The part of a heap object a watchpoint covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectSlice {
    /// Every byte of the object.
    Whole,
    /// A named instance field.
    Field {
        /// Field name, for display.
        name: String,
        /// Offset from the object's origin.
        offset: u64,
        /// Field width in bytes.
        size: u64,
    },
    /// One element of an array.
    ArrayElement {
        /// Element index.
        index: u64,
        /// Offset of element zero from the origin.
        base_offset: u64,
        /// Element width in bytes.
        element_width: u64,
    },
    /// A header word such as the hub or the length.
    Header {
        /// Header field name, for display.
        name: String,
        /// Offset from the object's origin.
        offset: u64,
        /// Field width in bytes.
        size: u64,
    },
}

impl ObjectSlice {
    /// Offset of the slice from the object's origin.
    pub fn offset(&self) -> u64 {
        match self {
            Self::Whole => 0,
            Self::Field { offset, .. } | Self::Header { offset, .. } => *offset,
            Self::ArrayElement { index, base_offset, element_width } => {
                base_offset.wrapping_add(index.wrapping_mul(*element_width))
            }
        }
    }

    /// Size of the slice in bytes, given the size of the whole object.
    pub fn size(&self, object_size: u64) -> u64 {
        match self {
            Self::Whole => object_size,
            Self::Field { size, .. } | Self::Header { size, .. } => *size,
            Self::ArrayElement { element_width, .. } => *element_width,
        }
    }
}

impl fmt::Display for ObjectSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => Ok(()),
            Self::Field { name, .. } => write!(f, ".{name}"),
            Self::ArrayElement { index, .. } => write!(f, "[{index}]"),
            Self::Header { name, .. } => write!(f, " header {name}"),
        }
    }
}

/// Relocation-tracking state of an object watchpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTracking {
    pub(crate) object: ObjectRef,
    pub(crate) slice: ObjectSlice,
    pub(crate) relocation: Option<WatchpointId>,
}

impl ObjectTracking {
    pub(crate) fn new(object: ObjectRef, slice: ObjectSlice) -> Self {
        Self { object, slice, relocation: None }
    }

    /// The tracked object.
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    /// Which part of the object is watched.
    pub fn slice(&self) -> &ObjectSlice {
        &self.slice
    }

    /// Offset of the watched region from the object's origin.
    pub fn offset_from_origin(&self) -> u64 {
        self.slice.offset()
    }

    /// The hidden system watchpoint on the object's forwarding-pointer slot.
    pub fn relocation_watchpoint(&self) -> Option<WatchpointId> {
        self.relocation
    }
}

impl fmt::Display for ObjectTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.object, self.slice)
    }
}
