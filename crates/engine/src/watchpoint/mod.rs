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

//! Watchpoint entity model
//!
//! A watchpoint traps when the debuggee touches a [`MemoryRegion`]. Client
//! watchpoints never overlap each other. Watchpoints on data inside a heap
//! object carry a hidden system watchpoint on the object's forwarding-pointer
//! slot so they can follow the object when the collector moves it.

mod manager;
pub use manager::*;

mod object;
pub use object::*;

use std::fmt;

use serde::{Deserialize, Serialize};
use vmdb_common::MemoryRegion;

use crate::id::universal_id;

universal_id! {
    /// Stable identifier of a watchpoint, never reused.
    WatchpointId => 1
}

/// Who owns a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WatchpointKind {
    /// Created by the client; subject to the non-overlap rule.
    Client,
    /// Created internally, e.g. to track object relocation.
    System,
}

impl fmt::Display for WatchpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::System => "system",
        })
    }
}

/// Which accesses trap, and whether to keep trapping while the collector runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchpointSettings {
    /// Trap on reads.
    pub trap_on_read: bool,
    /// Trap on writes.
    pub trap_on_write: bool,
    /// Trap on instruction fetch.
    pub trap_on_exec: bool,
    /// Keep the watchpoint installed during garbage collection.
    pub enabled_during_gc: bool,
}

impl WatchpointSettings {
    /// Settings of the hidden watchpoint on a forwarding-pointer slot.
    pub const RELOCATION: Self = Self::new(false, true, false, true);

    /// Build settings from the four flags.
    pub const fn new(
        trap_on_read: bool,
        trap_on_write: bool,
        trap_on_exec: bool,
        enabled_during_gc: bool,
    ) -> Self {
        Self { trap_on_read, trap_on_write, trap_on_exec, enabled_during_gc }
    }

    /// Whether any access traps.
    pub const fn traps(&self) -> bool {
        self.trap_on_read || self.trap_on_write || self.trap_on_exec
    }
}

impl fmt::Display for WatchpointSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |on: bool, c: char| if on { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.trap_on_read, 'r'),
            flag(self.trap_on_write, 'w'),
            flag(self.trap_on_exec, 'x')
        )?;
        if self.enabled_during_gc {
            f.write_str(" gc")?;
        }
        Ok(())
    }
}

/// What a watchpoint watches, beyond its region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchpointVariant {
    /// A fixed region of memory.
    Region,
    /// Data inside a heap object; the region follows the object.
    Object(ObjectTracking),
    /// The forwarding-pointer slot of the object tracked by `primary`.
    Relocation {
        /// The object watchpoint this one keeps up to date.
        primary: WatchpointId,
    },
}

/// A watchpoint of any kind or variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchpoint {
    pub(crate) id: WatchpointId,
    pub(crate) kind: WatchpointKind,
    pub(crate) description: String,
    pub(crate) region: MemoryRegion,
    pub(crate) settings: WatchpointSettings,
    pub(crate) alive: bool,
    pub(crate) active: bool,
    pub(crate) variant: WatchpointVariant,
}

impl Watchpoint {
    pub(crate) fn new(
        kind: WatchpointKind,
        description: String,
        region: MemoryRegion,
        settings: WatchpointSettings,
        variant: WatchpointVariant,
    ) -> Self {
        Self {
            id: WatchpointId::next(),
            kind,
            description,
            region,
            settings,
            alive: true,
            active: false,
            variant,
        }
    }

    /// Unique id.
    pub fn id(&self) -> WatchpointId {
        self.id
    }

    /// Client or system.
    pub fn kind(&self) -> WatchpointKind {
        self.kind
    }

    /// Human-readable purpose.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The watched memory.
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Current trap settings.
    pub fn settings(&self) -> WatchpointSettings {
        self.settings
    }

    /// False once removed, forever.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Whether currently installed in the debuggee.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Alive and trapping on at least one kind of access.
    pub fn is_enabled(&self) -> bool {
        self.alive && self.settings.traps()
    }

    /// Region, object or relocation tracker.
    pub fn variant(&self) -> &WatchpointVariant {
        &self.variant
    }

    /// Object tracking state for object watchpoints.
    pub fn object_tracking(&self) -> Option<&ObjectTracking> {
        match &self.variant {
            WatchpointVariant::Object(tracking) => Some(tracking),
            _ => None,
        }
    }

    pub(crate) fn object_tracking_mut(&mut self) -> Option<&mut ObjectTracking> {
        match &mut self.variant {
            WatchpointVariant::Object(tracking) => Some(tracking),
            _ => None,
        }
    }

    /// Whether the watchpoint should be installed right now.
    pub(crate) fn wants_activation(&self, collecting: bool) -> bool {
        self.is_enabled() && !self.active && (!collecting || self.settings.enabled_during_gc)
    }
}

impl fmt::Display for Watchpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} watchpoint {} {} {}", self.kind, self.id, self.region, self.settings)?;
        if let Some(tracking) = self.object_tracking() {
            write!(f, " on {}", tracking)?;
        }
        if !self.alive {
            f.write_str(" (removed)")?;
        } else if self.active {
            f.write_str(" (active)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmdb_common::Address;

    fn region_watchpoint(settings: WatchpointSettings) -> Watchpoint {
        Watchpoint::new(
            WatchpointKind::Client,
            "test".into(),
            MemoryRegion::new(Address::new(0x1000), 8),
            settings,
            WatchpointVariant::Region,
        )
    }

    #[test]
    fn test_enabled_requires_a_trap() {
        let none = region_watchpoint(WatchpointSettings::default());
        assert!(!none.is_enabled());

        let mut exec = region_watchpoint(WatchpointSettings::new(false, false, true, false));
        assert!(exec.is_enabled());
        exec.alive = false;
        assert!(!exec.is_enabled());
    }

    #[test]
    fn test_activation_during_gc() {
        let plain = region_watchpoint(WatchpointSettings::new(true, false, false, false));
        assert!(plain.wants_activation(false));
        assert!(!plain.wants_activation(true));

        let gc = region_watchpoint(WatchpointSettings::new(true, false, false, true));
        assert!(gc.wants_activation(true));
    }

    #[test]
    fn test_settings_display() {
        assert_eq!(WatchpointSettings::RELOCATION.to_string(), "-w- gc");
        assert_eq!(WatchpointSettings::new(true, false, true, false).to_string(), "r-x");
    }
}
