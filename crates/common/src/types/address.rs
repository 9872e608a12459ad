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

use std::{fmt, str::FromStr};

use derive_more::From;
use eyre::{eyre, Error, Result};
use serde::{Deserialize, Serialize};

/// An absolute address in the debuggee's address space.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From,
)]
pub struct Address(u64);

impl Address {
    /// The null address.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw address value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw address value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address `offset` bytes above this one.
    pub const fn plus(self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    /// Returns the address `offset` bytes below this one.
    pub const fn minus(self, offset: u64) -> Self {
        Self(self.0.wrapping_sub(offset))
    }

    /// Distance from `base` up to this address, if this address is not below it.
    pub fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl From<Address> for u64 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:x})", self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses `0x`-prefixed hexadecimal or plain decimal addresses.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let value = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        }
        .map_err(|e| eyre!("Invalid address {trimmed:?}: {e}"))?;
        Ok(Self(value))
    }
}

/// A contiguous, half-open span of debuggee memory `[start, start + size)`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryRegion {
    start: Address,
    size: u64,
}

impl MemoryRegion {
    /// Creates a region of `size` bytes beginning at `start`.
    pub const fn new(start: Address, size: u64) -> Self {
        Self { start, size }
    }

    /// First byte of the region.
    pub const fn start(&self) -> Address {
        self.start
    }

    /// Number of bytes covered.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// First byte past the end of the region.
    pub const fn end(&self) -> Address {
        self.start.plus(self.size)
    }

    /// First byte past the end, or `None` if the region runs off the top of the address space.
    pub const fn checked_end(&self) -> Option<Address> {
        match self.start.as_u64().checked_add(self.size) {
            Some(end) => Some(Address::new(end)),
            None => None,
        }
    }

    /// Whether the region covers at least one byte and fits in the address space.
    pub const fn is_well_formed(&self) -> bool {
        self.size > 0 && self.checked_end().is_some()
    }

    /// Whether `address` falls inside the region.
    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.end()
    }

    /// Whether the two regions share at least one byte.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.size > 0 && other.size > 0 && self.start < other.end() && other.start < self.end()
    }

    /// The same-sized region moved to `start`.
    pub const fn with_start(&self, start: Address) -> Self {
        Self { start, size: self.size }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryRegion{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        assert_eq!("0x1000".parse::<Address>().unwrap(), Address::new(0x1000));
        assert_eq!("4096".parse::<Address>().unwrap(), Address::new(4096));
        assert_eq!(" 0XfF ".parse::<Address>().unwrap(), Address::new(0xff));
        assert!("0xzz".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::new(0x1000).to_string(), "0x1000");
        assert_eq!(format!("{:?}", Address::new(255)), "Address(0xff)");
    }

    #[test]
    fn test_address_arithmetic() {
        let base = Address::new(0x1000);
        assert_eq!(base.plus(8), Address::new(0x1008));
        assert_eq!(base.minus(1), Address::new(0xfff));
        assert_eq!(Address::new(0x1010).offset_from(base), Some(0x10));
        assert_eq!(base.offset_from(Address::new(0x1010)), None);
    }

    #[test]
    fn test_region_contains() {
        let region = MemoryRegion::new(Address::new(0x1000), 8);
        assert!(region.contains(Address::new(0x1000)));
        assert!(region.contains(Address::new(0x1007)));
        assert!(!region.contains(Address::new(0x1008)));
        assert!(!region.contains(Address::new(0xfff)));
        assert_eq!(region.end(), Address::new(0x1008));
    }

    #[test]
    fn test_region_overlap() {
        let a = MemoryRegion::new(Address::new(0x1000), 8);
        let b = MemoryRegion::new(Address::new(0x1008), 8);
        let c = MemoryRegion::new(Address::new(0x1004), 8);
        let empty = MemoryRegion::new(Address::new(0x1004), 0);

        // Adjacent half-open regions do not overlap
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(!a.overlaps(&empty));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn test_region_well_formed() {
        assert!(MemoryRegion::new(Address::new(0x1000), 8).is_well_formed());
        assert!(!MemoryRegion::new(Address::new(0x1000), 0).is_well_formed());
        let wrapping = MemoryRegion::new(Address::new(u64::MAX - 3), 8);
        assert!(!wrapping.is_well_formed());
        assert_eq!(wrapping.checked_end(), None);
        assert_eq!(
            MemoryRegion::new(Address::new(u64::MAX - 8), 8).checked_end(),
            Some(Address::new(u64::MAX))
        );
    }

    #[test]
    fn test_region_with_start_preserves_size() {
        let region = MemoryRegion::new(Address::new(0x1000), 24);
        let moved = region.with_start(Address::new(0x8000));
        assert_eq!(moved.start(), Address::new(0x8000));
        assert_eq!(moved.size(), 24);
        assert_eq!(moved.to_string(), "[0x8000, 0x8018)");
    }
}
