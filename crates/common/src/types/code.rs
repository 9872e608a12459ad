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
use eyre::{bail, eyre, Error, Result};
use serde::{Deserialize, Serialize};

use crate::{Address, MemoryRegion};

/// Bytecode offset that denotes method entry, before argument binding.
pub const METHOD_ENTRY_BCI: i32 = -1;

/// Identifies a method independently of any of its compilations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey {
    /// Fully qualified name of the declaring type.
    pub holder: String,
    /// Simple method name.
    pub name: String,
    /// Method descriptor, e.g. `(I)V`.
    pub signature: String,
}

impl MethodKey {
    /// Creates a method key from its three components.
    pub fn new(
        holder: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self { holder: holder.into(), name: name.into(), signature: signature.into() }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.signature)
    }
}

impl FromStr for MethodKey {
    type Err = Error;

    /// Parses `holder.name(signature)`, e.g. `java.lang.String.length()I`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let paren = s.find('(').ok_or_else(|| eyre!("Method key lacks a signature: {s}"))?;
        let (qualified, signature) = s.split_at(paren);
        let (holder, name) =
            qualified.rsplit_once('.').ok_or_else(|| eyre!("Method key lacks a holder: {s}"))?;
        if holder.is_empty() || name.is_empty() {
            bail!("Invalid method key: {s}");
        }
        Ok(Self::new(holder, name, signature))
    }
}

/// A stop-point, either an absolute machine address or a method plus bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeLocation {
    /// A location in compiled machine code.
    Machine(Address),
    /// A location in a method's bytecode, independent of compilation.
    Bytecode {
        /// The method.
        method: MethodKey,
        /// Bytecode offset, or [`METHOD_ENTRY_BCI`] for method entry.
        bci: i32,
    },
}

impl CodeLocation {
    /// A machine-code location.
    pub fn machine(address: impl Into<Address>) -> Self {
        Self::Machine(address.into())
    }

    /// A bytecode location.
    pub fn bytecode(method: MethodKey, bci: i32) -> Self {
        Self::Bytecode { method, bci }
    }

    /// The entry of a method, before argument binding.
    pub fn method_entry(method: MethodKey) -> Self {
        Self::Bytecode { method, bci: METHOD_ENTRY_BCI }
    }

    /// The machine address, if this is a machine-code location.
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::Machine(address) => Some(*address),
            Self::Bytecode { .. } => None,
        }
    }

    /// The method, if this is a bytecode location.
    pub fn method(&self) -> Option<&MethodKey> {
        match self {
            Self::Machine(_) => None,
            Self::Bytecode { method, .. } => Some(method),
        }
    }

    /// The bytecode offset, if this is a bytecode location.
    pub fn bci(&self) -> Option<i32> {
        match self {
            Self::Machine(_) => None,
            Self::Bytecode { bci, .. } => Some(*bci),
        }
    }
}

impl From<Address> for CodeLocation {
    fn from(address: Address) -> Self {
        Self::Machine(address)
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine(address) => write!(f, "{address}"),
            Self::Bytecode { method, bci } if *bci == METHOD_ENTRY_BCI => {
                write!(f, "{method}@entry")
            }
            Self::Bytecode { method, bci } => write!(f, "{method}@{bci}"),
        }
    }
}

impl FromStr for CodeLocation {
    type Err = Error;

    /// Parses a code location from a string.
    /// Format:
    /// - `0x4000` - machine address
    /// - `Foo.bar(I)V@12` - bytecode offset 12 of `Foo.bar(I)V`
    /// - `Foo.bar(I)V@entry` - method entry
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.rsplit_once('@') {
            Some((method, position)) => {
                let method = method.parse::<MethodKey>()?;
                let bci = match position.trim() {
                    "entry" => METHOD_ENTRY_BCI,
                    other => other.parse::<i32>().map_err(|e| eyre!("Invalid bytecode offset: {e}"))?,
                };
                if bci < METHOD_ENTRY_BCI {
                    bail!("Invalid bytecode offset: {bci}");
                }
                Ok(Self::Bytecode { method, bci })
            }
            None => Ok(Self::Machine(trimmed.parse::<Address>()?)),
        }
    }
}

/// Identifier the compilation layer assigns to one machine-code translation of a method.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From,
)]
pub struct CompilationId(u64);

impl CompilationId {
    /// Wraps a raw compilation id.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CompilationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compilation#{}", self.0)
    }
}

/// One concrete machine-code translation of a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compilation {
    /// Identifier of this compilation.
    pub id: CompilationId,
    /// The compiled method.
    pub method: MethodKey,
    /// Where the machine code lives.
    pub code: MemoryRegion,
}

impl Compilation {
    /// Whether `address` lies within this compilation's code.
    pub fn contains(&self, address: Address) -> bool {
        self.code.contains(address)
    }
}
