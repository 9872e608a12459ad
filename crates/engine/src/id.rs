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

//! Globally unique, never-reused entity identifiers.

macro_rules! universal_id {
    (
        $(#[$attr:meta])*
        $name:ident => $initial_value:expr
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(u64);

        paste::paste! {
            lazy_static::lazy_static! {
                #[doc = "The global counter for the " $name " object."]
                static ref [<NEXT_ $name:snake:upper>]: parking_lot::Mutex<u64> = parking_lot::Mutex::new($initial_value);
            }

            impl $name {
                /// Get the next value and increment the global counter.
                pub fn next() -> Self {
                    let mut counter = [<NEXT_ $name:snake:upper>].lock();
                    let value = *counter;
                    *counter += 1;
                    Self(value)
                }
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

pub(crate) use universal_id;
