// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! Opaque identifiers. Nothing in this crate looks inside them: they are
//! compared, ordered and hashed, and that's all.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const ID_LEN: usize = 32;
pub const NODE_ID_LEN: usize = 20;

/// Names a vertex, block, or conflict set.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(pub [u8; ID_LEN]);

/// Names a validator. Deliberately a different width (and type) from
/// `Identifier` so the two can't be mixed up.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

macro_rules! opaque_bytes {
    ($ty:ident, $len:expr) => {
        impl $ty {
            pub const EMPTY: $ty = $ty([0u8; $len]);

            /// Builds an id whose trailing eight bytes are `n` in big-endian
            /// order, so ids built this way sort the same way their numbers do.
            pub fn from_low_u64(n: u64) -> Self {
                let mut bytes = [0u8; $len];
                bytes[$len - 8..].copy_from_slice(&n.to_be_bytes());
                $ty(bytes)
            }

            /// Returns `None` unless `bytes` is exactly the right length.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                if bytes.len() != $len {
                    return None;
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Some($ty(out))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                *self == Self::EMPTY
            }
        }

        impl From<[u8; $len]> for $ty {
            fn from(bytes: [u8; $len]) -> Self {
                $ty(bytes)
            }
        }

        impl AsRef<[u8]> for $ty {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in self.0.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }

        // Logs get noisy with 64 hex digits; the first eight bytes are
        // plenty to tell ids apart when reading a trace.
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($ty))?;
                for b in self.0.iter().take(4) {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "..")?;
                for b in self.0.iter().skip($len - 4) {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ")")
            }
        }
    };
}

opaque_bytes!(Identifier, ID_LEN);
opaque_bytes!(NodeId, NODE_ID_LEN);

/// Decision status of an item. Moves `Processing -> Accepted` or
/// `Processing -> Rejected` exactly once and never again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Processing,
    Accepted,
    Rejected,
}

impl Status {
    pub fn is_decided(self) -> bool {
        !matches!(self, Status::Processing)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Processing
    }
}
