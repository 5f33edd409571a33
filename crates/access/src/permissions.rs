//! Permission bits granted to principals.
//!
//! Bits combine additively: a principal holds the OR of every grant that
//! applies to a resource, and a check passes when any requested bit is held.
//!
//! ```
//! use access::Permissions;
//!
//! let granted = Permissions::READ | Permissions::UPDATE;
//! assert!(granted.intersects(Permissions::READ | Permissions::DELETE));
//! assert!(!granted.intersects(Permissions::CREATE));
//! assert_eq!(Permissions::ALL.bits(), 0x1F);
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Permissions: u8 {
        const CREATE  = 0x01;
        const READ    = 0x02;
        const UPDATE  = 0x04;
        const DELETE  = 0x08;
        const EXECUTE = 0x10;
    }
}

impl Permissions {
    pub const ALL: Self = Self::CREATE
        .union(Self::READ)
        .union(Self::UPDATE)
        .union(Self::DELETE)
        .union(Self::EXECUTE);

    /// Parses `read`, `READ|UPDATE`, `all`, or a numeric mask such as `0x06` / `6`.
    ///
    /// ```
    /// use access::Permissions;
    ///
    /// assert_eq!(Permissions::parse("read|update"), Some(Permissions::READ | Permissions::UPDATE));
    /// assert_eq!(Permissions::parse("0x1f"), Some(Permissions::ALL));
    /// assert_eq!(Permissions::parse("fly"), None);
    /// ```
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some(hex) = spec.strip_prefix("0x").or_else(|| spec.strip_prefix("0X")) {
            return u8::from_str_radix(hex, 16).ok().map(Self::from_bits_truncate);
        }
        if let Ok(bits) = spec.parse::<u8>() {
            return Some(Self::from_bits_truncate(bits));
        }
        let mut acc = Self::empty();
        for name in spec.split(['|', ',']) {
            acc |= match name.trim().to_uppercase().as_str() {
                "CREATE" => Self::CREATE,
                "READ" => Self::READ,
                "UPDATE" => Self::UPDATE,
                "DELETE" => Self::DELETE,
                "EXECUTE" | "EXEC" => Self::EXECUTE,
                "ALL" => Self::ALL,
                _ => return None,
            };
        }
        Some(acc)
    }

    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}
