/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Sovereign Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a value on the data stack, as declared by an opcode signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum StackType {
    /// No value (used for unset slots and for opcodes producing nothing)
    None,
    /// Either uint64 or byte-string; decided at run time
    Any,
    Uint64,
    Bytes,
}

impl StackType {
    /// Check if this type is compatible with the expected type.
    /// `Any` on either side is compatible with everything.
    pub fn is_compatible(&self, expected: &StackType) -> bool {
        if matches!(self, StackType::Any) || matches!(expected, StackType::Any) {
            return true;
        }
        self == expected
    }
}

impl fmt::Display for StackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackType::None => write!(f, "none"),
            StackType::Any => write!(f, "any"),
            StackType::Uint64 => write!(f, "uint64"),
            StackType::Bytes => write!(f, "[]byte"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display_format() {
        assert_eq!(format!("{}", StackType::Uint64), "uint64");
        assert_eq!(format!("{}", StackType::Bytes), "[]byte");
        assert_eq!(format!("{}", StackType::Any), "any");
        assert_eq!(format!("{}", StackType::None), "none");
    }

    #[test]
    fn test_type_compatibility_basic() {
        assert!(StackType::Uint64.is_compatible(&StackType::Any));
        assert!(StackType::Uint64.is_compatible(&StackType::Uint64));
        assert!(!StackType::Uint64.is_compatible(&StackType::Bytes));
        assert!(StackType::Any.is_compatible(&StackType::Bytes));
        assert!(!StackType::None.is_compatible(&StackType::Uint64));
    }
}
