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

use crate::types::StackType;
use std::fmt;

/// Number of scratch slots available to a program.
pub const SCRATCH_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    None,
    /// Produced by an opcode whose result cannot be known statically
    Any,
    Uint64(u64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn stack_type(&self) -> StackType {
        match self {
            Value::None => StackType::None,
            Value::Any => StackType::Any,
            Value::Uint64(_) => StackType::Uint64,
            Value::Bytes(_) => StackType::Bytes,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Any => write!(f, "any"),
            Value::Uint64(n) => write!(f, "{}", n),
            Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) if !text.is_empty() && text.chars().all(|c| !c.is_control()) => {
                    write!(f, "\"{}\"", text)
                }
                _ => write!(f, "0x{}", hex::encode(bytes)),
            },
        }
    }
}

/// Where a value came from; only used for tracing output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub pc: usize,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmValue {
    pub value: Value,
    pub origin: Option<Provenance>,
}

impl VmValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            origin: None,
        }
    }

    pub fn uint(n: u64) -> Self {
        Self::new(Value::Uint64(n))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Value::Bytes(bytes.into()))
    }

    pub fn any() -> Self {
        Self::new(Value::Any)
    }

    pub fn with_origin(mut self, pc: usize, source: impl Into<String>) -> Self {
        self.origin = Some(Provenance {
            pc,
            source: source.into(),
        });
        self
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.value, Value::Any)
    }
}

impl fmt::Display for VmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} ({} @{})", self.value, origin.source, origin.pc),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Scratch memory shared by every branch of one interpreter session.
#[derive(Debug, Clone)]
pub struct Scratch {
    slots: Vec<VmValue>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Scratch {
    pub fn new() -> Self {
        Scratch {
            slots: vec![VmValue::uint(0); SCRATCH_SIZE],
        }
    }

    pub fn get(&self, slot: usize) -> Option<&VmValue> {
        self.slots.get(slot)
    }

    /// Returns false when `slot` is out of range.
    pub fn set(&mut self, slot: usize, value: VmValue) -> bool {
        match self.slots.get_mut(slot) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    pub fn slots(&self) -> &[VmValue] {
        &self.slots
    }

    /// Slots that no longer hold their initial zero.
    pub fn touched(&self) -> impl Iterator<Item = (usize, &VmValue)> {
        let zero = Value::Uint64(0);
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, v)| v.value != zero || v.origin.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Uint64(7).to_string(), "7");
        assert_eq!(Value::Bytes(b"abc".to_vec()).to_string(), "\"abc\"");
        assert_eq!(Value::Bytes(vec![0, 255]).to_string(), "0x00ff");
        assert_eq!(
            VmValue::any().with_origin(3, "txn Sender").to_string(),
            "any (txn Sender @3)"
        );
    }

    #[test]
    fn test_scratch_bounds() {
        let mut scratch = Scratch::new();
        assert_eq!(scratch.slots().len(), SCRATCH_SIZE);
        assert!(scratch.set(255, VmValue::uint(9)));
        assert!(!scratch.set(256, VmValue::uint(9)));
        assert_eq!(scratch.get(255), Some(&VmValue::uint(9)));
        assert_eq!(scratch.touched().count(), 1);
    }
}
