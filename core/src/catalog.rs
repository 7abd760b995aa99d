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

//! Opcode catalog: stack signature, minimum language version, execution mode
//! and cost per opcode name.
//!
//! The catalog is an immutable value built once and handed by reference to the
//! linter and the interpreter.

use crate::types::StackType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Highest language version the catalog knows about.
pub const MAX_VERSION: u8 = 10;

/// Version assumed when a program carries no `#pragma version`.
pub const DEFAULT_VERSION: u8 = 1;

/// Execution mode an opcode is allowed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Stateless logic signatures
    Signature,
    /// Stateful application calls
    Application,
    /// Both modes
    Any,
}

impl Mode {
    pub fn allows(&self, requested: Mode) -> bool {
        matches!(self, Mode::Any) || matches!(requested, Mode::Any) || *self == requested
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Signature => write!(f, "signature"),
            Mode::Application => write!(f, "application"),
            Mode::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub name: &'static str,
    pub min_version: u8,
    pub mode: Mode,
    pub cost: u32,
    pub pops: Vec<StackType>,
    pub pushes: Vec<StackType>,
    /// Number of immediate arguments; `None` when the count varies.
    pub immediates: Option<u8>,
}

impl OpSpec {
    pub fn arity(&self) -> (usize, usize) {
        (self.pops.len(), self.pushes.len())
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    specs: HashMap<&'static str, OpSpec>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

use StackType::{Any as A, Bytes as B, Uint64 as U};

type Row = (
    &'static str,
    u8,
    Mode,
    u32,
    &'static [StackType],
    &'static [StackType],
    Option<u8>,
);

const ROWS: &[Row] = &[
    // Flow control
    ("err", 1, Mode::Any, 1, &[], &[], Some(0)),
    ("bnz", 1, Mode::Any, 1, &[U], &[], Some(1)),
    ("bz", 2, Mode::Any, 1, &[U], &[], Some(1)),
    ("b", 2, Mode::Any, 1, &[], &[], Some(1)),
    ("return", 2, Mode::Any, 1, &[U], &[], Some(0)),
    ("assert", 3, Mode::Any, 1, &[U], &[], Some(0)),
    ("callsub", 4, Mode::Any, 1, &[], &[], Some(1)),
    ("retsub", 4, Mode::Any, 1, &[], &[], Some(0)),
    ("proto", 8, Mode::Any, 1, &[], &[], Some(2)),
    ("switch", 8, Mode::Any, 1, &[U], &[], None),
    ("match", 8, Mode::Any, 1, &[], &[], None),
    // Arithmetic and logic
    ("+", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("-", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("*", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("/", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("%", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("<", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    (">", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("<=", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    (">=", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("&&", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("||", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("==", 1, Mode::Any, 1, &[A, A], &[U], Some(0)),
    ("!=", 1, Mode::Any, 1, &[A, A], &[U], Some(0)),
    ("!", 1, Mode::Any, 1, &[U], &[U], Some(0)),
    ("|", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("&", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("^", 1, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("~", 1, Mode::Any, 1, &[U], &[U], Some(0)),
    ("mulw", 1, Mode::Any, 1, &[U, U], &[U, U], Some(0)),
    ("addw", 2, Mode::Any, 1, &[U, U], &[U, U], Some(0)),
    ("divmodw", 4, Mode::Any, 20, &[U, U, U, U], &[U, U, U, U], Some(0)),
    ("shl", 4, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("shr", 4, Mode::Any, 1, &[U, U], &[U], Some(0)),
    ("sqrt", 4, Mode::Any, 4, &[U], &[U], Some(0)),
    ("bitlen", 4, Mode::Any, 1, &[A], &[U], Some(0)),
    ("exp", 4, Mode::Any, 1, &[U, U], &[U], Some(0)),
    // Byte strings
    ("len", 1, Mode::Any, 1, &[B], &[U], Some(0)),
    ("itob", 1, Mode::Any, 1, &[U], &[B], Some(0)),
    ("btoi", 1, Mode::Any, 1, &[B], &[U], Some(0)),
    ("concat", 2, Mode::Any, 1, &[B, B], &[B], Some(0)),
    ("substring", 2, Mode::Any, 1, &[B], &[B], Some(2)),
    ("substring3", 2, Mode::Any, 1, &[B, U, U], &[B], Some(0)),
    ("getbit", 3, Mode::Any, 1, &[A, U], &[U], Some(0)),
    ("setbit", 3, Mode::Any, 1, &[A, U, U], &[A], Some(0)),
    ("getbyte", 3, Mode::Any, 1, &[B, U], &[U], Some(0)),
    ("setbyte", 3, Mode::Any, 1, &[B, U, U], &[B], Some(0)),
    ("extract", 5, Mode::Any, 1, &[B], &[B], Some(2)),
    ("b+", 4, Mode::Any, 10, &[B, B], &[B], Some(0)),
    ("b-", 4, Mode::Any, 10, &[B, B], &[B], Some(0)),
    ("b==", 4, Mode::Any, 1, &[B, B], &[U], Some(0)),
    ("bsqrt", 6, Mode::Any, 40, &[B], &[B], Some(0)),
    ("base64_decode", 7, Mode::Any, 1, &[B], &[B], Some(1)),
    ("json_ref", 7, Mode::Any, 25, &[B, B], &[A], Some(1)),
    // Cryptography
    ("sha256", 1, Mode::Any, 35, &[B], &[B], Some(0)),
    ("keccak256", 1, Mode::Any, 130, &[B], &[B], Some(0)),
    ("sha512_256", 1, Mode::Any, 45, &[B], &[B], Some(0)),
    ("sha3_256", 7, Mode::Any, 130, &[B], &[B], Some(0)),
    ("ed25519verify", 1, Mode::Any, 1900, &[B, B, B], &[U], Some(0)),
    ("ed25519verify_bare", 7, Mode::Any, 1900, &[B, B, B], &[U], Some(0)),
    ("ecdsa_verify", 5, Mode::Any, 1700, &[B, B, B, B, B], &[U], Some(1)),
    ("vrf_verify", 7, Mode::Any, 5700, &[B, B, B], &[B, U], Some(1)),
    // Constants and arguments
    ("intcblock", 1, Mode::Any, 1, &[], &[], None),
    ("intc", 1, Mode::Any, 1, &[], &[U], Some(1)),
    ("intc_0", 1, Mode::Any, 1, &[], &[U], Some(0)),
    ("intc_1", 1, Mode::Any, 1, &[], &[U], Some(0)),
    ("intc_2", 1, Mode::Any, 1, &[], &[U], Some(0)),
    ("intc_3", 1, Mode::Any, 1, &[], &[U], Some(0)),
    ("bytecblock", 1, Mode::Any, 1, &[], &[], None),
    ("bytec", 1, Mode::Any, 1, &[], &[B], Some(1)),
    ("bytec_0", 1, Mode::Any, 1, &[], &[B], Some(0)),
    ("bytec_1", 1, Mode::Any, 1, &[], &[B], Some(0)),
    ("bytec_2", 1, Mode::Any, 1, &[], &[B], Some(0)),
    ("bytec_3", 1, Mode::Any, 1, &[], &[B], Some(0)),
    ("int", 1, Mode::Any, 1, &[], &[U], Some(1)),
    ("byte", 1, Mode::Any, 1, &[], &[B], Some(1)),
    ("pushint", 3, Mode::Any, 1, &[], &[U], Some(1)),
    ("pushbytes", 3, Mode::Any, 1, &[], &[B], Some(1)),
    ("pushints", 8, Mode::Any, 1, &[], &[], None),
    ("pushbytess", 8, Mode::Any, 1, &[], &[], None),
    ("arg", 1, Mode::Signature, 1, &[], &[B], Some(1)),
    ("arg_0", 1, Mode::Signature, 1, &[], &[B], Some(0)),
    ("arg_1", 1, Mode::Signature, 1, &[], &[B], Some(0)),
    ("arg_2", 1, Mode::Signature, 1, &[], &[B], Some(0)),
    ("arg_3", 1, Mode::Signature, 1, &[], &[B], Some(0)),
    ("args", 5, Mode::Signature, 1, &[U], &[B], Some(0)),
    // Transaction and global state
    ("txn", 1, Mode::Any, 1, &[], &[A], Some(1)),
    ("gtxn", 1, Mode::Any, 1, &[], &[A], Some(2)),
    ("txna", 2, Mode::Any, 1, &[], &[A], Some(2)),
    ("gtxns", 3, Mode::Any, 1, &[U], &[A], Some(1)),
    ("global", 1, Mode::Any, 1, &[], &[A], Some(1)),
    ("gaid", 4, Mode::Application, 1, &[], &[U], Some(1)),
    ("balance", 2, Mode::Application, 1, &[A], &[U], Some(0)),
    ("min_balance", 3, Mode::Application, 1, &[A], &[U], Some(0)),
    ("app_opted_in", 2, Mode::Application, 1, &[A, U], &[U], Some(0)),
    ("app_local_get", 2, Mode::Application, 1, &[A, B], &[A], Some(0)),
    ("app_local_put", 2, Mode::Application, 1, &[A, B, A], &[], Some(0)),
    ("app_local_del", 2, Mode::Application, 1, &[A, B], &[], Some(0)),
    ("app_global_get", 2, Mode::Application, 1, &[B], &[A], Some(0)),
    ("app_global_put", 2, Mode::Application, 1, &[B, A], &[], Some(0)),
    ("app_global_del", 2, Mode::Application, 1, &[B], &[], Some(0)),
    ("asset_holding_get", 2, Mode::Application, 1, &[A, U], &[A, U], Some(1)),
    ("asset_params_get", 2, Mode::Application, 1, &[U], &[A, U], Some(1)),
    ("log", 5, Mode::Application, 1, &[B], &[], Some(0)),
    ("itxn_begin", 5, Mode::Application, 1, &[], &[], Some(0)),
    ("itxn_field", 5, Mode::Application, 1, &[A], &[], Some(1)),
    ("itxn_submit", 5, Mode::Application, 1, &[], &[], Some(0)),
    ("itxn", 5, Mode::Application, 1, &[], &[A], Some(1)),
    ("box_create", 8, Mode::Application, 1, &[B, U], &[U], Some(0)),
    ("box_get", 8, Mode::Application, 1, &[B], &[B, U], Some(0)),
    ("box_put", 8, Mode::Application, 1, &[B, B], &[], Some(0)),
    ("box_del", 8, Mode::Application, 1, &[B], &[U], Some(0)),
    ("block", 7, Mode::Any, 1, &[U], &[A], Some(1)),
    // Stack manipulation
    ("pop", 1, Mode::Any, 1, &[A], &[], Some(0)),
    ("dup", 1, Mode::Any, 1, &[A], &[A, A], Some(0)),
    ("dup2", 2, Mode::Any, 1, &[A, A], &[A, A, A, A], Some(0)),
    ("swap", 3, Mode::Any, 1, &[A, A], &[A, A], Some(0)),
    ("select", 3, Mode::Any, 1, &[A, A, U], &[A], Some(0)),
    ("dig", 3, Mode::Any, 1, &[A], &[A, A], Some(1)),
    ("cover", 5, Mode::Any, 1, &[A], &[A], Some(1)),
    ("uncover", 5, Mode::Any, 1, &[A], &[A], Some(1)),
    ("bury", 8, Mode::Any, 1, &[A], &[], Some(1)),
    ("popn", 8, Mode::Any, 1, &[], &[], Some(1)),
    ("dupn", 8, Mode::Any, 1, &[A], &[], Some(1)),
    ("frame_dig", 8, Mode::Any, 1, &[], &[A], Some(1)),
    ("frame_bury", 8, Mode::Any, 1, &[A], &[], Some(1)),
    // Scratch space
    ("load", 1, Mode::Any, 1, &[], &[A], Some(1)),
    ("store", 1, Mode::Any, 1, &[A], &[], Some(1)),
    ("loads", 5, Mode::Any, 1, &[U], &[A], Some(0)),
    ("stores", 5, Mode::Any, 1, &[U, A], &[], Some(0)),
];

impl Catalog {
    pub fn new() -> Self {
        let specs = ROWS
            .iter()
            .map(|&(name, min_version, mode, cost, pops, pushes, immediates)| {
                (
                    name,
                    OpSpec {
                        name,
                        min_version,
                        mode,
                        cost,
                        pops: pops.to_vec(),
                        pushes: pushes.to_vec(),
                        immediates,
                    },
                )
            })
            .collect();
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&OpSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// The opcode's `OpSpec`, only when it exists at `version`.
    pub fn available(&self, name: &str, version: u8) -> Option<&OpSpec> {
        self.get(name).filter(|spec| spec.min_version <= version)
    }

    /// Execution cost, 1 for anything not catalogued.
    pub fn cost(&self, name: &str) -> u32 {
        self.get(name).map(|spec| spec.cost).unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
