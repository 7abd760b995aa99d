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

/// Which unconditional or conditional branch an expression encodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// `b`: always jumps
    Always,
    /// `bz`: jumps when the popped value is zero
    IfZero,
    /// `bnz`: jumps when the popped value is non-zero
    IfNonZero,
}

impl BranchKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BranchKind::Always => "b",
            BranchKind::IfZero => "bz",
            BranchKind::IfNonZero => "bnz",
        }
    }
}

/// Spelling used for an integer or byte constant (`int` vs `pushint`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConstForm {
    /// `int` / `byte` pseudo-ops
    Pseudo,
    /// `pushint` / `pushbytes`
    Push,
}

/// Source-level program node, as handed over by the parser.
///
/// Label references are plain names here; the compiler turns them into
/// canonical label ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Expr {
    Comment(String),
    Empty,
    Pragma {
        version: u8,
    },
    Label(String),
    Int {
        form: ConstForm,
        value: u64,
    },
    Bytes {
        form: ConstForm,
        value: Vec<u8>,
    },
    Branch {
        kind: BranchKind,
        target: String,
    },
    Call(String),
    Switch(Vec<String>),
    Match(Vec<String>),
    Retsub,
    Proto {
        args: u8,
        results: u8,
    },
    Err,
    Return,
    Load(u8),
    Store(u8),
    FrameDig(i8),
    FrameBury(i8),
    /// Any other opcode, carried by name with its raw immediates
    Instr {
        name: String,
        immediates: Vec<String>,
    },
    Block {
        label: Option<String>,
        body: Vec<Expr>,
    },
    Subroutine(SubroutineDef),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubroutineDef {
    pub name: String,
    pub args: u8,
    pub results: u8,
    pub body: Vec<Expr>,
}

impl Expr {
    /// Shorthand for a generic opcode without immediates.
    pub fn op(name: &str) -> Self {
        Expr::Instr {
            name: name.to_string(),
            immediates: Vec::new(),
        }
    }

    pub fn int(value: u64) -> Self {
        Expr::Int {
            form: ConstForm::Pseudo,
            value,
        }
    }

    pub fn label(name: &str) -> Self {
        Expr::Label(name.to_string())
    }

    pub fn b(target: &str) -> Self {
        Expr::Branch {
            kind: BranchKind::Always,
            target: target.to_string(),
        }
    }

    pub fn bz(target: &str) -> Self {
        Expr::Branch {
            kind: BranchKind::IfZero,
            target: target.to_string(),
        }
    }

    pub fn bnz(target: &str) -> Self {
        Expr::Branch {
            kind: BranchKind::IfNonZero,
            target: target.to_string(),
        }
    }
}
