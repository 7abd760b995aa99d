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

use crate::ast::{Expr, SubroutineDef};
use crate::bytecode::{LabelId, LabelTable, Listing, Op};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Label with an empty name")]
    EmptyLabel,
    #[error("Subroutine without a name")]
    UnnamedSubroutine,
}

/// Flattens an expression tree into a listing, resolving every label
/// name to one canonical id.
pub struct Compiler {
    pub listing: Listing,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            listing: Listing::new(LabelTable::new()),
        }
    }

    pub fn compile(mut self, exprs: &[Expr]) -> Result<Listing, CompileError> {
        for expr in exprs {
            self.visit(expr)?;
        }
        debug!(
            ops = self.listing.len(),
            labels = self.listing.labels.len(),
            "compiled listing"
        );
        Ok(self.listing)
    }

    /// Canonical label for `name`; forward references create the record early.
    fn label(&mut self, name: &str) -> Result<LabelId, CompileError> {
        if name.is_empty() {
            return Err(CompileError::EmptyLabel);
        }
        Ok(self.listing.labels.intern(name))
    }

    fn labels(&mut self, names: &[String]) -> Result<Vec<LabelId>, CompileError> {
        names.iter().map(|name| self.label(name)).collect()
    }

    fn visit(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let op = match expr {
            Expr::Comment(text) => Op::Comment(text.clone()),
            Expr::Empty => Op::Empty,
            Expr::Pragma { version } => Op::Pragma(*version),
            Expr::Label(name) => Op::Label(self.label(name)?),
            Expr::Int { form, value } => Op::Int {
                form: *form,
                value: *value,
            },
            Expr::Bytes { form, value } => Op::Bytes {
                form: *form,
                value: value.clone(),
            },
            Expr::Branch { kind, target } => Op::Branch {
                kind: *kind,
                target: self.label(target)?,
            },
            Expr::Call(target) => Op::Callsub(self.label(target)?),
            Expr::Switch(targets) => Op::Switch(self.labels(targets)?),
            Expr::Match(targets) => Op::Match(self.labels(targets)?),
            Expr::Retsub => Op::Retsub,
            Expr::Proto { args, results } => Op::Proto {
                args: *args,
                results: *results,
            },
            Expr::Err => Op::Err,
            Expr::Return => Op::Return,
            Expr::Load(slot) => Op::Load(*slot),
            Expr::Store(slot) => Op::Store(*slot),
            Expr::FrameDig(index) => Op::FrameDig(*index),
            Expr::FrameBury(index) => Op::FrameBury(*index),
            Expr::Instr { name, immediates } => Op::Instr {
                name: name.clone(),
                immediates: immediates.clone(),
            },
            Expr::Block { label, body } => {
                if let Some(name) = label {
                    let id = self.label(name)?;
                    self.listing.push(Op::Label(id));
                }
                for inner in body {
                    self.visit(inner)?;
                }
                return Ok(());
            }
            Expr::Subroutine(def) => return self.visit_subroutine(def),
        };
        self.listing.push(op);
        Ok(())
    }

    fn visit_subroutine(&mut self, def: &SubroutineDef) -> Result<(), CompileError> {
        if def.name.is_empty() {
            return Err(CompileError::UnnamedSubroutine);
        }
        let id = self.label(&def.name)?;
        self.listing.push(Op::Label(id));
        self.listing.push(Op::Proto {
            args: def.args,
            results: def.results,
        });

        let body_start = self.listing.len();
        for inner in &def.body {
            self.visit(inner)?;
        }

        // Falling off the end of a subroutine must still return.
        let ends_with_retsub = self.listing.ops[body_start..]
            .iter()
            .rev()
            .find(|op| !op.is_nop())
            .is_some_and(|op| matches!(op, Op::Retsub));
        if !ends_with_retsub {
            self.listing.push(Op::Retsub);
        }
        Ok(())
    }
}

/// Compile a program tree into a listing.
pub fn compile(exprs: &[Expr]) -> Result<Listing, CompileError> {
    Compiler::new().compile(exprs)
}
