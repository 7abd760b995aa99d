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

use crate::ast::Expr;
use crate::bytecode::Listing;
use crate::compiler::{compile, CompileError};
use crate::diagnostic::LintConfig;
use crate::vm::VmConfig;
use serde::{Deserialize, Serialize};
use serde_json::from_str;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("JSON Parse Error: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Compile Error: {0}")]
    CompileError(#[from] CompileError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a program handed over as a JSON array of `Expr` trees.
pub fn load_program(json: &str) -> Result<Vec<Expr>, LoadError> {
    let exprs: Vec<Expr> = from_str(json)?;
    Ok(exprs)
}

/// `load_program` followed by compilation.
pub fn load_listing(json: &str) -> Result<Listing, LoadError> {
    let exprs = load_program(json)?;
    Ok(compile(&exprs)?)
}

/// Settings for one tool run, usually read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub vm: VmConfig,
    pub lint: LintConfig,
    /// Optimize before linting and running
    pub optimize: bool,
}

impl ToolConfig {
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        Ok(from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
