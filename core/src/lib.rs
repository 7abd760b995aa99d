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

pub mod ast;
pub mod bytecode;
pub mod catalog;
pub mod checker;
pub mod compiler;
pub mod debugger;
pub mod diagnostic;
pub mod loader;
pub mod optimizer;
pub mod parser;
pub mod runtime;
pub mod types;
pub mod vm;

pub use checker::lint;
pub use compiler::compile;
pub use loader::ToolConfig;
pub use optimizer::optimize;
pub use parser::parse;
pub use vm::interpret;
