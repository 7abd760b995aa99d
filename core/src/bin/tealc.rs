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

use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use teal_core::ast::Expr;
use teal_core::catalog::Catalog;
use teal_core::debugger;
use teal_core::diagnostic::generate_sarif;
use teal_core::loader::{load_program, ToolConfig};
use teal_core::vm::{BranchState, Vm};
use teal_core::{compile, lint, optimize, parse};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "Usage: tealc <program.teal|program.json> [--optimize] [--lint] [--sarif] [--run] [--config cfg.json]";

struct Options {
    input: String,
    optimize: bool,
    lint: bool,
    sarif: bool,
    run: bool,
    config: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        input: String::new(),
        optimize: false,
        lint: false,
        sarif: false,
        run: false,
        config: None,
    };
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--optimize" => options.optimize = true,
            "--lint" => options.lint = true,
            "--sarif" => {
                options.lint = true;
                options.sarif = true;
            }
            "--run" => options.run = true,
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                options.config = Some(path.clone());
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown flag {}", flag)),
            path if options.input.is_empty() => options.input = path.to_string(),
            extra => return Err(format!("Unexpected argument {}", extra)),
        }
    }
    if options.input.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(options)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// Returns the program and whether the source had parse errors.
fn read_program(path: &str) -> Result<(Vec<Expr>, bool), String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
    if Path::new(path).extension().is_some_and(|ext| ext == "json") {
        let exprs = load_program(&text).map_err(|e| e.to_string())?;
        return Ok((exprs, false));
    }
    let parsed = parse(&text);
    for diagnostic in &parsed.diagnostics {
        eprintln!("{}: {}", path, diagnostic);
    }
    let failed = parsed.has_errors();
    Ok((parsed.exprs, failed))
}

fn describe(state: &BranchState) -> String {
    match state {
        BranchState::Running => "running".to_string(),
        BranchState::Exhausted => "budget exhausted".to_string(),
        BranchState::Faulted(message) => format!("faulted: {}", message),
        BranchState::Terminated {
            approved: Some(true),
        } => "approved".to_string(),
        BranchState::Terminated {
            approved: Some(false),
        } => "rejected".to_string(),
        BranchState::Terminated { approved: None } => "finished".to_string(),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    let config = match &options.config {
        Some(path) => match ToolConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config Error: {}", e);
                return ExitCode::from(2);
            }
        },
        None => ToolConfig::default(),
    };

    let (exprs, mut failed) = match read_program(&options.input) {
        Ok(program) => program,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    let mut listing = match compile(&exprs) {
        Ok(listing) => listing,
        Err(e) => {
            eprintln!("Compile Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if options.optimize || config.optimize {
        listing = optimize(listing);
    }
    print!("{}", listing);

    let catalog = Catalog::new();
    if options.lint {
        let diagnostics = lint(&listing, &catalog, &config.lint);
        failed |= diagnostics.iter().any(|d| d.is_error());
        if options.sarif {
            println!("{:#}", generate_sarif(&diagnostics, &options.input));
        } else {
            for diagnostic in &diagnostics {
                eprintln!("{}: {}", options.input, diagnostic);
            }
        }
    }

    if options.run {
        let mut vm = Vm::new(listing, &catalog, config.vm.clone());
        vm.run();
        for branch in vm.retired() {
            let name = vm.branch_name(branch.id).unwrap_or_else(|| "main".to_string());
            println!(
                "branch {} ({}): {}, {} ops, budget left {}",
                branch.id,
                name,
                describe(&branch.state),
                branch.trace.len(),
                branch.budget
            );
        }
        for (slot, value) in debugger::inspect_scratch(&vm) {
            println!("scratch[{}] = {}", slot, value);
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
