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

//! Debugger front-end: breakpoints, stepping and branch inspection.

use crate::runtime::{Value, VmValue};
use crate::vm::{BranchId, BranchState, RunOutcome, StepReport, Vm, VmBranch, VmError};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Debugger step mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepMode {
    /// Run until a breakpoint is hit
    Continue,
    /// Execute one op, skipping over subroutine calls
    StepOver,
    /// Execute one op, entering subroutine calls
    StepInto,
    /// Run until the current subroutine returns
    StepOut,
}

pub struct DebugState {
    /// Breakpoint lines
    pub breakpoints: BTreeSet<usize>,
    pub step_mode: StepMode,
    /// Last line the debugger stopped at
    pub last_line: Option<usize>,
    /// Frame depth when the step began
    pub step_depth: usize,
}

impl Default for DebugState {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugState {
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeSet::new(),
            step_mode: StepMode::StepInto,
            last_line: None,
            step_depth: 0,
        }
    }

    pub fn add_breakpoint(&mut self, line: usize) {
        self.breakpoints.insert(line);
    }

    pub fn remove_breakpoint(&mut self, line: usize) {
        self.breakpoints.remove(&line);
    }

    /// Returns whether the breakpoint is now set.
    pub fn toggle_breakpoint(&mut self, line: usize) -> bool {
        if !self.breakpoints.remove(&line) {
            self.breakpoints.insert(line);
            true
        } else {
            false
        }
    }

    /// Whether to stop before executing `line` at call depth `depth`.
    pub fn should_break(&self, line: usize, depth: usize) -> bool {
        if self.breakpoints.contains(&line) {
            return true;
        }
        match self.step_mode {
            StepMode::Continue => false,
            StepMode::StepInto => true,
            StepMode::StepOver => depth <= self.step_depth,
            StepMode::StepOut => depth < self.step_depth,
        }
    }
}

/// Where a stepping command left the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Stop {
    /// The branch is about to execute `line`
    Paused { branch: BranchId, line: usize },
    Halted { branch: BranchId, state: BranchState },
    Finished,
}

/// A `Vm` plus the stepping state driving it.
pub struct DebugSession<'c> {
    vm: Vm<'c>,
    pub state: DebugState,
}

impl<'c> DebugSession<'c> {
    pub fn new(vm: Vm<'c>) -> Self {
        Self {
            vm,
            state: DebugState::new(),
        }
    }

    pub fn vm(&self) -> &Vm<'c> {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm<'c> {
        &mut self.vm
    }

    /// Run every live branch until a breakpoint or the end.
    pub fn continue_run(&mut self) -> Stop {
        self.state.step_mode = StepMode::Continue;
        self.vm
            .set_breakpoints(self.state.breakpoints.iter().copied());
        match self.vm.run() {
            RunOutcome::Finished => Stop::Finished,
            RunOutcome::Breakpoint { branch, line } => {
                self.state.last_line = Some(line);
                Stop::Paused { branch, line }
            }
        }
    }

    pub fn step_into(&mut self) -> Result<Stop, VmError> {
        self.drive(StepMode::StepInto)
    }

    pub fn step_over(&mut self) -> Result<Stop, VmError> {
        self.drive(StepMode::StepOver)
    }

    pub fn step_out(&mut self) -> Result<Stop, VmError> {
        self.drive(StepMode::StepOut)
    }

    /// Stop stepping and report where the current branch stands.
    pub fn pause(&mut self) -> Stop {
        self.state.step_mode = StepMode::StepInto;
        match self.position() {
            Some((branch, line)) => {
                self.state.last_line = Some(line);
                Stop::Paused { branch, line }
            }
            None => Stop::Finished,
        }
    }

    fn position(&self) -> Option<(BranchId, usize)> {
        let id = self.vm.current()?;
        let branch = self.vm.branch(id)?;
        let line = self.vm.listing().next_executable(branch.pc)?;
        Some((id, line))
    }

    /// Execute at least one op on the current branch, then keep going until
    /// the step mode or a breakpoint says stop.
    fn drive(&mut self, mode: StepMode) -> Result<Stop, VmError> {
        let id = match self.vm.current() {
            Some(id) => id,
            None => self.vm.branches().first().ok_or(VmError::NoLiveBranches)?.id,
        };
        self.vm.switch_branch(id)?;
        let depth = self.vm.branch(id).map(VmBranch::depth).unwrap_or_default();
        self.state.step_mode = mode;
        self.state.step_depth = depth;

        loop {
            let report: StepReport = self.vm.step()?;
            if let Some(state) = report.halted {
                debug!(branch = %id, ?state, "branch halted while stepping");
                self.state.last_line = report.pc;
                return Ok(Stop::Halted { branch: id, state });
            }
            let Some((_, line)) = self.position() else {
                return Ok(Stop::Finished);
            };
            let depth = self.vm.branch(id).map(VmBranch::depth).unwrap_or_default();
            if self.state.should_break(line, depth) {
                self.state.last_line = Some(line);
                return Ok(Stop::Paused { branch: id, line });
            }
        }
    }
}

/// Compact rendering of a stack or scratch value.
pub fn format_value(value: &VmValue) -> String {
    match (&value.value, &value.origin) {
        (Value::Any, Some(origin)) => format!("any <{}>", origin.source),
        (other, _) => other.to_string(),
    }
}

/// One line per active frame, innermost first.
pub fn format_backtrace(vm: &Vm, id: BranchId) -> String {
    let Some(branch) = vm.branch(id) else {
        return String::new();
    };
    let mut lines = Vec::with_capacity(branch.frames.len() + 1);
    let here = match branch.line().and_then(|pc| vm.listing().next_executable(pc)) {
        Some(line) => format!("line {}", line),
        None => "exit".to_string(),
    };
    let name = vm.branch_name(id).unwrap_or_else(|| "main".to_string());
    lines.push(format!("  #{} at {} ({})", branch.depth(), here, name));
    for (depth, frame) in branch.frames.iter().enumerate().rev() {
        lines.push(format!(
            "  #{} at {}",
            depth,
            vm.listing().render_op(frame.return_pc.saturating_sub(1))
        ));
    }
    lines.join("\n")
}

/// Display-layer view of one branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchView {
    pub id: u32,
    pub line: Option<usize>,
    pub name: Option<String>,
    pub live: bool,
    pub stack: Vec<String>,
    pub error: Option<String>,
}

/// Every branch the session knows about, live ones first.
pub fn inspect_branches(vm: &Vm) -> Vec<BranchView> {
    vm.branches()
        .iter()
        .chain(vm.retired())
        .map(|branch| BranchView {
            id: branch.id.0,
            line: branch.line(),
            name: vm.branch_name(branch.id),
            live: branch.is_running(),
            stack: branch.stack.iter().map(format_value).collect(),
            error: branch.error().map(str::to_string),
        })
        .collect()
}

/// Scratch slots written during the session, rendered for display.
pub fn inspect_scratch(vm: &Vm) -> Vec<(usize, String)> {
    vm.scratch()
        .touched()
        .map(|(slot, value)| (slot, format_value(value)))
        .collect()
}
