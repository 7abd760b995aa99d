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

//! Branching interpreter.
//!
//! A `Vm` tracks one or more hypothetical execution paths ("branches") over a
//! listing. Each branch owns its pc, data stack and call frames; scratch
//! space and the symbol table are shared. Exactly one branch advances per
//! `step()`.

use crate::ast::BranchKind;
use crate::bytecode::{LabelId, Listing, Op};
use crate::catalog::Catalog;
use crate::parser::parse_bytes_literal;
use crate::runtime::{Scratch, Value, VmValue};
use crate::types::StackType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Program counter of a branch that has left the listing for good.
pub const EXIT_PC: usize = usize::MAX;

pub const DEFAULT_BUDGET: u64 = 700;

/// Longest byte string a program may build.
pub const MAX_BYTES_LEN: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VmConfig {
    /// Starting cost budget of the root branch
    pub budget: u64,
    /// Upper bound on branches created in one session, root included
    pub max_branches: usize,
    /// Record executed pcs per branch
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            max_branches: 64,
            trace: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("No live branches")]
    NoLiveBranches,
    #[error("Branch limit of {0} reached")]
    BranchLimit(usize),
    #[error("Unknown branch {0}")]
    UnknownBranch(BranchId),
    #[error("Branch {0} is not running")]
    NotRunning(BranchId),
}

/// Why a branch stopped. Recorded on the branch, never returned as `Err`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    #[error("stack underflow in {0}")]
    StackUnderflow(String),
    #[error("{op} expected {expected}, got {got}")]
    TypeMismatch {
        op: String,
        expected: StackType,
        got: StackType,
    },
    #[error("{0} overflowed")]
    Overflow(String),
    #[error("{0} by zero")]
    DivideByZero(String),
    #[error("err opcode executed")]
    ErrOpcode,
    #[error("assert failed")]
    AssertFailed,
    #[error("retsub without a call frame")]
    RetsubWithoutFrame,
    #[error("proto must immediately follow callsub")]
    ProtoWithoutCallsub,
    #[error("{0} requires a frame prepared by proto")]
    NoFrame(String),
    #[error("{op} index {index} out of range")]
    OutOfRange { op: String, index: i64 },
    #[error("jump to undeclared label {0}")]
    MissingLabel(String),
    #[error("unknown opcode {0}")]
    UnknownOpcode(String),
    #[error("bad immediate for {0}")]
    BadImmediate(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub u32);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BranchState {
    Running,
    /// Budget reached zero. Not an error.
    Exhausted,
    Faulted(String),
    /// Left the listing or executed `return`; `approved` is known when the
    /// returned value was.
    Terminated { approved: Option<bool> },
}

/// Bookkeeping for one active `callsub`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub return_pc: usize,
    /// Stack height at call time
    pub sp: usize,
    pub args: usize,
    pub results: usize,
    /// Set once `proto` has declared args/results
    pub declared: bool,
}

/// One hypothetical execution thread.
#[derive(Debug, Clone)]
pub struct VmBranch {
    pub id: BranchId,
    pub parent: Option<BranchId>,
    pub pc: usize,
    pub stack: Vec<VmValue>,
    pub frames: Vec<Frame>,
    pub budget: u64,
    pub state: BranchState,
    /// Executed pcs, oldest first
    pub trace: Vec<usize>,
    after_callsub: bool,
}

impl VmBranch {
    fn root(budget: u64) -> Self {
        Self {
            id: BranchId(0),
            parent: None,
            pc: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            budget,
            state: BranchState::Running,
            trace: Vec::new(),
            after_callsub: false,
        }
    }

    /// Deep copy under a fresh id.
    fn fork(&self, id: BranchId, pc: usize) -> Self {
        let mut child = self.clone();
        child.id = id;
        child.parent = Some(self.id);
        child.pc = pc;
        child
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, BranchState::Running)
    }

    /// Current listing line, if still inside the listing.
    pub fn line(&self) -> Option<usize> {
        (self.pc != EXIT_PC).then_some(self.pc)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            BranchState::Faulted(message) => Some(message),
            _ => None,
        }
    }
}

/// What a single `step()` did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub branch: BranchId,
    /// Executed line; `None` when the branch just ran off the listing
    pub pc: Option<usize>,
    pub forked: Vec<BranchId>,
    pub halted: Option<BranchState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished,
    Breakpoint { branch: BranchId, line: usize },
}

pub struct Vm<'c> {
    listing: Listing,
    catalog: &'c Catalog,
    config: VmConfig,
    symbols: HashMap<String, usize>,
    targets: HashMap<LabelId, usize>,
    scratch: Scratch,
    live: Vec<VmBranch>,
    retired: Vec<VmBranch>,
    current: Option<BranchId>,
    next_id: u32,
    breakpoints: BTreeSet<usize>,
    paused: Option<(BranchId, usize)>,
}

/// Build an interpreter over `listing` with the default configuration.
pub fn interpret(listing: Listing, catalog: &Catalog) -> Vm<'_> {
    Vm::new(listing, catalog, VmConfig::default())
}

impl<'c> Vm<'c> {
    pub fn new(listing: Listing, catalog: &'c Catalog, config: VmConfig) -> Self {
        let mut symbols = HashMap::new();
        let mut targets = HashMap::new();
        for (index, op) in listing.ops.iter().enumerate() {
            if let Some(id) = op.declared_label() {
                targets.entry(id).or_insert(index);
                symbols
                    .entry(listing.labels.name(id).to_string())
                    .or_insert(index);
            }
        }
        let root = VmBranch::root(config.budget);
        Self {
            listing,
            catalog,
            config,
            symbols,
            targets,
            scratch: Scratch::new(),
            live: vec![root],
            retired: Vec::new(),
            current: Some(BranchId(0)),
            next_id: 1,
            breakpoints: BTreeSet::new(),
            paused: None,
        }
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn symbols(&self) -> &HashMap<String, usize> {
        &self.symbols
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    /// Live branches in discovery order.
    pub fn branches(&self) -> &[VmBranch] {
        &self.live
    }

    /// Branches that halted, in the order they halted.
    pub fn retired(&self) -> &[VmBranch] {
        &self.retired
    }

    pub fn branch(&self, id: BranchId) -> Option<&VmBranch> {
        self.live
            .iter()
            .chain(self.retired.iter())
            .find(|branch| branch.id == id)
    }

    pub fn current(&self) -> Option<BranchId> {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.live.is_empty()
    }

    pub fn set_breakpoints<I: IntoIterator<Item = usize>>(&mut self, lines: I) {
        self.breakpoints = lines.into_iter().collect();
    }

    pub fn breakpoints(&self) -> &BTreeSet<usize> {
        &self.breakpoints
    }

    /// Make `id` the branch later `step()` calls act on.
    pub fn switch_branch(&mut self, id: BranchId) -> Result<(), VmError> {
        if self.live.iter().any(|branch| branch.id == id) {
            self.current = Some(id);
            return Ok(());
        }
        match self.branch(id) {
            Some(_) => Err(VmError::NotRunning(id)),
            None => Err(VmError::UnknownBranch(id)),
        }
    }

    /// Nearest label declared at or before the branch's position.
    pub fn branch_name(&self, id: BranchId) -> Option<String> {
        let branch = self.branch(id)?;
        let at = branch
            .line()
            .filter(|pc| *pc < self.listing.len())
            .or_else(|| branch.trace.last().copied())?;
        self.listing.ops[..=at]
            .iter()
            .rev()
            .find_map(|op| op.declared_label())
            .map(|label| self.listing.labels.name(label).to_string())
    }

    /// Executed instructions of a branch as `line: text`.
    pub fn trace(&self, id: BranchId) -> Result<Vec<String>, VmError> {
        let branch = self.branch(id).ok_or(VmError::UnknownBranch(id))?;
        Ok(branch
            .trace
            .iter()
            .map(|pc| format!("{}: {}", pc, self.listing.render_op(*pc)))
            .collect())
    }

    /// Copy the current branch under a new id, leaving the original untouched.
    pub fn fork(&mut self) -> Result<BranchId, VmError> {
        let index = self.current_index()?;
        let pc = self.live[index].pc;
        self.spawn(index, pc)
            .ok_or(VmError::BranchLimit(self.config.max_branches))
    }

    /// Advance the current branch by one op.
    pub fn step(&mut self) -> Result<StepReport, VmError> {
        let index = self.current_index()?;
        let report = self.step_at(index);
        if report.halted.is_some() {
            self.current = self.live.first().map(|branch| branch.id);
        }
        Ok(report)
    }

    /// Step every live branch round-robin until none remain or a
    /// breakpoint is reached.
    pub fn run(&mut self) -> RunOutcome {
        while !self.live.is_empty() {
            let order: Vec<BranchId> = self.live.iter().map(|branch| branch.id).collect();
            for id in order {
                let Some(index) = self.live.iter().position(|branch| branch.id == id) else {
                    continue;
                };
                if let Some(line) = self.breakpoint_hit(index) {
                    debug!(branch = %id, line, "breakpoint");
                    self.current = Some(id);
                    return RunOutcome::Breakpoint { branch: id, line };
                }
                self.step_at(index);
            }
        }
        self.current = None;
        RunOutcome::Finished
    }

    fn breakpoint_hit(&mut self, index: usize) -> Option<usize> {
        if self.breakpoints.is_empty() {
            return None;
        }
        let branch = &self.live[index];
        let line = self.listing.next_executable(branch.pc)?;
        if !self.breakpoints.contains(&line) {
            return None;
        }
        if self.paused == Some((branch.id, line)) {
            self.paused = None;
            return None;
        }
        self.paused = Some((branch.id, line));
        Some(line)
    }

    fn current_index(&mut self) -> Result<usize, VmError> {
        if let Some(id) = self.current {
            if let Some(index) = self.live.iter().position(|branch| branch.id == id) {
                return Ok(index);
            }
        }
        let first = self.live.first().ok_or(VmError::NoLiveBranches)?;
        self.current = Some(first.id);
        Ok(0)
    }

    fn spawn(&mut self, parent: usize, pc: usize) -> Option<BranchId> {
        let created = self.next_id as usize;
        if created >= self.config.max_branches {
            warn!(
                limit = self.config.max_branches,
                "branch limit reached, not forking"
            );
            return None;
        }
        let id = BranchId(self.next_id);
        self.next_id += 1;
        let child = self.live[parent].fork(id, pc);
        debug!(parent = %child.parent.unwrap_or(id), child = %id, pc, "forked branch");
        self.live.push(child);
        Some(id)
    }

    fn retire(&mut self, index: usize, state: BranchState) {
        let mut branch = self.live.remove(index);
        match &state {
            BranchState::Faulted(message) => {
                debug!(branch = %branch.id, pc = branch.pc, %message, "branch faulted")
            }
            BranchState::Exhausted => {
                debug!(branch = %branch.id, "budget exhausted");
                branch.pc = EXIT_PC;
            }
            _ => branch.pc = EXIT_PC,
        }
        branch.state = state;
        self.retired.push(branch);
    }

    fn step_at(&mut self, index: usize) -> StepReport {
        let id = self.live[index].id;
        // Any executed op moves the branch past the breakpoint it halted on.
        if self.paused.is_some_and(|(paused, _)| paused == id) {
            self.paused = None;
        }
        let mut report = StepReport {
            branch: id,
            pc: None,
            forked: Vec::new(),
            halted: None,
        };

        if self.live[index].budget == 0 {
            self.retire(index, BranchState::Exhausted);
            report.halted = Some(BranchState::Exhausted);
            return report;
        }

        let Some(pc) = self.listing.next_executable(self.live[index].pc) else {
            let state = BranchState::Terminated { approved: None };
            self.retire(index, state.clone());
            report.halted = Some(state);
            return report;
        };
        report.pc = Some(pc);

        let op = &self.listing.ops[pc];
        let name = op.mnemonic().unwrap_or_default();
        let cost = u64::from(self.catalog.cost(name));
        trace!(branch = %id, pc, op = %op.render(&self.listing.labels), "step");

        let effect = {
            let mut exec = Exec {
                listing: &self.listing,
                catalog: self.catalog,
                targets: &self.targets,
                scratch: &mut self.scratch,
                branch: &mut self.live[index],
                pc,
                name,
            };
            exec.run(op)
        };

        let branch = &mut self.live[index];
        branch.pc = pc;
        branch.budget = branch.budget.saturating_sub(cost);
        branch.after_callsub = matches!(op, Op::Callsub(_));
        if self.config.trace {
            branch.trace.push(pc);
        }

        let halt = match effect {
            Err(fault) => Some(BranchState::Faulted(fault.to_string())),
            Ok(Effect::Halt(state)) => Some(state),
            Ok(Effect::Next) => {
                branch.pc = pc + 1;
                None
            }
            Ok(Effect::Jump(target)) => {
                branch.pc = target;
                None
            }
            Ok(Effect::Fork(outcomes)) => {
                let mut outcomes = outcomes.into_iter();
                branch.pc = outcomes.next().unwrap_or(pc + 1);
                for target in outcomes {
                    if let Some(child) = self.spawn(index, target) {
                        report.forked.push(child);
                    }
                }
                None
            }
        };

        let halt = halt.or_else(|| {
            (self.live[index].budget == 0).then_some(BranchState::Exhausted)
        });
        if let Some(state) = halt {
            self.retire(index, state.clone());
            report.halted = Some(state);
        }
        report
    }
}

enum Effect {
    Next,
    Jump(usize),
    /// First pc continues the current branch, each other one gets a new branch
    Fork(Vec<usize>),
    Halt(BranchState),
}

struct Exec<'a> {
    listing: &'a Listing,
    catalog: &'a Catalog,
    targets: &'a HashMap<LabelId, usize>,
    scratch: &'a mut Scratch,
    branch: &'a mut VmBranch,
    pc: usize,
    name: &'a str,
}

impl Exec<'_> {
    fn pop(&mut self) -> Result<VmValue, Fault> {
        self.branch
            .stack
            .pop()
            .ok_or_else(|| Fault::StackUnderflow(self.name.to_string()))
    }

    fn mismatch(&self, expected: StackType, got: &VmValue) -> Fault {
        Fault::TypeMismatch {
            op: self.name.to_string(),
            expected,
            got: got.value.stack_type(),
        }
    }

    /// `None` when the value is unknown.
    fn pop_uint(&mut self) -> Result<Option<u64>, Fault> {
        let value = self.pop()?;
        match value.value {
            Value::Uint64(n) => Ok(Some(n)),
            Value::Any => Ok(None),
            _ => Err(self.mismatch(StackType::Uint64, &value)),
        }
    }

    fn pop_bytes(&mut self) -> Result<Option<Vec<u8>>, Fault> {
        let value = self.pop()?;
        match value.value {
            Value::Bytes(bytes) => Ok(Some(bytes)),
            Value::Any => Ok(None),
            _ => Err(self.mismatch(StackType::Bytes, &value)),
        }
    }

    fn push(&mut self, value: Value) {
        let source = self.listing.render_op(self.pc);
        self.branch
            .stack
            .push(VmValue::new(value).with_origin(self.pc, source));
    }

    fn target(&self, id: LabelId) -> Result<usize, Fault> {
        self.targets
            .get(&id)
            .copied()
            .ok_or_else(|| Fault::MissingLabel(self.listing.labels.name(id).to_string()))
    }

    /// One-byte stack/offset immediate.
    fn immediate(&self, op: &Op, index: usize) -> Result<u64, Fault> {
        let Op::Instr { immediates, .. } = op else {
            return Err(Fault::BadImmediate(self.name.to_string()));
        };
        immediates
            .get(index)
            .and_then(|raw| raw.parse::<u8>().ok())
            .map(u64::from)
            .ok_or_else(|| Fault::BadImmediate(self.name.to_string()))
    }

    fn stack_index(&self, depth: u64) -> Result<usize, Fault> {
        let len = self.branch.stack.len() as u64;
        if depth >= len {
            return Err(Fault::StackUnderflow(self.name.to_string()));
        }
        Ok((len - 1 - depth) as usize)
    }

    fn check_len(&self, bytes: Vec<u8>) -> Result<Value, Fault> {
        if bytes.len() > MAX_BYTES_LEN {
            return Err(Fault::Invalid(format!(
                "{} produced {} bytes, limit is {}",
                self.name,
                bytes.len(),
                MAX_BYTES_LEN
            )));
        }
        Ok(Value::Bytes(bytes))
    }

    fn binary<F>(&mut self, f: F) -> Result<Effect, Fault>
    where
        F: Fn(u64, u64) -> Result<u64, Fault>,
    {
        let b = self.pop_uint()?;
        let a = self.pop_uint()?;
        let value = match (a, b) {
            (Some(a), Some(b)) => Value::Uint64(f(a, b)?),
            _ => Value::Any,
        };
        self.push(value);
        Ok(Effect::Next)
    }

    fn unary<F>(&mut self, f: F) -> Result<Effect, Fault>
    where
        F: Fn(u64) -> u64,
    {
        let value = match self.pop_uint()? {
            Some(a) => Value::Uint64(f(a)),
            None => Value::Any,
        };
        self.push(value);
        Ok(Effect::Next)
    }

    fn run(&mut self, op: &Op) -> Result<Effect, Fault> {
        match op {
            Op::Comment(_) | Op::Empty | Op::Label(_) | Op::Pragma(_) => Ok(Effect::Next),
            Op::Int { value, .. } => {
                self.push(Value::Uint64(*value));
                Ok(Effect::Next)
            }
            Op::Bytes { value, .. } => {
                self.push(Value::Bytes(value.clone()));
                Ok(Effect::Next)
            }
            Op::Branch { kind, target } => {
                let target = self.target(*target)?;
                let next = self.pc + 1;
                let taken = match kind {
                    BranchKind::Always => return Ok(Effect::Jump(target)),
                    BranchKind::IfZero => self.pop_uint()?.map(|n| n == 0),
                    BranchKind::IfNonZero => self.pop_uint()?.map(|n| n != 0),
                };
                Ok(match taken {
                    Some(true) => Effect::Jump(target),
                    Some(false) => Effect::Next,
                    None => Effect::Fork(vec![next, target]),
                })
            }
            Op::Callsub(target) => {
                let target = self.target(*target)?;
                self.branch.frames.push(Frame {
                    return_pc: self.pc + 1,
                    sp: self.branch.stack.len(),
                    args: 0,
                    results: 0,
                    declared: false,
                });
                Ok(Effect::Jump(target))
            }
            Op::Proto { args, results } => {
                let after_callsub = self.branch.after_callsub;
                let frame = match self.branch.frames.last_mut() {
                    Some(frame) if after_callsub && !frame.declared => frame,
                    _ => return Err(Fault::ProtoWithoutCallsub),
                };
                if frame.sp < *args as usize {
                    return Err(Fault::StackUnderflow("proto".to_string()));
                }
                frame.args = *args as usize;
                frame.results = *results as usize;
                frame.declared = true;
                Ok(Effect::Next)
            }
            Op::Retsub => {
                let frame = self
                    .branch
                    .frames
                    .pop()
                    .ok_or(Fault::RetsubWithoutFrame)?;
                if frame.declared {
                    let stack = &mut self.branch.stack;
                    let base = frame.sp - frame.args;
                    if stack.len() < base + frame.results {
                        return Err(Fault::StackUnderflow("retsub".to_string()));
                    }
                    let results = stack.split_off(stack.len() - frame.results);
                    stack.truncate(base);
                    stack.extend(results);
                }
                Ok(Effect::Jump(frame.return_pc))
            }
            Op::Switch(targets) => {
                let targets = targets
                    .iter()
                    .map(|id| self.target(*id))
                    .collect::<Result<Vec<_>, _>>()?;
                let next = self.pc + 1;
                Ok(match self.pop_uint()? {
                    Some(i) => match targets.get(i as usize) {
                        Some(target) => Effect::Jump(*target),
                        None => Effect::Next,
                    },
                    None => {
                        let mut outcomes = vec![next];
                        outcomes.extend(targets);
                        Effect::Fork(outcomes)
                    }
                })
            }
            Op::Match(targets) => {
                let targets = targets
                    .iter()
                    .map(|id| self.target(*id))
                    .collect::<Result<Vec<_>, _>>()?;
                let needle = self.pop()?;
                let mut cases = Vec::with_capacity(targets.len());
                for _ in 0..targets.len() {
                    cases.push(self.pop()?);
                }
                cases.reverse();
                let unknown = needle.is_unknown() || cases.iter().any(VmValue::is_unknown);
                if unknown {
                    let mut outcomes = vec![self.pc + 1];
                    outcomes.extend(targets);
                    return Ok(Effect::Fork(outcomes));
                }
                Ok(cases
                    .iter()
                    .position(|case| case.value == needle.value)
                    .map(|i| Effect::Jump(targets[i]))
                    .unwrap_or(Effect::Next))
            }
            Op::Err => Err(Fault::ErrOpcode),
            Op::Return => {
                let approved = self.pop_uint()?.map(|n| n != 0);
                Ok(Effect::Halt(BranchState::Terminated { approved }))
            }
            Op::Load(slot) => {
                let value = self
                    .scratch
                    .get(*slot as usize)
                    .cloned()
                    .unwrap_or_else(|| VmValue::new(Value::None));
                self.branch.stack.push(value);
                Ok(Effect::Next)
            }
            Op::Store(slot) => {
                let value = self.pop()?;
                self.scratch.set(*slot as usize, value);
                Ok(Effect::Next)
            }
            Op::FrameDig(offset) => {
                let index = self.frame_index(*offset)?;
                if index >= self.branch.stack.len() {
                    return Err(self.out_of_range(*offset));
                }
                let value = self.branch.stack[index].clone();
                self.branch.stack.push(value);
                Ok(Effect::Next)
            }
            Op::FrameBury(offset) => {
                let value = self.pop()?;
                let index = self.frame_index(*offset)?;
                if index >= self.branch.stack.len() {
                    return Err(self.out_of_range(*offset));
                }
                self.branch.stack[index] = value;
                Ok(Effect::Next)
            }
            Op::Instr { name, immediates } => self.instr(op, name, immediates),
        }
    }

    fn frame_index(&self, offset: i8) -> Result<usize, Fault> {
        let frame = self
            .branch
            .frames
            .last()
            .filter(|frame| frame.declared)
            .ok_or_else(|| Fault::NoFrame(self.name.to_string()))?;
        let index = frame.sp as i64 + i64::from(offset);
        if index < 0 || (offset < 0 && -i64::from(offset) > frame.args as i64) {
            return Err(self.out_of_range(offset));
        }
        Ok(index as usize)
    }

    fn out_of_range(&self, index: i8) -> Fault {
        Fault::OutOfRange {
            op: self.name.to_string(),
            index: i64::from(index),
        }
    }

    fn instr(&mut self, op: &Op, name: &str, immediates: &[String]) -> Result<Effect, Fault> {
        match name {
            "+" => self.binary(|a, b| a.checked_add(b).ok_or(Fault::Overflow("+".into()))),
            "-" => self.binary(|a, b| a.checked_sub(b).ok_or(Fault::Overflow("-".into()))),
            "*" => self.binary(|a, b| a.checked_mul(b).ok_or(Fault::Overflow("*".into()))),
            "/" => self.binary(|a, b| a.checked_div(b).ok_or(Fault::DivideByZero("/".into()))),
            "%" => self.binary(|a, b| a.checked_rem(b).ok_or(Fault::DivideByZero("%".into()))),
            "<" => self.binary(|a, b| Ok((a < b) as u64)),
            ">" => self.binary(|a, b| Ok((a > b) as u64)),
            "<=" => self.binary(|a, b| Ok((a <= b) as u64)),
            ">=" => self.binary(|a, b| Ok((a >= b) as u64)),
            "&&" => self.binary(|a, b| Ok((a != 0 && b != 0) as u64)),
            "||" => self.binary(|a, b| Ok((a != 0 || b != 0) as u64)),
            "|" => self.binary(|a, b| Ok(a | b)),
            "&" => self.binary(|a, b| Ok(a & b)),
            "^" => self.binary(|a, b| Ok(a ^ b)),
            "!" => self.unary(|a| (a == 0) as u64),
            "~" => self.unary(|a| !a),
            "==" | "!=" => {
                let b = self.pop()?;
                let a = self.pop()?;
                let value = if a.is_unknown() || b.is_unknown() {
                    Value::Any
                } else if a.value.stack_type() != b.value.stack_type() {
                    return Err(self.mismatch(a.value.stack_type(), &b));
                } else {
                    let equal = a.value == b.value;
                    Value::Uint64((equal == (name == "==")) as u64)
                };
                self.push(value);
                Ok(Effect::Next)
            }
            "len" => {
                let value = match self.pop_bytes()? {
                    Some(bytes) => Value::Uint64(bytes.len() as u64),
                    None => Value::Any,
                };
                self.push(value);
                Ok(Effect::Next)
            }
            "itob" => {
                let value = match self.pop_uint()? {
                    Some(n) => Value::Bytes(n.to_be_bytes().to_vec()),
                    None => Value::Any,
                };
                self.push(value);
                Ok(Effect::Next)
            }
            "btoi" => {
                let value = match self.pop_bytes()? {
                    Some(bytes) if bytes.len() > 8 => {
                        return Err(Fault::Invalid(format!(
                            "btoi arg too long, got {} bytes",
                            bytes.len()
                        )))
                    }
                    Some(bytes) => {
                        Value::Uint64(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
                    }
                    None => Value::Any,
                };
                self.push(value);
                Ok(Effect::Next)
            }
            "concat" => {
                let b = self.pop_bytes()?;
                let a = self.pop_bytes()?;
                let value = match (a, b) {
                    (Some(mut a), Some(b)) => {
                        a.extend(b);
                        self.check_len(a)?
                    }
                    _ => Value::Any,
                };
                self.push(value);
                Ok(Effect::Next)
            }
            "substring" | "extract" => {
                let start = self.immediate(op, 0)? as usize;
                let second = self.immediate(op, 1)? as usize;
                let value = match self.pop_bytes()? {
                    Some(bytes) => {
                        let end = match name {
                            "extract" if second == 0 => bytes.len(),
                            "extract" => start.saturating_add(second),
                            _ => second,
                        };
                        if start > end || end > bytes.len() {
                            return Err(Fault::OutOfRange {
                                op: name.to_string(),
                                index: end as i64,
                            });
                        }
                        Value::Bytes(bytes[start..end].to_vec())
                    }
                    None => Value::Any,
                };
                self.push(value);
                Ok(Effect::Next)
            }
            "pop" => {
                self.pop()?;
                Ok(Effect::Next)
            }
            "dup" => {
                let top = self.pop()?;
                self.branch.stack.push(top.clone());
                self.branch.stack.push(top);
                Ok(Effect::Next)
            }
            "dup2" => {
                let b = self.pop()?;
                let a = self.pop()?;
                let stack = &mut self.branch.stack;
                stack.extend([a.clone(), b.clone(), a, b]);
                Ok(Effect::Next)
            }
            "swap" => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.branch.stack.extend([b, a]);
                Ok(Effect::Next)
            }
            "select" => {
                let c = self.pop_uint()?;
                let b = self.pop()?;
                let a = self.pop()?;
                match c {
                    Some(0) => self.branch.stack.push(a),
                    Some(_) => self.branch.stack.push(b),
                    None => self.push(Value::Any),
                }
                Ok(Effect::Next)
            }
            "assert" => match self.pop_uint()? {
                Some(0) => Err(Fault::AssertFailed),
                _ => Ok(Effect::Next),
            },
            "dig" => {
                let index = self.stack_index(self.immediate(op, 0)?)?;
                let value = self.branch.stack[index].clone();
                self.branch.stack.push(value);
                Ok(Effect::Next)
            }
            "cover" => {
                let depth = self.immediate(op, 0)?;
                let top = self.pop()?;
                let len = self.branch.stack.len() as u64;
                if depth > len {
                    return Err(Fault::StackUnderflow(name.to_string()));
                }
                self.branch.stack.insert((len - depth) as usize, top);
                Ok(Effect::Next)
            }
            "uncover" => {
                let index = self.stack_index(self.immediate(op, 0)?)?;
                let value = self.branch.stack.remove(index);
                self.branch.stack.push(value);
                Ok(Effect::Next)
            }
            "bury" => {
                let depth = self.immediate(op, 0)?;
                if depth == 0 {
                    return Err(Fault::BadImmediate(name.to_string()));
                }
                let top = self.pop()?;
                let index = self.stack_index(depth - 1)?;
                self.branch.stack[index] = top;
                Ok(Effect::Next)
            }
            "popn" => {
                for _ in 0..self.immediate(op, 0)? {
                    self.pop()?;
                }
                Ok(Effect::Next)
            }
            "dupn" => {
                let count = self.immediate(op, 0)?;
                let top = self.pop()?;
                for _ in 0..count {
                    self.branch.stack.push(top.clone());
                }
                self.branch.stack.push(top);
                Ok(Effect::Next)
            }
            "loads" => {
                let value = match self.pop_uint()? {
                    Some(slot) => self
                        .scratch
                        .get(slot as usize)
                        .cloned()
                        .ok_or(Fault::OutOfRange {
                            op: name.to_string(),
                            index: slot as i64,
                        })?,
                    None => VmValue::any().with_origin(self.pc, self.listing.render_op(self.pc)),
                };
                self.branch.stack.push(value);
                Ok(Effect::Next)
            }
            "stores" => {
                let value = self.pop()?;
                match self.pop_uint()? {
                    Some(slot) => {
                        if !self.scratch.set(slot as usize, value) {
                            return Err(Fault::OutOfRange {
                                op: name.to_string(),
                                index: slot as i64,
                            });
                        }
                    }
                    None => warn!(pc = self.pc, "stores to an unknown slot ignored"),
                }
                Ok(Effect::Next)
            }
            "pushints" => {
                for raw in immediates {
                    let n = raw
                        .parse::<u64>()
                        .map_err(|_| Fault::BadImmediate(name.to_string()))?;
                    self.push(Value::Uint64(n));
                }
                Ok(Effect::Next)
            }
            "pushbytess" => {
                for raw in immediates {
                    let bytes = parse_bytes_literal(raw)
                        .map_err(|_| Fault::BadImmediate(name.to_string()))?;
                    self.push(Value::Bytes(bytes));
                }
                Ok(Effect::Next)
            }
            _ => self.symbolic(name),
        }
    }

    /// Opcodes without concrete semantics: check the declared argument
    /// types and push unknown results.
    fn symbolic(&mut self, name: &str) -> Result<Effect, Fault> {
        let catalog = self.catalog;
        let spec = catalog
            .get(name)
            .ok_or_else(|| Fault::UnknownOpcode(name.to_string()))?;
        for expected in spec.pops.iter().rev() {
            let value = self.pop()?;
            if !value.value.stack_type().is_compatible(expected) {
                return Err(self.mismatch(*expected, &value));
            }
        }
        let (_, pushes) = spec.arity();
        for _ in 0..pushes {
            self.push(Value::Any);
        }
        Ok(Effect::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, SubroutineDef};
    use crate::compiler::compile;

    fn vm_for<'c>(program: Vec<Expr>, catalog: &'c Catalog, budget: u64) -> Vm<'c> {
        let config = VmConfig {
            budget,
            ..VmConfig::default()
        };
        Vm::new(compile(&program).unwrap(), catalog, config)
    }

    fn top(vm: &Vm, id: BranchId) -> Value {
        vm.branch(id).unwrap().stack.last().unwrap().value.clone()
    }

    #[test]
    fn test_interpret_builds_symbols_and_root() {
        let catalog = Catalog::new();
        let listing = compile(&[Expr::int(1), Expr::label("end"), Expr::Return]).unwrap();
        let vm = interpret(listing, &catalog);
        assert_eq!(vm.symbols().get("end"), Some(&1));
        assert_eq!(vm.branches().len(), 1);
        assert_eq!(vm.branches()[0].pc, 0);
        assert_eq!(vm.branches()[0].budget, DEFAULT_BUDGET);
        assert_eq!(vm.scratch().slots().len(), 256);
    }

    #[test]
    fn test_arithmetic_and_return() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![Expr::int(2), Expr::int(3), Expr::op("+"), Expr::Return],
            &catalog,
            100,
        );
        assert_eq!(vm.run(), RunOutcome::Finished);
        let root = &vm.retired()[0];
        assert_eq!(
            root.state,
            BranchState::Terminated {
                approved: Some(true)
            }
        );
        assert_eq!(root.trace, vec![0, 1, 2, 3]);
        assert_eq!(vm.trace(root.id).unwrap()[2], "2: +");
    }

    #[test]
    fn test_step_skips_nops_and_labels() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::Comment(" header".into()),
                Expr::label("start"),
                Expr::int(1),
            ],
            &catalog,
            100,
        );
        let report = vm.step().unwrap();
        assert_eq!(report.pc, Some(2));
        assert_eq!(top(&vm, report.branch), Value::Uint64(1));
        let report = vm.step().unwrap();
        assert_eq!(report.halted, Some(BranchState::Terminated { approved: None }));
        assert_eq!(vm.step(), Err(VmError::NoLiveBranches));
    }

    #[test]
    fn test_underflow_faults_only_that_branch() {
        let catalog = Catalog::new();
        let mut vm = vm_for(vec![Expr::op("+")], &catalog, 100);
        vm.run();
        let root = &vm.retired()[0];
        assert_eq!(root.error(), Some("stack underflow in +"));
        assert_eq!(root.pc, 0);
    }

    #[test]
    fn test_type_mismatch_faults() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::Bytes {
                    form: crate::ast::ConstForm::Pseudo,
                    value: b"x".to_vec(),
                },
                Expr::int(1),
                Expr::op("+"),
            ],
            &catalog,
            100,
        );
        vm.run();
        assert_eq!(
            vm.retired()[0].error(),
            Some("+ expected uint64, got []byte")
        );
    }

    #[test]
    fn test_unknown_condition_forks() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::Instr {
                    name: "txn".into(),
                    immediates: vec!["Fee".into()],
                },
                Expr::bnz("yes"),
                Expr::int(0),
                Expr::Return,
                Expr::label("yes"),
                Expr::int(1),
                Expr::Return,
            ],
            &catalog,
            100,
        );
        vm.step().unwrap();
        let report = vm.step().unwrap();
        assert_eq!(report.forked.len(), 1);
        let child = report.forked[0];
        assert_eq!(vm.branch(BranchId(0)).unwrap().pc, 2);
        assert_eq!(vm.branch(child).unwrap().pc, 4);
        assert_eq!(vm.run(), RunOutcome::Finished);
        let approved: Vec<_> = vm
            .retired()
            .iter()
            .map(|b| (b.id, b.state.clone()))
            .collect();
        assert!(approved.contains(&(
            BranchId(0),
            BranchState::Terminated {
                approved: Some(false)
            }
        )));
        assert!(approved.contains(&(
            child,
            BranchState::Terminated {
                approved: Some(true)
            }
        )));
    }

    #[test]
    fn test_fork_isolation_shares_scratch() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::int(7),
                Expr::Store(3),
                Expr::int(1),
                Expr::int(2),
                Expr::Load(3),
            ],
            &catalog,
            100,
        );
        vm.step().unwrap();
        vm.step().unwrap();
        let original = vm.current().unwrap();
        let child = vm.fork().unwrap();
        assert_ne!(child, original);

        vm.switch_branch(child).unwrap();
        vm.step().unwrap();
        assert_eq!(vm.branch(child).unwrap().stack.len(), 1);
        assert!(vm.branch(original).unwrap().stack.is_empty());
        assert_eq!(vm.branch(original).unwrap().pc, 2);

        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(top(&vm, child), Value::Uint64(7));
        vm.switch_branch(original).unwrap();
        vm.step().unwrap();
        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(top(&vm, original), Value::Uint64(7));
        assert_eq!(vm.branch(original).unwrap().stack.len(), 3);
    }

    #[test]
    fn test_scratch_write_visible_to_sibling() {
        let catalog = Catalog::new();
        let mut vm = vm_for(vec![Expr::int(5), Expr::Store(0), Expr::Load(0)], &catalog, 100);
        let sibling = vm.fork().unwrap();
        vm.step().unwrap();
        vm.step().unwrap();
        vm.switch_branch(sibling).unwrap();
        assert_eq!(vm.scratch().get(0).unwrap().value, Value::Uint64(5));
        assert_eq!(vm.branch(sibling).unwrap().pc, 0);
    }

    #[test]
    fn test_budget_exhaustion_is_silent() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![Expr::label("l1"), Expr::int(1), Expr::b("l1")],
            &catalog,
            1,
        );
        let report = vm.step().unwrap();
        assert_eq!(report.pc, Some(1));
        assert_eq!(report.halted, Some(BranchState::Exhausted));
        let root = &vm.retired()[0];
        assert_eq!(root.trace, vec![1]);
        assert_eq!(root.error(), None);
        assert_eq!(root.pc, EXIT_PC);
        assert_eq!(vm.run(), RunOutcome::Finished);
        assert_eq!(vm.retired().len(), 1);
    }

    #[test]
    fn test_infinite_loop_stops_at_budget() {
        let catalog = Catalog::new();
        let mut vm = vm_for(vec![Expr::label("l1"), Expr::b("l1")], &catalog, 50);
        assert_eq!(vm.run(), RunOutcome::Finished);
        assert_eq!(vm.retired()[0].state, BranchState::Exhausted);
        assert_eq!(vm.retired()[0].trace.len(), 50);
    }

    #[test]
    fn test_subroutine_frames() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::int(9),
                Expr::int(20),
                Expr::int(22),
                Expr::Call("add".into()),
                Expr::Return,
                Expr::Subroutine(SubroutineDef {
                    name: "add".into(),
                    args: 2,
                    results: 1,
                    body: vec![
                        Expr::FrameDig(-2),
                        Expr::FrameDig(-1),
                        Expr::op("+"),
                    ],
                }),
            ],
            &catalog,
            100,
        );
        for _ in 0..4 {
            vm.step().unwrap();
        }
        let root = vm.branch(BranchId(0)).unwrap();
        assert_eq!(root.depth(), 1);
        assert_eq!(root.frames[0].sp, 3);
        assert_eq!(vm.branch_name(BranchId(0)).as_deref(), Some("add"));

        for _ in 0..5 {
            vm.step().unwrap();
        }
        let root = vm.branch(BranchId(0)).unwrap();
        assert_eq!(root.depth(), 0);
        let values: Vec<_> = root.stack.iter().map(|v| v.value.clone()).collect();
        assert_eq!(values, vec![Value::Uint64(9), Value::Uint64(42)]);
        assert_eq!(root.pc, 4);
    }

    #[test]
    fn test_retsub_without_frame_faults() {
        let catalog = Catalog::new();
        let mut vm = vm_for(vec![Expr::Retsub], &catalog, 100);
        vm.run();
        assert_eq!(vm.retired()[0].error(), Some("retsub without a call frame"));
    }

    #[test]
    fn test_proto_without_callsub_faults() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![Expr::Proto {
                args: 0,
                results: 0,
            }],
            &catalog,
            100,
        );
        vm.run();
        assert_eq!(
            vm.retired()[0].error(),
            Some("proto must immediately follow callsub")
        );
    }

    #[test]
    fn test_proto_after_other_op_in_subroutine_faults() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::Call("f".into()),
                Expr::Return,
                Expr::label("f"),
                Expr::int(1),
                Expr::Proto {
                    args: 0,
                    results: 0,
                },
            ],
            &catalog,
            100,
        );
        vm.run();
        let root = &vm.retired()[0];
        assert_eq!(root.error(), Some("proto must immediately follow callsub"));
        assert_eq!(root.pc, 4);
        assert_eq!(root.depth(), 1);
    }

    #[test]
    fn test_stack_immediates_are_one_byte() {
        let catalog = Catalog::new();
        let dupn = |count: &str| Expr::Instr {
            name: "dupn".into(),
            immediates: vec![count.into()],
        };
        let mut vm = vm_for(vec![Expr::int(1), dupn("3000000")], &catalog, 100);
        vm.run();
        let root = &vm.retired()[0];
        assert_eq!(root.error(), Some("bad immediate for dupn"));
        assert_eq!(root.stack.len(), 1);

        let mut vm = vm_for(vec![Expr::int(1), dupn("255")], &catalog, 100);
        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(vm.branch(BranchId(0)).unwrap().stack.len(), 256);
    }

    #[test]
    fn test_switch_concrete_and_unknown() {
        let catalog = Catalog::new();
        let program = |selector: Expr| {
            vec![
                selector,
                Expr::Switch(vec!["a".into(), "b".into()]),
                Expr::Err,
                Expr::label("a"),
                Expr::int(1),
                Expr::Return,
                Expr::label("b"),
                Expr::int(2),
                Expr::Return,
            ]
        };
        let mut vm = vm_for(program(Expr::int(1)), &catalog, 100);
        vm.run();
        assert_eq!(vm.retired().len(), 1);
        assert_eq!(vm.retired()[0].trace, vec![0, 1, 7, 8]);

        let mut vm = vm_for(program(Expr::op("global")), &catalog, 100);
        vm.run();
        assert_eq!(vm.retired().len(), 3);
        let faulted = vm.retired().iter().filter(|b| b.error().is_some()).count();
        assert_eq!(faulted, 1);
    }

    #[test]
    fn test_match_picks_equal_case() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::int(10),
                Expr::int(20),
                Expr::int(20),
                Expr::Match(vec!["ten".into(), "twenty".into()]),
                Expr::Err,
                Expr::label("ten"),
                Expr::Err,
                Expr::label("twenty"),
                Expr::int(1),
                Expr::Return,
            ],
            &catalog,
            100,
        );
        vm.run();
        assert_eq!(
            vm.retired()[0].state,
            BranchState::Terminated {
                approved: Some(true)
            }
        );
    }

    #[test]
    fn test_symbolic_opcode_pushes_unknown_with_origin() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::Bytes {
                    form: crate::ast::ConstForm::Pseudo,
                    value: b"data".to_vec(),
                },
                Expr::op("sha256"),
            ],
            &catalog,
            100,
        );
        vm.step().unwrap();
        vm.step().unwrap();
        let value = vm.branch(BranchId(0)).unwrap().stack[0].clone();
        assert_eq!(value.value, Value::Any);
        assert_eq!(value.origin.unwrap().source, "sha256");
        assert_eq!(vm.branch(BranchId(0)).unwrap().budget, 100 - 1 - 35);
    }

    #[test]
    fn test_breakpoint_halts_run_and_resumes() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![Expr::int(1), Expr::int(2), Expr::op("+"), Expr::Return],
            &catalog,
            100,
        );
        vm.set_breakpoints([2]);
        assert_eq!(
            vm.run(),
            RunOutcome::Breakpoint {
                branch: BranchId(0),
                line: 2
            }
        );
        assert_eq!(vm.branch(BranchId(0)).unwrap().stack.len(), 2);
        assert_eq!(vm.run(), RunOutcome::Finished);
    }

    #[test]
    fn test_breakpoint_rehit_after_manual_step() {
        let catalog = Catalog::new();
        let mut vm = vm_for(
            vec![
                Expr::int(3),
                Expr::Store(0),
                Expr::label("top"),
                Expr::Load(0),
                Expr::int(1),
                Expr::op("-"),
                Expr::op("dup"),
                Expr::Store(0),
                Expr::bnz("top"),
                Expr::int(1),
                Expr::Return,
            ],
            &catalog,
            200,
        );
        vm.set_breakpoints([4]);
        let hit = RunOutcome::Breakpoint {
            branch: BranchId(0),
            line: 4,
        };
        assert_eq!(vm.run(), hit);
        assert_eq!(vm.scratch().get(0).unwrap().value, Value::Uint64(3));

        vm.step().unwrap();
        assert_eq!(vm.run(), hit);
        assert_eq!(vm.scratch().get(0).unwrap().value, Value::Uint64(2));

        assert_eq!(vm.run(), hit);
        assert_eq!(vm.scratch().get(0).unwrap().value, Value::Uint64(1));
        assert_eq!(vm.run(), RunOutcome::Finished);
    }

    #[test]
    fn test_fork_beyond_limit_errors() {
        let catalog = Catalog::new();
        let config = VmConfig {
            budget: 100,
            max_branches: 2,
            trace: true,
        };
        let listing = compile(&[Expr::int(1)]).unwrap();
        let mut vm = Vm::new(listing, &catalog, config);
        assert_eq!(vm.fork(), Ok(BranchId(1)));
        assert_eq!(vm.fork(), Err(VmError::BranchLimit(2)));
        assert_eq!(vm.branches().len(), 2);
    }

    #[test]
    fn test_branch_limit_caps_forks() {
        let catalog = Catalog::new();
        let config = VmConfig {
            budget: 100,
            max_branches: 1,
            trace: false,
        };
        let listing = compile(&[Expr::op("global"), Expr::bz("x"), Expr::label("x")]).unwrap();
        let mut vm = Vm::new(listing, &catalog, config);
        vm.step().unwrap();
        let report = vm.step().unwrap();
        assert!(report.forked.is_empty());
        assert!(vm.branch(BranchId(0)).unwrap().trace.is_empty());
    }

    #[test]
    fn test_switch_branch_errors() {
        let catalog = Catalog::new();
        let mut vm = vm_for(vec![Expr::Err], &catalog, 100);
        assert_eq!(
            vm.switch_branch(BranchId(9)),
            Err(VmError::UnknownBranch(BranchId(9)))
        );
        vm.run();
        assert_eq!(
            vm.switch_branch(BranchId(0)),
            Err(VmError::NotRunning(BranchId(0)))
        );
    }
}
