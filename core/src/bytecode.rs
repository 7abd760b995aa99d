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

use crate::ast::{BranchKind, ConstForm};
use std::collections::HashMap;
use std::fmt;

/// Stable identity of a canonical label inside one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// Arena of canonical labels. One record per unique name; ids index into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    names: Vec<String>,
    by_name: HashMap<String, LabelId>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical id for `name`, creating it on first mention.
    pub fn intern(&mut self, name: &str) -> LabelId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = LabelId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<LabelId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: LabelId) -> &str {
        self.names
            .get(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("<invalid label>")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = LabelId> + '_ {
        (0..self.names.len()).map(|i| LabelId(i as u32))
    }
}

/// A resolved instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // Inert lines, kept for line-accurate diagnostics
    Comment(String),
    Empty,

    Pragma(u8),
    Label(LabelId),

    // Constants
    Int { form: ConstForm, value: u64 },
    Bytes { form: ConstForm, value: Vec<u8> },

    // Control flow
    Branch { kind: BranchKind, target: LabelId },
    Callsub(LabelId),
    Switch(Vec<LabelId>),
    Match(Vec<LabelId>),
    Retsub,
    Proto { args: u8, results: u8 },
    Err,
    Return,

    // Scratch and frames
    Load(u8),
    Store(u8),
    FrameDig(i8),
    FrameBury(i8),

    /// Any other opcode, interpreted through the catalog
    Instr { name: String, immediates: Vec<String> },
}

impl Op {
    /// Canonical labels this op refers to.
    pub fn labels(&self) -> &[LabelId] {
        match self {
            Op::Branch { target, .. } => std::slice::from_ref(target),
            Op::Callsub(target) => std::slice::from_ref(target),
            Op::Switch(targets) | Op::Match(targets) => targets,
            _ => &[],
        }
    }

    /// Rewrite every label reference through `f`.
    pub fn map_labels<F: Fn(LabelId) -> LabelId>(&mut self, f: F) {
        match self {
            Op::Branch { target, .. } | Op::Callsub(target) => *target = f(*target),
            Op::Switch(targets) | Op::Match(targets) => {
                for target in targets.iter_mut() {
                    *target = f(*target);
                }
            }
            _ => {}
        }
    }

    /// Execution never falls through past a terminator.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Err | Op::Return | Op::Retsub)
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Op::Comment(_) | Op::Empty)
    }

    pub fn is_unconditional_branch(&self) -> bool {
        matches!(
            self,
            Op::Branch {
                kind: BranchKind::Always,
                ..
            }
        )
    }

    /// Terminator or unconditional branch: the next op is only reachable via a label.
    pub fn ends_flow(&self) -> bool {
        self.is_terminator() || self.is_unconditional_branch()
    }

    pub fn declared_label(&self) -> Option<LabelId> {
        match self {
            Op::Label(id) => Some(*id),
            _ => None,
        }
    }

    /// Opcode name used for catalog lookups. `None` for lines that are not instructions.
    pub fn mnemonic(&self) -> Option<&str> {
        let name = match self {
            Op::Comment(_) | Op::Empty | Op::Pragma(_) | Op::Label(_) => return None,
            Op::Int {
                form: ConstForm::Pseudo,
                ..
            } => "int",
            Op::Int {
                form: ConstForm::Push,
                ..
            } => "pushint",
            Op::Bytes {
                form: ConstForm::Pseudo,
                ..
            } => "byte",
            Op::Bytes {
                form: ConstForm::Push,
                ..
            } => "pushbytes",
            Op::Branch { kind, .. } => kind.mnemonic(),
            Op::Callsub(_) => "callsub",
            Op::Switch(_) => "switch",
            Op::Match(_) => "match",
            Op::Retsub => "retsub",
            Op::Proto { .. } => "proto",
            Op::Err => "err",
            Op::Return => "return",
            Op::Load(_) => "load",
            Op::Store(_) => "store",
            Op::FrameDig(_) => "frame_dig",
            Op::FrameBury(_) => "frame_bury",
            Op::Instr { name, .. } => name.as_str(),
        };
        Some(name)
    }

    /// Render as one line of source text.
    pub fn render(&self, labels: &LabelTable) -> String {
        let join = |targets: &[LabelId]| {
            targets
                .iter()
                .map(|id| labels.name(*id))
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            Op::Comment(text) => format!("//{}", text),
            Op::Empty => String::new(),
            Op::Pragma(version) => format!("#pragma version {}", version),
            Op::Label(id) => format!("{}:", labels.name(*id)),
            Op::Int { value, .. } => format!("{} {}", self.mnemonic().unwrap_or("int"), value),
            Op::Bytes { value, .. } => format!(
                "{} 0x{}",
                self.mnemonic().unwrap_or("byte"),
                hex::encode(value)
            ),
            Op::Branch { kind, target } => format!("{} {}", kind.mnemonic(), labels.name(*target)),
            Op::Callsub(target) => format!("callsub {}", labels.name(*target)),
            Op::Switch(targets) => format!("switch {}", join(targets)).trim_end().to_string(),
            Op::Match(targets) => format!("match {}", join(targets)).trim_end().to_string(),
            Op::Retsub => "retsub".to_string(),
            Op::Proto { args, results } => format!("proto {} {}", args, results),
            Op::Err => "err".to_string(),
            Op::Return => "return".to_string(),
            Op::Load(slot) => format!("load {}", slot),
            Op::Store(slot) => format!("store {}", slot),
            Op::FrameDig(index) => format!("frame_dig {}", index),
            Op::FrameBury(index) => format!("frame_bury {}", index),
            Op::Instr { name, immediates } => {
                if immediates.is_empty() {
                    name.clone()
                } else {
                    format!("{} {}", name, immediates.join(" "))
                }
            }
        }
    }
}

/// A compiled program: ordered ops plus the label arena they refer to.
///
/// Order is fallthrough order; the index of an op is its line in the
/// rendered text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub ops: Vec<Op>,
    pub labels: LabelTable,
}

impl Listing {
    pub fn new(labels: LabelTable) -> Self {
        Self {
            ops: Vec::new(),
            labels,
        }
    }

    /// Same label arena, different ops. Used by rewrite passes.
    pub fn with_ops(&self, ops: Vec<Op>) -> Self {
        Self {
            ops,
            labels: self.labels.clone(),
        }
    }

    pub fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Op> {
        self.ops.get(index)
    }

    /// Index of the first non-Nop op at or after `index`.
    pub fn next_non_nop(&self, index: usize) -> Option<usize> {
        (index..self.ops.len()).find(|&i| !self.ops[i].is_nop())
    }

    /// First op at or after `index` that executes: not a Nop, label or pragma.
    pub fn next_executable(&self, index: usize) -> Option<usize> {
        (index..self.ops.len()).find(|&i| {
            !matches!(
                self.ops[i],
                Op::Comment(_) | Op::Empty | Op::Label(_) | Op::Pragma(_)
            )
        })
    }

    /// Declaration sites per label.
    pub fn declarations(&self) -> HashMap<LabelId, Vec<usize>> {
        let mut decls: HashMap<LabelId, Vec<usize>> = HashMap::new();
        for (index, op) in self.ops.iter().enumerate() {
            if let Some(id) = op.declared_label() {
                decls.entry(id).or_default().push(index);
            }
        }
        decls
    }

    /// Incoming reference count per label, across the whole listing.
    pub fn reference_counts(&self) -> HashMap<LabelId, usize> {
        let mut counts: HashMap<LabelId, usize> = HashMap::new();
        for op in &self.ops {
            for id in op.labels() {
                *counts.entry(*id).or_default() += 1;
            }
        }
        counts
    }

    /// Declared `#pragma version`, if any.
    pub fn version(&self) -> Option<u8> {
        self.ops.iter().find_map(|op| match op {
            Op::Pragma(version) => Some(*version),
            _ => None,
        })
    }

    pub fn render_op(&self, index: usize) -> String {
        self.ops
            .get(index)
            .map(|op| op.render(&self.labels))
            .unwrap_or_default()
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{}", op.render(&self.labels))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_interning_is_stable() {
        let mut table = LabelTable::new();
        let a = table.intern("main");
        let b = table.intern("loop");
        assert_eq!(table.intern("main"), a);
        assert_ne!(a, b);
        assert_eq!(table.name(b), "loop");
        assert_eq!(table.lookup("nope"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_op_capabilities() {
        let mut table = LabelTable::new();
        let l = table.intern("l");
        let m = table.intern("m");
        assert_eq!(Op::Switch(vec![l, m]).labels(), &[l, m]);
        assert_eq!(Op::Callsub(l).labels(), &[l]);
        assert!(Op::Retsub.is_terminator());
        assert!(!Op::Callsub(l).is_terminator());
        assert!(Op::Comment(" hi".into()).is_nop());
        assert!(Op::Branch {
            kind: BranchKind::Always,
            target: l
        }
        .is_unconditional_branch());
        assert!(!Op::Branch {
            kind: BranchKind::IfZero,
            target: l
        }
        .ends_flow());
    }

    #[test]
    fn test_map_labels_retargets() {
        let mut table = LabelTable::new();
        let l = table.intern("l");
        let m = table.intern("m");
        let mut op = Op::Match(vec![l, m, l]);
        op.map_labels(|id| if id == l { m } else { id });
        assert_eq!(op.labels(), &[m, m, m]);
    }

    #[test]
    fn test_listing_display() {
        let mut table = LabelTable::new();
        let main = table.intern("main");
        let mut listing = Listing::new(table);
        listing.push(Op::Pragma(8));
        listing.push(Op::Label(main));
        listing.push(Op::Bytes {
            form: ConstForm::Pseudo,
            value: b"hi".to_vec(),
        });
        listing.push(Op::Instr {
            name: "substring".into(),
            immediates: vec!["0".into(), "1".into()],
        });
        listing.push(Op::Comment(" done".into()));
        listing.push(Op::Branch {
            kind: BranchKind::IfNonZero,
            target: main,
        });
        insta::assert_snapshot!(listing.to_string().trim_end(), @r"
        #pragma version 8
        main:
        byte 0x6869
        substring 0 1
        // done
        bnz main
        ");
    }

    #[test]
    fn test_reference_counts_and_declarations() {
        let mut table = LabelTable::new();
        let a = table.intern("a");
        let b = table.intern("b");
        let mut listing = Listing::new(table);
        listing.push(Op::Label(a));
        listing.push(Op::Callsub(b));
        listing.push(Op::Switch(vec![a, b]));
        listing.push(Op::Label(a));
        let refs = listing.reference_counts();
        assert_eq!(refs.get(&a), Some(&1));
        assert_eq!(refs.get(&b), Some(&2));
        assert_eq!(listing.declarations().get(&a), Some(&vec![0, 3]));
        assert!(listing.declarations().get(&b).is_none());
    }
}
