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

//! Listing-to-listing rewrite passes run after compilation.
//!
//! Pass order: unused labels -> dead code -> redundant branches -> label
//! merging, repeated until the listing stops changing.

use crate::bytecode::{LabelId, Listing, Op};
use std::collections::HashMap;
use tracing::{debug, trace};

pub type Pass = fn(Listing) -> Listing;

pub const PASSES: &[(&str, Pass)] = &[
    ("unused-labels", remove_unused_labels),
    ("dead-code", remove_dead_code),
    ("redundant-branches", remove_redundant_branches),
    ("merge-labels", merge_labels),
];

const MAX_ROUNDS: usize = 32;

/// Run the pass sequence until fixpoint.
pub fn optimize(listing: Listing) -> Listing {
    let mut current = listing;
    for round in 0..MAX_ROUNDS {
        let before = current.ops.clone();
        for (name, pass) in PASSES {
            let len = current.len();
            current = pass(current);
            if current.len() != len {
                trace!(pass = name, removed = len - current.len(), "pass applied");
            }
        }
        if current.ops == before {
            debug!(rounds = round + 1, ops = current.len(), "optimizer settled");
            break;
        }
    }
    current
}

/// Drop labels nothing refers to, unless they open a subroutine.
pub fn remove_unused_labels(listing: Listing) -> Listing {
    let refs = listing.reference_counts();
    let ops = listing
        .ops
        .iter()
        .enumerate()
        .filter(|(index, op)| match op.declared_label() {
            Some(id) if refs.get(&id).copied().unwrap_or(0) == 0 => {
                starts_subroutine(&listing, index + 1)
            }
            _ => true,
        })
        .map(|(_, op)| op.clone())
        .collect();
    listing.with_ops(ops)
}

fn starts_subroutine(listing: &Listing, from: usize) -> bool {
    listing
        .next_non_nop(from)
        .and_then(|next| listing.get(next))
        .is_some_and(|op| matches!(op, Op::Retsub | Op::Proto { .. }))
}

/// Delete everything between a flow-ending op and the next label declaration.
/// Nops in the dead span are kept.
pub fn remove_dead_code(listing: Listing) -> Listing {
    let mut dead = false;
    let mut ops = Vec::with_capacity(listing.len());
    for op in &listing.ops {
        if dead {
            if op.declared_label().is_some() {
                dead = false;
            } else if !op.is_nop() {
                continue;
            }
        }
        if op.ends_flow() {
            dead = true;
        }
        ops.push(op.clone());
    }
    listing.with_ops(ops)
}

/// Delete `b target` when `target:` is the next non-Nop op.
pub fn remove_redundant_branches(listing: Listing) -> Listing {
    let ops = listing
        .ops
        .iter()
        .enumerate()
        .filter(|(index, op)| !is_branch_to_next(&listing, *index, op))
        .map(|(_, op)| op.clone())
        .collect();
    listing.with_ops(ops)
}

pub(crate) fn is_branch_to_next(listing: &Listing, index: usize, op: &Op) -> bool {
    let Op::Branch { target, .. } = op else {
        return false;
    };
    if !op.is_unconditional_branch() {
        return false;
    }
    listing
        .next_non_nop(index + 1)
        .and_then(|next| listing.get(next))
        .is_some_and(|next| next.declared_label() == Some(*target))
}

/// Collapse runs of label declarations (separated only by Nops) into the
/// first one, retargeting references to the dropped labels.
pub fn merge_labels(listing: Listing) -> Listing {
    let mut survivor: Option<LabelId> = None;
    let mut renamed: HashMap<LabelId, LabelId> = HashMap::new();
    let mut ops = Vec::with_capacity(listing.len());

    for op in &listing.ops {
        match op.declared_label() {
            Some(id) => match survivor {
                Some(first) => {
                    if first != id {
                        renamed.insert(id, first);
                    }
                    continue;
                }
                None => survivor = Some(id),
            },
            None if op.is_nop() => {}
            None => survivor = None,
        }
        ops.push(op.clone());
    }

    if !renamed.is_empty() {
        for op in ops.iter_mut() {
            op.map_labels(|id| renamed.get(&id).copied().unwrap_or(id));
        }
    }
    listing.with_ops(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, SubroutineDef};
    use crate::compiler::compile;

    fn render(listing: &Listing) -> Vec<String> {
        (0..listing.len()).map(|i| listing.render_op(i)).collect()
    }

    fn listing(program: Vec<Expr>) -> Listing {
        compile(&program).unwrap()
    }

    #[test]
    fn test_dead_code_up_to_next_label() {
        let l = listing(vec![
            Expr::op("A"),
            Expr::b("l2"),
            Expr::op("B"),
            Expr::op("C"),
            Expr::label("l2"),
            Expr::op("D"),
        ]);
        assert_eq!(render(&remove_dead_code(l)), vec!["A", "b l2", "l2:", "D"]);
    }

    #[test]
    fn test_dead_code_keeps_comments() {
        let l = listing(vec![
            Expr::Err,
            Expr::op("dead"),
            Expr::Comment(" note".into()),
            Expr::label("next"),
        ]);
        assert_eq!(render(&remove_dead_code(l)), vec!["err", "// note", "next:"]);
    }

    #[test]
    fn test_full_pipeline_collapses_dead_branch() {
        let l = listing(vec![
            Expr::op("A"),
            Expr::b("l2"),
            Expr::op("B"),
            Expr::op("C"),
            Expr::label("l2"),
            Expr::op("D"),
        ]);
        assert_eq!(render(&optimize(l)), vec!["A", "D"]);
    }

    #[test]
    fn test_redundant_branch_then_unused_label() {
        let l = listing(vec![Expr::b("l1"), Expr::label("l1")]);
        let once = remove_redundant_branches(l.clone());
        assert_eq!(render(&once), vec!["l1:"]);
        assert!(optimize(l).is_empty());
    }

    #[test]
    fn test_conditional_branch_to_next_is_kept() {
        let l = listing(vec![Expr::int(1), Expr::bnz("l1"), Expr::label("l1")]);
        assert_eq!(render(&optimize(l)), vec!["int 1", "bnz l1", "l1:"]);
    }

    #[test]
    fn test_subroutine_label_survives_without_references() {
        let l = listing(vec![Expr::Subroutine(SubroutineDef {
            name: "sub".into(),
            args: 0,
            results: 0,
            body: vec![],
        })]);
        assert_eq!(render(&optimize(l)), vec!["sub:", "proto 0 0", "retsub"]);

        let bare = listing(vec![Expr::label("helper"), Expr::Retsub]);
        assert_eq!(render(&remove_unused_labels(bare)), vec!["helper:", "retsub"]);
    }

    #[test]
    fn test_merge_labels_retargets_references() {
        let l = listing(vec![
            Expr::int(0),
            Expr::bz("second"),
            Expr::Call("first".into()),
            Expr::label("first"),
            Expr::Comment(" between".into()),
            Expr::label("second"),
            Expr::op("D"),
        ]);
        let merged = merge_labels(l);
        assert_eq!(
            render(&merged),
            vec!["int 0", "bz first", "callsub first", "first:", "// between", "D"]
        );
        let first = merged.labels.lookup("first").unwrap();
        assert_eq!(merged.ops[1].labels(), &[first]);
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let programs = vec![
            vec![Expr::b("l1"), Expr::label("l1")],
            vec![
                Expr::label("top"),
                Expr::int(1),
                Expr::bnz("a"),
                Expr::b("top"),
                Expr::op("junk"),
                Expr::label("a"),
                Expr::label("b"),
                Expr::Return,
                Expr::op("after"),
            ],
            vec![
                Expr::Pragma { version: 8 },
                Expr::Call("f".into()),
                Expr::Return,
                Expr::Subroutine(SubroutineDef {
                    name: "f".into(),
                    args: 0,
                    results: 0,
                    body: vec![Expr::b("out"), Expr::label("out")],
                }),
            ],
        ];
        for program in programs {
            let once = optimize(listing(program));
            let twice = optimize(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_live_labels_are_never_dropped() {
        let l = listing(vec![
            Expr::label("loop"),
            Expr::int(1),
            Expr::bnz("loop"),
            Expr::Return,
        ]);
        assert_eq!(
            render(&optimize(l)),
            vec!["loop:", "int 1", "bnz loop", "return"]
        );
    }
}
