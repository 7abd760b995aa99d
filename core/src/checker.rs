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

//! Lint rules over a compiled listing.
//!
//! Control-flow rules (reachability, loops, label hygiene) plus the catalog
//! backed availability checks. [`lint`] runs the whole registry.

use crate::bytecode::{LabelId, Listing, Op};
use crate::catalog::{Catalog, DEFAULT_VERSION};
use crate::diagnostic::{run_rules, Diagnostic, LintConfig, LintContext, LintRule};
use crate::optimizer::is_branch_to_next;
use std::collections::HashMap;

/// Lint `listing` with every registered rule not disabled by `config`.
pub fn lint(listing: &Listing, catalog: &Catalog, config: &LintConfig) -> Vec<Diagnostic> {
    let ctx = LintContext {
        listing,
        catalog,
        config,
    };
    run_rules(&ctx, &registry())
}

/// All built-in rules, in reporting order.
pub fn registry() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(DuplicateLabels),
        Box::new(UnusedLabels),
        Box::new(UnreachableCode),
        Box::new(RedundantBranch),
        Box::new(MissingLabels),
        Box::new(InfiniteLoop),
        Box::new(PragmaPlacement),
        Box::new(UnknownOpcode),
        Box::new(VersionAvailability),
        Box::new(ModeAvailability),
    ]
}

fn label_name(listing: &Listing, id: LabelId) -> &str {
    listing.labels.name(id)
}

pub struct DuplicateLabels;

impl LintRule for DuplicateLabels {
    fn name(&self) -> &'static str {
        "duplicate-label"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let mut found = Vec::new();
        for (id, sites) in listing.declarations() {
            if sites.len() < 2 {
                continue;
            }
            let name = label_name(listing, id);
            for line in &sites {
                found.push(
                    Diagnostic::error(
                        self.name(),
                        *line,
                        format!("label {} declared {} times", name, sites.len()),
                    )
                    .spanning_word(&listing.render_op(*line), name),
                );
            }
        }
        found
    }
}

pub struct UnusedLabels;

impl LintRule for UnusedLabels {
    fn name(&self) -> &'static str {
        "unused-label"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let counts = listing.reference_counts();
        listing
            .ops
            .iter()
            .enumerate()
            .filter_map(|(line, op)| op.declared_label().map(|id| (line, id)))
            .filter(|(_, id)| counts.get(id).copied().unwrap_or(0) == 0)
            .map(|(line, id)| {
                Diagnostic::warning(
                    self.name(),
                    line,
                    format!("label {} is never referenced", label_name(listing, id)),
                )
                .spanning(&listing.render_op(line))
                .removable()
            })
            .collect()
    }
}

/// Code after a terminator or unconditional branch that no referenced label
/// makes reachable again.
pub struct UnreachableCode;

impl LintRule for UnreachableCode {
    fn name(&self) -> &'static str {
        "unreachable-code"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let counts = listing.reference_counts();
        let mut found = Vec::new();
        let mut dead = false;
        for (line, op) in listing.ops.iter().enumerate() {
            if let Some(id) = op.declared_label() {
                if counts.get(&id).copied().unwrap_or(0) > 0 {
                    dead = false;
                }
            }
            if dead && !op.is_nop() {
                found.push(
                    Diagnostic::warning(self.name(), line, "unreachable code")
                        .spanning(&listing.render_op(line))
                        .removable(),
                );
            }
            if op.ends_flow() {
                dead = true;
            }
        }
        found
    }
}

pub struct RedundantBranch;

impl LintRule for RedundantBranch {
    fn name(&self) -> &'static str {
        "redundant-branch"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        listing
            .ops
            .iter()
            .enumerate()
            .filter(|(line, op)| is_branch_to_next(listing, *line, op))
            .map(|(line, _)| {
                Diagnostic::warning(self.name(), line, "branch to the next line has no effect")
                    .spanning(&listing.render_op(line))
                    .removable()
            })
            .collect()
    }
}

pub struct MissingLabels;

impl LintRule for MissingLabels {
    fn name(&self) -> &'static str {
        "missing-label"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let declared = listing.declarations();
        let mut found = Vec::new();
        for (line, op) in listing.ops.iter().enumerate() {
            for id in op.labels() {
                if declared.contains_key(id) {
                    continue;
                }
                let name = label_name(listing, *id);
                found.push(
                    Diagnostic::error(
                        self.name(),
                        line,
                        format!("label {} is not declared", name),
                    )
                    .spanning_word(&listing.render_op(line), name),
                );
            }
        }
        found
    }
}

/// Backward unconditional branch whose body has no way out.
///
/// Deliberately over-permissive: one terminator or one reference to a label
/// outside the body clears the loop, whether or not it is reachable.
pub struct InfiniteLoop;

impl InfiniteLoop {
    fn escapes(
        listing: &Listing,
        declared: &HashMap<LabelId, Vec<usize>>,
        start: usize,
        end: usize,
    ) -> bool {
        listing.ops[start..=end].iter().any(|op| {
            op.is_terminator()
                || op.labels().iter().any(|id| match declared.get(id) {
                    Some(sites) => sites.iter().any(|site| *site < start || *site > end),
                    None => true,
                })
        })
    }
}

impl LintRule for InfiniteLoop {
    fn name(&self) -> &'static str {
        "infinite-loop"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let declared = listing.declarations();
        let mut found = Vec::new();
        for (line, op) in listing.ops.iter().enumerate() {
            let Op::Branch { target, .. } = op else {
                continue;
            };
            if !op.is_unconditional_branch() {
                continue;
            }
            let Some(start) = declared.get(target).and_then(|sites| sites.first().copied())
            else {
                continue;
            };
            if start >= line || Self::escapes(listing, &declared, start, line) {
                continue;
            }
            found.push(
                Diagnostic::warning(
                    self.name(),
                    line,
                    format!(
                        "infinite loop: nothing between lines {} and {} leaves it",
                        start, line
                    ),
                )
                .spanning(&listing.render_op(line)),
            );
        }
        found
    }
}

pub struct PragmaPlacement;

impl LintRule for PragmaPlacement {
    fn name(&self) -> &'static str {
        "pragma-placement"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let mut seen_code = false;
        let mut found = Vec::new();
        for (line, op) in listing.ops.iter().enumerate() {
            if matches!(op, Op::Pragma(_)) && seen_code {
                found.push(
                    Diagnostic::error(
                        self.name(),
                        line,
                        "#pragma version must precede every instruction",
                    )
                    .spanning(&listing.render_op(line)),
                );
            }
            if !op.is_nop() {
                seen_code = true;
            }
        }
        found
    }
}

pub struct UnknownOpcode;

impl LintRule for UnknownOpcode {
    fn name(&self) -> &'static str {
        "unknown-opcode"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        listing
            .ops
            .iter()
            .enumerate()
            .filter_map(|(line, op)| match op {
                Op::Instr { name, .. } if !ctx.catalog.contains(name) => Some(
                    Diagnostic::error(self.name(), line, format!("unknown opcode {}", name))
                        .spanning_word(&listing.render_op(line), name),
                ),
                _ => None,
            })
            .collect()
    }
}

pub struct VersionAvailability;

impl LintRule for VersionAvailability {
    fn name(&self) -> &'static str {
        "version-availability"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let listing = ctx.listing;
        let version = listing.version().unwrap_or(DEFAULT_VERSION);
        let mut found = Vec::new();
        for (line, op) in listing.ops.iter().enumerate() {
            let Some(spec) = op.mnemonic().and_then(|name| ctx.catalog.get(name)) else {
                continue;
            };
            if ctx.catalog.available(spec.name, version).is_none() {
                found.push(
                    Diagnostic::error(
                        self.name(),
                        line,
                        format!(
                            "{} requires version {}, program is version {}",
                            spec.name, spec.min_version, version
                        ),
                    )
                    .spanning_word(&listing.render_op(line), spec.name),
                );
            }
        }
        found
    }
}

pub struct ModeAvailability;

impl LintRule for ModeAvailability {
    fn name(&self) -> &'static str {
        "mode-availability"
    }

    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let Some(mode) = ctx.config.mode else {
            return Vec::new();
        };
        let listing = ctx.listing;
        let mut found = Vec::new();
        for (line, op) in listing.ops.iter().enumerate() {
            let Some(spec) = op.mnemonic().and_then(|name| ctx.catalog.get(name)) else {
                continue;
            };
            if !spec.mode.allows(mode) {
                found.push(
                    Diagnostic::error(
                        self.name(),
                        line,
                        format!("{} is not allowed in {} mode", spec.name, mode),
                    )
                    .spanning_word(&listing.render_op(line), spec.name),
                );
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, SubroutineDef};
    use crate::catalog::Mode;
    use crate::compiler::compile;
    use crate::diagnostic::{Severity, Suggestion};

    fn check(rule: &dyn LintRule, program: &[Expr]) -> Vec<Diagnostic> {
        check_with(rule, program, &LintConfig::default())
    }

    fn check_with(rule: &dyn LintRule, program: &[Expr], config: &LintConfig) -> Vec<Diagnostic> {
        let listing = compile(program).unwrap();
        let catalog = Catalog::new();
        let ctx = LintContext {
            listing: &listing,
            catalog: &catalog,
            config,
        };
        rule.check(&ctx)
    }

    fn lines(found: &[Diagnostic]) -> Vec<usize> {
        found.iter().map(|d| d.line).collect()
    }

    #[test]
    fn test_duplicate_label_flags_every_site() {
        let found = check(
            &DuplicateLabels,
            &[Expr::label("a"), Expr::int(1), Expr::label("a")],
        );
        let mut sites = lines(&found);
        sites.sort();
        assert_eq!(sites, vec![0, 2]);
        assert!(found.iter().all(|d| d.severity == Severity::Error));
        assert_eq!(found[0].message, "label a declared 2 times");
    }

    #[test]
    fn test_unused_label_suggests_removal() {
        let found = check(
            &UnusedLabels,
            &[Expr::label("l1"), Expr::b("l2"), Expr::label("l2")],
        );
        assert_eq!(lines(&found), vec![0]);
        assert_eq!(found[0].severity, Severity::Warning);
        assert_eq!(found[0].suggestion, Some(Suggestion::RemoveLine { line: 0 }));
        assert_eq!((found[0].begin, found[0].end), (0, 3));
    }

    #[test]
    fn test_unused_label_ignores_subroutine_entry_exemption() {
        let found = check(
            &UnusedLabels,
            &[Expr::Subroutine(SubroutineDef {
                name: "helper".into(),
                args: 0,
                results: 0,
                body: vec![],
            })],
        );
        assert_eq!(lines(&found), vec![0]);
    }

    #[test]
    fn test_unreachable_until_referenced_label() {
        let found = check(
            &UnreachableCode,
            &[
                Expr::int(1),
                Expr::Return,
                Expr::Comment(" tail".into()),
                Expr::int(2),
                Expr::label("orphan"),
                Expr::int(3),
                Expr::label("target"),
                Expr::int(4),
                Expr::b("target"),
            ],
        );
        assert_eq!(lines(&found), vec![3, 4, 5]);
        assert!(found.iter().all(|d| d.suggestion.is_some()));
    }

    #[test]
    fn test_redundant_branch() {
        let found = check(
            &RedundantBranch,
            &[
                Expr::b("next"),
                Expr::Empty,
                Expr::label("next"),
                Expr::bnz("next"),
                Expr::label("other"),
            ],
        );
        assert_eq!(lines(&found), vec![0]);
    }

    #[test]
    fn test_missing_label_spans_name() {
        let found = check(
            &MissingLabels,
            &[Expr::int(1), Expr::bnz("done"), Expr::Switch(vec!["a".into(), "done".into()])],
        );
        assert_eq!(lines(&found), vec![1, 2, 2]);
        assert_eq!(found[0].message, "label done is not declared");
        assert_eq!((found[0].begin, found[0].end), (4, 8));
    }

    #[test]
    fn test_infinite_loop_detected() {
        let found = check(
            &InfiniteLoop,
            &[
                Expr::label("spin"),
                Expr::int(1),
                Expr::op("pop"),
                Expr::b("spin"),
            ],
        );
        assert_eq!(lines(&found), vec![3]);
        assert_eq!(
            found[0].message,
            "infinite loop: nothing between lines 0 and 3 leaves it"
        );
    }

    #[test]
    fn test_loop_with_exit_is_not_flagged() {
        let escape = check(
            &InfiniteLoop,
            &[
                Expr::label("top"),
                Expr::op("global"),
                Expr::bnz("out"),
                Expr::b("top"),
                Expr::label("out"),
            ],
        );
        assert!(escape.is_empty());

        let terminator = check(
            &InfiniteLoop,
            &[
                Expr::label("top"),
                Expr::op("global"),
                Expr::bz("skip"),
                Expr::Err,
                Expr::label("skip"),
                Expr::b("top"),
            ],
        );
        assert!(terminator.is_empty());

        let forward = check(&InfiniteLoop, &[Expr::b("ahead"), Expr::label("ahead")]);
        assert!(forward.is_empty());
    }

    #[test]
    fn test_pragma_placement() {
        let found = check(
            &PragmaPlacement,
            &[
                Expr::Comment(" header".into()),
                Expr::Pragma { version: 8 },
                Expr::int(1),
                Expr::Pragma { version: 8 },
            ],
        );
        assert_eq!(lines(&found), vec![3]);
    }

    #[test]
    fn test_unknown_opcode() {
        let found = check(&UnknownOpcode, &[Expr::op("frobnicate"), Expr::op("sha256")]);
        assert_eq!(lines(&found), vec![0]);
        assert_eq!(found[0].message, "unknown opcode frobnicate");
    }

    #[test]
    fn test_version_availability() {
        let program = [Expr::int(1), Expr::bnz("x"), Expr::label("x")];
        let found = check(&VersionAvailability, &program);
        assert!(found.is_empty());

        let program = [
            Expr::Pragma { version: 3 },
            Expr::Proto {
                args: 0,
                results: 0,
            },
            Expr::b("x"),
            Expr::label("x"),
        ];
        let found = check(&VersionAvailability, &program);
        assert_eq!(lines(&found), vec![1]);
        assert_eq!(found[0].message, "proto requires version 8, program is version 3");
    }

    #[test]
    fn test_mode_availability_uses_config() {
        let program = [
            Expr::Instr {
                name: "app_global_get".into(),
                immediates: vec![],
            },
            Expr::Instr {
                name: "arg".into(),
                immediates: vec!["0".into()],
            },
        ];
        assert!(check(&ModeAvailability, &program).is_empty());

        let config = LintConfig {
            mode: Some(Mode::Signature),
            disabled: vec![],
        };
        let found = check_with(&ModeAvailability, &program, &config);
        assert_eq!(lines(&found), vec![0]);
        assert_eq!(
            found[0].message,
            "app_global_get is not allowed in signature mode"
        );
    }

    #[test]
    fn test_lint_sorts_and_respects_disabled() {
        let listing = compile(&[
            Expr::Pragma { version: 8 },
            Expr::label("unused"),
            Expr::int(1),
            Expr::Return,
            Expr::int(2),
            Expr::bnz("nowhere"),
        ])
        .unwrap();
        let catalog = Catalog::new();
        let found = lint(&listing, &catalog, &LintConfig::default());
        let summary: Vec<_> = found.iter().map(|d| (d.line, d.rule.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (1, "unused-label"),
                (4, "unreachable-code"),
                (5, "unreachable-code"),
                (5, "missing-label"),
            ]
        );

        let config = LintConfig {
            mode: None,
            disabled: vec!["unreachable-code".into()],
        };
        let found = lint(&listing, &catalog, &config);
        assert_eq!(found.len(), 2);
    }
}
