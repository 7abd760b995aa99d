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

//! Lint diagnostics and the rule framework.
//!
//! Rules implement [`LintRule`] and are run in isolation by [`run_rules`]: a
//! rule that panics is logged and skipped, the others still report.
//! Diagnostics can be exported as a SARIF 2.1.0 log for IDE/CI consumers.

use crate::bytecode::Listing;
use crate::catalog::{Catalog, Mode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Machine-applicable fix attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Suggestion {
    /// The line is redundant and can be deleted
    RemoveLine { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Listing index, which is also the source line
    pub line: usize,
    /// Column span within the line
    pub begin: usize,
    pub end: usize,
    pub severity: Severity,
    pub message: String,
    /// Id of the rule that produced it
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl Diagnostic {
    pub fn new(rule: &str, severity: Severity, line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            begin: 0,
            end: 0,
            severity,
            message: message.into(),
            rule: rule.to_string(),
            suggestion: None,
        }
    }

    pub fn error(rule: &str, line: usize, message: impl Into<String>) -> Self {
        Self::new(rule, Severity::Error, line, message)
    }

    pub fn warning(rule: &str, line: usize, message: impl Into<String>) -> Self {
        Self::new(rule, Severity::Warning, line, message)
    }

    pub fn with_span(mut self, begin: usize, end: usize) -> Self {
        self.begin = begin;
        self.end = end;
        self
    }

    /// Span covering the whole rendered line.
    pub fn spanning(self, text: &str) -> Self {
        self.with_span(0, text.len())
    }

    /// Span of the first occurrence of `needle` in the rendered line, whole
    /// line when absent.
    pub fn spanning_word(self, text: &str, needle: &str) -> Self {
        match text.find(needle) {
            Some(begin) => self.with_span(begin, begin + needle.len()),
            None => self.spanning(text),
        }
    }

    /// Mark the line as removable.
    pub fn removable(mut self) -> Self {
        self.suggestion = Some(Suggestion::RemoveLine { line: self.line });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {} [{}]",
            self.line, self.begin, self.severity, self.message, self.rule
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// Execution mode checked by `mode-availability`; unchecked when unset
    pub mode: Option<Mode>,
    /// Rule ids to skip
    pub disabled: Vec<String>,
}

impl LintConfig {
    pub fn is_enabled(&self, rule: &str) -> bool {
        !self.disabled.iter().any(|id| id == rule)
    }
}

/// Everything a rule may look at. Rules never mutate the listing.
pub struct LintContext<'a> {
    pub listing: &'a Listing,
    pub catalog: &'a Catalog,
    pub config: &'a LintConfig,
}

/// One independent lint check.
pub trait LintRule: Send + Sync {
    /// Rule id, as reported in diagnostics and accepted by `LintConfig::disabled`
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &LintContext) -> Vec<Diagnostic>;
}

/// Run every enabled rule and concatenate the diagnostics, sorted by line.
pub fn run_rules(ctx: &LintContext, rules: &[Box<dyn LintRule>]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for rule in rules {
        if !ctx.config.is_enabled(rule.name()) {
            continue;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| rule.check(ctx))) {
            Ok(found) => {
                debug!(rule = rule.name(), count = found.len(), "lint rule finished");
                diagnostics.extend(found);
            }
            Err(cause) => {
                let reason = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(rule = rule.name(), %reason, "lint rule failed");
            }
        }
    }
    diagnostics.sort_by_key(|d| d.line);
    diagnostics
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "note",
    }
}

/// Build a SARIF 2.1.0 log. Lines and columns are 1-based in SARIF.
pub fn generate_sarif(diagnostics: &[Diagnostic], filename: &str) -> serde_json::Value {
    let rule_ids: Vec<&str> = diagnostics
        .iter()
        .map(|d| d.rule.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let rules: Vec<_> = rule_ids
        .iter()
        .map(|id| json!({ "id": id, "shortDescription": { "text": id } }))
        .collect();

    let results: Vec<_> = diagnostics
        .iter()
        .map(|d| {
            let index = rule_ids.iter().position(|id| *id == d.rule).unwrap_or(0);
            json!({
                "ruleId": d.rule,
                "ruleIndex": index,
                "level": sarif_level(d.severity),
                "message": { "text": d.message },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": filename },
                        "region": {
                            "startLine": d.line + 1,
                            "startColumn": d.begin + 1,
                            "endColumn": d.end.max(d.begin) + 1,
                        }
                    }
                }]
            })
        })
        .collect();

    json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "tealc",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                }
            },
            "results": results,
            "invocations": [{
                "executionSuccessful": !diagnostics.iter().any(Diagnostic::is_error)
            }]
        }]
    })
}
