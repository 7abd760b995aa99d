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

//! Line-oriented source reader.
//!
//! Every source line becomes exactly one `Expr` (blank and comment lines
//! included), so a compiled listing's op index is the source line number.
//! Lines that fail to parse are reported and replaced by `Expr::Empty`.

use crate::ast::{BranchKind, ConstForm, Expr};
use crate::diagnostic::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{op} expects {expected} immediate(s), found {found}")]
    Arity {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("Invalid integer: {0}")]
    BadInteger(String),
    #[error("Invalid byte constant: {0}")]
    BadBytes(String),
    #[error("Invalid label: {0:?}")]
    BadLabel(String),
    #[error("Invalid pragma: {0}")]
    BadPragma(String),
    #[error("Unterminated string literal")]
    UnterminatedString,
}

/// Parsed program plus the per-line problems found on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    pub exprs: Vec<Expr>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

pub fn parse(source: &str) -> ParseOutput {
    let mut out = ParseOutput::default();
    for (line, text) in source.lines().enumerate() {
        match parse_line(text) {
            Ok(expr) => out.exprs.push(expr),
            Err(err) => {
                out.diagnostics
                    .push(Diagnostic::error("parse", line, err.to_string()).spanning(text));
                out.exprs.push(Expr::Empty);
            }
        }
    }
    out
}

/// Parse one source line.
pub fn parse_line(text: &str) -> Result<Expr, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Expr::Empty);
    }
    if let Some(comment) = trimmed.strip_prefix("//") {
        return Ok(Expr::Comment(comment.to_string()));
    }
    if trimmed.starts_with("#pragma") {
        return parse_pragma(trimmed);
    }

    let tokens = tokenize(trimmed)?;
    let Some((&head, args)) = tokens.split_first() else {
        return Ok(Expr::Empty);
    };

    if let Some(name) = head.strip_suffix(':') {
        if !args.is_empty() {
            return Err(ParseError::Arity {
                op: head.to_string(),
                expected: 0,
                found: args.len(),
            });
        }
        return label_name(name).map(|name| Expr::Label(name.to_string()));
    }

    let expr = match head {
        "int" | "pushint" => {
            let raw = exactly(head, args, 1)?[0];
            let named = match head {
                "int" => named_int(raw),
                _ => None,
            };
            Expr::Int {
                form: const_form(head),
                value: match named {
                    Some(value) => value,
                    None => parse_int(raw)?,
                },
            }
        }
        "byte" | "pushbytes" => Expr::Bytes {
            form: const_form(head),
            value: parse_bytes_literal(exactly(head, args, 1)?[0])?,
        },
        "b" | "bz" | "bnz" => {
            let kind = match head {
                "b" => BranchKind::Always,
                "bz" => BranchKind::IfZero,
                _ => BranchKind::IfNonZero,
            };
            let target = label_name(exactly(head, args, 1)?[0])?.to_string();
            Expr::Branch { kind, target }
        }
        "callsub" => Expr::Call(label_name(exactly(head, args, 1)?[0])?.to_string()),
        "switch" | "match" => {
            let targets = args
                .iter()
                .map(|arg| label_name(arg).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            if head == "switch" {
                Expr::Switch(targets)
            } else {
                Expr::Match(targets)
            }
        }
        "retsub" => nullary(head, args, Expr::Retsub)?,
        "err" => nullary(head, args, Expr::Err)?,
        "return" => nullary(head, args, Expr::Return)?,
        "proto" => {
            let args = exactly(head, args, 2)?;
            Expr::Proto {
                args: parse_small(args[0])?,
                results: parse_small(args[1])?,
            }
        }
        "load" => Expr::Load(parse_small(exactly(head, args, 1)?[0])?),
        "store" => Expr::Store(parse_small(exactly(head, args, 1)?[0])?),
        "frame_dig" => Expr::FrameDig(parse_offset(exactly(head, args, 1)?[0])?),
        "frame_bury" => Expr::FrameBury(parse_offset(exactly(head, args, 1)?[0])?),
        _ => Expr::Instr {
            name: head.to_string(),
            immediates: args.iter().map(|arg| arg.to_string()).collect(),
        },
    };
    Ok(expr)
}

fn parse_pragma(text: &str) -> Result<Expr, ParseError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    match words.as_slice() {
        ["#pragma", "version", version] => version
            .parse::<u8>()
            .map(|version| Expr::Pragma { version })
            .map_err(|_| ParseError::BadPragma(text.to_string())),
        _ => Err(ParseError::BadPragma(text.to_string())),
    }
}

fn const_form(head: &str) -> ConstForm {
    if head.starts_with("push") {
        ConstForm::Push
    } else {
        ConstForm::Pseudo
    }
}

fn exactly<'a, 'b>(
    op: &str,
    args: &'b [&'a str],
    count: usize,
) -> Result<&'b [&'a str], ParseError> {
    if args.len() != count {
        return Err(ParseError::Arity {
            op: op.to_string(),
            expected: count,
            found: args.len(),
        });
    }
    Ok(args)
}

fn nullary(op: &str, args: &[&str], expr: Expr) -> Result<Expr, ParseError> {
    exactly(op, args, 0).map(|_| expr)
}

fn label_name(name: &str) -> Result<&str, ParseError> {
    let valid = !name.is_empty()
        && !name.starts_with('"')
        && name
            .chars()
            .all(|c| !c.is_whitespace() && c != ':' && !c.is_control());
    if valid {
        Ok(name)
    } else {
        Err(ParseError::BadLabel(name.to_string()))
    }
}

/// Decimal, `0x` hex or `0o` octal.
pub fn parse_int(raw: &str) -> Result<u64, ParseError> {
    let cleaned = raw.replace('_', "");
    let hex = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"));
    let parsed = if let Some(hex) = hex {
        u64::from_str_radix(hex, 16)
    } else if let Some(octal) = cleaned.strip_prefix("0o") {
        u64::from_str_radix(octal, 8)
    } else {
        cleaned.parse::<u64>()
    };
    parsed.map_err(|_| ParseError::BadInteger(raw.to_string()))
}

/// Transaction type and on-completion names accepted by the `int` pseudo-op.
pub fn named_int(name: &str) -> Option<u64> {
    let value = match name {
        "unknown" => 0,
        "pay" => 1,
        "keyreg" => 2,
        "acfg" => 3,
        "axfer" => 4,
        "afrz" => 5,
        "appl" => 6,
        "NoOp" => 0,
        "OptIn" => 1,
        "CloseOut" => 2,
        "ClearState" => 3,
        "UpdateApplication" => 4,
        "DeleteApplication" => 5,
        _ => return None,
    };
    Some(value)
}

fn parse_small(raw: &str) -> Result<u8, ParseError> {
    raw.parse::<u8>()
        .map_err(|_| ParseError::BadInteger(raw.to_string()))
}

fn parse_offset(raw: &str) -> Result<i8, ParseError> {
    raw.parse::<i8>()
        .map_err(|_| ParseError::BadInteger(raw.to_string()))
}

/// `0x`-prefixed hex or a double-quoted string with `\n \t \r \\ \" \xNN`
/// escapes.
pub fn parse_bytes_literal(raw: &str) -> Result<Vec<u8>, ParseError> {
    if let Some(digits) = raw.strip_prefix("0x") {
        return hex::decode(digits).map_err(|_| ParseError::BadBytes(raw.to_string()));
    }
    let inner = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| raw.len() >= 2)
        .ok_or_else(|| ParseError::BadBytes(raw.to_string()))?;

    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('\\') => out.push(b'\\'),
            Some('"') => out.push(b'"'),
            Some('x') => {
                let digits: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&digits, 16)
                    .map_err(|_| ParseError::BadBytes(raw.to_string()))?;
                out.push(byte);
            }
            _ => return Err(ParseError::BadBytes(raw.to_string())),
        }
    }
    Ok(out)
}

/// Split on whitespace, keeping quoted strings (quotes included) as single
/// tokens and dropping a trailing `//` comment.
fn tokenize(text: &str) -> Result<Vec<&str>, ParseError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if text[i..].starts_with("//") {
            break;
        }
        let start = i;
        if bytes[i] == b'"' {
            i += 1;
            loop {
                match bytes.get(i) {
                    None => return Err(ParseError::UnterminatedString),
                    Some(b'\\') => i += 2,
                    Some(b'"') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
        } else {
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
        }
        tokens.push(&text[start..i.min(bytes.len())]);
    }
    Ok(tokens)
}
