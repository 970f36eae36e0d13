//! Conditions such as `run_if`, `show_if` and `break_if`.
//!
//! The notation is a thin layer over expressions: `[name]` refers to a
//! variable, a single `=` compares, and bare words next to a comparison are
//! string literals. [`compile_cond`] rewrites it into expression source:
//!
//! ```text
//! [cue_side] = left          →  var.cue_side == "left"
//! ("a b" = ab) or (x != 10)  →  ("a b" == "ab") or ("x" != 10)
//! =var.width > 100           →  var.width > 100
//! ```

use super::expr::{eval_str, EvalContext, EvalError};
use super::value::Value;

/// Condition text that cannot be compiled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unbalanced parentheses in condition: {0}")]
    UnbalancedParens(String),
    #[error("unclosed bracket in condition: {0}")]
    UnclosedBracket(String),
}

/// A compiled condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    Never,
    /// Expression source for the evaluator.
    Script(String),
}

impl Condition {
    /// Evaluate to a boolean using truthiness of the result.
    pub fn eval(&self, ctx: &mut dyn EvalContext) -> Result<bool, EvalError> {
        match self {
            Condition::Always => Ok(true),
            Condition::Never => Ok(false),
            Condition::Script(src) => eval_str(src, ctx).map(|v| v.as_bool()),
        }
    }

    /// True only when the result is the boolean `true`; other truthy values
    /// such as `1` or `"yes"` do not count.
    pub fn holds(&self, ctx: &mut dyn EvalContext) -> Result<bool, EvalError> {
        match self {
            Condition::Always => Ok(true),
            Condition::Never => Ok(false),
            Condition::Script(src) => eval_str(src, ctx).map(|v| v == Value::Bool(true)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Space(String),
    Quoted(String),
    /// Bracketed text that is not a variable name, kept as a string.
    Literal(String),
    Var(String),
    Op(&'static str),
    LParen,
    RParen,
    Word(String),
}

/// Compile condition text into a [`Condition`].
pub fn compile_cond(text: &str) -> Result<Condition, CompileError> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("always") {
        return Ok(Condition::Always);
    }
    if trimmed.eq_ignore_ascii_case("never") {
        return Ok(Condition::Never);
    }
    if let Some(rest) = trimmed.strip_prefix('=') {
        return Ok(Condition::Script(rest.trim().to_owned()));
    }

    let toks = tokenize(trimmed)?;
    let mut depth = 0i32;
    for t in &toks {
        match t {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(CompileError::UnbalancedParens(text.to_owned()));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(CompileError::UnbalancedParens(text.to_owned()));
    }

    let mut out = String::with_capacity(trimmed.len() + 16);
    for (i, t) in toks.iter().enumerate() {
        match t {
            Tok::Space(s) | Tok::Quoted(s) => out.push_str(s),
            Tok::Var(name) => {
                out.push_str("var.");
                out.push_str(name);
            }
            Tok::Literal(s) => {
                out.push('"');
                for c in s.chars() {
                    if matches!(c, '"' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            Tok::Op(op) => out.push_str(op),
            Tok::LParen => out.push('('),
            Tok::RParen => out.push(')'),
            Tok::Word(w) => {
                if next_to_op(&toks, i) && !is_literal_word(w) {
                    out.push('"');
                    out.push_str(w);
                    out.push('"');
                } else {
                    out.push_str(w);
                }
            }
        }
    }
    Ok(Condition::Script(out))
}

/// Words that must not be quoted even next to an operator.
fn is_literal_word(w: &str) -> bool {
    matches!(w, "and" | "or" | "not") || Value::parse_number(w).is_some()
}

fn next_to_op(toks: &[Tok], i: usize) -> bool {
    let is_op = |t: &Tok| matches!(t, Tok::Op(_));
    let before = toks[..i].iter().rev().find(|t| !matches!(t, Tok::Space(_)));
    let after = toks[i + 1..].iter().find(|t| !matches!(t, Tok::Space(_)));
    before.is_some_and(is_op) || after.is_some_and(is_op)
}

fn tokenize(text: &str) -> Result<Vec<Tok>, CompileError> {
    let cs: Vec<char> = text.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < cs.len() {
        let c = cs[i];
        if c.is_whitespace() {
            let start = i;
            while i < cs.len() && cs[i].is_whitespace() {
                i += 1;
            }
            toks.push(Tok::Space(cs[start..i].iter().collect()));
            continue;
        }
        match c {
            '"' | '\'' => {
                let start = i;
                let mut closed = false;
                i += 1;
                while i < cs.len() {
                    match cs[i] {
                        '\\' => i += 2,
                        q if q == c => {
                            i += 1;
                            closed = true;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                let mut quoted: String = cs[start..i.min(cs.len())].iter().collect();
                if !closed {
                    log::debug!("closing unterminated quote in condition: {text}");
                    if i > cs.len() {
                        quoted.push('\\');
                    }
                    quoted.push(c);
                }
                toks.push(Tok::Quoted(quoted));
            }
            '[' => {
                let close = cs[i..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| CompileError::UnclosedBracket(text.to_owned()))?;
                let name: String = cs[i + 1..i + close].iter().collect();
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    toks.push(Tok::Literal(cs[i..=i + close].iter().collect()));
                } else {
                    toks.push(Tok::Var(name));
                }
                i += close + 1;
            }
            ']' => return Err(CompileError::UnclosedBracket(text.to_owned())),
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = cs.get(i + 1).copied();
                let (op, len) = match (c, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('=', _) => ("==", 1),
                    ('!', Some('=')) => ("!=", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('<', Some('>')) => ("!=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    _ => {
                        toks.push(Tok::Word("not".into()));
                        toks.push(Tok::Space(" ".into()));
                        i += 1;
                        continue;
                    }
                };
                toks.push(Tok::Op(op));
                i += len;
            }
            _ => {
                let start = i;
                while i < cs.len() && !is_delim(cs[i]) {
                    i += 1;
                }
                toks.push(Tok::Word(cs[start..i].iter().collect()));
            }
        }
    }
    Ok(toks)
}

fn is_delim(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '[' | ']' | '(' | ')' | '=' | '!' | '<' | '>')
}

// ── Tests ─────────────────────────────────────────────────────────────────────
