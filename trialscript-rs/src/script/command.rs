//! Script command lines: tokenizing, parsing and serializing.
//!
//! A command line looks like
//!
//! ```text
//! draw fixdot color="#ff000b" show_if="[correct] = 0" x=0 y=0
//! ```
//!
//! i.e. a name, positional arguments and `key=value` keyword arguments.
//! [`split`] keeps quotes on its tokens so callers can tell `"a=b"` (a quoted
//! positional) from `a=b` (a keyword); [`remove_quotes`] strips them and
//! collapses the escapes, exactly once per parse.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::value::Value;

/// Malformed command line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unterminated quote in: {0}")]
    UnterminatedQuote(String),
    #[error("{0}: missing argument")]
    MissingArgument(String),
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub name: String,
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Command { name: name.into(), ..Default::default() }
    }

    pub fn arg(mut self, v: impl Into<Value>) -> Self {
        self.positional.push(v.into());
        self
    }

    pub fn kw(mut self, key: impl Into<String>, v: impl Into<Value>) -> Self {
        self.keywords.push((key.into(), v.into()));
        self
    }

    /// Value of the last keyword argument called `key`.
    pub fn keyword(&self, key: &str) -> Option<&Value> {
        self.keywords.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&create_cmd(self))
    }
}

// ── Tokenizing ────────────────────────────────────────────────────────────────

/// Split a line on whitespace outside quotes. Quotes and escapes are kept in
/// the tokens.
///
/// A quote opens a quoted run only at the start of a token or right after
/// `=`, so apostrophes inside bare words are ordinary characters.
pub fn split(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                cur.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            None => {
                if (c == '"' || c == '\'') && (cur.is_empty() || cur.ends_with('=')) {
                    quote = Some(c);
                }
                cur.push(c);
            }
        }
    }
    if quote.is_some() {
        return Err(ParseError::UnterminatedQuote(line.to_owned()));
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    Ok(tokens)
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("keyword pattern is valid"))
}

/// Parse a command line into name, positional and keyword arguments.
///
/// Unquoted numeric arguments become numbers; quoted ones stay strings.
pub fn parse_cmd(line: &str) -> Result<Command, ParseError> {
    let mut tokens = split(line)?.into_iter();
    let name = tokens.next().ok_or(ParseError::Empty)?;
    let mut cmd = Command::new(remove_quotes(&name));
    for tok in tokens {
        match keyword_re().captures(&tok) {
            Some(caps) => cmd.keywords.push((caps[1].to_owned(), arg_value(&caps[2]))),
            None => cmd.positional.push(arg_value(&tok)),
        }
    }
    Ok(cmd)
}

fn arg_value(raw: &str) -> Value {
    if is_quoted(raw) {
        Value::Str(remove_quotes(raw))
    } else {
        Value::from_script(raw)
    }
}

/// Serialize a command; the inverse of [`parse_cmd`] up to canonical quoting.
pub fn create_cmd(cmd: &Command) -> String {
    let mut out = cmd.name.clone();
    for v in &cmd.positional {
        out.push(' ');
        out.push_str(&format_arg(v));
    }
    for (k, v) in &cmd.keywords {
        out.push(' ');
        out.push_str(k);
        out.push('=');
        out.push_str(&format_arg(v));
    }
    out
}

fn format_arg(v: &Value) -> String {
    match v {
        Value::Int(n) => n.to_string(),
        Value::Float(x) => format_float(*x),
        Value::Str(s) if is_bare_word(s) && Value::parse_number(s).is_none() => s.clone(),
        Value::Str(s) => add_quotes(s),
        other => add_quotes(&other.to_string()),
    }
}

/// Very small and very large magnitudes use exponent notation, so that
/// `-9e-9` reads back as written.
pub fn format_float(x: f64) -> String {
    let a = x.abs();
    if a != 0.0 && !(1e-6..1e21).contains(&a) {
        format!("{x:e}")
    } else {
        Value::Float(x).to_string()
    }
}

fn is_bare_word(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ',' | ':' | '/' | '+' | '%' | '@'))
}

// ── Quote helpers ─────────────────────────────────────────────────────────────

fn is_quoted(s: &str) -> bool {
    let mut chars = s.chars();
    match (chars.next(), chars.next_back()) {
        (Some(a), Some(b)) => (a == '"' || a == '\'') && a == b,
        _ => false,
    }
}

/// Strip one level of matching surrounding quotes and unescape `\\` and the
/// quote character. Unquoted text is returned as is.
pub fn remove_quotes(s: &str) -> String {
    if !is_quoted(s) {
        return s.to_owned();
    }
    let q = s.chars().next().unwrap_or('"');
    let inner = &s[q.len_utf8()..s.len() - q.len_utf8()];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\\' || next == q {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Double-quote `s`, escaping backslashes and double quotes.
pub fn add_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Collapse escape backslashes: `\\` becomes `\` and `\"` becomes `"`.
pub fn strip_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\\' || next == '"' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
