//! Item scripts: the body of a `define` block, parsed into directives.
//!
//! An item script is a sequence of lines. Each non-empty, non-comment line is
//! either a `set <name> <value>` variable assignment or a command whose
//! arguments are kept as raw tokens for the item to interpret. Multiline
//! variables are written as
//!
//! ```text
//! __condition__
//! [response] = "space"
//! __end__
//! ```

use super::command::{parse_cmd, split, ParseError};
use super::value::Value;

/// One directive of an item script.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `set <name> <value>`
    Set { name: String, value: Value },
    /// `__name__ … __end__`
    Multiline { name: String, value: String },
    /// Any other command; `args` keep their quotes.
    Command { name: String, args: Vec<String> },
}

/// A script line that could not be parsed (1-based line number).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {error}")]
pub struct LineError {
    pub line: usize,
    pub error: ParseError,
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse an item script. Bad lines are reported and skipped; everything else
/// is returned with its 1-based line number.
pub fn parse_script(src: &str) -> (Vec<(usize, Directive)>, Vec<LineError>) {
    let mut directives = Vec::new();
    let mut errors = Vec::new();
    let mut lines = src.lines().enumerate();

    while let Some((idx, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = multiline_start(line) {
            let body: Vec<&str> = lines
                .by_ref()
                .map(|(_, l)| l)
                .take_while(|l| l.trim() != "__end__")
                .collect();
            directives.push((
                idx + 1,
                Directive::Multiline { name: name.to_owned(), value: body.join("\n") },
            ));
            continue;
        }
        match parse_line(line) {
            Ok(d) => directives.push((idx + 1, d)),
            Err(error) => errors.push(LineError { line: idx + 1, error }),
        }
    }
    (directives, errors)
}

/// Parse a single non-empty script line.
pub fn parse_line(line: &str) -> Result<Directive, ParseError> {
    let mut tokens = split(line)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    if tokens[0] == "set" {
        let cmd = parse_cmd(line)?;
        let mut args = cmd.positional.into_iter();
        return match (args.next(), args.next()) {
            (Some(name), Some(value)) => Ok(Directive::Set { name: name.to_string(), value }),
            _ => Err(ParseError::MissingArgument("set".into())),
        };
    }
    let name = tokens.remove(0);
    Ok(Directive::Command { name, args: tokens })
}

/// Extract every multiline variable from a script.
pub fn parse_multiline_vars(src: &str) -> Vec<(String, String)> {
    parse_script(src)
        .0
        .into_iter()
        .filter_map(|(_, d)| match d {
            Directive::Multiline { name, value } => Some((name, value)),
            _ => None,
        })
        .collect()
}

/// `__name__` opens a multiline variable; `__end__` never does.
fn multiline_start(line: &str) -> Option<&str> {
    let name = line.strip_prefix("__")?.strip_suffix("__")?;
    (!name.is_empty() && name != "end" && !name.contains(char::is_whitespace)).then_some(name)
}

// ── Small utilities ───────────────────────────────────────────────────────────

/// Remove the leading whitespace common to all non-blank lines.
pub fn dedent(src: &str) -> String {
    let indent = src
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| &l[..l.len() - l.trim_start().len()])
        .reduce(|common, ind| {
            let n = common
                .char_indices()
                .zip(ind.chars())
                .take_while(|((_, a), b)| a == b)
                .last()
                .map_or(0, |((i, a), _)| i + a.len_utf8());
            &common[..n]
        })
        .unwrap_or("");
    if indent.is_empty() {
        return src.to_owned();
    }
    src.lines()
        .map(|l| l.strip_prefix(indent).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
