//! Experiment file parser.
//!
//! An experiment file is a list of top-level variable settings followed by
//! item definitions:
//!
//! | Construct | Action |
//! |-----------|--------|
//! | `---` … `---` at the top | front matter, ignored |
//! | `set <name> <value>` | set an experiment variable |
//! | `__name__` … `__end__` | set a multiline experiment variable |
//! | `define <type> <name>` + indented block | define an item; the block is its script |
//! | Lines starting with `#` | comment, ignored |
//!
//! Problems are reported per line and never abort loading.

use std::path::Path;

use crate::loop_item::LoopItem;
use crate::script::command::{remove_quotes, split};
use crate::script::stmt::{dedent, parse_script, Directive};
use crate::script::value::Value;
use crate::var::{SharedStore, VarStore};

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading an experiment file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// One `define` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDef {
    pub kind: String,
    pub name: String,
    /// Dedented body.
    pub script: String,
    /// Line of the `define` header.
    pub line: usize,
}

/// Parsed experiment: top-level variables and item definitions.
#[derive(Debug, Default)]
pub struct Experiment {
    pub vars: Vec<(String, Value)>,
    pub items: Vec<ItemDef>,
}

impl Experiment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse experiment text, collecting per-line errors.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut exp = Experiment::new();
        let mut errors = Vec::new();
        let lines: Vec<&str> = s.lines().collect();
        // Top-level text with front matter and item bodies blanked out, so
        // that line numbers stay aligned with the file.
        let mut top: Vec<&str> = Vec::with_capacity(lines.len());
        let mut i = 0;

        if lines.first().map(|l| l.trim()) == Some("---") {
            top.push("");
            i = 1;
            while i < lines.len() {
                top.push("");
                i += 1;
                if lines[i - 1].trim() == "---" {
                    break;
                }
            }
        }

        while i < lines.len() {
            let line = lines[i];
            if !line.starts_with("define") || !line[6..].starts_with(char::is_whitespace) {
                top.push(line);
                i += 1;
                continue;
            }
            let header = i + 1;
            top.push("");
            i += 1;
            let start = i;
            while i < lines.len() && (lines[i].trim().is_empty() || lines[i].starts_with(char::is_whitespace)) {
                top.push("");
                i += 1;
            }
            match parse_define(line) {
                Ok((kind, name)) => exp.items.push(ItemDef {
                    kind,
                    name,
                    script: dedent(&lines[start..i].join("\n")),
                    line: header,
                }),
                Err(message) => errors.push(ConfigError { line: header, message }),
            }
        }

        let (directives, line_errors) = parse_script(&top.join("\n"));
        for e in line_errors {
            errors.push(ConfigError { line: e.line, message: e.error.to_string() });
        }
        for (line, d) in directives {
            match d {
                Directive::Set { name, value } => exp.vars.push((name, value)),
                Directive::Multiline { name, value } => exp.vars.push((name, Value::Str(value))),
                Directive::Command { name, .. } => errors.push(ConfigError {
                    line,
                    message: format!("unexpected top-level command: {name}"),
                }),
            }
        }
        (exp, errors)
    }

    /// Load from a file path.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let src = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&src))
    }

    pub fn item(&self, name: &str) -> Option<&ItemDef> {
        self.items.iter().find(|d| d.name == name)
    }

    pub fn loops(&self) -> impl Iterator<Item = &ItemDef> {
        self.items.iter().filter(|d| d.kind == "loop")
    }

    /// A fresh experiment store holding the top-level variables.
    pub fn store(&self) -> SharedStore {
        let mut store = VarStore::new();
        for (name, value) in &self.vars {
            store.set(name.clone(), value.clone());
        }
        store.shared()
    }

    /// Build the loop item called `name` against `store`. Script errors are
    /// reported with file line numbers.
    pub fn build_loop(&self, name: &str, store: &SharedStore) -> Option<(LoopItem, Vec<ConfigError>)> {
        let def = self.loops().find(|d| d.name == name)?;
        let (item, errors) = LoopItem::from_script(&def.name, &def.script, store);
        let errors = errors
            .into_iter()
            .map(|e| ConfigError { line: def.line + e.line, message: e.error.to_string() })
            .collect();
        Some((item, errors))
    }
}

// ── define ────────────────────────────────────────────────────────────────────

fn parse_define(line: &str) -> Result<(String, String), String> {
    let tokens = split(line).map_err(|e| e.to_string())?;
    match tokens.as_slice() {
        [_, kind, name] => Ok((remove_quotes(kind), remove_quotes(name))),
        _ => Err(format!("malformed item definition: {}", line.trim())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
