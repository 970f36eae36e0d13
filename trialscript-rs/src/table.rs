//! File pool and CSV loop tables.
//!
//! Loop items with `source = file` read their table from a CSV file in the
//! experiment's file pool. The first record is the header; empty lines are
//! skipped; fields may be quoted with `"` and use `""` for a literal quote.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::matrix::{Cell, Matrix, ValidationError};
use crate::script::value::Value;

/// Malformed CSV input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CsvError {
    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },
    #[error("line {line}: expected {expected} fields, found {found}")]
    RecordLength { line: usize, expected: usize, found: usize },
    #[error("missing header row")]
    NoHeader,
    #[error(transparent)]
    Table(#[from] ValidationError),
}

// ── File pool ─────────────────────────────────────────────────────────────────

/// Named text files available to the experiment.
#[derive(Debug, Default, Clone)]
pub struct FilePool {
    files: HashMap<String, String>,
}

impl FilePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<String>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load every UTF-8 file directly inside `dir`. Subdirectories and
    /// non-text files are skipped.
    pub fn load_dir(dir: &Path) -> io::Result<Self> {
        let mut pool = FilePool::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match fs::read_to_string(entry.path()) {
                Ok(data) => pool.insert(name, data),
                Err(e) => log::debug!("file pool: skipping {name}: {e}"),
            }
        }
        log::debug!("file pool: loaded {} files from {}", pool.len(), dir.display());
        Ok(pool)
    }
}

// ── CSV ───────────────────────────────────────────────────────────────────────

/// Parse CSV text into a loop table. Numeric fields become numbers.
pub fn parse_csv(text: &str) -> Result<Matrix, CsvError> {
    let mut records = read_records(text)?.into_iter();
    let (_, header) = records.next().ok_or(CsvError::NoHeader)?;
    let mut rows = Vec::new();
    for (line, fields) in records {
        if fields.len() != header.len() {
            return Err(CsvError::RecordLength { line, expected: header.len(), found: fields.len() });
        }
        rows.push(fields.iter().map(|f| Cell::Literal(Value::from_script(f))).collect());
    }
    Ok(Matrix::from_rows(header, rows)?)
}

/// Split CSV text into records, each tagged with the line it starts on.
fn read_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, CsvError> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut line = 1;
    let mut record_line = 1;
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                end_record(&mut records, &mut fields, &mut field, record_line);
                line += 1;
                record_line = line;
                at_field_start = true;
            }
            _ => {
                field.push(c);
                at_field_start = false;
            }
        }
    }
    if in_quotes {
        return Err(CsvError::UnterminatedQuote { line: record_line });
    }
    end_record(&mut records, &mut fields, &mut field, record_line);
    Ok(records)
}

fn end_record(
    records: &mut Vec<(usize, Vec<String>)>,
    fields: &mut Vec<String>,
    field: &mut String,
    line: usize,
) {
    let blank = fields.is_empty() && field.trim().is_empty();
    fields.push(std::mem::take(field));
    let record = std::mem::take(fields);
    if !blank {
        records.push((line, record));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
