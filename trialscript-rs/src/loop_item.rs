//! Loop items: a table of cycles, a pipeline of table operations, and the
//! step-driven controller that walks through the cycles.
//!
//! A loop is defined by an item script:
//!
//! ```text
//! set repeat 2
//! set order random
//! set break_if "[correct] = 0"
//! setcycle 0 cue left
//! setcycle 1 cue right
//! setcycle 0 soa "=100 * 2"
//! shuffle_horiz cue
//! run trial_sequence
//! ```
//!
//! Each call to [`LoopItem::step`] moves at most one cycle forward: the first
//! call of a run builds the cycle list, every call applies one row to the
//! experiment variables, and the loop finishes when the list is exhausted or
//! the break-if condition holds.

use std::collections::VecDeque;

use rand::seq::SliceRandom;

use crate::matrix::{self, Cell, Matrix, ValidationError, MAX_ROWS};
use crate::script::command::remove_quotes;
use crate::script::cond::{compile_cond, CompileError, Condition};
use crate::script::expr::{CompiledExpr, EvalError};
use crate::script::stmt::{parse_script, Directive, LineError};
use crate::script::value::Value;
use crate::table::{parse_csv, FilePool};
use crate::var::{SharedStore, VarStore, Workspace};

// ── Errors ────────────────────────────────────────────────────────────────────

/// A loop that cannot be prepared from its configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ConfigurationError(pub String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Condition(#[from] CompileError),
}

// ── Operations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    FullFactorial,
    Shuffle,
    ShuffleHoriz,
    Slice,
    Sort,
    SortBy,
    Reverse,
    Roll,
    Weight,
}

impl OpKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "fullfactorial" => OpKind::FullFactorial,
            "shuffle" => OpKind::Shuffle,
            "shuffle_horiz" => OpKind::ShuffleHoriz,
            "slice" => OpKind::Slice,
            "sort" => OpKind::Sort,
            "sortby" => OpKind::SortBy,
            "reverse" => OpKind::Reverse,
            "roll" => OpKind::Roll,
            "weight" => OpKind::Weight,
            _ => return None,
        })
    }
}

/// A table operation with its raw arguments, which are interpolated just
/// before the operation is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub args: Vec<String>,
}

impl Operation {
    pub fn apply(&self, m: &Matrix, ws: &mut Workspace) -> Result<Matrix, LoopError> {
        let mut args = Vec::with_capacity(self.args.len());
        for raw in &self.args {
            args.push(remove_quotes(&ws.eval_text(&remove_quotes(raw))?.to_string()));
        }
        let first = |what: &str| {
            args.first()
                .map(String::as_str)
                .ok_or_else(|| ValidationError::new(format!("missing {what} argument")))
        };
        let out = match self.kind {
            OpKind::FullFactorial => matrix::fullfactorial(m)?,
            OpKind::Shuffle => ws.with_rng(|rng| matrix::shuffle_vert(m, &args, rng))?,
            OpKind::ShuffleHoriz => ws.with_rng(|rng| matrix::shuffle_horiz(m, &args, rng))?,
            OpKind::Slice => {
                let from = matrix::int_arg(first("from")?, "from")?;
                let to = match args.get(1) {
                    Some(a) => Some(matrix::int_arg(a, "to")?),
                    None => None,
                };
                matrix::slice(m, from, to)
            }
            OpKind::Sort => matrix::sort_col(m, first("column")?)?,
            OpKind::SortBy => matrix::sort_by(m, first("column")?)?,
            OpKind::Reverse => matrix::reverse_rows(m, &args)?,
            OpKind::Roll => {
                let steps = matrix::int_arg(first("steps")?, "steps")?;
                matrix::roll(m, steps, &args[1..])?
            }
            OpKind::Weight => matrix::weight(m, first("column")?)?,
        };
        Ok(out)
    }
}

// ── Loop item ─────────────────────────────────────────────────────────────────

/// Outcome of one [`LoopItem::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Run the child item for this cycle.
    Run {
        item: String,
        cycle: usize,
        applied: Vec<(String, Value)>,
    },
    /// The loop has finished.
    Done,
}

#[derive(Debug)]
struct RunState {
    matrix: Matrix,
    cycles: VecDeque<usize>,
    index: Option<usize>,
}

#[derive(Debug)]
pub struct LoopItem {
    name: String,
    vars: SharedStore,
    table: Matrix,
    operations: Vec<Operation>,
    state: Option<RunState>,
}

impl LoopItem {
    /// An empty loop whose variables fall back to `experiment`.
    pub fn new(name: impl Into<String>, experiment: &SharedStore) -> Self {
        let item = LoopItem {
            name: name.into(),
            vars: VarStore::with_parent(experiment).shared(),
            table: Matrix::default(),
            operations: Vec::new(),
            state: None,
        };
        item.reset();
        item
    }

    /// Build a loop from its item script. Unparseable lines are returned and
    /// otherwise ignored.
    pub fn from_script(
        name: impl Into<String>,
        script: &str,
        experiment: &SharedStore,
    ) -> (Self, Vec<LineError>) {
        let mut item = LoopItem::new(name, experiment);
        let (directives, errors) = parse_script(script);
        for (line, d) in directives {
            item.apply_directive(line, d);
        }
        (item, errors)
    }

    /// Restore default settings and clear the table and operations.
    fn reset(&self) {
        let mut vars = self.vars.borrow_mut();
        vars.set("repeat", 1i64);
        vars.set("order", "random");
        vars.set("item", "");
        vars.set("break_if", "never");
        vars.set("source", "table");
        vars.set("source_file", "");
        vars.set("skip", 0i64);
        vars.set("offset", "no");
    }

    fn apply_directive(&mut self, line: usize, d: Directive) {
        match d {
            Directive::Set { name, value } => self.vars.borrow_mut().set(name, value),
            Directive::Multiline { name, value } => self.vars.borrow_mut().set(name, value),
            Directive::Command { name, args } => match name.as_str() {
                "run" => {
                    if let Some(item) = args.first() {
                        self.vars.borrow_mut().set("item", remove_quotes(item));
                    }
                }
                "setcycle" => self.setcycle(line, &args),
                other => match OpKind::from_name(other) {
                    Some(kind) => self.operations.push(Operation { kind, args }),
                    None => log::debug!("loop {}: line {line}: ignoring {other}", self.name),
                },
            },
        }
    }

    fn setcycle(&mut self, line: usize, args: &[String]) {
        let [row, column, value, ..] = args else {
            log::warn!("Incorrect setcycle command in item {} (line {line})", self.name);
            return;
        };
        let Some(row) = row.parse::<usize>().ok().filter(|&r| r < MAX_ROWS) else {
            log::warn!("loop {}: line {line}: bad cycle number {row}", self.name);
            return;
        };
        let value = remove_quotes(value);
        let cell = match value.strip_prefix('=') {
            Some(src) => match CompiledExpr::compile(src) {
                Ok(e) => Cell::Expr(e),
                Err(e) => {
                    log::warn!("loop {}: line {line}: {e}", self.name);
                    return;
                }
            },
            None => Cell::Literal(Value::from_script(&value)),
        };
        self.table.set_cell(row, &remove_quotes(column), cell);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vars(&self) -> &SharedStore {
        &self.vars
    }

    /// The source table, as defined or as read from the source file.
    pub fn table(&self) -> &Matrix {
        &self.table
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Cycle indices still queued in the current run.
    pub fn remaining(&self) -> Option<&VecDeque<usize>> {
        self.state.as_ref().map(|s| &s.cycles)
    }

    /// Load a file source if configured, and make the next step start a
    /// fresh run.
    pub fn prepare(&mut self, pool: &FilePool, ws: &Workspace) -> Result<(), LoopError> {
        let settings = ws.scoped(self.vars.clone());
        if settings.get_or("source", "table").to_string() == "file" {
            let src = settings.get_or("source_file", "").to_string();
            if !src.to_lowercase().ends_with(".csv") {
                return Err(ConfigurationError(
                    "Only csv files are supported as source files by loop items".into(),
                )
                .into());
            }
            let data = pool.get(&src).ok_or_else(|| {
                ConfigurationError(format!("Loop item refers to non-existing source file: {src}"))
            })?;
            self.table = parse_csv(data)
                .map_err(|e| ConfigurationError(format!("source file {src}: {e}")))?;
            log::debug!("loop {}: read {} rows from {src}", self.name, self.table.len());
        }
        self.state = None;
        Ok(())
    }

    /// Advance by one cycle.
    pub fn step(&mut self, ws: &mut Workspace) -> Result<Step, LoopError> {
        let settings = ws.scoped(self.vars.clone());
        let random = settings.get_or("order", "random").to_string() == "random";
        if self.state.is_none() {
            self.state = Some(self.build(ws, &settings, random)?);
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(Step::Done);
        };

        if ws.get("repeat_cycle").and_then(|v| v.as_int()) == Some(1) {
            if let Some(idx) = state.index {
                log::debug!("Repeating cycle: {idx}");
                state.cycles.push_back(idx);
                if random {
                    ws.with_rng(|rng| state.cycles.make_contiguous().shuffle(rng));
                }
            }
        }

        let Some(idx) = state.cycles.pop_front() else {
            log::debug!("loop {}: finished", self.name);
            self.state = None;
            return Ok(Step::Done);
        };
        state.index = Some(idx);
        let applied = apply_cycle(&self.name, &state.matrix, idx, ws);
        ws.set("repeat_cycle", 0i64);

        let break_if = settings
            .get_raw("break_if")
            .map_or_else(|| "never".to_owned(), |v| v.to_string());
        if !matches!(break_if.trim(), "never" | "") {
            let cond = compile_cond(&break_if)?;
            if cond != Condition::Never && cond.holds(ws)? {
                log::debug!("loop {}: break-if '{break_if}' is true", self.name);
                self.state = None;
                return Ok(Step::Done);
            }
        }

        let item = settings.get_or("item", "").to_string();
        Ok(Step::Run { item, cycle: idx, applied })
    }

    /// Build the cycle list for a run: repeats, order, operations, then
    /// skip/offset.
    fn build(&self, ws: &mut Workspace, settings: &Workspace, random: bool) -> Result<RunState, LoopError> {
        let repeat_val = settings.get_or("repeat", 1i64);
        let repeat = match repeat_val.as_float() {
            Some(r) if r >= 0.0 => r,
            _ => {
                return Err(ValidationError::new(format!(
                    "repeat should be a non-negative number, got '{repeat_val}'"
                ))
                .into())
            }
        };
        let n = self.table.len();
        if repeat * n as f64 > MAX_ROWS as f64 {
            return Err(ValidationError::new(format!(
                "repeat {repeat_val} over {n} rows exceeds {MAX_ROWS} cycles"
            ))
            .into());
        }
        let whole = if n == 0 { 0 } else { repeat.floor() as usize };
        let mut cycles: Vec<usize> = (0..whole).flat_map(|_| 0..n).collect();

        let partial = repeat - whole as f64;
        if partial > 0.0 {
            let mut all: Vec<usize> = (0..n).collect();
            if random {
                ws.with_rng(|rng| all.shuffle(rng));
            }
            let remainder = (n as f64 * partial).floor() as usize;
            cycles.extend(all.into_iter().take(remainder));
        }
        if random {
            ws.with_rng(|rng| cycles.shuffle(rng));
        }

        let mut live = self.table.pick_rows(&cycles);
        for op in &self.operations {
            live = op.apply(&live, ws)?;
        }
        let mut queue: VecDeque<usize> = (0..live.len()).collect();

        let skip_val = settings.get_or("skip", 0i64);
        let skip = match skip_val.as_int() {
            Some(s) if s >= 0 && s as usize <= queue.len() => s as usize,
            _ => {
                return Err(ValidationError::new(format!(
                    "skip should be an integer between 0 and {}, got '{skip_val}'",
                    queue.len()
                ))
                .into())
            }
        };
        if skip > 0 {
            let skipped: Vec<usize> = queue.drain(..skip).collect();
            if settings.get_or("offset", "no").to_string() == "yes" {
                queue.extend(skipped);
            }
        }
        log::debug!("loop {}: {} cycles", self.name, queue.len());
        Ok(RunState { matrix: live, cycles: queue, index: None })
    }
}

/// Apply one row to the experiment variables. Cells that fail to evaluate
/// are logged and leave their variable unset.
fn apply_cycle(name: &str, m: &Matrix, idx: usize, ws: &mut Workspace) -> Vec<(String, Value)> {
    let mut applied = Vec::new();
    for (column, cell) in m.row_cells(idx) {
        let value = match cell {
            Cell::Literal(Value::Str(s)) => ws.eval_text(s),
            Cell::Literal(v) => Ok(v.clone()),
            Cell::Expr(e) => e.eval(ws),
        };
        match value {
            Ok(v) => {
                ws.set(column, v.clone());
                applied.push((column.to_owned(), v));
            }
            Err(e) => {
                log::warn!(
                    "Failed to evaluate expression in loop item: {name} ({column} = {cell}): {e}"
                );
                ws.unset(column);
            }
        }
    }
    applied
}

// ── Tests ─────────────────────────────────────────────────────────────────────
