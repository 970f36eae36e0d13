//! Loop tables and the operations that transform them.
//!
//! A [`Matrix`] is an ordered list of named columns plus rows of [`Cell`]s.
//! Every row has one cell per column; cells a script never set hold
//! `Value::Null` and are skipped when a row is applied.
//!
//! The operations are pure: each takes a matrix by reference and returns a
//! new one. Randomized operations take the caller's RNG so that a seeded run
//! is reproducible.

use std::cmp::Ordering;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::script::expr::CompiledExpr;
use crate::script::value::Value;

/// Most rows an operation may produce. Larger designs are rejected with a
/// [`ValidationError`].
pub const MAX_ROWS: usize = 1 << 24;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Bad argument to a table operation or a builtin helper.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        ValidationError(msg.into())
    }
}

// ── Cell ──────────────────────────────────────────────────────────────────────

/// One table cell: a literal (strings are interpolated when the row is
/// applied) or an expression evaluated at apply time.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Literal(Value),
    Expr(CompiledExpr),
}

impl Cell {
    /// Unset or empty-string literal.
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Literal(v) if v.is_empty())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Literal(Value::Null))
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Literal(Value::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Literal(v) => write!(f, "{v}"),
            Cell::Expr(e) => write!(f, "{e}"),
        }
    }
}

impl From<Value> for Cell {
    fn from(v: Value) -> Self {
        Cell::Literal(v)
    }
}

macro_rules! literal_cell_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Cell {
            fn from(v: $t) -> Self {
                Cell::Literal(v.into())
            }
        })*
    };
}

literal_cell_from!(i32, i64, f64, bool, &str, String);

// ── Matrix ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Matrix {
    pub fn new(columns: Vec<String>) -> Self {
        Matrix { columns, rows: Vec::new() }
    }

    /// Build a matrix from rows, each of which must have one cell per column.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, ValidationError> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(ValidationError::new(format!(
                "row {bad} has {} cells, expected {}",
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Matrix { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&[Cell]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    /// Column/cell pairs of a row, skipping cells that were never set.
    pub fn row_cells(&self, idx: usize) -> impl Iterator<Item = (&str, &Cell)> {
        self.rows
            .get(idx)
            .into_iter()
            .flat_map(move |row| self.columns.iter().map(String::as_str).zip(row.iter()))
            .filter(|(_, cell)| !cell.is_null())
    }

    pub fn column_index(&self, name: &str) -> Result<usize, ValidationError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ValidationError::new(format!("unknown column: {name}")))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Set one cell, growing the table with unset cells as needed.
    pub fn set_cell(&mut self, row: usize, column: &str, cell: Cell) {
        let col = match self.columns.iter().position(|c| c == column) {
            Some(i) => i,
            None => {
                self.columns.push(column.to_owned());
                for r in &mut self.rows {
                    r.push(Cell::default());
                }
                self.columns.len() - 1
            }
        };
        while self.rows.len() <= row {
            self.rows.push(vec![Cell::default(); self.columns.len()]);
        }
        self.rows[row][col] = cell;
    }

    /// New matrix made of the given rows, in order; duplicates allowed.
    pub fn pick_rows(&self, indices: &[usize]) -> Matrix {
        Matrix {
            columns: self.columns.clone(),
            rows: indices.iter().filter_map(|&i| self.rows.get(i).cloned()).collect(),
        }
    }

    /// Resolve a column list; empty means every column.
    fn column_set(&self, columns: &[String]) -> Result<Vec<usize>, ValidationError> {
        if columns.is_empty() {
            return Ok((0..self.columns.len()).collect());
        }
        columns.iter().map(|c| self.column_index(c)).collect()
    }
}

// ── Stack / unstack ───────────────────────────────────────────────────────────

/// Column-major view: one `(name, values)` entry per column, in order.
pub fn unstack(m: &Matrix) -> Vec<(String, Vec<Cell>)> {
    m.columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), m.rows.iter().map(|r| r[i].clone()).collect()))
        .collect()
}

/// Inverse of [`unstack`]; all columns must have the same length.
pub fn stack(columns: Vec<(String, Vec<Cell>)>) -> Result<Matrix, ValidationError> {
    let n = columns.first().map_or(0, |(_, v)| v.len());
    if let Some((name, _)) = columns.iter().find(|(_, v)| v.len() != n) {
        return Err(ValidationError::new(format!("column {name} has a different length")));
    }
    let mut rows: Vec<Vec<Cell>> = (0..n).map(|_| Vec::with_capacity(columns.len())).collect();
    let mut names = Vec::with_capacity(columns.len());
    for (name, values) in columns {
        names.push(name);
        for (row, cell) in rows.iter_mut().zip(values) {
            row.push(cell);
        }
    }
    Ok(Matrix { columns: names, rows })
}

// ── Operations ────────────────────────────────────────────────────────────────

/// Cross every column's values with every other's. The first column varies
/// fastest; empty cells do not count as levels.
pub fn fullfactorial(m: &Matrix) -> Result<Matrix, ValidationError> {
    let levels: Vec<Vec<Cell>> = unstack(m)
        .into_iter()
        .map(|(_, values)| values.into_iter().filter(|c| !c.is_empty()).collect())
        .collect();
    if levels.is_empty() {
        return Ok(m.clone());
    }
    let total = levels
        .iter()
        .try_fold(1usize, |acc, lv| acc.checked_mul(lv.len()))
        .filter(|&t| t <= MAX_ROWS)
        .ok_or_else(|| ValidationError::new(format!("full-factorial design exceeds {MAX_ROWS} rows")))?;
    let mut rows = Vec::with_capacity(total);
    for i in 0..total {
        let mut rest = i;
        let row = levels
            .iter()
            .map(|lv| {
                let cell = lv[rest % lv.len()].clone();
                rest /= lv.len();
                cell
            })
            .collect();
        rows.push(row);
    }
    Ok(Matrix { columns: m.columns.clone(), rows })
}

/// Shuffle rows. With columns given, only those columns are permuted (with
/// one shared permutation, so their row relationships are kept).
pub fn shuffle_vert<R: Rng + ?Sized>(
    m: &Matrix,
    columns: &[String],
    rng: &mut R,
) -> Result<Matrix, ValidationError> {
    let mut order: Vec<usize> = (0..m.len()).collect();
    order.shuffle(rng);
    if columns.is_empty() {
        return Ok(m.pick_rows(&order));
    }
    let cols = m.column_set(columns)?;
    Ok(permute_columns(m, &cols, &order))
}

/// Shuffle values between the given columns (all columns if none), row by row.
pub fn shuffle_horiz<R: Rng + ?Sized>(
    m: &Matrix,
    columns: &[String],
    rng: &mut R,
) -> Result<Matrix, ValidationError> {
    let cols = m.column_set(columns)?;
    let mut out = m.clone();
    for row in &mut out.rows {
        let mut values: Vec<Cell> = cols.iter().map(|&c| row[c].clone()).collect();
        values.shuffle(rng);
        for (&c, v) in cols.iter().zip(values) {
            row[c] = v;
        }
    }
    Ok(out)
}

/// Sort a single column, leaving the other columns in place.
pub fn sort_col(m: &Matrix, column: &str) -> Result<Matrix, ValidationError> {
    let col = m.column_index(column)?;
    let mut order: Vec<usize> = (0..m.len()).collect();
    order.sort_by(|&a, &b| cmp_cells(&m.rows[a][col], &m.rows[b][col]));
    Ok(permute_columns(m, &[col], &order))
}

/// Sort whole rows by one column.
pub fn sort_by(m: &Matrix, column: &str) -> Result<Matrix, ValidationError> {
    let col = m.column_index(column)?;
    let mut order: Vec<usize> = (0..m.len()).collect();
    order.sort_by(|&a, &b| cmp_cells(&m.rows[a][col], &m.rows[b][col]));
    Ok(m.pick_rows(&order))
}

/// Reverse row order, of the whole table or of the given columns only.
pub fn reverse_rows(m: &Matrix, columns: &[String]) -> Result<Matrix, ValidationError> {
    let order: Vec<usize> = (0..m.len()).rev().collect();
    if columns.is_empty() {
        return Ok(m.pick_rows(&order));
    }
    let cols = m.column_set(columns)?;
    Ok(permute_columns(m, &cols, &order))
}

/// Rotate rows by `steps`; positive moves rows down, wrapping the last rows
/// to the top.
pub fn roll(m: &Matrix, steps: i64, columns: &[String]) -> Result<Matrix, ValidationError> {
    let n = m.len();
    if n == 0 {
        return Ok(m.clone());
    }
    let shift = steps.rem_euclid(n as i64) as usize;
    let order: Vec<usize> = (0..n).map(|i| (i + n - shift) % n).collect();
    if columns.is_empty() {
        return Ok(m.pick_rows(&order));
    }
    let cols = m.column_set(columns)?;
    Ok(permute_columns(m, &cols, &order))
}

/// Repeat each row as many times as its `column` value says; zero drops it.
pub fn weight(m: &Matrix, column: &str) -> Result<Matrix, ValidationError> {
    let col = m.column_index(column)?;
    let mut weights = Vec::with_capacity(m.len());
    let mut total = 0usize;
    for (i, row) in m.rows.iter().enumerate() {
        let w = match &row[col] {
            Cell::Literal(v) => v.as_int(),
            Cell::Expr(_) => None,
        };
        let Some(w) = w.and_then(|w| usize::try_from(w).ok()) else {
            return Err(ValidationError::new(format!(
                "weight values must be non-negative integers, got '{}' in row {i}",
                row[col]
            )));
        };
        total = total
            .checked_add(w)
            .filter(|&t| t <= MAX_ROWS)
            .ok_or_else(|| ValidationError::new(format!("weighted table exceeds {MAX_ROWS} rows")))?;
        weights.push(w);
    }
    let mut order = Vec::with_capacity(total);
    for (i, w) in weights.into_iter().enumerate() {
        order.extend(std::iter::repeat(i).take(w));
    }
    Ok(m.pick_rows(&order))
}

/// Keep rows `from..to`. Negative bounds count from the end; out-of-range
/// bounds are clamped.
pub fn slice(m: &Matrix, from: i64, to: Option<i64>) -> Matrix {
    let n = m.len() as i64;
    let clamp = |i: i64| if i < 0 { (n + i).max(0) } else { i.min(n) };
    let start = clamp(from);
    let end = to.map_or(n, clamp);
    let order: Vec<usize> = (start..end.max(start)).map(|i| i as usize).collect();
    m.pick_rows(&order)
}

/// Parse an integer operation argument.
pub fn int_arg(arg: &str, what: &str) -> Result<i64, ValidationError> {
    match Value::from_script(arg) {
        Value::Int(n) => Ok(n),
        _ => Err(ValidationError::new(format!("{what} should be an integer, got '{arg}'"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Reorder only the listed columns by `order`; other columns keep their rows.
fn permute_columns(m: &Matrix, cols: &[usize], order: &[usize]) -> Matrix {
    let mut out = m.clone();
    for (dst, &src) in order.iter().enumerate() {
        for &c in cols {
            out.rows[dst][c] = m.rows[src][c].clone();
        }
    }
    out
}

/// Numbers sort before everything else; strings compare lexically.
fn cmp_cells(a: &Cell, b: &Cell) -> Ordering {
    fn rank(c: &Cell) -> u8 {
        match c {
            Cell::Literal(v) if v.is_number() => 0,
            Cell::Literal(_) => 1,
            Cell::Expr(_) => 2,
        }
    }
    match (a, b) {
        (Cell::Literal(x), Cell::Literal(y)) if x.is_number() && y.is_number() => {
            x.compare(y).unwrap_or(Ordering::Equal)
        }
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn numbers_words() -> Matrix {
        Matrix::from_rows(
            vec!["number".into(), "word".into()],
            vec![
                vec![1.into(), "one".into()],
                vec![2.into(), "two".into()],
                vec![3.into(), "three".into()],
            ],
        )
        .unwrap()
    }

    fn column(m: &Matrix, name: &str) -> Vec<String> {
        let col = m.column_index(name).unwrap();
        m.rows().iter().map(|r| r[col].to_string()).collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unstack_and_stack() {
        let m = numbers_words();
        let un = unstack(&m);
        assert_eq!(un[0].0, "number");
        assert_eq!(un[1].1, vec![Cell::from("one"), "two".into(), "three".into()]);
        assert_eq!(stack(un).unwrap(), m);
    }

    #[test]
    fn stack_rejects_ragged_columns() {
        let cols = vec![
            ("a".to_string(), vec![Cell::from(1)]),
            ("b".to_string(), vec![]),
        ];
        assert!(stack(cols).is_err());
    }

    #[test]
    fn fullfactorial_first_column_fastest() {
        let m = fullfactorial(&numbers_words()).unwrap();
        assert_eq!(m.len(), 9);
        assert_eq!(column(&m, "number")[..4], ["1", "2", "3", "1"]);
        assert_eq!(column(&m, "word")[..4], ["one", "one", "one", "two"]);
    }

    #[test]
    fn fullfactorial_skips_empty_cells() {
        let mut m = Matrix::default();
        m.set_cell(0, "n", 1.into());
        m.set_cell(1, "n", 2.into());
        m.set_cell(0, "w", "a".into());
        let out = fullfactorial(&m).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(column(&out, "w"), ["a", "a"]);
    }

    #[test]
    fn set_cell_grows_table() {
        let mut m = Matrix::default();
        m.set_cell(2, "x", 5.into());
        assert_eq!(m.len(), 3);
        assert!(m.get(0, "x").unwrap().is_null());
        assert_eq!(m.row_cells(0).count(), 0);
        assert_eq!(m.row_cells(2).count(), 1);
    }

    #[test]
    fn shuffle_vert_keeps_rows_together() {
        let mut rng = StdRng::seed_from_u64(3);
        let m = shuffle_vert(&numbers_words(), &[], &mut rng).unwrap();
        for row in m.rows() {
            let expected = match row[0].to_string().as_str() {
                "1" => "one",
                "2" => "two",
                _ => "three",
            };
            assert_eq!(row[1].to_string(), expected);
        }
        let mut sorted = column(&m, "number");
        sorted.sort();
        assert_eq!(sorted, ["1", "2", "3"]);
    }

    #[test]
    fn shuffle_rejects_unknown_column() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(shuffle_vert(&numbers_words(), &cols(&["aaa"]), &mut rng).is_err());
        assert!(shuffle_horiz(&numbers_words(), &cols(&["aaa"]), &mut rng).is_err());
    }

    #[test]
    fn shuffle_column_subset_leaves_others() {
        let mut rng = StdRng::seed_from_u64(11);
        let m = shuffle_vert(&numbers_words(), &cols(&["word"]), &mut rng).unwrap();
        assert_eq!(column(&m, "number"), ["1", "2", "3"]);
        let m = shuffle_horiz(&numbers_words(), &cols(&["word"]), &mut rng).unwrap();
        assert_eq!(m, numbers_words());
    }

    #[test]
    fn shuffle_horiz_stays_within_row() {
        let mut rng = StdRng::seed_from_u64(5);
        let m = shuffle_horiz(&numbers_words(), &[], &mut rng).unwrap();
        for (row, orig) in m.rows().iter().zip(numbers_words().rows()) {
            let mut a: Vec<String> = row.iter().map(Cell::to_string).collect();
            let mut b: Vec<String> = orig.iter().map(Cell::to_string).collect();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn sort_col_only_touches_one_column() {
        let m = sort_col(&numbers_words(), "word").unwrap();
        assert_eq!(column(&m, "word"), ["one", "three", "two"]);
        assert_eq!(column(&m, "number"), ["1", "2", "3"]);
    }

    #[test]
    fn sort_by_moves_rows() {
        let m = sort_by(&numbers_words(), "word").unwrap();
        assert_eq!(column(&m, "word"), ["one", "three", "two"]);
        assert_eq!(column(&m, "number"), ["1", "3", "2"]);
    }

    #[test]
    fn numbers_sort_before_strings() {
        let m = Matrix::from_rows(
            vec!["v".into()],
            vec![vec!["b".into()], vec![10.into()], vec![2.5.into()], vec!["a".into()]],
        )
        .unwrap();
        assert_eq!(column(&sort_col(&m, "v").unwrap(), "v"), ["2.5", "10", "a", "b"]);
    }

    #[test]
    fn reverse_whole_and_partial() {
        let m = reverse_rows(&numbers_words(), &[]).unwrap();
        assert_eq!(column(&m, "number"), ["3", "2", "1"]);
        let m = reverse_rows(&numbers_words(), &cols(&["word"])).unwrap();
        assert_eq!(column(&m, "number"), ["1", "2", "3"]);
        assert_eq!(column(&m, "word"), ["three", "two", "one"]);
    }

    #[test]
    fn roll_wraps_both_ways() {
        let m = roll(&numbers_words(), 1, &[]).unwrap();
        assert_eq!(column(&m, "number"), ["3", "1", "2"]);
        let m = roll(&numbers_words(), -1, &[]).unwrap();
        assert_eq!(column(&m, "number"), ["2", "3", "1"]);
        let m = roll(&numbers_words(), 4, &cols(&["word"])).unwrap();
        assert_eq!(column(&m, "word"), ["three", "one", "two"]);
        assert_eq!(column(&m, "number"), ["1", "2", "3"]);
    }

    #[test]
    fn weight_repeats_and_drops() {
        let m = Matrix::from_rows(
            vec!["w".into(), "x".into()],
            vec![
                vec![2.into(), "a".into()],
                vec![0.into(), "b".into()],
                vec!["1".into(), "c".into()],
            ],
        )
        .unwrap();
        assert_eq!(column(&weight(&m, "w").unwrap(), "x"), ["a", "a", "c"]);
        let bad = Matrix::from_rows(vec!["w".into()], vec![vec!["x".into()]]).unwrap();
        assert!(weight(&bad, "w").is_err());
        assert!(weight(&m, "nope").is_err());
    }

    #[test]
    fn weight_total_is_bounded() {
        let huge = Matrix::from_rows(vec!["w".into()], vec![vec![1_000_000_000_000_000_000i64.into()]]).unwrap();
        assert!(weight(&huge, "w").is_err());
        let overflow = Matrix::from_rows(
            vec!["w".into()],
            vec![vec![i64::MAX.into()], vec![i64::MAX.into()]],
        )
        .unwrap();
        assert!(weight(&overflow, "w").is_err());
        let at_cap = Matrix::from_rows(vec!["w".into()], vec![vec![(MAX_ROWS as i64).into()], vec![1.into()]]).unwrap();
        assert!(weight(&at_cap, "w").is_err());
    }

    #[test]
    fn fullfactorial_size_is_bounded() {
        // 20 columns of 3 levels: 3^20 rows.
        let mut m = Matrix::default();
        for c in 0..20 {
            for l in 0..3 {
                m.set_cell(l, &format!("c{c}"), (l as i64).into());
            }
        }
        assert!(fullfactorial(&m).is_err());
    }

    #[test]
    fn slice_bounds() {
        let m = numbers_words();
        assert_eq!(column(&slice(&m, 1, None), "number"), ["2", "3"]);
        assert_eq!(column(&slice(&m, 0, Some(-1)), "number"), ["1", "2"]);
        assert_eq!(column(&slice(&m, -2, Some(10)), "number"), ["2", "3"]);
        assert!(slice(&m, 2, Some(1)).is_empty());
    }

    #[test]
    fn int_arg_parses_or_fails() {
        assert_eq!(int_arg("-3", "steps"), Ok(-3));
        assert!(int_arg("1.5", "steps").is_err());
        assert!(int_arg("x", "steps").is_err());
    }
}
