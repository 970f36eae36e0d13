use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use trialscript::matrix::{self, Cell, Matrix};
use trialscript::script::command::{create_cmd, parse_cmd, remove_quotes, add_quotes, Command};
use trialscript::script::cond::compile_cond;
use trialscript::script::stmt::parse_script;
use trialscript::script::value::Value;
use trialscript::var::{VarStore, Workspace};

// ── Strategies ────────────────────────────────────────────────────────────────

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Int),
        "[a-z0-9 _.'\"\\\\-]{0,12}".prop_map(Value::Str),
    ]
}

fn arb_command() -> impl Strategy<Value = Command> {
    (
        "[a-z][a-z0-9_]{0,8}",
        prop::collection::vec(arb_value(), 0..4),
        prop::collection::vec(("[a-z_][a-z0-9_]{0,6}", arb_value()), 0..4),
    )
        .prop_map(|(name, positional, keywords)| Command { name, positional, keywords })
}

fn arb_cell() -> impl Strategy<Value = Cell> {
    prop_oneof![
        (0i64..5).prop_map(Cell::from),
        "[a-c]{0,2}".prop_map(Cell::from),
    ]
}

/// A matrix with 1..4 columns and 0..8 rows.
fn arb_matrix() -> impl Strategy<Value = Matrix> {
    (1usize..4, 0usize..8).prop_flat_map(|(ncols, nrows)| {
        prop::collection::vec(prop::collection::vec(arb_cell(), ncols), nrows).prop_map(move |rows| {
            let columns = (0..ncols).map(|i| format!("c{i}")).collect();
            Matrix::from_rows(columns, rows).unwrap()
        })
    })
}

fn workspace() -> Workspace {
    Workspace::seeded(VarStore::new().shared(), 3)
}

// ── Properties ────────────────────────────────────────────────────────────────

proptest! {
    /// Parsers return Ok or Err on arbitrary input but never panic.
    #[test]
    fn parsers_never_panic(s in "\\PC{0,60}") {
        let _ = parse_cmd(&s);
        let _ = compile_cond(&s);
        let _ = parse_script(&s);
        let _ = workspace().eval_text(&s);
    }

    /// Serializing a command and parsing it back gives the same command.
    #[test]
    fn command_survives_serialization(cmd in arb_command()) {
        let line = create_cmd(&cmd);
        prop_assert_eq!(parse_cmd(&line).unwrap(), cmd, "line: {}", line);
    }

    #[test]
    fn quoting_is_reversible(s in "\\PC{0,20}") {
        prop_assert_eq!(remove_quotes(&add_quotes(&s)), s);
    }

    /// Text without brackets is never interpolated.
    #[test]
    fn bracket_free_text_is_unchanged(s in "[^\\[]{0,40}") {
        prop_assert_eq!(workspace().eval_text(&s).unwrap(), Value::Str(s));
    }

    /// A whole-text reference keeps the variable's type.
    #[test]
    fn single_reference_keeps_type(n in any::<i64>(), name in "[a-z][a-z0-9_]{0,8}") {
        let mut ws = workspace();
        ws.set(&name, n);
        prop_assert_eq!(ws.eval_text(&format!("[{name}]")).unwrap(), Value::Int(n));
    }

    #[test]
    fn stack_inverts_unstack(m in arb_matrix()) {
        prop_assert_eq!(matrix::stack(matrix::unstack(&m)).unwrap(), m);
    }

    /// The design has one row per combination of non-empty levels.
    #[test]
    fn fullfactorial_row_count(m in arb_matrix()) {
        let expected: usize = matrix::unstack(&m)
            .iter()
            .map(|(_, values)| values.iter().filter(|c| !c.is_empty()).count())
            .product();
        prop_assert_eq!(matrix::fullfactorial(&m).unwrap().len(), expected);
    }

    #[test]
    fn roll_by_length_is_identity(m in arb_matrix(), k in -3i64..3) {
        let n = m.len() as i64;
        prop_assert_eq!(matrix::roll(&m, k * n, &[]).unwrap(), m.clone());
        let there = matrix::roll(&m, k, &[]).unwrap();
        prop_assert_eq!(matrix::roll(&there, -k, &[]).unwrap(), m);
    }

    /// Shuffling permutes rows without changing their contents.
    #[test]
    fn shuffle_keeps_rows(m in arb_matrix(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let shuffled = matrix::shuffle_vert(&m, &[], &mut rng).unwrap();
        let key = |m: &Matrix| {
            let mut rows: Vec<String> = m.rows().iter().map(|r| format!("{r:?}")).collect();
            rows.sort();
            rows
        };
        prop_assert_eq!(key(&shuffled), key(&m));
    }

    #[test]
    fn slice_stays_in_bounds(m in arb_matrix(), from in -10i64..10, to in prop::option::of(-10i64..10)) {
        let n = m.len();
        let out = matrix::slice(&m, from, to);
        prop_assert!(out.len() <= n);
        if to.is_none() && from >= 0 {
            prop_assert_eq!(out.len(), n.saturating_sub(from as usize));
        }
    }

    #[test]
    fn reverse_twice_is_identity(m in arb_matrix()) {
        let once = matrix::reverse_rows(&m, &[]).unwrap();
        prop_assert_eq!(matrix::reverse_rows(&once, &[]).unwrap(), m);
    }
}
