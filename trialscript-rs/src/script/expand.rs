//! Bracket interpolation of variable references and inline expressions.
//!
//! | Sequence        | Meaning                                               |
//! |-----------------|-------------------------------------------------------|
//! | `[name]`        | Value of variable `name` (`[A-Za-z0-9_]+`)            |
//! | `[[a]b]`        | Nested: resolve `[a]`, append `b`, resolve the result |
//! | `[=expr]`       | Evaluate `expr` and substitute the result             |
//! | `\[`            | Literal `[`, no interpolation                         |
//! | `\\[name]`      | Literal `\` followed by the value of `name`           |
//!
//! Inside `[=expr]`, `\[` and `\]` stand for literal brackets. Anything in
//! brackets that is not a known variable is left as it was written.

use super::expr::{eval_str, EvalContext, EvalError};
use super::value::Value;

/// Nested `[` levels inside one reference; deeper text is left literal.
const MAX_NESTING: usize = 32;

/// Interpolate `text`.
///
/// When the whole text is a single reference, the referenced value is
/// returned with its type; otherwise the result is a string.
pub fn eval_text(text: &str, ctx: &mut dyn EvalContext) -> Result<Value, EvalError> {
    if !text.contains('[') {
        return Ok(Value::Str(text.to_owned()));
    }
    let cs: Vec<char> = text.chars().collect();
    let n = cs.len();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < n {
        match cs[i] {
            '\\' if cs.get(i + 1) == Some(&'\\') && cs.get(i + 2) == Some(&'[') => {
                out.push('\\');
                i += 2;
            }
            '\\' if cs.get(i + 1) == Some(&'[') => {
                out.push('[');
                i += 2;
            }
            '[' => match interpolate_at(&cs, i, ctx, 0)? {
                Some((v, end)) if i == 0 && end == n => return Ok(v),
                Some((v, end)) => {
                    out.push_str(&v.to_string());
                    i = end;
                }
                None => {
                    out.push('[');
                    i += 1;
                }
            },
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(Value::Str(out))
}

/// Try to interpolate the reference starting at the `[` at `start`.
///
/// Returns the value and the index just past the closing `]`, or `None` if
/// the text there is not a resolvable reference.
fn interpolate_at(
    cs: &[char],
    start: usize,
    ctx: &mut dyn EvalContext,
    depth: usize,
) -> Result<Option<(Value, usize)>, EvalError> {
    if depth >= MAX_NESTING {
        return Ok(None);
    }
    if cs.get(start + 1) == Some(&'=') {
        let Some(close) = find_expr_close(cs, start + 2) else {
            return Ok(None);
        };
        let src = unescape_brackets(&cs[start + 2..close]);
        return Ok(Some((eval_str(&src, ctx)?, close + 1)));
    }

    let mut name = String::new();
    let mut j = start + 1;
    loop {
        match cs.get(j) {
            None => return Ok(None),
            Some(']') => break,
            Some('[') => match interpolate_at(cs, j, ctx, depth + 1)? {
                Some((inner, end)) => {
                    name.push_str(&inner.to_string());
                    j = end;
                }
                None => return Ok(None),
            },
            Some(&c) if is_name_char(c) => {
                name.push(c);
                j += 1;
            }
            Some(_) => return Ok(None),
        }
    }
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Ok(None);
    }
    Ok(ctx.get_var(&name).map(|v| (v, j + 1)))
}

/// Index of the `]` closing an inline expression whose body starts at
/// `from`. Quoted strings and `\[`/`\]` do not count.
fn find_expr_close(cs: &[char], from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut j = from;
    while j < cs.len() {
        let c = cs[j];
        if c == '\\' {
            j += 2;
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(j);
                    }
                }
                _ => {}
            },
        }
        j += 1;
    }
    None
}

fn unescape_brackets(cs: &[char]) -> String {
    let mut out = String::with_capacity(cs.len());
    let mut i = 0;
    while i < cs.len() {
        if cs[i] == '\\' && matches!(cs.get(i + 1), Some('[') | Some(']')) {
            out.push(cs[i + 1]);
            i += 2;
        } else {
            out.push(cs[i]);
            i += 1;
        }
    }
    out
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Vars(HashMap<String, Value>);

    impl EvalContext for Vars {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }

        fn call_fn(&mut self, name: &str, _args: Vec<Value>) -> Result<Value, EvalError> {
            Err(EvalError::UnknownFunction(name.to_owned()))
        }
    }

    fn vars() -> Vars {
        let mut m = HashMap::new();
        m.insert("width".to_string(), Value::Int(1024));
        m.insert("height".to_string(), Value::Int(768));
        m.insert("my_var99".to_string(), Value::Int(99));
        m.insert("nested".to_string(), Value::from("prefix"));
        m.insert("prefixvar".to_string(), Value::from("a nested value"));
        Vars(m)
    }

    fn eval(text: &str) -> Value {
        eval_text(text, &mut vars()).unwrap()
    }

    #[test]
    fn escapes_only_real_variables() {
        assert_eq!(
            eval(r"\\[width] = \[width] = [width]"),
            Value::from(r"\1024 = [width] = 1024")
        );
    }

    #[test]
    fn non_identifiers_left_alone() {
        assert_eq!(eval("[no var]"), Value::from("[no var]"));
        assert_eq!(eval("[nóvar]"), Value::from("[nóvar]"));
        assert_eq!(eval("[unknown] [width]"), Value::from("[unknown] 1024"));
        assert_eq!(eval("[width"), Value::from("[width"));
    }

    #[test]
    fn empty_and_plain_text_unchanged() {
        assert_eq!(eval(""), Value::from(""));
        assert_eq!(eval("no brackets, 0"), Value::from("no brackets, 0"));
    }

    #[test]
    fn single_reference_keeps_type() {
        assert_eq!(eval("[my_var99]"), Value::Int(99));
        assert_eq!(eval("[=10*10]"), Value::Int(100));
    }

    #[test]
    fn escaped_reference_is_literal() {
        assert_eq!(eval(r"\[width]"), Value::from("[width]"));
        assert_eq!(eval(r"\[=10*10]"), Value::from("[=10*10]"));
    }

    #[test]
    fn several_references() {
        assert_eq!(eval("[width] x [height]"), Value::from("1024 x 768"));
        assert_eq!(eval("w: [width], h: [height]"), Value::from("w: 1024, h: 768"));
        assert_eq!(eval("w: [=1024], h: [=768]"), Value::from("w: 1024, h: 768"));
    }

    #[test]
    fn expression_strings() {
        assert_eq!(eval(r#"[="tést"]"#), Value::from("tést"));
        assert_eq!(eval(r#"[="\[test\]"]"#), Value::from("[test]"));
        assert_eq!(eval(r#"[="a]b"]"#), Value::from("a]b"));
        assert_eq!(eval("[=[1, 2][1]]"), Value::Int(2));
    }

    #[test]
    fn nested_reference() {
        assert_eq!(eval("[[nested]var]"), Value::from("a nested value"));
    }

    #[test]
    fn deep_nesting_stays_literal() {
        let open = "[".repeat(200_000);
        assert_eq!(eval(&open), Value::Str(open.clone()));
        // Only the innermost reference is within reach of an outer `[`.
        let deep = format!("{}width{}", "[".repeat(MAX_NESTING + 1), "]".repeat(MAX_NESTING + 1));
        let expected = format!("{}1024{}", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert_eq!(eval(&deep), Value::Str(expected));
    }

    #[test]
    fn expression_errors_propagate() {
        assert!(eval_text("[=1/0]", &mut vars()).is_err());
        assert!(eval_text("x [=nosuch]", &mut vars()).is_err());
    }
}
