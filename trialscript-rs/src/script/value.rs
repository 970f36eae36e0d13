//! Runtime value type shared by the store, the tables and the evaluator.
//!
//! Script text is untyped, but the engine keeps numbers numeric from the
//! moment they are parsed: a `setcycle` cell of `1024` and a keyword argument
//! of `-9e-9` both arrive here as numbers, while everything else stays a
//! string until it is interpolated.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::expr::EvalError;

/// Longest string or list a single operation may build (bytes or elements).
pub const MAX_LEN: usize = 1 << 24;

/// A script runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                // Whole floats keep a trailing `.0` so they read back as floats.
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("number pattern is valid")
    })
}

impl Value {
    /// Parse `s` as a number, accepting signs, decimals and scientific
    /// notation. Integers that fit in `i64` stay integers.
    pub fn parse_number(s: &str) -> Option<Value> {
        let s = s.trim();
        if !number_re().is_match(s) {
            return None;
        }
        if let Ok(n) = s.parse::<i64>() {
            return Some(Value::Int(n));
        }
        s.parse::<f64>().ok().map(Value::Float)
    }

    /// Build a value from raw script text: numeric text becomes a number,
    /// anything else a string.
    pub fn from_script(s: &str) -> Value {
        Value::parse_number(s).unwrap_or_else(|| Value::Str(s.to_owned()))
    }

    /// Truthiness: `None`, `False`, zero, `""` and `[]` are falsy.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Numeric view of the value. Numeric strings count as numbers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => match Value::parse_number(s)? {
                Value::Int(n) => Some(n as f64),
                Value::Float(x) => Some(x),
                _ => None,
            },
            Value::Null | Value::List(_) => None,
        }
    }

    /// Integer view; floats are accepted only when they are whole.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            Value::Str(s) => match Value::parse_number(s)? {
                Value::Int(n) => Some(n),
                Value::Float(x) if x.fract() == 0.0 => Some(x as i64),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// `true` for `None` and the empty string: the cells a full-factorial
    /// design skips.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    // ── Arithmetic helpers ────────────────────────────────────────────────────

    /// Both operands as integers, when both are `Int` or `Bool`.
    fn int_pair(a: &Value, b: &Value) -> Option<(i64, i64)> {
        fn int(v: &Value) -> Option<i64> {
            match v {
                Value::Int(n) => Some(*n),
                Value::Bool(b) => Some(*b as i64),
                _ => None,
            }
        }
        Some((int(a)?, int(b)?))
    }

    /// Both operands as floats, when arithmetic applies to them. A pair of
    /// plain strings is not numeric even if they look like numbers, so that
    /// `"1" + "2"` concatenates.
    fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
        if matches!((a, b), (Value::Str(_), Value::Str(_))) {
            return None;
        }
        Some((a.as_float()?, b.as_float()?))
    }

    fn type_error(op: &str, a: &Value, b: &Value) -> EvalError {
        EvalError::TypeMismatch(format!(
            "unsupported operand types for {op}: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))
    }

    pub fn arith_add(&self, rhs: &Value) -> Result<Value, EvalError> {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => {
                if let Some((a, b)) = Self::int_pair(self, rhs) {
                    return Ok(a.checked_add(b).map_or(Value::Float(a as f64 + b as f64), Value::Int));
                }
                match Self::numeric_pair(self, rhs) {
                    Some((a, b)) => Ok(Value::Float(a + b)),
                    None => Err(Self::type_error("+", self, rhs)),
                }
            }
        }
    }

    pub fn arith_sub(&self, rhs: &Value) -> Result<Value, EvalError> {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            return Ok(a.checked_sub(b).map_or(Value::Float(a as f64 - b as f64), Value::Int));
        }
        match Self::numeric_pair(self, rhs) {
            Some((a, b)) => Ok(Value::Float(a - b)),
            None => Err(Self::type_error("-", self, rhs)),
        }
    }

    pub fn arith_mul(&self, rhs: &Value) -> Result<Value, EvalError> {
        match (self, rhs) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                let n = usize::try_from(*n).unwrap_or(0);
                match s.len().checked_mul(n) {
                    Some(len) if len <= MAX_LEN => Ok(Value::Str(s.repeat(n))),
                    _ => Err(EvalError::Arithmetic(format!(
                        "repeated string would exceed {MAX_LEN} bytes"
                    ))),
                }
            }
            _ => {
                if let Some((a, b)) = Self::int_pair(self, rhs) {
                    return Ok(a.checked_mul(b).map_or(Value::Float(a as f64 * b as f64), Value::Int));
                }
                match Self::numeric_pair(self, rhs) {
                    Some((a, b)) => Ok(Value::Float(a * b)),
                    None => Err(Self::type_error("*", self, rhs)),
                }
            }
        }
    }

    /// True division: always produces a float.
    pub fn arith_div(&self, rhs: &Value) -> Result<Value, EvalError> {
        let (a, b) = Self::numeric_pair(self, rhs).ok_or_else(|| Self::type_error("/", self, rhs))?;
        if b == 0.0 {
            return Err(EvalError::Arithmetic("division by zero".into()));
        }
        Ok(Value::Float(a / b))
    }

    /// Division rounding toward negative infinity.
    pub fn arith_floor_div(&self, rhs: &Value) -> Result<Value, EvalError> {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            if b == 0 {
                return Err(EvalError::Arithmetic("integer division by zero".into()));
            }
            return Ok(match (a.checked_div(b), a.checked_rem(b)) {
                (Some(q), Some(r)) if r != 0 && (r < 0) != (b < 0) => Value::Int(q - 1),
                (Some(q), Some(_)) => Value::Int(q),
                // i64::MIN // -1
                _ => Value::Float(-(a as f64)),
            });
        }
        let (a, b) = Self::numeric_pair(self, rhs).ok_or_else(|| Self::type_error("//", self, rhs))?;
        if b == 0.0 {
            return Err(EvalError::Arithmetic("integer division by zero".into()));
        }
        Ok(Value::Float((a / b).floor()))
    }

    /// Modulo with the sign of the divisor.
    pub fn arith_rem(&self, rhs: &Value) -> Result<Value, EvalError> {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            if b == 0 {
                return Err(EvalError::Arithmetic("modulo by zero".into()));
            }
            let r = a.wrapping_rem(b);
            return Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }));
        }
        let (a, b) = Self::numeric_pair(self, rhs).ok_or_else(|| Self::type_error("%", self, rhs))?;
        if b == 0.0 {
            return Err(EvalError::Arithmetic("modulo by zero".into()));
        }
        Ok(Value::Float(((a % b) + b) % b))
    }

    pub fn arith_pow(&self, rhs: &Value) -> Result<Value, EvalError> {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            if let Some(n) = u32::try_from(b).ok().and_then(|e| a.checked_pow(e)) {
                return Ok(Value::Int(n));
            }
        }
        let (a, b) = Self::numeric_pair(self, rhs).ok_or_else(|| Self::type_error("**", self, rhs))?;
        Ok(Value::Float(a.powf(b)))
    }

    pub fn arith_neg(&self) -> Result<Value, EvalError> {
        match self {
            Value::Int(n) => Ok(n.checked_neg().map_or(Value::Float(-(*n as f64)), Value::Int)),
            Value::Float(x) => Ok(Value::Float(-x)),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            other => Err(EvalError::TypeMismatch(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        }
    }

    /// Relational comparison. Numbers (and numeric strings compared against
    /// numbers or each other) compare by value, strings lexically and lists
    /// element-wise. `None` when the operands are not comparable.
    pub fn compare(&self, rhs: &Value) -> Option<Ordering> {
        match (self, rhs) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Str(a), Value::Str(b)) => {
                match (Value::parse_number(a), Value::parse_number(b)) {
                    (Some(x), Some(y)) => x.compare(&y),
                    _ => Some(a.cmp(b)),
                }
            }
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Null, _) | (_, Value::Null) | (Value::List(_), _) | (_, Value::List(_)) => None,
            _ => {
                let a = self.as_float()?;
                let b = rhs.as_float()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Equality as used by `==`: comparable values that compare equal.
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        self.compare(rhs) == Some(Ordering::Equal)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_scalars() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Null.to_string(), "None");
    }

    #[test]
    fn display_list() {
        let v = Value::List(vec![Value::Int(1), Value::Str("a".into())]);
        assert_eq!(v.to_string(), "[1, 'a']");
    }

    #[test]
    fn parse_number_forms() {
        assert_eq!(Value::parse_number("1024"), Some(Value::Int(1024)));
        assert_eq!(Value::parse_number("-9e-9"), Some(Value::Float(-9e-9)));
        assert_eq!(Value::parse_number(".5"), Some(Value::Float(0.5)));
        assert_eq!(Value::parse_number("+3"), Some(Value::Int(3)));
        assert_eq!(Value::parse_number("left"), None);
        assert_eq!(Value::parse_number(""), None);
        assert_eq!(Value::parse_number("1e"), None);
    }

    #[test]
    fn from_script_keeps_words() {
        assert_eq!(Value::from_script("yes"), Value::Str("yes".into()));
        assert_eq!(Value::from_script("2.5"), Value::Float(2.5));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.as_bool());
        assert!(!Value::Int(0).as_bool());
        assert!(!Value::Str(String::new()).as_bool());
        assert!(Value::Str("0".into()).as_bool());
        assert!(Value::List(vec![Value::Null]).as_bool());
    }

    #[test]
    fn arithmetic() {
        let a = Value::Int(10);
        let b = Value::Int(3);
        assert_eq!(a.arith_add(&b), Ok(Value::Int(13)));
        assert_eq!(a.arith_sub(&b), Ok(Value::Int(7)));
        assert_eq!(a.arith_mul(&b), Ok(Value::Int(30)));
        assert_eq!(a.arith_floor_div(&b), Ok(Value::Int(3)));
        assert_eq!(a.arith_rem(&b), Ok(Value::Int(1)));
        assert_eq!(Value::Int(-7).arith_rem(&b), Ok(Value::Int(2)));
        assert_eq!(Value::Int(2).arith_pow(&Value::Int(10)), Ok(Value::Int(1024)));
    }

    #[test]
    fn true_division_is_float() {
        assert_eq!(Value::Int(10).arith_div(&Value::Int(4)), Ok(Value::Float(2.5)));
    }

    #[test]
    fn div_by_zero() {
        assert!(Value::Int(1).arith_div(&Value::Int(0)).is_err());
        assert!(Value::Int(1).arith_rem(&Value::Int(0)).is_err());
        assert!(Value::Int(1).arith_floor_div(&Value::Int(0)).is_err());
    }

    #[test]
    fn large_integers_stay_exact() {
        let big = Value::Int(9_007_199_254_740_993); // 2^53 + 1
        assert_eq!(big.arith_sub(&Value::Int(0)), Ok(big.clone()));
        assert_eq!(big.arith_mul(&Value::Int(1)), Ok(big.clone()));
        assert_eq!(big.arith_floor_div(&Value::Int(1)), Ok(big.clone()));
        assert_eq!(big.arith_rem(&Value::Int(10)), Ok(Value::Int(3)));
        assert_eq!(Value::Int(3).arith_pow(&Value::Int(39)), Ok(Value::Int(4_052_555_153_018_976_267)));
    }

    #[test]
    fn integer_overflow_becomes_float() {
        let max = Value::Int(i64::MAX);
        let min = Value::Int(i64::MIN);
        assert_eq!(max.arith_add(&Value::Int(1)), Ok(Value::Float(i64::MAX as f64 + 1.0)));
        assert_eq!(min.arith_sub(&Value::Int(1)), Ok(Value::Float(i64::MIN as f64 - 1.0)));
        assert_eq!(
            Value::Int(10_000_000_000).arith_mul(&Value::Int(10_000_000_000)),
            Ok(Value::Float(1e20))
        );
        assert_eq!(min.arith_neg(), Ok(Value::Float(-(i64::MIN as f64))));
        assert_eq!(min.arith_floor_div(&Value::Int(-1)), Ok(Value::Float(-(i64::MIN as f64))));
        assert_eq!(min.arith_rem(&Value::Int(-1)), Ok(Value::Int(0)));
        assert_eq!(Value::Int(2).arith_pow(&Value::Int(64)), Ok(Value::Float(2f64.powi(64))));
    }

    #[test]
    fn floor_division_and_modulo_signs() {
        assert_eq!(Value::Int(7).arith_floor_div(&Value::Int(-2)), Ok(Value::Int(-4)));
        assert_eq!(Value::Int(-7).arith_floor_div(&Value::Int(2)), Ok(Value::Int(-4)));
        assert_eq!(Value::Int(-6).arith_floor_div(&Value::Int(2)), Ok(Value::Int(-3)));
        assert_eq!(Value::Int(7).arith_rem(&Value::Int(-2)), Ok(Value::Int(-1)));
    }

    #[test]
    fn string_repetition_is_bounded() {
        assert_eq!(Value::from("ab").arith_mul(&Value::Int(3)), Ok(Value::from("ababab")));
        assert_eq!(Value::Int(-1).arith_mul(&Value::from("ab")), Ok(Value::from("")));
        assert!(matches!(
            Value::from("ab").arith_mul(&Value::Int(9_000_000_000_000_000_000)),
            Err(EvalError::Arithmetic(_))
        ));
        assert!(Value::from("ab").arith_mul(&Value::Int(MAX_LEN as i64)).is_err());
    }

    #[test]
    fn string_concat_and_mismatch() {
        assert_eq!(
            Value::from("a").arith_add(&Value::from("b")),
            Ok(Value::Str("ab".into()))
        );
        assert!(Value::from("a").arith_sub(&Value::Int(1)).is_err());
    }

    #[test]
    fn compare_mixed() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::from("10").compare(&Value::Int(9)), Some(Ordering::Greater));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from("left").compare(&Value::Int(1)), None);
        assert!(Value::Null.loose_eq(&Value::Null));
        assert!(!Value::Null.loose_eq(&Value::Int(0)));
    }
}
