//! Built-in functions callable from expressions.
//!
//! Each function receives a `Vec<Value>` of already-evaluated arguments. The
//! geometry helpers (`xy_*`) work in degrees and return `[x, y]` pairs as
//! lists; they validate their arguments strictly and never coerce strings.

use std::f64::consts::PI;

use rand::{Rng, RngCore};

use super::expr::EvalError;
use super::value::{Value, MAX_LEN};
use crate::matrix::ValidationError;

/// Number of attempts `xy_random` makes, both per point and per full set.
const MAX_TRY: usize = 1000;

/// Dispatch a built-in function call.
///
/// Returns `None` if the function name is not a built-in.
pub fn call_builtin(
    name: &str,
    args: Vec<Value>,
    rng: &mut dyn RngCore,
) -> Option<Result<Value, EvalError>> {
    // Ok(None) → not a builtin, Ok(Some(v)) → success, Err(e) → call failed.
    fn inner(name: &str, args: Vec<Value>, rng: &mut dyn RngCore) -> Result<Option<Value>, EvalError> {
        Ok(Some(match name {
            // ── Conversions ──────────────────────────────────────────────────
            "int" => {
                let v = get_arg(&args, 0, name)?;
                match v {
                    Value::Float(x) => Value::Int(x.trunc() as i64),
                    Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                        EvalError::TypeMismatch(format!("invalid literal for int(): '{s}'"))
                    })?,
                    other => Value::Int(other.as_int().ok_or_else(|| {
                        EvalError::TypeMismatch(format!("int() argument is '{}'", other.type_name()))
                    })?),
                }
            }
            "float" => {
                let v = get_arg(&args, 0, name)?;
                Value::Float(v.as_float().ok_or_else(|| {
                    EvalError::TypeMismatch(format!("could not convert '{v}' to float"))
                })?)
            }
            "str" => Value::Str(get_arg(&args, 0, name)?.to_string()),
            "len" => match get_arg(&args, 0, name)? {
                Value::Str(s) => Value::Int(s.chars().count() as i64),
                Value::List(items) => Value::Int(items.len() as i64),
                other => {
                    return Err(EvalError::TypeMismatch(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            },

            // ── Math ─────────────────────────────────────────────────────────
            "abs" => match get_arg(&args, 0, name)? {
                Value::Int(n) => n.checked_abs().map_or(Value::Float((*n as f64).abs()), Value::Int),
                other => Value::Float(num(other, name)?.abs()),
            },
            "round" => {
                let x = num(get_arg(&args, 0, name)?, name)?;
                match args.get(1) {
                    None => Value::Int(x.round() as i64),
                    Some(d) => {
                        let d = d.as_int().ok_or_else(|| {
                            EvalError::TypeMismatch("round(): ndigits must be an integer".into())
                        })?;
                        let factor = 10f64.powi(d as i32);
                        Value::Float((x * factor).round() / factor)
                    }
                }
            }
            "sqrt" => Value::Float(num(get_arg(&args, 0, name)?, name)?.sqrt()),
            "pow" => {
                let base = get_arg(&args, 0, name)?;
                let exp = get_arg(&args, 1, name)?;
                base.arith_pow(exp)?
            }
            "min" | "max" => {
                let items: Vec<Value> = match args.as_slice() {
                    [Value::List(items)] => items.clone(),
                    _ => args.clone(),
                };
                let mut best: Option<Value> = None;
                for item in items {
                    best = Some(match best {
                        None => item,
                        Some(cur) => {
                            let ord = item.compare(&cur).ok_or_else(|| {
                                EvalError::TypeMismatch(format!("{name}(): values are not comparable"))
                            })?;
                            let take = if name == "min" {
                                ord == std::cmp::Ordering::Less
                            } else {
                                ord == std::cmp::Ordering::Greater
                            };
                            if take { item } else { cur }
                        }
                    });
                }
                best.ok_or_else(|| EvalError::TypeMismatch(format!("{name}() arg is an empty sequence")))?
            }

            // ── Experiment helpers ───────────────────────────────────────────
            "sometimes" => {
                let p = match args.first() {
                    None => 0.5,
                    Some(v) => match strict_num(v) {
                        Some(p) if (0.0..=1.0).contains(&p) => p,
                        _ => {
                            return Err(ValidationError::new(
                                "p should be a numeric value between 0 and 1",
                            )
                            .into())
                        }
                    },
                };
                Value::Bool(rng.gen::<f64>() < p)
            }
            "xy_from_polar" => {
                let rho = num_arg(&args, 0, "rho", name)?;
                let phi = num_arg(&args, 1, "phi", name)?;
                let pole = parse_pole(args.get(2))?;
                pair(from_polar(rho, phi, pole))
            }
            "xy_to_polar" => {
                let x = num_arg(&args, 0, "x", name)?;
                let y = num_arg(&args, 1, "y", name)?;
                let (ox, oy) = parse_pole(args.get(2))?;
                let (dx, dy) = (x - ox, y - oy);
                pair((dx.hypot(dy), dy.atan2(dx).to_degrees()))
            }
            "xy_distance" => {
                let coords: Option<Vec<f64>> = (0..4).map(|i| args.get(i).and_then(strict_num)).collect();
                let c = coords.ok_or_else(|| {
                    ValidationError::new("Coordinates should be numeric in xy_distance()")
                })?;
                Value::Float(distance((c[0], c[1]), (c[2], c[3])))
            }
            "xy_circle" => {
                let n = match args.first().and_then(|v| v.as_int()) {
                    Some(n) if n >= 0 => point_count(n as u64, 1, name)?,
                    _ => {
                        return Err(ValidationError::new(
                            "n should be a non-negative integer in xy_circle()",
                        )
                        .into())
                    }
                };
                let rho = args.get(1).and_then(strict_num);
                let phi0 = match args.get(2) {
                    None => Some(0.0),
                    Some(v) => strict_num(v),
                };
                let (Some(rho), Some(mut phi)) = (rho, phi0) else {
                    return Err(ValidationError::new(
                        "rho and phi0 should be numeric in xy_circle()",
                    )
                    .into());
                };
                let pole = parse_pole(args.get(3))?;
                let mut points = Vec::with_capacity(n);
                for _ in 0..n {
                    points.push(pair(from_polar(rho, phi, pole)));
                    phi += 360.0 / n as f64;
                }
                Value::List(points)
            }
            "xy_grid" => {
                let (n_col, n_row) = parse_pair_or_scalar(
                    args.first(),
                    "n should be a single non-negative number, or an array of two non-negative numbers in xy_grid()",
                )?;
                let (s_col, s_row) = parse_pair_or_scalar(
                    args.get(1),
                    "spacing should be a single non-negative number, or an array of two non-negative numbers in xy_grid()",
                )?;
                let (ox, oy) = parse_pole(args.get(2))?;
                let (n_col, n_row) = (n_col.max(0.0) as u64, n_row.max(0.0) as u64);
                let total = point_count(n_col, n_row, name)?;
                let (n_col, n_row) = (n_col as usize, n_row as usize);
                let mut points = Vec::with_capacity(total);
                for row in 0..n_row {
                    let y = (row as f64 - (n_row as f64 - 1.0) / 2.0) * s_row + oy;
                    for col in 0..n_col {
                        let x = (col as f64 - (n_col as f64 - 1.0) / 2.0) * s_col + ox;
                        points.push(pair((x, y)));
                    }
                }
                Value::List(points)
            }
            "xy_random" => xy_random(&args, rng)?,

            _ => return Ok(None),
        }))
    }
    inner(name, args, rng).transpose()
}

// ── Geometry ──────────────────────────────────────────────────────────────────

fn from_polar(rho: f64, phi_deg: f64, (ox, oy): (f64, f64)) -> (f64, f64) {
    let phi = phi_deg / 360.0 * 2.0 * PI;
    (rho * phi.cos() + ox, rho * phi.sin() + oy)
}

fn distance((x1, y1): (f64, f64), (x2, y2): (f64, f64)) -> f64 {
    (x1 - x2).hypot(y1 - y2)
}

fn xy_random(args: &[Value], rng: &mut dyn RngCore) -> Result<Value, EvalError> {
    let n = match args.first().and_then(|v| v.as_int()) {
        Some(n) if n >= 0 => point_count(n as u64, 1, "xy_random")?,
        _ => return Err(ValidationError::new("n should be a non-negative number in xy_random()").into()),
    };
    let (Some(width), Some(height)) = (
        args.get(1).and_then(strict_num),
        args.get(2).and_then(strict_num),
    ) else {
        return Err(ValidationError::new("width and height should be numeric in xy_random()").into());
    };
    let min_dist = match args.get(3) {
        None => 0.0,
        Some(v) => match strict_num(v) {
            Some(d) if d >= 0.0 => d,
            _ => {
                return Err(
                    ValidationError::new("min_dist should be a non-negative number in xy_random()").into(),
                )
            }
        },
    };
    let (ox, oy) = parse_pole(args.get(4))?;

    for _ in 0..MAX_TRY {
        let mut points: Vec<(f64, f64)> = Vec::with_capacity(n);
        for _ in 0..n {
            for _ in 0..MAX_TRY {
                let candidate = (
                    (rng.gen::<f64>() - 0.5) * width + ox,
                    (rng.gen::<f64>() - 0.5) * height + oy,
                );
                if points.iter().all(|&p| distance(candidate, p) >= min_dist) {
                    points.push(candidate);
                    break;
                }
            }
        }
        if points.len() == n {
            return Ok(Value::List(points.into_iter().map(pair).collect()));
        }
    }
    Err(ValidationError::new("Failed to generate random coordinates in xy_random()").into())
}

// ── Argument helpers ──────────────────────────────────────────────────────────

/// `a * b` points, or an error when that is more than [`MAX_LEN`].
fn point_count(a: u64, b: u64, func: &str) -> Result<usize, ValidationError> {
    a.checked_mul(b)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n <= MAX_LEN)
        .ok_or_else(|| ValidationError::new(format!("too many points requested in {func}()")))
}

fn pair((x, y): (f64, f64)) -> Value {
    Value::List(vec![Value::Float(x), Value::Float(y)])
}

/// Numbers only; numeric strings are rejected.
fn strict_num(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn get_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a Value, EvalError> {
    args.get(idx)
        .ok_or_else(|| EvalError::TypeMismatch(format!("{name}: argument {idx} missing")))
}

fn num(v: &Value, name: &str) -> Result<f64, EvalError> {
    v.as_float().ok_or_else(|| {
        EvalError::TypeMismatch(format!("{name}: expected a number, got '{}'", v.type_name()))
    })
}

fn num_arg(args: &[Value], idx: usize, arg: &str, name: &str) -> Result<f64, EvalError> {
    args.get(idx)
        .and_then(strict_num)
        .ok_or_else(|| ValidationError::new(format!("{arg} should be numeric in {name}()")).into())
}

/// A `pole` must be a list of exactly two numbers; absent means the origin.
fn parse_pole(v: Option<&Value>) -> Result<(f64, f64), ValidationError> {
    let err = || ValidationError::new("pole should be an array of two numeric values");
    match v {
        None => Ok((0.0, 0.0)),
        Some(Value::List(items)) if items.len() == 2 => {
            match (strict_num(&items[0]), strict_num(&items[1])) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(err()),
            }
        }
        Some(_) => Err(err()),
    }
}

fn parse_pair_or_scalar(v: Option<&Value>, msg: &str) -> Result<(f64, f64), ValidationError> {
    match v {
        Some(Value::List(items)) if items.len() == 2 => {
            match (strict_num(&items[0]), strict_num(&items[1])) {
                (Some(a), Some(b)) => Ok((a, b)),
                _ => Err(ValidationError::new(msg)),
            }
        }
        Some(v) => strict_num(v).map(|n| (n, n)).ok_or_else(|| ValidationError::new(msg)),
        None => Err(ValidationError::new(msg)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut rng = StdRng::seed_from_u64(7);
        call_builtin(name, args, &mut rng).expect("not a builtin")
    }

    fn as_pair(v: &Value) -> (f64, f64) {
        match v {
            Value::List(items) => (
                items[0].as_float().unwrap(),
                items[1].as_float().unwrap(),
            ),
            other => panic!("not a pair: {other:?}"),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn not_a_builtin() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(call_builtin("nosuch", vec![], &mut rng).is_none());
    }

    #[test]
    fn conversions() {
        assert_eq!(call("int", vec![Value::Float(3.9)]), Ok(Value::Int(3)));
        assert_eq!(call("int", vec!["12".into()]), Ok(Value::Int(12)));
        assert!(call("int", vec!["x".into()]).is_err());
        assert_eq!(call("float", vec![Value::Int(2)]), Ok(Value::Float(2.0)));
        assert_eq!(call("str", vec![Value::Int(5)]), Ok(Value::Str("5".into())));
        assert_eq!(call("len", vec!["tést".into()]), Ok(Value::Int(4)));
    }

    #[test]
    fn min_max() {
        let args = vec![Value::Int(3), Value::Int(1), Value::Int(2)];
        assert_eq!(call("min", args.clone()), Ok(Value::Int(1)));
        assert_eq!(call("max", vec![Value::List(args)]), Ok(Value::Int(3)));
        assert!(call("max", vec![]).is_err());
    }

    #[test]
    fn round_digits() {
        assert_eq!(call("round", vec![Value::Float(2.6)]), Ok(Value::Int(3)));
        assert_eq!(
            call("round", vec![Value::Float(1.2345), Value::Int(2)]),
            Ok(Value::Float(1.23))
        );
    }

    #[test]
    fn sometimes_validates_p() {
        assert_eq!(call("sometimes", vec![Value::Int(1)]), Ok(Value::Bool(true)));
        assert_eq!(call("sometimes", vec![Value::Int(0)]), Ok(Value::Bool(false)));
        assert!(matches!(
            call("sometimes", vec![Value::Float(1.5)]),
            Err(EvalError::Validation(_))
        ));
        assert!(call("sometimes", vec!["0.5".into()]).is_err());
    }

    #[test]
    fn polar_round_trip() {
        let xy = call("xy_from_polar", vec![Value::Int(10), Value::Int(90)]).unwrap();
        let (x, y) = as_pair(&xy);
        assert!(close(x, 0.0) && close(y, 10.0));
        let polar = call("xy_to_polar", vec![Value::Float(x), Value::Float(y)]).unwrap();
        let (rho, phi) = as_pair(&polar);
        assert!(close(rho, 10.0) && close(phi, 90.0));
    }

    #[test]
    fn pole_must_be_pair_of_numbers() {
        let bad_poles = [
            Value::Int(0),
            Value::List(vec![Value::Int(0)]),
            Value::List(vec![Value::Int(0), "a".into()]),
        ];
        for pole in bad_poles {
            let res = call("xy_from_polar", vec![Value::Int(1), Value::Int(0), pole]);
            assert!(matches!(res, Err(EvalError::Validation(_))));
        }
        let shifted = call(
            "xy_from_polar",
            vec![
                Value::Int(1),
                Value::Int(0),
                Value::List(vec![Value::Int(5), Value::Int(5)]),
            ],
        )
        .unwrap();
        let (x, y) = as_pair(&shifted);
        assert!(close(x, 6.0) && close(y, 5.0));
    }

    #[test]
    fn distance_requires_numbers() {
        let args: Vec<Value> = [0, 0, 3, 4].iter().map(|&n| Value::Int(n)).collect();
        assert_eq!(call("xy_distance", args), Ok(Value::Float(5.0)));
        assert!(call("xy_distance", vec![Value::Int(0), "0".into()]).is_err());
    }

    #[test]
    fn circle_and_grid_sizes() {
        let circle = call("xy_circle", vec![Value::Int(4), Value::Int(100)]).unwrap();
        let Value::List(points) = circle else { panic!() };
        assert_eq!(points.len(), 4);
        let (x, y) = as_pair(&points[1]);
        assert!(close(x, 0.0) && close(y, 100.0));

        let grid = call(
            "xy_grid",
            vec![
                Value::List(vec![Value::Int(3), Value::Int(2)]),
                Value::Int(10),
            ],
        )
        .unwrap();
        let Value::List(points) = grid else { panic!() };
        assert_eq!(points.len(), 6);
        assert_eq!(as_pair(&points[0]), (-10.0, -5.0));
        assert_eq!(as_pair(&points[5]), (10.0, 5.0));
    }

    #[test]
    fn oversized_point_sets_are_rejected() {
        let huge = Value::Int(9_000_000_000_000_000_000);
        for (func, args) in [
            ("xy_circle", vec![huge.clone(), Value::Int(100)]),
            ("xy_grid", vec![Value::List(vec![huge.clone(), huge.clone()]), Value::Int(10)]),
            ("xy_grid", vec![Value::Int(5_000_000), Value::Int(10)]),
            ("xy_random", vec![huge.clone(), Value::Int(500), Value::Int(500)]),
        ] {
            assert!(
                matches!(call(func, args), Err(EvalError::Validation(_))),
                "{func} accepted an oversized request"
            );
        }
    }

    #[test]
    fn abs_of_min_int() {
        assert_eq!(call("abs", vec![Value::Int(-5)]), Ok(Value::Int(5)));
        assert_eq!(
            call("abs", vec![Value::Int(i64::MIN)]),
            Ok(Value::Float(-(i64::MIN as f64)))
        );
    }

    #[test]
    fn random_points_respect_min_dist() {
        let res = call(
            "xy_random",
            vec![Value::Int(5), Value::Int(500), Value::Int(500), Value::Int(50)],
        )
        .unwrap();
        let Value::List(points) = res else { panic!() };
        assert_eq!(points.len(), 5);
        let pts: Vec<(f64, f64)> = points.iter().map(as_pair).collect();
        for (i, a) in pts.iter().enumerate() {
            for b in &pts[i + 1..] {
                assert!(distance(*a, *b) >= 50.0);
            }
        }
    }
}
