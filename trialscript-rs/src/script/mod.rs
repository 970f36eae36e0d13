//! The experiment script language.
//!
//! - [`command`]: command lines (`draw fixdot x=0 y=0`), quoting helpers
//! - [`stmt`]: item scripts, multiline variables, dedenting
//! - [`expand`]: `[var]` and `[=expr]` interpolation
//! - [`cond`]: `run_if`/`break_if` style conditions
//! - [`expr`], [`builtins`]: the sandboxed expression evaluator
//!
//! # Quick start
//!
//! ```rust
//! use trialscript::script::cond::compile_cond;
//! use trialscript::script::Value;
//! use trialscript::var::{VarStore, Workspace};
//!
//! let mut ws = Workspace::seeded(VarStore::new().shared(), 1);
//! ws.set("width", 1024i64);
//! assert_eq!(ws.eval_text("w=[width]").unwrap(), Value::from("w=1024"));
//! let cond = compile_cond("[width] > 800").unwrap();
//! assert!(cond.eval(&mut ws).unwrap());
//! ```

pub mod builtins;
pub mod command;
pub mod cond;
pub mod expand;
pub mod expr;
pub mod stmt;
pub mod value;

// Re-exports for convenience.
pub use command::{create_cmd, parse_cmd, Command};
pub use cond::{compile_cond, Condition};
pub use expand::eval_text;
pub use expr::EvalContext;
pub use value::Value;
