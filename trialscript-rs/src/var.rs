//! Variable stores and the evaluation workspace.
//!
//! A [`VarStore`] holds raw values and may fall back to a parent store
//! through a weak handle: an item's store does not keep the experiment's
//! store alive. Interpolated reads go through a [`Workspace`], which pairs a
//! store with the random source used by the builtins.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::script::builtins::call_builtin;
use crate::script::expand::eval_text;
use crate::script::expr::{EvalContext, EvalError};
use crate::script::value::Value;

/// Interpolation depth past which a variable's raw text is returned.
const MAX_DEPTH: usize = 32;

/// Nested interpolations one outermost [`Workspace::get`] may perform.
const MAX_WORK: usize = 10_000;

pub type SharedStore = Rc<RefCell<VarStore>>;

/// Scoped key/value store.
#[derive(Debug, Default)]
pub struct VarStore {
    vars: HashMap<String, Value>,
    parent: Option<Weak<RefCell<VarStore>>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: &SharedStore) -> Self {
        VarStore { vars: HashMap::new(), parent: Some(Rc::downgrade(parent)) }
    }

    pub fn shared(self) -> SharedStore {
        Rc::new(RefCell::new(self))
    }

    /// Set (or overwrite) a variable, stored verbatim.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Uninterpolated value: local first, then the parent chain.
    pub fn get_raw(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.get(name) {
            return Some(v.clone());
        }
        let parent = self.parent.as_ref()?.upgrade()?;
        let found = parent.borrow().get_raw(name);
        found
    }

    /// Local variables only.
    pub fn has(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Remove a local variable. Returns `true` if it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    /// Local variables, sorted by name.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ── Workspace ─────────────────────────────────────────────────────────────────

/// A store plus the RNG; the context expressions are evaluated in.
///
/// Scoped workspaces made with [`Workspace::scoped`] share the RNG, so a
/// whole run draws from one seeded sequence.
pub struct Workspace {
    store: SharedStore,
    rng: Rc<RefCell<StdRng>>,
    /// Names being interpolated, innermost last.
    active: RefCell<Vec<String>>,
    budget: Cell<usize>,
}

impl Workspace {
    pub fn new(store: SharedStore, rng: StdRng) -> Self {
        Workspace {
            store,
            rng: Rc::new(RefCell::new(rng)),
            active: RefCell::new(Vec::new()),
            budget: Cell::new(MAX_WORK),
        }
    }

    pub fn seeded(store: SharedStore, seed: u64) -> Self {
        Self::new(store, StdRng::seed_from_u64(seed))
    }

    /// A workspace over another store sharing this one's RNG.
    pub fn scoped(&self, store: SharedStore) -> Workspace {
        Workspace {
            store,
            rng: Rc::clone(&self.rng),
            active: RefCell::new(Vec::new()),
            budget: Cell::new(MAX_WORK),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Interpolated value of `name`. String values are run through
    /// [`eval_text`]; a failing `[=expr]` leaves the raw text.
    ///
    /// A variable referring to itself, directly or through others, yields
    /// its raw text at the point of re-entry. Nesting deeper than
    /// `MAX_DEPTH` or costing more than `MAX_WORK` interpolations also stops
    /// at the raw text.
    pub fn get(&self, name: &str) -> Option<Value> {
        let raw = self.store.borrow().get_raw(name)?;
        let text = match raw {
            Value::Str(ref s) if s.contains('[') => s.clone(),
            other => return Some(other),
        };
        if self.active.borrow().is_empty() {
            self.budget.set(MAX_WORK);
        }
        if self.active.borrow().iter().any(|n| n == name) {
            log::debug!("{name} refers to itself, using raw text");
            return Some(raw);
        }
        if self.active.borrow().len() >= MAX_DEPTH || self.budget.get() == 0 {
            log::debug!("interpolation of {name} too deep, using raw text");
            return Some(raw);
        }
        self.budget.set(self.budget.get() - 1);
        self.active.borrow_mut().push(name.to_owned());
        let result = eval_text(&text, &mut View(self));
        self.active.borrow_mut().pop();
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("failed to interpolate {name}: {e}");
                Some(raw)
            }
        }
    }

    pub fn get_or(&self, name: &str, default: impl Into<Value>) -> Value {
        self.get(name).unwrap_or_else(|| default.into())
    }

    pub fn get_raw(&self, name: &str) -> Option<Value> {
        self.store.borrow().get_raw(name)
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.store.borrow_mut().set(name, value);
    }

    /// Remove a variable from this workspace's own store.
    pub fn unset(&self, name: &str) -> bool {
        self.store.borrow_mut().unset(name)
    }

    /// Interpolate text against this workspace.
    pub fn eval_text(&mut self, text: &str) -> Result<Value, EvalError> {
        eval_text(text, self)
    }

    /// Run `f` with the shared RNG.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        f(&mut self.rng.borrow_mut())
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut rng = self.rng.borrow_mut();
        call_builtin(name, args, &mut *rng)
            .unwrap_or_else(|| Err(EvalError::UnknownFunction(name.to_owned())))
    }
}

impl EvalContext for Workspace {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        self.call(name, args)
    }
}

/// Borrowed view used while interpolating from inside [`Workspace::get`].
struct View<'a>(&'a Workspace);

impl EvalContext for View<'_> {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.0.get(name)
    }

    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        self.0.call(name, args)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace::seeded(VarStore::new().shared(), 1)
    }

    #[test]
    fn set_and_get() {
        let mut vars = VarStore::new();
        vars.set("width", 1024i64);
        assert_eq!(vars.get_raw("width"), Some(Value::Int(1024)));
        assert!(vars.has("width"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn unset_absent_is_noop() {
        let mut vars = VarStore::new();
        vars.set("x", "1");
        assert!(vars.unset("x"));
        assert!(!vars.unset("x"));
        assert!(vars.is_empty());
    }

    #[test]
    fn parent_fallback_is_read_only() {
        let exp = VarStore::new().shared();
        exp.borrow_mut().set("width", 1024i64);
        let mut item = VarStore::with_parent(&exp);
        assert_eq!(item.get_raw("width"), Some(Value::Int(1024)));
        assert!(!item.has("width"));
        item.set("width", 10i64);
        assert_eq!(item.get_raw("width"), Some(Value::Int(10)));
        assert_eq!(exp.borrow().get_raw("width"), Some(Value::Int(1024)));
    }

    #[test]
    fn dropped_parent_is_not_kept_alive() {
        let exp = VarStore::new().shared();
        exp.borrow_mut().set("x", 1i64);
        let item = VarStore::with_parent(&exp);
        drop(exp);
        assert_eq!(item.get_raw("x"), None);
    }

    #[test]
    fn get_interpolates() {
        let ws = workspace();
        ws.set("width", 1024i64);
        ws.set("label", "w=[width]");
        ws.set("double", "[=width * 2]");
        assert_eq!(ws.get("label"), Some(Value::from("w=1024")));
        assert_eq!(ws.get("double"), Some(Value::Int(2048)));
        assert_eq!(ws.get_raw("label"), Some(Value::from("w=[width]")));
        assert_eq!(ws.get_or("missing", 5i64), Value::Int(5));
    }

    #[test]
    fn self_reference_is_bounded() {
        let ws = workspace();
        ws.set("loop", "[loop]");
        assert_eq!(ws.get("loop"), Some(Value::from("[loop]")));
    }

    #[test]
    fn repeated_self_reference_stops_at_reentry() {
        let ws = workspace();
        ws.set("a", "[a][a]");
        assert_eq!(ws.get("a"), Some(Value::from("[a][a][a][a]")));
    }

    #[test]
    fn mutual_reference_stops_at_reentry() {
        let ws = workspace();
        ws.set("a", "x[b]");
        ws.set("b", "y[a]");
        assert_eq!(ws.get("a"), Some(Value::from("xyx[b]")));
        assert_eq!(ws.get("b"), Some(Value::from("yxy[a]")));
    }

    #[test]
    fn fan_out_is_bounded() {
        // v0 = "[v1][v1]", v1 = "[v2][v2]", ...: 2^30 references unbounded.
        let ws = workspace();
        for i in 0..30 {
            ws.set(format!("v{i}"), format!("[v{0}][v{0}]", i + 1));
        }
        ws.set("v30", "z");
        let Some(Value::Str(s)) = ws.get("v0") else { panic!("v0 is not a string") };
        assert!(s.len() < 1 << 20);
        // The budget is refilled for the next lookup.
        assert_eq!(ws.get("v29"), Some(Value::from("zz")));
    }

    #[test]
    fn scoped_reads_through_parent() {
        let ws = workspace();
        ws.set("side", "left");
        let item = VarStore::with_parent(ws.store()).shared();
        item.borrow_mut().set("label", "cue [side]");
        let scoped = ws.scoped(item);
        assert_eq!(scoped.get("label"), Some(Value::from("cue left")));
    }

    #[test]
    fn builtins_are_callable() {
        let mut ws = workspace();
        ws.set("x", -3i64);
        assert_eq!(ws.eval_text("[=abs(var.x)]"), Ok(Value::Int(3)));
        assert!(matches!(ws.eval_text("[=nosuch()]"), Err(EvalError::UnknownFunction(_))));
    }
}
