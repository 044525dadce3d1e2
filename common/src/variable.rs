use std::{cmp::Ordering, collections::BTreeMap, fmt};

use thiserror::Error;

use crate::record::{Record, Value};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("record has no field `{0}` and the variable declares no default")]
    MissingField(String),
    #[error("no variable named `{0}` is registered")]
    Unknown(String),
}

/// Whether a variable groups records (x axis, series, filters) or measures
/// them (bar heights).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

pub type ValueFn = fn(&Registry, &Record) -> Option<Value>;
pub type InvalidFn = fn(&Registry, &Record) -> bool;
pub type FormatFn = fn(&Value) -> String;
pub type OrderFn = fn(&Value, &Value) -> Ordering;

/// How a variable's value is produced from a record.
#[derive(Debug, Clone)]
pub enum Kind {
    /// Reads the named field directly.
    Stored { field: &'static str },
    /// Arithmetic over other variables.
    Expr(Expr),
    /// Arbitrary logic; may evaluate other variables through the registry.
    Func(ValueFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Small explicit expression tree for derived numeric variables.
#[derive(Debug, Clone)]
pub enum Expr {
    Var(&'static str),
    Const(f64),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn var(name: &'static str) -> Self {
        Expr::Var(name)
    }

    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    fn binary(self, op: BinOp, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(self, rhs: Expr) -> Self {
        self.binary(BinOp::Add, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Self {
        self.binary(BinOp::Sub, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Self {
        self.binary(BinOp::Mul, rhs)
    }

    pub fn div(self, rhs: Expr) -> Self {
        self.binary(BinOp::Div, rhs)
    }
}

/// A named computation extracting or deriving a value from a record.
#[derive(Debug, Clone)]
pub struct Variable {
    name: &'static str,
    display: Option<&'static str>,
    direction: Direction,
    kind: Kind,
    default: Option<Value>,
    invalid_if: Option<InvalidFn>,
    format: Option<FormatFn>,
    x_order: Option<OrderFn>,
    label_x_axis: bool,
}

impl Variable {
    fn new(name: &'static str, direction: Direction, kind: Kind) -> Self {
        Self {
            name,
            display: None,
            direction,
            kind,
            default: None,
            invalid_if: None,
            format: None,
            x_order: None,
            label_x_axis: true,
        }
    }

    /// Stored variable reading the field of the same name.
    pub fn stored(name: &'static str, direction: Direction) -> Self {
        Self::new(name, direction, Kind::Stored { field: name })
    }

    pub fn expr(name: &'static str, direction: Direction, expr: Expr) -> Self {
        Self::new(name, direction, Kind::Expr(expr))
    }

    pub fn func(name: &'static str, direction: Direction, f: ValueFn) -> Self {
        Self::new(name, direction, Kind::Func(f))
    }

    pub fn with_display(mut self, display: &'static str) -> Self {
        self.display = Some(display);
        self
    }

    /// Value used when the stored field is absent from a record.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Records for which this returns true are silently excluded from any
    /// plot using this variable.
    pub fn invalid_if(mut self, invalid: InvalidFn) -> Self {
        self.invalid_if = Some(invalid);
        self
    }

    /// Presentation-only formatter; never affects grouping or filtering.
    pub fn with_format(mut self, format: FormatFn) -> Self {
        self.format = Some(format);
        self
    }

    /// Explicit x-bucket ordering; without it buckets keep first-appearance
    /// order.
    pub fn with_x_order(mut self, order: OrderFn) -> Self {
        self.x_order = Some(order);
        self
    }

    /// Suppress the axis description when this variable is on the x axis.
    pub fn without_x_label(mut self) -> Self {
        self.label_x_axis = false;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn display_name(&self) -> &str {
        self.display.unwrap_or(self.name)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn x_order(&self) -> Option<OrderFn> {
        self.x_order
    }

    pub fn labels_x_axis(&self) -> bool {
        self.label_x_axis
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            Kind::Stored { .. } => "stored",
            Kind::Expr(_) => "expression",
            Kind::Func(_) => "function",
        }
    }
}

/// Append-only variable registry, built once at startup and passed by
/// reference through the pipeline.
#[derive(Debug, Default)]
pub struct Registry {
    vars: BTreeMap<&'static str, Variable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, var: Variable) {
        let name = var.name;
        let previous = self.vars.insert(name, var);
        assert!(previous.is_none(), "variable `{name}` registered twice");
    }

    pub fn get(&self, name: &str) -> Result<&Variable, VariableError> {
        self.vars
            .get(name)
            .ok_or_else(|| VariableError::Unknown(name.to_owned()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Evaluates a variable on a record. `Ok(None)` means the variable is
    /// invalid for this record (silent exclusion); `MissingField` is the one
    /// record-level problem that surfaces as an error.
    pub fn eval(&self, name: &str, record: &Record) -> Result<Option<Value>, VariableError> {
        let var = self.get(name)?;
        if let Some(invalid) = var.invalid_if
            && invalid(self, record)
        {
            return Ok(None);
        }
        match &var.kind {
            Kind::Stored { field } => match record.get(field) {
                Some(value) => Ok(Some(value.clone())),
                None => var
                    .default
                    .clone()
                    .map(Some)
                    .ok_or_else(|| VariableError::MissingField((*field).to_owned())),
            },
            Kind::Expr(expr) => Ok(self.eval_expr(expr, record)?.map(Value::Float)),
            Kind::Func(f) => Ok(f(self, record)),
        }
    }

    pub fn is_valid(&self, name: &str, record: &Record) -> Result<bool, VariableError> {
        Ok(self.eval(name, record)?.is_some())
    }

    /// Human-readable rendering of a value; falls back to `Display`.
    pub fn format(&self, name: &str, value: &Value) -> String {
        match self.vars.get(name).and_then(|var| var.format) {
            Some(format) => format(value),
            None => value.to_string(),
        }
    }

    // An invalid operand makes the whole expression invalid rather than
    // erroring, as does a non-numeric one.
    fn eval_expr(&self, expr: &Expr, record: &Record) -> Result<Option<f64>, VariableError> {
        match expr {
            Expr::Const(value) => Ok(Some(*value)),
            Expr::Var(name) => Ok(self.eval(name, record)?.and_then(|v| v.as_f64())),
            Expr::Binary { op, lhs, rhs } => {
                let (Some(lhs), Some(rhs)) =
                    (self.eval_expr(lhs, record)?, self.eval_expr(rhs, record)?)
                else {
                    return Ok(None);
                };
                Ok(Some(match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => lhs / rhs,
                }))
            }
        }
    }
}

/// Composable inclusion predicate over variables. A record with any
/// referenced variable invalid never matches.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Eq(&'static str, Value),
    Ne(&'static str, Value),
    Contains(&'static str, String),
    And(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(var: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(var, value.into())
    }

    pub fn ne(var: &'static str, value: impl Into<Value>) -> Self {
        Filter::Ne(var, value.into())
    }

    /// Substring containment on a string-valued variable.
    pub fn contains(var: &'static str, needle: impl Into<String>) -> Self {
        Filter::Contains(var, needle.into())
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// `Ok(None)` when a referenced variable is invalid for the record.
    pub fn matches(
        &self,
        registry: &Registry,
        record: &Record,
    ) -> Result<Option<bool>, VariableError> {
        Ok(match self {
            Filter::All => Some(true),
            Filter::Eq(var, want) => registry.eval(var, record)?.map(|v| v == *want),
            Filter::Ne(var, want) => registry.eval(var, record)?.map(|v| v != *want),
            Filter::Contains(var, needle) => registry
                .eval(var, record)?
                .and_then(|v| v.as_str().map(|s| s.contains(needle.as_str()))),
            Filter::And(lhs, rhs) => {
                match (lhs.matches(registry, record)?, rhs.matches(registry, record)?) {
                    (Some(l), Some(r)) => Some(l && r),
                    _ => None,
                }
            }
            Filter::Not(inner) => inner.matches(registry, record)?.map(|b| !b),
        })
    }

    /// Names of every variable the predicate references.
    pub fn variables(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<&'static str>) {
        match self {
            Filter::All => {}
            Filter::Eq(var, _) | Filter::Ne(var, _) | Filter::Contains(var, _) => {
                if !out.contains(var) {
                    out.push(var);
                }
            }
            Filter::And(lhs, rhs) => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Filter::Not(inner) => inner.collect_variables(out),
        }
    }
}
