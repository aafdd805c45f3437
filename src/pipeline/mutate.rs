//! Field mutation expressions.
//!
//! A mutation rewrites individual fields of the current value instead of
//! replacing it wholesale, e.g. `{"stock": {"sub": 1}, "title": {"set": "X"}}`.
//! The result becomes the pending candidate and goes through reactors like
//! any other put.

use crate::error::{Result, StoreError};
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;

/// One operation on one field.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOp {
    Set(Json),
    Add(Number),
    Sub(Number),
    Mul(Number),
    Div(Number),
    Min(Number),
    Max(Number),
}

impl MutationOp {
    fn parse(field: &str, op: &str, arg: &Json) -> Result<Self> {
        if matches!(op, "set") {
            return Ok(MutationOp::Set(arg.clone()));
        }

        let n = match arg {
            Json::Number(n) => n.clone(),
            other => {
                return Err(StoreError::Validation(format!(
                    "invalid mutation value for '{}': {}",
                    field, other
                )))
            }
        };

        match op {
            "add" | "+" => Ok(MutationOp::Add(n)),
            "sub" | "subtract" | "-" => Ok(MutationOp::Sub(n)),
            "mul" | "multiply" | "*" => Ok(MutationOp::Mul(n)),
            "div" | "divide" | "/" => Ok(MutationOp::Div(n)),
            "min" | "minimum" => Ok(MutationOp::Min(n)),
            "max" | "maximum" => Ok(MutationOp::Max(n)),
            other => Err(StoreError::Validation(format!(
                "invalid mutation expression for '{}': {}",
                field, other
            ))),
        }
    }

    fn apply(&self, field: &str, old: Option<&Json>) -> Result<Json> {
        let arg = match self {
            MutationOp::Set(v) => return Ok(v.clone()),
            MutationOp::Add(n)
            | MutationOp::Sub(n)
            | MutationOp::Mul(n)
            | MutationOp::Div(n)
            | MutationOp::Min(n)
            | MutationOp::Max(n) => n,
        };

        let zero = Number::from(0);
        let old = match old {
            None => &zero,
            Some(Json::Number(n)) => n,
            Some(_) => {
                return Err(StoreError::Validation(format!(
                    "cannot perform mutation on non-numeric field '{}'",
                    field
                )))
            }
        };

        if let (Some(a), Some(b)) = (old.as_i64(), arg.as_i64()) {
            return self.apply_int(field, a, b).map(|v| Json::Number(v.into()));
        }

        let (a, b) = match (old.as_f64(), arg.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(StoreError::Validation(format!(
                    "invalid numeric value for '{}'",
                    field
                )))
            }
        };
        let result = self.apply_float(field, a, b)?;
        Number::from_f64(result).map(Json::Number).ok_or_else(|| {
            StoreError::Validation(format!("mutation of '{}' is not a finite number", field))
        })
    }

    fn apply_int(&self, field: &str, a: i64, b: i64) -> Result<i64> {
        let result = match self {
            MutationOp::Add(_) => a.checked_add(b),
            MutationOp::Sub(_) => a.checked_sub(b),
            MutationOp::Mul(_) => a.checked_mul(b),
            MutationOp::Div(_) if b == 0 => return Err(division_by_zero(field)),
            MutationOp::Div(_) => a.checked_div(b),
            MutationOp::Min(_) => Some(a.min(b)),
            MutationOp::Max(_) => Some(a.max(b)),
            MutationOp::Set(_) => unreachable!("set handled before numeric dispatch"),
        };
        result.ok_or_else(|| StoreError::Validation(format!("integer overflow on '{}'", field)))
    }

    fn apply_float(&self, field: &str, a: f64, b: f64) -> Result<f64> {
        Ok(match self {
            MutationOp::Add(_) => a + b,
            MutationOp::Sub(_) => a - b,
            MutationOp::Mul(_) => a * b,
            MutationOp::Div(_) if b == 0.0 => return Err(division_by_zero(field)),
            MutationOp::Div(_) => a / b,
            MutationOp::Min(_) => a.min(b),
            MutationOp::Max(_) => a.max(b),
            MutationOp::Set(_) => unreachable!("set handled before numeric dispatch"),
        })
    }
}

fn division_by_zero(field: &str) -> StoreError {
    StoreError::Validation(format!(
        "invalid mutation expression for '{}': division by zero",
        field
    ))
}

/// A set of per-field operations applied together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMutations {
    ops: BTreeMap<String, MutationOp>,
}

impl FieldMutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, op: MutationOp) -> Self {
        self.ops.insert(field.into(), op);
        self
    }

    pub fn set(self, field: impl Into<String>, value: Json) -> Self {
        self.with(field, MutationOp::Set(value))
    }

    pub fn add(self, field: impl Into<String>, n: impl Into<Number>) -> Self {
        self.with(field, MutationOp::Add(n.into()))
    }

    pub fn sub(self, field: impl Into<String>, n: impl Into<Number>) -> Self {
        self.with(field, MutationOp::Sub(n.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Parse `{"field": {"op": arg}, ...}`. Exactly one op per field.
    pub fn from_json(expr: &Json) -> Result<Self> {
        let fields = expr.as_object().ok_or_else(|| {
            StoreError::Validation("mutation must be an object of field expressions".into())
        })?;

        let mut ops = BTreeMap::new();
        for (field, expr) in fields {
            let ops_for_field = match expr.as_object() {
                Some(map) if map.len() == 1 => map,
                Some(_) => {
                    return Err(StoreError::Validation(format!(
                        "invalid mutation expression for '{}': only one op allowed",
                        field
                    )))
                }
                None => {
                    return Err(StoreError::Validation(format!(
                        "invalid mutation expression for '{}': {}",
                        field, expr
                    )))
                }
            };

            for (op, arg) in ops_for_field {
                ops.insert(field.clone(), MutationOp::parse(field, op, arg)?);
            }
        }

        Ok(Self { ops })
    }

    /// Apply to the current value (absent = empty object).
    pub fn apply(&self, current: Option<&Json>) -> Result<Json> {
        let mut object = match current {
            None | Some(Json::Null) => Map::new(),
            Some(Json::Object(map)) => map.clone(),
            Some(_) => {
                return Err(StoreError::Validation(
                    "cannot apply field mutations to a non-object value".into(),
                ))
            }
        };

        for (field, op) in &self.ops {
            let next = op.apply(field, object.get(field))?;
            object.insert(field.clone(), next);
        }

        Ok(Json::Object(object))
    }
}
