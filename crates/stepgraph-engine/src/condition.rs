//! Condition evaluation over run state.
//!
//! Values are `serde_json::Value`s. Equality never fails: values of different
//! kinds are simply unequal. Ordering is only defined between two numbers, two
//! strings, two booleans, or two arrays of mutually ordered elements; any other
//! pairing is an error that fails the run.

use std::cmp::Ordering;

use serde_json::{Number, Value};
use tracing::warn;

use stepgraph_core::error::{Result, StepgraphError};
use stepgraph_core::graph::{Condition, Operator};
use stepgraph_core::types::RunState;

/// Evaluate `condition` against `state`.
///
/// A variable that is absent (or `null`) never satisfies a condition, whatever
/// the operator.
pub fn evaluate(state: &RunState, condition: &Condition) -> Result<bool> {
    let Some(left) = state.get(&condition.variable).filter(|v| !v.is_null()) else {
        return Ok(false);
    };
    let right = &condition.value;

    let ordering = |op: &Operator| -> Result<Ordering> {
        compare_values(left, right).ok_or_else(|| StepgraphError::IncomparableOperands {
            variable: condition.variable.clone(),
            operator: op.symbol().to_string(),
            left: kind_of(left).to_string(),
            right: kind_of(right).to_string(),
        })
    };

    match &condition.operator {
        Operator::Eq => Ok(values_equal(left, right)),
        Operator::Ne => Ok(!values_equal(left, right)),
        op @ Operator::Gt => Ok(ordering(op)? == Ordering::Greater),
        op @ Operator::Lt => Ok(ordering(op)? == Ordering::Less),
        op @ Operator::Ge => Ok(ordering(op)? != Ordering::Less),
        op @ Operator::Le => Ok(ordering(op)? != Ordering::Greater),
        Operator::Unsupported(raw) => {
            warn!(
                variable = %condition.variable,
                operator = %raw,
                "Unsupported condition operator, treating as false"
            );
            Ok(false)
        }
    }
}

/// Equality with numeric comparison for numbers (`85 == 85.0`).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, x)| b.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

/// Ordering between two values, or `None` when they are not comparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare_values(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

/// Exact numeric ordering. Integers are never rounded through `f64`.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (integer(a), integer(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        (Some(x), None) => compare_integer_float(x, b.as_f64()?),
        (None, Some(y)) => compare_integer_float(y, a.as_f64()?).map(Ordering::reverse),
        (None, None) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Compare an integer against a float without losing precision on either side.
fn compare_integer_float(int: i128, float: f64) -> Option<Ordering> {
    // Every i64 and u64 lies in [-2^63, 2^64).
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    const UPPER: f64 = 18_446_744_073_709_551_616.0;

    if float.is_nan() {
        return None;
    }
    if float >= UPPER {
        return Some(Ordering::Less);
    }
    if float < LOWER {
        return Some(Ordering::Greater);
    }

    let whole = float.trunc();
    // Exact: `whole` is integral and inside the i128 range.
    match int.cmp(&(whole as i128)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(float - whole)),
        other => Some(other),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
