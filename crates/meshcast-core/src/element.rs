//! Opaque values carried by broadcasts and grow-only sets.
//!
//! The harness may send any JSON value, so elements wrap a
//! [`serde_json::Value`] and supply the total order that ordered sets need.
//! Equality is value equality: `1` and `1.0` are different elements, two
//! objects with the same keys and values are the same element.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Element(Value);

impl Element {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Element {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Element> for Value {
    fn from(element: Element) -> Self {
        element.0
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Element {}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

/// null < bool < number < string < array < object
fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match compare_values(x, y) {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                }
            }
            xs.len().cmp(&ys.len())
        }
        (Value::Object(xs), Value::Object(ys)) => {
            // Sorted explicitly: with `preserve_order` maps iterate in
            // insertion order.
            let mut xs: Vec<_> = xs.iter().collect();
            let mut ys: Vec<_> = ys.iter().collect();
            xs.sort_by(|a, b| a.0.cmp(b.0));
            ys.sort_by(|a, b| a.0.cmp(b.0));
            for ((kx, vx), (ky, vy)) in xs.iter().zip(&ys) {
                match kx.cmp(ky).then_with(|| compare_values(vx, vy)) {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    // Integers sort before floats of the same magnitude so 1 != 1.0.
    x.total_cmp(&y).then_with(|| a.is_f64().cmp(&b.is_f64()))
}
