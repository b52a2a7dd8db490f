//! Dynamic element type for collections.
//!
//! Every element that crosses the engine boundary is a `Value` on the host
//! side. The two callable arms (`Symbol`, `Func`) never cross the boundary
//! as data; they are consumed by the function codec.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A reference to a registered function plus its captured environment.
///
/// The environment is prepended to the call arguments when the engine
/// invokes the function, so `Func { name: "add", env: [Int(5)] }` behaves
/// as the partial application `add(5, _)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncRef {
    pub name: String,
    pub env: Vec<Value>,
}

/// A dynamically typed collection element.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A key/value or two-element tuple. KeyValue collections hold pairs.
    Pair(Box<Value>, Box<Value>),
    List(Vec<Value>),
    /// A named-callable reference, resolved against the engine's registry.
    Symbol(String),
    /// A function reference with captured environment.
    Func(FuncRef),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn pair(first: Value, second: Value) -> Self {
        Value::Pair(Box::new(first), Box::new(second))
    }

    pub fn list(items: impl Into<Vec<Value>>) -> Self {
        Value::List(items.into())
    }

    /// A named-callable reference with no captured environment.
    pub fn func(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// A function reference with captured environment values.
    pub fn func_with(name: impl Into<String>, env: impl Into<Vec<Value>>) -> Self {
        Value::Func(FuncRef {
            name: name.into(),
            env: env.into(),
        })
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Symbol(_) | Value::Func(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(&Value, &Value)> {
        match self {
            Value::Pair(a, b) => Some((a, b)),
            _ => None,
        }
    }

    /// True under the layer's truthiness rule: everything except `Null`
    /// and `Bool(false)`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Pair(_, _) => "pair",
            Value::List(_) => "list",
            Value::Symbol(_) => "symbol",
            Value::Func(_) => "function",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            // Int and Float share a rank so numeric values order numerically.
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
            Value::Pair(_, _) => 5,
            Value::List(_) => 6,
            Value::Symbol(_) => 7,
            Value::Func(_) => 8,
        }
    }

    /// Total order over values, used by sort operations. Numbers compare
    /// numerically across Int/Float; different kinds order by kind.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.cmp(b),
            (Value::Pair(a1, a2), Value::Pair(b1, b2)) => {
                a1.total_cmp(b1).then_with(|| a2.total_cmp(b2))
            }
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Pair(a1, a2), Value::Pair(b1, b2)) => a1 == b1 && a2 == b2,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            // Floats hash by bit pattern, consistent with eq above.
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Pair(a, b) => {
                a.hash(state);
                b.hash(state);
            }
            Value::List(items) => items.hash(state),
            Value::Symbol(s) => s.hash(state),
            Value::Func(f) => f.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Pair(a, b) => write!(f, "({}, {})", a, b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Symbol(s) => write!(f, ":{}", s),
            Value::Func(fr) => write!(f, "#<fn {}>", fr.name),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_numeric_cross_ordering() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(3.0).total_cmp(&Value::Int(2)), Ordering::Greater);
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.0)), Ordering::Equal);
    }

    #[test]
    fn test_values_key_maps() {
        let mut m = HashMap::new();
        m.insert(Value::str("a"), 1);
        m.insert(Value::Int(7), 2);
        m.insert(Value::Float(1.5), 3);
        assert_eq!(m.get(&Value::str("a")), Some(&1));
        assert_eq!(m.get(&Value::Int(7)), Some(&2));
        assert_eq!(m.get(&Value::Float(1.5)), Some(&3));
        assert_eq!(m.get(&Value::Float(1.25)), None);
    }

    #[test]
    fn test_callable_detection() {
        assert!(Value::func("double").is_callable());
        assert!(Value::func_with("add", [Value::Int(1)]).is_callable());
        assert!(!Value::Int(3).is_callable());
        assert!(!Value::str("double").is_callable());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::str("").is_truthy());
    }
}
