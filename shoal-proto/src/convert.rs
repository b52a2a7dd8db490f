//! Conversions between the host value model and the wire representation.

use crate::{wire_value::Kind, WireValue};
use shoal_model::Value;

impl TryFrom<&Value> for WireValue {
    type Error = String;

    fn try_from(v: &Value) -> Result<Self, Self::Error> {
        Ok(match v {
            Value::Null => WireValue::null(),
            Value::Bool(b) => WireValue::bool(*b),
            Value::Int(i) => WireValue::int(*i),
            Value::Float(f) => WireValue::float(*f),
            Value::Str(s) => WireValue::str(s.clone()),
            Value::Bytes(b) => WireValue {
                kind: Some(Kind::Bytes(b.clone())),
            },
            Value::Pair(a, b) => {
                WireValue::pair(WireValue::try_from(a.as_ref())?, WireValue::try_from(b.as_ref())?)
            }
            Value::List(items) => WireValue::list(
                items
                    .iter()
                    .map(WireValue::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Symbol(_) | Value::Func(_) => {
                return Err(format!("{} cannot cross the value boundary", v.type_name()))
            }
        })
    }
}

impl TryFrom<WireValue> for Value {
    type Error = String;

    fn try_from(v: WireValue) -> Result<Self, Self::Error> {
        let kind = v.kind.ok_or("unset wire value")?;
        Ok(match kind {
            Kind::Null(_) => Value::Null,
            Kind::Bool(b) => Value::Bool(b),
            Kind::Int(i) => Value::Int(i),
            Kind::Float(f) => Value::Float(f),
            Kind::Str(s) => Value::Str(s),
            Kind::Bytes(b) => Value::Bytes(b),
            Kind::Pair(p) => {
                let first = p.first.ok_or("pair missing first slot")?;
                let second = p.second.ok_or("pair missing second slot")?;
                Value::pair(Value::try_from(*first)?, Value::try_from(*second)?)
            }
            Kind::List(list) => Value::List(
                list.items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            // The foreign optional never surfaces host-side: absent and
            // wrapped-null both become Null, present values unwrap.
            Kind::Opt(opt) => match opt.value {
                None => Value::Null,
                Some(inner) => match Value::try_from(*inner)? {
                    Value::Null => Value::Null,
                    other => other,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_roundtrip() {
        let v = Value::pair(
            Value::str("a"),
            Value::list(vec![Value::Int(1), Value::Float(2.5), Value::Null]),
        );
        let wire = WireValue::try_from(&v).unwrap();
        let back = Value::try_from(wire).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_callables_rejected() {
        assert!(WireValue::try_from(&Value::func("f")).is_err());
        assert!(WireValue::try_from(&Value::func_with("f", [Value::Int(1)])).is_err());
        let nested = Value::list(vec![Value::Int(1), Value::func("f")]);
        assert!(WireValue::try_from(&nested).is_err());
    }

    #[test]
    fn test_foreign_optional_unwraps_hostward() {
        assert_eq!(Value::try_from(WireValue::absent()).unwrap(), Value::Null);
        assert_eq!(
            Value::try_from(WireValue::some(WireValue::null())).unwrap(),
            Value::Null
        );
        assert_eq!(
            Value::try_from(WireValue::some(WireValue::int(3))).unwrap(),
            Value::Int(3)
        );
    }
}
