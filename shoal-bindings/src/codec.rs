//! Packaging of host callables for shipment to the engine.
//!
//! A callable is either a bare symbol naming an engine-registered
//! function, or a function reference carrying a captured environment.
//! Either way the wire form is a `FuncSpec` wrapped in a
//! `FunctionPayload` that also records the calling-convention adapter
//! the engine must apply.

use prost::Message;
use shoal_model::Value;
use shoal_proto::{AdapterKind, FuncSpec, FunctionPayload, WireValue};

use crate::error::BindError;

/// Encodes a callable value into a shippable payload. Fails before any
/// engine contact if the value is not callable or its captured
/// environment cannot cross the value boundary.
pub fn encode_function(f: &Value, adapter: AdapterKind) -> Result<FunctionPayload, BindError> {
    let spec = match f {
        Value::Symbol(name) => FuncSpec { name: name.clone(), env: Vec::new() },
        Value::Func(fr) => {
            let env = fr
                .env
                .iter()
                .map(WireValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map_err(BindError::Serialization)?;
            FuncSpec { name: fr.name.clone(), env }
        }
        other => return Err(BindError::NotCallable(other.type_name())),
    };
    Ok(FunctionPayload { adapter: adapter as i32, body: spec.encode_to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_encodes_with_empty_env() {
        let payload = encode_function(&Value::Symbol("double".into()), AdapterKind::Map).unwrap();
        assert_eq!(payload.adapter, AdapterKind::Map as i32);
        let spec = FuncSpec::decode(payload.body.as_slice()).unwrap();
        assert_eq!(spec.name, "double");
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_func_carries_environment() {
        let f = Value::func_with("add_n", vec![Value::Int(3)]);
        let payload = encode_function(&f, AdapterKind::Combine).unwrap();
        let spec = FuncSpec::decode(payload.body.as_slice()).unwrap();
        assert_eq!(spec.env, vec![WireValue::int(3)]);
    }

    #[test]
    fn test_plain_value_is_not_callable() {
        let err = encode_function(&Value::Int(1), AdapterKind::Map).unwrap_err();
        assert!(matches!(err, BindError::NotCallable("int")));
    }

    #[test]
    fn test_callable_in_environment_rejected() {
        let f = Value::func_with("outer", vec![Value::Symbol("inner".into())]);
        let err = encode_function(&f, AdapterKind::Map).unwrap_err();
        assert!(matches!(err, BindError::Serialization(_)));
    }
}
