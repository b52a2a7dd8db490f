//! Function registry and payload instantiation.
//!
//! The executing side of the function-shipping contract: a payload produced
//! by the binding codec is decoded here, its name resolved against the
//! registry, and its captured environment rebuilt, yielding a
//! `BoundFunction` the engine invokes per the stamped calling convention.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use prost::Message;
use shoal_model::Value;
use shoal_proto::{AdapterKind, FuncSpec, FunctionPayload, WireValue};

use crate::backend::EngineError;

/// Name of the built-in numeric projection, used as the default conversion
/// function when a caller supplies none.
pub const DEFAULT_NUMERIC_FN: &str = "builtin.to_numeric";

/// Name of the built-in identity function.
pub const IDENTITY_FN: &str = "builtin.identity";

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync>;

/// Name-to-function table shared with the engine's execution context.
///
/// Registration happens on the executing side; the binding codec only ever
/// ships names and captured environments.
#[derive(Default)]
pub struct FunctionRegistry {
    funcs: RwLock<HashMap<String, NativeFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in functions the binding layer
    /// references (identity, default numeric projection).
    pub fn with_builtins() -> Self {
        let reg = Self::new();
        reg.register(IDENTITY_FN, |args: &[Value]| {
            args.last().cloned().ok_or_else(|| EngineError::Invoke("identity: no argument".into()))
        });
        reg.register(DEFAULT_NUMERIC_FN, |args: &[Value]| {
            let v = args
                .last()
                .ok_or_else(|| EngineError::Invoke("to_numeric: no argument".into()))?;
            match v {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|e| EngineError::Type(format!("to_numeric: {:?}: {}", s, e))),
                other => Err(EngineError::Type(format!(
                    "to_numeric: cannot convert {}",
                    other.type_name()
                ))),
            }
        });
        reg
    }

    pub fn register<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync + 'static,
    {
        self.funcs
            .write()
            .expect("function registry poisoned")
            .insert(name.to_string(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs
            .read()
            .expect("function registry poisoned")
            .contains_key(name)
    }

    /// Decode a payload and bind it to its registered function.
    pub fn instantiate(&self, payload: &FunctionPayload) -> Result<BoundFunction, EngineError> {
        let adapter = AdapterKind::try_from(payload.adapter)
            .map_err(|_| EngineError::Decode(format!("unknown adapter id {}", payload.adapter)))?;
        if adapter == AdapterKind::Unspecified {
            return Err(EngineError::Decode("unspecified adapter".into()));
        }
        let spec = FuncSpec::decode(payload.body.as_slice())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let f = self
            .funcs
            .read()
            .expect("function registry poisoned")
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownFunction(spec.name.clone()))?;
        let env = spec
            .env
            .into_iter()
            .map(Value::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(EngineError::Decode)?;
        Ok(BoundFunction { adapter, env, f })
    }
}

/// A deserialized function ready to invoke. The captured environment is
/// prepended to the call arguments.
pub struct BoundFunction {
    adapter: AdapterKind,
    env: Vec<Value>,
    f: NativeFn,
}

impl std::fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundFunction")
            .field("adapter", &self.adapter)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl BoundFunction {
    pub fn adapter(&self) -> AdapterKind {
        self.adapter
    }

    fn call(&self, extra: &[Value]) -> Result<Value, EngineError> {
        if self.env.is_empty() {
            return (self.f)(extra);
        }
        let mut args = self.env.clone();
        args.extend_from_slice(extra);
        (self.f)(&args)
    }

    /// One argument, one result.
    pub fn call1(&self, v: &Value) -> Result<Value, EngineError> {
        self.call(std::slice::from_ref(v))
    }

    /// Two arguments, one result.
    pub fn call2(&self, a: &Value, b: &Value) -> Result<Value, EngineError> {
        self.call(&[a.clone(), b.clone()])
    }

    /// One argument, many results. A list result flattens to its items,
    /// null flattens to nothing, any other value is a single item.
    pub fn call_flat(&self, v: &Value) -> Result<Vec<Value>, EngineError> {
        Ok(match self.call1(v)? {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }

    /// One argument, no result.
    pub fn call_void(&self, v: &Value) -> Result<(), EngineError> {
        self.call1(v).map(|_| ())
    }

    /// One argument, key/value result.
    pub fn call_pair(&self, v: &Value) -> Result<(Value, Value), EngineError> {
        match self.call1(v)? {
            Value::Pair(a, b) => Ok((*a, *b)),
            other => Err(EngineError::Type(format!(
                "pair function returned {}",
                other.type_name()
            ))),
        }
    }

    /// One argument, numeric result.
    pub fn call_numeric(&self, v: &Value) -> Result<f64, EngineError> {
        let out = self.call1(v)?;
        out.as_f64().ok_or_else(|| {
            EngineError::Type(format!("numeric function returned {}", out.type_name()))
        })
    }
}

/// Encode the given spec under an adapter, for engine-side tests. The
/// binding layer has its own codec; byte layouts must agree.
#[doc(hidden)]
pub fn encode_spec(name: &str, env: &[Value], adapter: AdapterKind) -> Result<FunctionPayload, EngineError> {
    let env = env
        .iter()
        .map(WireValue::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(EngineError::Decode)?;
    let spec = FuncSpec {
        name: name.to_string(),
        env,
    };
    Ok(FunctionPayload {
        adapter: adapter as i32,
        body: spec.encode_to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_add() -> FunctionRegistry {
        let reg = FunctionRegistry::with_builtins();
        reg.register("add", |args: &[Value]| {
            let sum: i64 = args
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Ok(*i),
                    other => Err(EngineError::Type(format!("add: {}", other.type_name()))),
                })
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .sum();
            Ok(Value::Int(sum))
        });
        reg
    }

    #[test]
    fn test_instantiate_and_invoke_matches_direct_call() {
        let reg = registry_with_add();
        let payload = encode_spec("add", &[], AdapterKind::Combine).unwrap();
        let bound = reg.instantiate(&payload).unwrap();
        assert_eq!(bound.adapter(), AdapterKind::Combine);
        let out = bound.call2(&Value::Int(2), &Value::Int(3)).unwrap();
        assert_eq!(out, Value::Int(5));
    }

    #[test]
    fn test_captured_environment_prepended() {
        let reg = registry_with_add();
        let payload = encode_spec("add", &[Value::Int(100)], AdapterKind::Map).unwrap();
        let bound = reg.instantiate(&payload).unwrap();
        assert_eq!(bound.call1(&Value::Int(7)).unwrap(), Value::Int(107));
    }

    #[test]
    fn test_unknown_function() {
        let reg = FunctionRegistry::new();
        let payload = encode_spec("missing", &[], AdapterKind::Map).unwrap();
        let err = reg.instantiate(&payload).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction(name) if name == "missing"));
    }

    #[test]
    fn test_unspecified_adapter_rejected() {
        let reg = registry_with_add();
        let mut payload = encode_spec("add", &[], AdapterKind::Map).unwrap();
        payload.adapter = AdapterKind::Unspecified as i32;
        assert!(matches!(reg.instantiate(&payload), Err(EngineError::Decode(_))));
    }

    #[test]
    fn test_garbage_body_rejected() {
        let reg = registry_with_add();
        let payload = FunctionPayload {
            adapter: AdapterKind::Map as i32,
            body: vec![0xff, 0xff, 0xff],
        };
        assert!(matches!(reg.instantiate(&payload), Err(EngineError::Decode(_))));
    }

    #[test]
    fn test_default_numeric_projection() {
        let reg = FunctionRegistry::with_builtins();
        let payload = encode_spec(DEFAULT_NUMERIC_FN, &[], AdapterKind::ToNumeric).unwrap();
        let bound = reg.instantiate(&payload).unwrap();
        assert_eq!(bound.call_numeric(&Value::Int(4)).unwrap(), 4.0);
        assert_eq!(bound.call_numeric(&Value::str("2.5")).unwrap(), 2.5);
        assert!(bound.call_numeric(&Value::Bool(true)).is_err());
    }
}
