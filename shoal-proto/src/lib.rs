//! Wire definitions for the Shoal engine boundary.
//!
//! The only serialization this layer owns is the function payload and the
//! element encoding it embeds. Messages are hand-derived `prost` types so
//! the byte layout round-trips through the engine's decoder without a
//! build-time codegen step.

pub mod convert;

/// Calling convention the engine must use when invoking a deserialized
/// function (the adapter-interface identifier).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AdapterKind {
    Unspecified = 0,
    /// One argument, one result.
    Map = 1,
    /// Two arguments, one result (combining function).
    Combine = 2,
    /// One argument, many results (flattening function).
    FlatMap = 3,
    /// One argument, no result (side-effecting function).
    Void = 4,
    /// One argument, numeric result.
    ToNumeric = 5,
    /// One argument, key/value result.
    ToPair = 6,
}

/// An element in the engine's own representation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireValue {
    #[prost(oneof = "wire_value::Kind", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub kind: ::core::option::Option<wire_value::Kind>,
}

pub mod wire_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        /// Explicit null (the bool is a presence marker only).
        #[prost(bool, tag = "1")]
        Null(bool),
        #[prost(bool, tag = "2")]
        Bool(bool),
        #[prost(int64, tag = "3")]
        Int(i64),
        #[prost(double, tag = "4")]
        Float(f64),
        #[prost(string, tag = "5")]
        Str(::prost::alloc::string::String),
        #[prost(bytes, tag = "6")]
        Bytes(::prost::alloc::vec::Vec<u8>),
        #[prost(message, tag = "7")]
        Pair(::prost::alloc::boxed::Box<super::WirePair>),
        #[prost(message, tag = "8")]
        List(super::WireList),
        /// The engine's foreign optional wrapper, produced by outer joins.
        /// An unset inner value is the absent sentinel.
        #[prost(message, tag = "9")]
        Opt(::prost::alloc::boxed::Box<super::WireOpt>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePair {
    #[prost(message, optional, boxed, tag = "1")]
    pub first: ::core::option::Option<::prost::alloc::boxed::Box<WireValue>>,
    #[prost(message, optional, boxed, tag = "2")]
    pub second: ::core::option::Option<::prost::alloc::boxed::Box<WireValue>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireList {
    #[prost(message, repeated, tag = "1")]
    pub items: ::prost::alloc::vec::Vec<WireValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireOpt {
    #[prost(message, optional, boxed, tag = "1")]
    pub value: ::core::option::Option<::prost::alloc::boxed::Box<WireValue>>,
}

/// The serialized body of a function payload: the registered function name
/// plus its captured environment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FuncSpec {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub env: ::prost::alloc::vec::Vec<WireValue>,
}

/// A serialized host function stamped with its calling convention.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionPayload {
    #[prost(enumeration = "AdapterKind", tag = "1")]
    pub adapter: i32,
    #[prost(bytes, tag = "2")]
    pub body: ::prost::alloc::vec::Vec<u8>,
}

impl WireValue {
    pub fn null() -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Null(true)),
        }
    }

    pub fn bool(b: bool) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Bool(b)),
        }
    }

    pub fn int(i: i64) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Int(i)),
        }
    }

    pub fn float(f: f64) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Float(f)),
        }
    }

    pub fn str(s: impl Into<String>) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Str(s.into())),
        }
    }

    pub fn pair(first: WireValue, second: WireValue) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Pair(Box::new(WirePair {
                first: Some(Box::new(first)),
                second: Some(Box::new(second)),
            }))),
        }
    }

    pub fn list(items: Vec<WireValue>) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::List(WireList { items })),
        }
    }

    /// A present foreign optional.
    pub fn some(value: WireValue) -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Opt(Box::new(WireOpt {
                value: Some(Box::new(value)),
            }))),
        }
    }

    /// An absent foreign optional.
    pub fn absent() -> Self {
        WireValue {
            kind: Some(wire_value::Kind::Opt(Box::new(WireOpt { value: None }))),
        }
    }

    pub fn is_opt(&self) -> bool {
        matches!(self.kind, Some(wire_value::Kind::Opt(_)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, Some(wire_value::Kind::Null(_)))
    }

    /// Unwraps a pair, if this value is one.
    pub fn into_pair(self) -> Option<(WireValue, WireValue)> {
        match self.kind {
            Some(wire_value::Kind::Pair(p)) => match (p.first, p.second) {
                (Some(a), Some(b)) => Some((*a, *b)),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_wire_value_roundtrip() {
        let v = WireValue::pair(
            WireValue::str("key"),
            WireValue::list(vec![WireValue::int(1), WireValue::some(WireValue::float(2.5))]),
        );
        let bytes = v.encode_to_vec();
        let back = WireValue::decode(bytes.as_slice()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_func_spec_roundtrip() {
        let spec = FuncSpec {
            name: "add".to_string(),
            env: vec![WireValue::int(5)],
        };
        let payload = FunctionPayload {
            adapter: AdapterKind::Map as i32,
            body: spec.encode_to_vec(),
        };
        let bytes = payload.encode_to_vec();
        let back = FunctionPayload::decode(bytes.as_slice()).unwrap();
        assert_eq!(AdapterKind::try_from(back.adapter), Ok(AdapterKind::Map));
        let spec_back = FuncSpec::decode(back.body.as_slice()).unwrap();
        assert_eq!(spec_back, spec);
    }

    #[test]
    fn test_absent_optional_has_no_inner() {
        let v = WireValue::absent();
        let bytes = v.encode_to_vec();
        let back = WireValue::decode(bytes.as_slice()).unwrap();
        assert!(back.is_opt());
        assert_eq!(back, v);
    }
}
