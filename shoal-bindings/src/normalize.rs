//! Strips engine optional wrappers from results crossing back into the
//! host. Outer joins produce `Opt`-wrapped sides; the host has a null
//! value of its own and never sees the wrapper.

use shoal_proto::{wire_value, WireValue};

/// Unwraps any number of optional layers. An absent optional becomes
/// null. Running it on an already-normalized value is a no-op.
pub fn normalize(mut v: WireValue) -> WireValue {
    loop {
        match v.kind {
            Some(wire_value::Kind::Opt(opt)) => match opt.value {
                Some(inner) => v = *inner,
                None => return WireValue::null(),
            },
            _ => return v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwraps_present_optional() {
        let v = normalize(WireValue::some(WireValue::int(7)));
        assert_eq!(v, WireValue::int(7));
    }

    #[test]
    fn test_absent_becomes_null() {
        assert!(normalize(WireValue::absent()).is_null());
    }

    #[test]
    fn test_nested_optionals_collapse() {
        let v = normalize(WireValue::some(WireValue::some(WireValue::str("x"))));
        assert_eq!(v, WireValue::str("x"));
    }

    #[test]
    fn test_idempotent_on_plain_values() {
        let v = WireValue::pair(WireValue::int(1), WireValue::null());
        assert_eq!(normalize(v.clone()), v);
        assert_eq!(normalize(normalize(v.clone())), v);
    }
}
