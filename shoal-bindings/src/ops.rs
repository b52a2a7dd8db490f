//! The operation table.
//!
//! One declarative entry per bound operation: which variants may receive
//! it, which engine operation it maps to, and one of three shapes —
//! transform-with-function, passthrough-return, or pairwise-merge. The
//! generic dispatch functions on `Collection` consult this table; public
//! methods are thin wrappers over it.

use std::fmt;

use shoal_proto::AdapterKind;

/// The host-side type tag paired with every collection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Generic,
    KeyValue,
    Numeric,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Generic => write!(f, "generic"),
            Variant::KeyValue => write!(f, "key-value"),
            Variant::Numeric => write!(f, "numeric"),
        }
    }
}

/// Variant a result handle is wrapped in.
#[derive(Debug, Clone, Copy)]
pub enum Out {
    /// Same variant as the receiver.
    Same,
    Generic,
    KeyValue,
    Numeric,
}

/// Variant required of a merge operand.
#[derive(Debug, Clone, Copy)]
pub enum Req {
    /// Must match the receiver's variant.
    Same,
    Exact(Variant),
}

#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// Ships a user function; `out: None` means the engine result is a
    /// scalar returned raw (reduce, foreach).
    Transform {
        adapter: AdapterKind,
        out: Option<Out>,
    },
    /// No function; rewraps the returned handle.
    Passthrough { out: Out },
    /// Combines with another wrapped handle after checking its variant.
    Merge { other: Req, out: Out },
}

pub struct OpSpec {
    /// Binding method name.
    pub method: &'static str,
    /// Engine operation name.
    pub runtime_op: &'static str,
    /// Variants this operation exists on.
    pub receivers: &'static [Variant],
    pub shape: Shape,
}

const ALL: &[Variant] = &[Variant::Generic, Variant::KeyValue, Variant::Numeric];
const GEN_NUM: &[Variant] = &[Variant::Generic, Variant::Numeric];
const GEN: &[Variant] = &[Variant::Generic];
const KV: &[Variant] = &[Variant::KeyValue];

pub static OPS: &[OpSpec] = &[
    // ---- Transform-with-function ----
    OpSpec {
        method: "map",
        runtime_op: "map",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Map, out: Some(Out::Generic) },
    },
    OpSpec {
        method: "map_to_numeric",
        runtime_op: "mapToDouble",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::ToNumeric, out: Some(Out::Numeric) },
    },
    OpSpec {
        method: "map_to_pair",
        runtime_op: "mapToPair",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::ToPair, out: Some(Out::KeyValue) },
    },
    OpSpec {
        method: "flat_map",
        runtime_op: "flatMap",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::FlatMap, out: Some(Out::Generic) },
    },
    OpSpec {
        method: "flat_map_to_numeric",
        runtime_op: "flatMapToDouble",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::FlatMap, out: Some(Out::Numeric) },
    },
    OpSpec {
        method: "filter",
        runtime_op: "filter",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Map, out: Some(Out::Same) },
    },
    OpSpec {
        method: "key_by",
        runtime_op: "keyBy",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Map, out: Some(Out::KeyValue) },
    },
    OpSpec {
        method: "group_by",
        runtime_op: "groupBy",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Map, out: Some(Out::KeyValue) },
    },
    OpSpec {
        method: "sort_by",
        runtime_op: "sortBy",
        receivers: GEN_NUM,
        shape: Shape::Transform { adapter: AdapterKind::Map, out: Some(Out::Same) },
    },
    OpSpec {
        method: "map_partitions",
        runtime_op: "mapPartitions",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::FlatMap, out: Some(Out::Generic) },
    },
    OpSpec {
        method: "map_partitions_with_index",
        runtime_op: "mapPartitionsWithIndex",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: Some(Out::Generic) },
    },
    OpSpec {
        method: "map_values",
        runtime_op: "mapValues",
        receivers: KV,
        shape: Shape::Transform { adapter: AdapterKind::Map, out: Some(Out::KeyValue) },
    },
    OpSpec {
        method: "flat_map_values",
        runtime_op: "flatMapValues",
        receivers: KV,
        shape: Shape::Transform { adapter: AdapterKind::FlatMap, out: Some(Out::KeyValue) },
    },
    OpSpec {
        method: "reduce_by_key",
        runtime_op: "reduceByKey",
        receivers: KV,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: Some(Out::KeyValue) },
    },
    OpSpec {
        method: "fold_by_key",
        runtime_op: "foldByKey",
        receivers: KV,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: Some(Out::KeyValue) },
    },
    // Scalar-producing transforms: no declared result variant.
    OpSpec {
        method: "reduce",
        runtime_op: "reduce",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: None },
    },
    OpSpec {
        method: "tree_reduce",
        runtime_op: "treeReduce",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: None },
    },
    OpSpec {
        method: "fold",
        runtime_op: "fold",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: None },
    },
    OpSpec {
        method: "foreach",
        runtime_op: "foreach",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Void, out: None },
    },
    OpSpec {
        method: "foreach_partition",
        runtime_op: "foreachPartition",
        receivers: ALL,
        shape: Shape::Transform { adapter: AdapterKind::Void, out: None },
    },
    OpSpec {
        method: "reduce_by_key_locally",
        runtime_op: "reduceByKeyLocally",
        receivers: KV,
        shape: Shape::Transform { adapter: AdapterKind::Combine, out: None },
    },
    // ---- Passthrough-return ----
    OpSpec {
        method: "cache",
        runtime_op: "cache",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "persist",
        runtime_op: "persist",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "unpersist",
        runtime_op: "unpersist",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "distinct",
        runtime_op: "distinct",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "coalesce",
        runtime_op: "coalesce",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "repartition",
        runtime_op: "repartition",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "sample",
        runtime_op: "sample",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "sample_by_key",
        runtime_op: "sampleByKey",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "sample_by_key_exact",
        runtime_op: "sampleByKeyExact",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "repartition_and_sort_within_partitions",
        runtime_op: "repartitionAndSortWithinPartitions",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "group_by_key",
        runtime_op: "groupByKey",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "sort_by_key",
        runtime_op: "sortByKey",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Same },
    },
    OpSpec {
        method: "values",
        runtime_op: "values",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Generic },
    },
    OpSpec {
        method: "keys",
        runtime_op: "keys",
        receivers: KV,
        shape: Shape::Passthrough { out: Out::Generic },
    },
    OpSpec {
        method: "zip_with_index",
        runtime_op: "zipWithIndex",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::KeyValue },
    },
    OpSpec {
        method: "zip_with_unique_id",
        runtime_op: "zipWithUniqueId",
        receivers: ALL,
        shape: Shape::Passthrough { out: Out::KeyValue },
    },
    // ---- Pairwise-merge ----
    OpSpec {
        method: "union",
        runtime_op: "union",
        receivers: GEN_NUM,
        shape: Shape::Merge { other: Req::Same, out: Out::Same },
    },
    OpSpec {
        method: "intersection",
        runtime_op: "intersection",
        receivers: GEN_NUM,
        shape: Shape::Merge { other: Req::Same, out: Out::Same },
    },
    OpSpec {
        method: "subtract",
        runtime_op: "subtract",
        receivers: GEN_NUM,
        shape: Shape::Merge { other: Req::Same, out: Out::Same },
    },
    OpSpec {
        method: "subtract_by_key",
        runtime_op: "subtractByKey",
        receivers: KV,
        shape: Shape::Merge { other: Req::Exact(Variant::KeyValue), out: Out::KeyValue },
    },
    OpSpec {
        method: "cartesian",
        runtime_op: "cartesian",
        receivers: GEN,
        shape: Shape::Merge { other: Req::Exact(Variant::Generic), out: Out::KeyValue },
    },
    OpSpec {
        method: "zip",
        runtime_op: "zip",
        receivers: ALL,
        shape: Shape::Merge { other: Req::Same, out: Out::KeyValue },
    },
    OpSpec {
        method: "join",
        runtime_op: "join",
        receivers: KV,
        shape: Shape::Merge { other: Req::Exact(Variant::KeyValue), out: Out::KeyValue },
    },
    OpSpec {
        method: "left_outer_join",
        runtime_op: "leftOuterJoin",
        receivers: KV,
        shape: Shape::Merge { other: Req::Exact(Variant::KeyValue), out: Out::KeyValue },
    },
    OpSpec {
        method: "right_outer_join",
        runtime_op: "rightOuterJoin",
        receivers: KV,
        shape: Shape::Merge { other: Req::Exact(Variant::KeyValue), out: Out::KeyValue },
    },
    OpSpec {
        method: "full_outer_join",
        runtime_op: "fullOuterJoin",
        receivers: KV,
        shape: Shape::Merge { other: Req::Exact(Variant::KeyValue), out: Out::KeyValue },
    },
];

pub fn lookup(method: &str) -> Option<&'static OpSpec> {
    OPS.iter().find(|op| op.method == method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_are_unique() {
        for (i, a) in OPS.iter().enumerate() {
            for b in &OPS[i + 1..] {
                assert_ne!(a.method, b.method, "duplicate table entry");
            }
        }
    }

    #[test]
    fn test_lookup() {
        let spec = lookup("join").unwrap();
        assert_eq!(spec.runtime_op, "join");
        assert!(matches!(
            spec.shape,
            Shape::Merge { other: Req::Exact(Variant::KeyValue), out: Out::KeyValue }
        ));
        assert!(lookup("no_such_op").is_none());
    }

    #[test]
    fn test_scalar_transforms_declare_no_out_variant() {
        for method in ["reduce", "foreach", "fold", "reduce_by_key_locally"] {
            match lookup(method).unwrap().shape {
                Shape::Transform { out, .. } => assert!(out.is_none(), "{}", method),
                _ => panic!("{} should be a transform", method),
            }
        }
    }
}
