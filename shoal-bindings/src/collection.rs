//! The bound collection handle.
//!
//! A `Collection` is a thin wrapper around an engine handle plus the
//! variant tag that gates which operations may be called on it. All
//! dispatch goes through four generic helpers driven by the operation
//! table; the public methods are one-liners over them. Every call
//! blocks on the context's runtime until the engine answers.

use std::collections::HashMap;

use tracing::debug;

use shoal_engine::HandleId;
use shoal_model::Value;
use shoal_proto::{AdapterKind, WireValue};

use crate::codec::encode_function;
use crate::context::{Context, ContextCore};
use crate::error::BindError;
use crate::normalize::normalize;
use crate::ops::{self, OpSpec, Out, Req, Shape, Variant};
use std::sync::Arc;

#[derive(Clone)]
pub struct Collection {
    core: Arc<ContextCore>,
    handle: HandleId,
    variant: Variant,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("handle", &self.handle)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

impl Collection {
    pub(crate) fn new(core: Arc<ContextCore>, handle: HandleId, variant: Variant) -> Self {
        Collection { core, handle, variant }
    }

    /// Rewraps a raw engine handle obtained through the escape hatch.
    /// The caller asserts the variant; nothing is verified.
    pub fn from_raw(ctx: &Context, handle: HandleId, variant: Variant) -> Self {
        Collection::new(ctx.core(), handle, variant)
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Sends an arbitrary engine operation, bypassing the table. The
    /// returned handle is not wrapped.
    pub fn invoke_raw(&self, op: &str, args: Vec<WireValue>) -> Result<HandleId, BindError> {
        self.core
            .block_on(self.core.backend.invoke(self.handle, op, args))
            .map_err(BindError::engine)
    }

    // ---- Table-driven dispatch ----

    fn op(&self, method: &str) -> Result<&'static OpSpec, BindError> {
        let spec = ops::lookup(method).ok_or_else(|| BindError::Engine(format!(
            "operation table has no entry for {method}"
        )))?;
        if !spec.receivers.contains(&self.variant) {
            return Err(BindError::VariantMismatch {
                op: spec.method,
                expected: spec.receivers[0],
                found: self.variant,
            });
        }
        Ok(spec)
    }

    fn out_variant(&self, out: Out) -> Variant {
        match out {
            Out::Same => self.variant,
            Out::Generic => Variant::Generic,
            Out::KeyValue => Variant::KeyValue,
            Out::Numeric => Variant::Numeric,
        }
    }

    fn wrap(&self, handle: HandleId, out: Out) -> Collection {
        Collection::new(self.core.clone(), handle, self.out_variant(out))
    }

    fn host(w: WireValue) -> Result<Value, BindError> {
        Value::try_from(normalize(w)).map_err(BindError::Serialization)
    }

    /// Handle-producing transform that ships one function.
    fn transform(&self, method: &str, f: &Value, extra: Vec<WireValue>) -> Result<Collection, BindError> {
        let spec = self.op(method)?;
        let (adapter, out) = match spec.shape {
            Shape::Transform { adapter, out: Some(out) } => (adapter, out),
            _ => return Err(BindError::Engine(format!("{method} is not a transform"))),
        };
        let payload = encode_function(f, adapter)?;
        debug!(op = spec.runtime_op, "transform");
        let handle = self
            .core
            .block_on(self.core.backend.transform(self.handle, spec.runtime_op, vec![payload], extra))
            .map_err(BindError::engine)?;
        Ok(self.wrap(handle, out))
    }

    /// Scalar-producing transform: ships one function, materializes the
    /// result as a host value.
    fn transform_scalar(&self, method: &str, f: &Value, extra: Vec<WireValue>) -> Result<Value, BindError> {
        let spec = self.op(method)?;
        let adapter = match spec.shape {
            Shape::Transform { adapter, out: None } => adapter,
            _ => return Err(BindError::Engine(format!("{method} is not a scalar transform"))),
        };
        let payload = encode_function(f, adapter)?;
        debug!(op = spec.runtime_op, "materialize");
        let result = self
            .core
            .block_on(self.core.backend.materialize(self.handle, spec.runtime_op, vec![payload], extra))
            .map_err(BindError::engine)?;
        Self::host(result)
    }

    fn passthrough(&self, method: &str, args: Vec<WireValue>) -> Result<Collection, BindError> {
        let spec = self.op(method)?;
        let out = match spec.shape {
            Shape::Passthrough { out } => out,
            _ => return Err(BindError::Engine(format!("{method} is not a passthrough"))),
        };
        let handle = self
            .core
            .block_on(self.core.backend.invoke(self.handle, spec.runtime_op, args))
            .map_err(BindError::engine)?;
        Ok(self.wrap(handle, out))
    }

    fn merge_with(&self, method: &str, other: &Collection, args: Vec<WireValue>) -> Result<Collection, BindError> {
        let spec = self.op(method)?;
        let (req, out) = match spec.shape {
            Shape::Merge { other, out } => (other, out),
            _ => return Err(BindError::Engine(format!("{method} is not a merge"))),
        };
        let expected = match req {
            Req::Same => self.variant,
            Req::Exact(v) => v,
        };
        if other.variant != expected {
            return Err(BindError::VariantMismatch {
                op: spec.method,
                expected,
                found: other.variant,
            });
        }
        let handle = self
            .core
            .block_on(self.core.backend.merge(self.handle, spec.runtime_op, vec![other.handle], args))
            .map_err(BindError::engine)?;
        Ok(self.wrap(handle, out))
    }

    /// Materialize without a user function.
    fn materialize_plain(&self, op: &str, args: Vec<WireValue>) -> Result<Value, BindError> {
        let result = self
            .core
            .block_on(self.core.backend.materialize(self.handle, op, Vec::new(), args))
            .map_err(BindError::engine)?;
        Self::host(result)
    }

    // ---- Transforms ----

    pub fn map(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("map", f, Vec::new())
    }

    /// Maps every element to a number. With no function, each element
    /// is coerced by the engine's builtin numeric conversion.
    pub fn map_to_numeric(&self, f: Option<&Value>) -> Result<Collection, BindError> {
        let default = Value::Symbol(shoal_engine::DEFAULT_NUMERIC_FN.into());
        self.transform("map_to_numeric", f.unwrap_or(&default), Vec::new())
    }

    /// Coerces a generic collection into a numeric one element-wise.
    pub fn as_numeric(&self) -> Result<Collection, BindError> {
        if self.variant != Variant::Generic {
            return Err(BindError::VariantMismatch {
                op: "as_numeric",
                expected: Variant::Generic,
                found: self.variant,
            });
        }
        self.map_to_numeric(None)
    }

    pub fn map_to_pair(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("map_to_pair", f, Vec::new())
    }

    pub fn flat_map(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("flat_map", f, Vec::new())
    }

    pub fn flat_map_to_numeric(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("flat_map_to_numeric", f, Vec::new())
    }

    pub fn filter(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("filter", f, Vec::new())
    }

    pub fn key_by(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("key_by", f, Vec::new())
    }

    pub fn group_by(&self, f: &Value, num_partitions: Option<u32>) -> Result<Collection, BindError> {
        self.transform("group_by", f, opt_u32_args(num_partitions))
    }

    pub fn sort_by(&self, f: &Value, ascending: bool, num_partitions: Option<u32>) -> Result<Collection, BindError> {
        let mut args = vec![WireValue::bool(ascending)];
        args.extend(opt_u32_args(num_partitions));
        self.transform("sort_by", f, args)
    }

    pub fn map_partitions(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("map_partitions", f, Vec::new())
    }

    pub fn map_partitions_with_index(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("map_partitions_with_index", f, Vec::new())
    }

    pub fn map_values(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("map_values", f, Vec::new())
    }

    pub fn flat_map_values(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("flat_map_values", f, Vec::new())
    }

    pub fn reduce_by_key(&self, f: &Value) -> Result<Collection, BindError> {
        self.transform("reduce_by_key", f, Vec::new())
    }

    pub fn fold_by_key(&self, zero: &Value, num_partitions: Option<u32>, f: &Value) -> Result<Collection, BindError> {
        let mut args = vec![wire_arg("fold_by_key", zero)?];
        args.extend(opt_u32_args(num_partitions));
        self.transform("fold_by_key", f, args)
    }

    /// Per-key combine with three functions: create a combiner from the
    /// first value, fold further values in, merge combiners across
    /// partitions.
    pub fn combine_by_key(
        &self,
        create: &Value,
        merge_value: &Value,
        merge_combiners: &Value,
        num_partitions: Option<u32>,
    ) -> Result<Collection, BindError> {
        if self.variant != Variant::KeyValue {
            return Err(BindError::VariantMismatch {
                op: "combine_by_key",
                expected: Variant::KeyValue,
                found: self.variant,
            });
        }
        let payloads = vec![
            encode_function(create, AdapterKind::Map)?,
            encode_function(merge_value, AdapterKind::Combine)?,
            encode_function(merge_combiners, AdapterKind::Combine)?,
        ];
        let handle = self
            .core
            .block_on(self.core.backend.transform(
                self.handle,
                "combineByKey",
                payloads,
                opt_u32_args(num_partitions),
            ))
            .map_err(BindError::engine)?;
        Ok(self.wrap(handle, Out::KeyValue))
    }

    // ---- Actions ----

    pub fn reduce(&self, f: &Value) -> Result<Value, BindError> {
        self.transform_scalar("reduce", f, Vec::new())
    }

    pub fn tree_reduce(&self, f: &Value, depth: u32) -> Result<Value, BindError> {
        self.transform_scalar("tree_reduce", f, vec![WireValue::int(depth as i64)])
    }

    pub fn fold(&self, zero: &Value, f: &Value) -> Result<Value, BindError> {
        self.transform_scalar("fold", f, vec![wire_arg("fold", zero)?])
    }

    /// Aggregates with distinct in-partition and cross-partition
    /// functions, seeded by a zero value.
    pub fn aggregate(&self, zero: &Value, seq: &Value, comb: &Value) -> Result<Value, BindError> {
        self.aggregate_inner("aggregate", zero, seq, comb, None)
    }

    pub fn tree_aggregate(&self, zero: &Value, seq: &Value, comb: &Value, depth: u32) -> Result<Value, BindError> {
        self.aggregate_inner("treeAggregate", zero, seq, comb, Some(depth))
    }

    fn aggregate_inner(&self, op: &str, zero: &Value, seq: &Value, comb: &Value, depth: Option<u32>) -> Result<Value, BindError> {
        let payloads = vec![
            encode_function(seq, AdapterKind::Combine)?,
            encode_function(comb, AdapterKind::Combine)?,
        ];
        let mut args = vec![wire_arg(op, zero)?];
        if let Some(d) = depth {
            args.push(WireValue::int(d as i64));
        }
        let result = self
            .core
            .block_on(self.core.backend.materialize(self.handle, op, payloads, args))
            .map_err(BindError::engine)?;
        Self::host(result)
    }

    pub fn foreach(&self, f: &Value) -> Result<(), BindError> {
        self.transform_scalar("foreach", f, Vec::new()).map(|_| ())
    }

    pub fn foreach_partition(&self, f: &Value) -> Result<(), BindError> {
        self.transform_scalar("foreach_partition", f, Vec::new()).map(|_| ())
    }

    pub fn reduce_by_key_locally(&self, f: &Value) -> Result<HashMap<Value, Value>, BindError> {
        into_map("reduce_by_key_locally", self.transform_scalar("reduce_by_key_locally", f, Vec::new())?)
    }

    pub fn collect(&self) -> Result<Vec<Value>, BindError> {
        match self.materialize_plain("collect", Vec::new())? {
            Value::List(items) => Ok(items),
            other => Err(BindError::Engine(format!(
                "collect returned {} instead of a list",
                other.type_name()
            ))),
        }
    }

    /// Collects pairs into a map. Duplicate keys keep the last value.
    pub fn collect_as_map(&self) -> Result<HashMap<Value, Value>, BindError> {
        if self.variant != Variant::KeyValue {
            return Err(BindError::VariantMismatch {
                op: "collect_as_map",
                expected: Variant::KeyValue,
                found: self.variant,
            });
        }
        into_map("collect_as_map", self.materialize_plain("collectAsMap", Vec::new())?)
    }

    pub fn is_empty(&self) -> Result<bool, BindError> {
        match self.materialize_plain("isEmpty", Vec::new())? {
            Value::Bool(b) => Ok(b),
            other => Err(BindError::Engine(format!(
                "isEmpty returned {}",
                other.type_name()
            ))),
        }
    }

    pub fn count(&self) -> Result<u64, BindError> {
        match self.materialize_plain("count", Vec::new())? {
            Value::Int(n) if n >= 0 => Ok(n as u64),
            other => Err(BindError::Engine(format!("count returned {other}"))),
        }
    }

    pub fn num_partitions(&self) -> Result<u32, BindError> {
        self.core
            .block_on(self.core.backend.num_partitions(self.handle))
            .map_err(BindError::engine)
    }

    // ---- Numeric statistics ----

    pub fn sum(&self) -> Result<f64, BindError> {
        self.stat("sum")
    }

    pub fn mean(&self) -> Result<f64, BindError> {
        self.stat("mean")
    }

    pub fn min(&self) -> Result<f64, BindError> {
        self.stat("min")
    }

    pub fn max(&self) -> Result<f64, BindError> {
        self.stat("max")
    }

    pub fn variance(&self) -> Result<f64, BindError> {
        self.stat("variance")
    }

    pub fn stdev(&self) -> Result<f64, BindError> {
        self.stat("stdev")
    }

    fn stat(&self, op: &'static str) -> Result<f64, BindError> {
        if self.variant != Variant::Numeric {
            return Err(BindError::VariantMismatch {
                op,
                expected: Variant::Numeric,
                found: self.variant,
            });
        }
        match self.materialize_plain(op, Vec::new())? {
            v @ (Value::Int(_) | Value::Float(_)) => v.as_f64().ok_or_else(|| {
                BindError::Engine(format!("{op} returned a non-numeric value"))
            }),
            other => Err(BindError::Engine(format!(
                "{op} returned {}",
                other.type_name()
            ))),
        }
    }

    // ---- Passthroughs ----

    pub fn cache(&self) -> Result<Collection, BindError> {
        self.passthrough("cache", Vec::new())
    }

    pub fn persist(&self) -> Result<Collection, BindError> {
        self.passthrough("persist", Vec::new())
    }

    pub fn unpersist(&self) -> Result<Collection, BindError> {
        self.passthrough("unpersist", Vec::new())
    }

    pub fn distinct(&self) -> Result<Collection, BindError> {
        self.passthrough("distinct", Vec::new())
    }

    pub fn coalesce(&self, num_partitions: u32) -> Result<Collection, BindError> {
        self.passthrough("coalesce", vec![WireValue::int(num_partitions as i64)])
    }

    pub fn repartition(&self, num_partitions: u32) -> Result<Collection, BindError> {
        self.passthrough("repartition", vec![WireValue::int(num_partitions as i64)])
    }

    /// Samples a fraction of the collection, with or without
    /// replacement. An omitted seed is drawn fresh per call.
    pub fn sample(&self, with_replacement: bool, fraction: f64, seed: Option<u64>) -> Result<Collection, BindError> {
        let seed = seed.unwrap_or_else(rand::random);
        self.passthrough(
            "sample",
            vec![
                WireValue::bool(with_replacement),
                WireValue::float(fraction),
                WireValue::int(seed as i64),
            ],
        )
    }

    /// Samples pairs with a per-key fraction. Keys missing from the
    /// fraction table are an engine error.
    pub fn sample_by_key(&self, with_replacement: bool, fractions: &[(Value, f64)], seed: Option<u64>) -> Result<Collection, BindError> {
        self.keyed_sample("sample_by_key", with_replacement, fractions, seed)
    }

    /// Like `sample_by_key`, but keeps exactly `round(fraction * n)`
    /// elements per key instead of sampling each independently.
    pub fn sample_by_key_exact(&self, with_replacement: bool, fractions: &[(Value, f64)], seed: Option<u64>) -> Result<Collection, BindError> {
        self.keyed_sample("sample_by_key_exact", with_replacement, fractions, seed)
    }

    fn keyed_sample(&self, method: &'static str, with_replacement: bool, fractions: &[(Value, f64)], seed: Option<u64>) -> Result<Collection, BindError> {
        let table = fractions
            .iter()
            .map(|(k, f)| Ok(WireValue::pair(wire_arg(method, k)?, WireValue::float(*f))))
            .collect::<Result<Vec<_>, BindError>>()?;
        let seed = seed.unwrap_or_else(rand::random);
        self.passthrough(
            method,
            vec![
                WireValue::bool(with_replacement),
                WireValue::list(table),
                WireValue::int(seed as i64),
            ],
        )
    }

    pub fn repartition_and_sort_within_partitions(&self, num_partitions: u32, ascending: bool) -> Result<Collection, BindError> {
        self.passthrough(
            "repartition_and_sort_within_partitions",
            vec![WireValue::int(num_partitions as i64), WireValue::bool(ascending)],
        )
    }

    pub fn group_by_key(&self) -> Result<Collection, BindError> {
        self.passthrough("group_by_key", Vec::new())
    }

    pub fn sort_by_key(&self, ascending: bool) -> Result<Collection, BindError> {
        self.passthrough("sort_by_key", vec![WireValue::bool(ascending)])
    }

    pub fn values(&self) -> Result<Collection, BindError> {
        self.passthrough("values", Vec::new())
    }

    pub fn keys(&self) -> Result<Collection, BindError> {
        self.passthrough("keys", Vec::new())
    }

    pub fn zip_with_index(&self) -> Result<Collection, BindError> {
        self.passthrough("zip_with_index", Vec::new())
    }

    pub fn zip_with_unique_id(&self) -> Result<Collection, BindError> {
        self.passthrough("zip_with_unique_id", Vec::new())
    }

    // ---- Merges ----

    pub fn union(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("union", other, Vec::new())
    }

    pub fn intersection(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("intersection", other, Vec::new())
    }

    pub fn subtract(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("subtract", other, Vec::new())
    }

    pub fn subtract_by_key(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("subtract_by_key", other, Vec::new())
    }

    pub fn cartesian(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("cartesian", other, Vec::new())
    }

    pub fn zip(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("zip", other, Vec::new())
    }

    pub fn join(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("join", other, Vec::new())
    }

    pub fn left_outer_join(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("left_outer_join", other, Vec::new())
    }

    pub fn right_outer_join(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("right_outer_join", other, Vec::new())
    }

    pub fn full_outer_join(&self, other: &Collection) -> Result<Collection, BindError> {
        self.merge_with("full_outer_join", other, Vec::new())
    }

    /// Groups this collection with up to three others by key. Every
    /// participant must be key-value.
    pub fn cogroup(&self, others: &[&Collection], num_partitions: Option<u32>) -> Result<Collection, BindError> {
        if self.variant != Variant::KeyValue {
            return Err(BindError::VariantMismatch {
                op: "cogroup",
                expected: Variant::KeyValue,
                found: self.variant,
            });
        }
        if others.is_empty() || others.len() > 3 {
            return Err(BindError::ArgumentCount { op: "cogroup", given: others.len() });
        }
        for other in others {
            if other.variant != Variant::KeyValue {
                return Err(BindError::VariantMismatch {
                    op: "cogroup",
                    expected: Variant::KeyValue,
                    found: other.variant,
                });
            }
        }
        let handles = others.iter().map(|c| c.handle).collect();
        let handle = self
            .core
            .block_on(self.core.backend.merge(self.handle, "cogroup", handles, opt_u32_args(num_partitions)))
            .map_err(BindError::engine)?;
        Ok(self.wrap(handle, Out::KeyValue))
    }

    /// Splits into disjoint sub-collections whose sizes follow the
    /// given weights. An omitted seed is drawn fresh per call.
    pub fn random_split(&self, weights: &[f64], seed: Option<u64>) -> Result<Vec<Collection>, BindError> {
        let seed = seed.unwrap_or_else(rand::random);
        let handles = self
            .core
            .block_on(self.core.backend.random_split(self.handle, weights.to_vec(), seed))
            .map_err(BindError::engine)?;
        Ok(handles
            .into_iter()
            .map(|h| Collection::new(self.core.clone(), h, self.variant))
            .collect())
    }
}

fn opt_u32_args(n: Option<u32>) -> Vec<WireValue> {
    n.map(|n| WireValue::int(n as i64)).into_iter().collect()
}

fn wire_arg(op: &str, v: &Value) -> Result<WireValue, BindError> {
    WireValue::try_from(v)
        .map_err(|e| BindError::Serialization(format!("{op} argument: {e}")))
}

fn into_map(op: &str, v: Value) -> Result<HashMap<Value, Value>, BindError> {
    match v {
        Value::List(items) => {
            let mut out = HashMap::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Pair(k, v) => {
                        out.insert(*k, *v);
                    }
                    other => {
                        return Err(BindError::Engine(format!(
                            "{op} returned a non-pair element: {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(out)
        }
        other => Err(BindError::Engine(format!(
            "{op} returned {} instead of a list",
            other.type_name()
        ))),
    }
}
