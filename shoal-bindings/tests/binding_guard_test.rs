//! Call-site guards. Every rejection here must happen before the engine
//! is contacted; a counting stub backend verifies that.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shoal_bindings::{BindError, Context, Value, Variant};
use shoal_engine::{AsyncResult, EngineBackend, HandleId};
use shoal_proto::{FunctionPayload, WireValue};

/// Backend that records how many calls reach it and answers every one
/// with a fresh handle or an empty result.
#[derive(Default)]
struct RecordingBackend {
    calls: AtomicUsize,
}

impl RecordingBackend {
    fn hit<T: Send + 'static>(&self, value: T) -> AsyncResult<'_, T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(value) })
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EngineBackend for RecordingBackend {
    fn parallelize(&self, _elements: Vec<WireValue>, _partitions: Option<u32>) -> AsyncResult<'_, HandleId> {
        self.hit(HandleId::new_v4())
    }

    fn text_file<'a>(&'a self, _path: &'a str, _min_partitions: Option<u32>) -> AsyncResult<'a, HandleId> {
        self.hit(HandleId::new_v4())
    }

    fn whole_text_files<'a>(&'a self, _path: &'a str, _min_partitions: Option<u32>) -> AsyncResult<'a, HandleId> {
        self.hit(HandleId::new_v4())
    }

    fn transform<'a>(
        &'a self,
        _handle: HandleId,
        _op: &'a str,
        _funcs: Vec<FunctionPayload>,
        _args: Vec<WireValue>,
    ) -> AsyncResult<'a, HandleId> {
        self.hit(HandleId::new_v4())
    }

    fn invoke<'a>(&'a self, _handle: HandleId, _op: &'a str, _args: Vec<WireValue>) -> AsyncResult<'a, HandleId> {
        self.hit(HandleId::new_v4())
    }

    fn merge<'a>(
        &'a self,
        _handle: HandleId,
        _op: &'a str,
        _others: Vec<HandleId>,
        _args: Vec<WireValue>,
    ) -> AsyncResult<'a, HandleId> {
        self.hit(HandleId::new_v4())
    }

    fn random_split(&self, _handle: HandleId, weights: Vec<f64>, _seed: u64) -> AsyncResult<'_, Vec<HandleId>> {
        let handles = weights.iter().map(|_| HandleId::new_v4()).collect();
        self.hit(handles)
    }

    fn materialize<'a>(
        &'a self,
        _handle: HandleId,
        _op: &'a str,
        _funcs: Vec<FunctionPayload>,
        _args: Vec<WireValue>,
    ) -> AsyncResult<'a, WireValue> {
        self.hit(WireValue::list(Vec::new()))
    }

    fn num_partitions(&self, _handle: HandleId) -> AsyncResult<'_, u32> {
        self.hit(1)
    }
}

fn recording_ctx() -> (Context, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let ctx = Context::builder().backend(backend.clone()).build().unwrap();
    (ctx, backend)
}

#[test]
fn test_non_callable_rejected_before_engine_contact() {
    let (ctx, backend) = recording_ctx();
    let c = ctx.parallelize(vec![Value::Int(1)], None).unwrap();
    let created = backend.count();

    let err = c.map(&Value::Int(42)).unwrap_err();
    assert!(matches!(err, BindError::NotCallable("int")));
    let err = c.reduce(&Value::str("nope")).unwrap_err();
    assert!(matches!(err, BindError::NotCallable("string")));
    assert_eq!(backend.count(), created);
}

#[test]
fn test_unserializable_environment_rejected_locally() {
    let (ctx, backend) = recording_ctx();
    let c = ctx.parallelize(vec![Value::Int(1)], None).unwrap();
    let created = backend.count();

    let bad = Value::func_with("f", vec![Value::Symbol("captured".into())]);
    assert!(matches!(c.map(&bad).unwrap_err(), BindError::Serialization(_)));
    assert_eq!(backend.count(), created);
}

#[test]
fn test_receiver_variant_checked_before_engine_contact() {
    let (ctx, backend) = recording_ctx();
    let generic = ctx.parallelize(vec![Value::Int(1)], None).unwrap();
    let created = backend.count();

    let err = generic.map_values(&Value::Symbol("f".into())).unwrap_err();
    assert!(matches!(
        err,
        BindError::VariantMismatch { op: "map_values", expected: Variant::KeyValue, found: Variant::Generic }
    ));
    assert!(matches!(generic.sum().unwrap_err(), BindError::VariantMismatch { .. }));
    assert!(matches!(generic.collect_as_map().unwrap_err(), BindError::VariantMismatch { .. }));
    assert!(matches!(generic.group_by_key().unwrap_err(), BindError::VariantMismatch { .. }));
    assert_eq!(backend.count(), created);
}

#[test]
fn test_merge_operand_variant_checked_before_engine_contact() {
    let (ctx, backend) = recording_ctx();
    let kv = ctx.parallelize_pairs(vec![(Value::Int(1), Value::Int(2))], None).unwrap();
    let generic = ctx.parallelize(vec![Value::Int(1)], None).unwrap();
    let created = backend.count();

    let err = kv.join(&generic).unwrap_err();
    assert!(matches!(
        err,
        BindError::VariantMismatch { op: "join", expected: Variant::KeyValue, found: Variant::Generic }
    ));

    let numeric = ctx.parallelize_numeric(vec![1.0], None).unwrap();
    let err = numeric.union(&generic).unwrap_err();
    assert!(matches!(
        err,
        BindError::VariantMismatch { op: "union", expected: Variant::Numeric, found: Variant::Generic }
    ));
    assert_eq!(backend.count(), created + 1);
}

#[test]
fn test_cogroup_arity_limits() {
    let (ctx, backend) = recording_ctx();
    let kv = ctx.parallelize_pairs(vec![(Value::Int(1), Value::Int(2))], None).unwrap();
    let a = ctx.parallelize_pairs(vec![(Value::Int(3), Value::Int(4))], None).unwrap();
    let created = backend.count();

    let err = kv.cogroup(&[], None).unwrap_err();
    assert!(matches!(err, BindError::ArgumentCount { op: "cogroup", given: 0 }));
    let err = kv.cogroup(&[&a, &a, &a, &a], None).unwrap_err();
    assert!(matches!(err, BindError::ArgumentCount { op: "cogroup", given: 4 }));
    assert_eq!(backend.count(), created);

    assert!(kv.cogroup(&[&a], None).is_ok());
    assert_eq!(backend.count(), created + 1);
}

#[test]
fn test_cartesian_requires_generic_receiver() {
    let (ctx, _backend) = recording_ctx();
    let kv = ctx.parallelize_pairs(vec![(Value::Int(1), Value::Int(2))], None).unwrap();
    let other = ctx.parallelize(vec![Value::Int(1)], None).unwrap();
    let err = kv.cartesian(&other).unwrap_err();
    assert!(matches!(
        err,
        BindError::VariantMismatch { op: "cartesian", expected: Variant::Generic, found: Variant::KeyValue }
    ));
}
