use std::sync::Arc;

use shoal_engine::registry::encode_spec;
use shoal_engine::{EngineBackend, FunctionRegistry, LocalBackend};
use shoal_model::Value;
use shoal_proto::{AdapterKind, WireValue};

fn test_registry() -> Arc<FunctionRegistry> {
    let reg = FunctionRegistry::with_builtins();
    reg.register("double", |args: &[Value]| match args {
        [Value::Int(i)] => Ok(Value::Int(i * 2)),
        _ => Err(shoal_engine::EngineError::Type("double: expected one int".into())),
    });
    reg.register("sum2", |args: &[Value]| match args {
        [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
        _ => Err(shoal_engine::EngineError::Type("sum2: expected two ints".into())),
    });
    reg.register("is_even", |args: &[Value]| match args {
        [Value::Int(i)] => Ok(Value::Bool(i % 2 == 0)),
        _ => Err(shoal_engine::EngineError::Type("is_even: expected one int".into())),
    });
    Arc::new(reg)
}

fn ints(values: &[i64]) -> Vec<WireValue> {
    values.iter().copied().map(WireValue::int).collect()
}

fn collected(result: WireValue) -> Vec<WireValue> {
    match result.kind {
        Some(shoal_proto::wire_value::Kind::List(l)) => l.items,
        other => panic!("expected list result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_map_applies_shipped_function_per_element() {
    let backend = LocalBackend::new(test_registry());
    let h = backend.parallelize(ints(&[1, 2, 3]), Some(2)).await.unwrap();
    let mapped = backend
        .transform(h, "map", vec![encode_spec("double", &[], AdapterKind::Map).unwrap()], vec![])
        .await
        .unwrap();
    let out = backend.materialize(mapped, "collect", vec![], vec![]).await.unwrap();
    assert_eq!(collected(out), ints(&[2, 4, 6]));
}

#[tokio::test]
async fn test_filter_and_count() {
    let backend = LocalBackend::new(test_registry());
    let h = backend.parallelize(ints(&[1, 2, 3, 4, 5, 6]), Some(3)).await.unwrap();
    let kept = backend
        .transform(h, "filter", vec![encode_spec("is_even", &[], AdapterKind::Map).unwrap()], vec![])
        .await
        .unwrap();
    let count = backend.materialize(kept, "count", vec![], vec![]).await.unwrap();
    assert_eq!(count, WireValue::int(3));
}

#[tokio::test]
async fn test_reduce_folds_all_partitions() {
    let backend = LocalBackend::new(test_registry());
    let h = backend.parallelize(ints(&[1, 2, 3, 4]), Some(3)).await.unwrap();
    let total = backend
        .materialize(h, "reduce", vec![encode_spec("sum2", &[], AdapterKind::Combine).unwrap()], vec![])
        .await
        .unwrap();
    assert_eq!(total, WireValue::int(10));
}

#[tokio::test]
async fn test_reduce_of_empty_collection_fails() {
    let backend = LocalBackend::new(test_registry());
    let h = backend.parallelize(vec![], Some(2)).await.unwrap();
    let err = backend
        .materialize(h, "reduce", vec![encode_spec("sum2", &[], AdapterKind::Combine).unwrap()], vec![])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("empty collection"));
}

#[tokio::test]
async fn test_left_outer_join_wraps_missing_side_in_optional() {
    let backend = LocalBackend::new(test_registry());
    let left = backend
        .parallelize(
            vec![
                WireValue::pair(WireValue::str("a"), WireValue::int(1)),
                WireValue::pair(WireValue::str("b"), WireValue::int(2)),
            ],
            Some(1),
        )
        .await
        .unwrap();
    let right = backend
        .parallelize(vec![WireValue::pair(WireValue::str("a"), WireValue::int(10))], Some(1))
        .await
        .unwrap();
    let joined = backend.merge(left, "leftOuterJoin", vec![right], vec![]).await.unwrap();
    let out = collected(backend.materialize(joined, "collect", vec![], vec![]).await.unwrap());
    assert_eq!(out.len(), 2);
    assert_eq!(
        out[0],
        WireValue::pair(
            WireValue::str("a"),
            WireValue::pair(WireValue::int(1), WireValue::some(WireValue::int(10))),
        )
    );
    assert_eq!(
        out[1],
        WireValue::pair(
            WireValue::str("b"),
            WireValue::pair(WireValue::int(2), WireValue::absent()),
        )
    );
}

#[tokio::test]
async fn test_unknown_handle_and_unknown_op() {
    let backend = LocalBackend::new(test_registry());
    let missing = uuid::Uuid::new_v4();
    assert!(backend.invoke(missing, "cache", vec![]).await.is_err());

    let h = backend.parallelize(ints(&[1]), None).await.unwrap();
    let err = backend.invoke(h, "noSuchOp", vec![]).await.unwrap_err();
    assert!(err.to_string().contains("unknown operation"));
}

#[tokio::test]
async fn test_repartition_and_num_partitions() {
    let backend = LocalBackend::new(test_registry());
    let h = backend.parallelize(ints(&[1, 2, 3, 4, 5]), Some(1)).await.unwrap();
    assert_eq!(backend.num_partitions(h).await.unwrap(), 1);
    let re = backend
        .invoke(h, "repartition", vec![WireValue::int(4)])
        .await
        .unwrap();
    assert_eq!(backend.num_partitions(re).await.unwrap(), 4);
    let out = collected(backend.materialize(re, "collect", vec![], vec![]).await.unwrap());
    assert_eq!(out, ints(&[1, 2, 3, 4, 5]));
}

#[tokio::test]
async fn test_random_split_partitions_all_elements() {
    let backend = LocalBackend::new(test_registry());
    let h = backend.parallelize(ints(&(0..100).collect::<Vec<_>>()), Some(4)).await.unwrap();
    let splits = backend.random_split(h, vec![0.5, 0.5], 42).await.unwrap();
    assert_eq!(splits.len(), 2);
    let mut total = 0;
    for s in splits {
        let count = backend.materialize(s, "collect", vec![], vec![]).await.unwrap();
        total += collected(count).len();
    }
    assert_eq!(total, 100);
}

#[tokio::test]
async fn test_text_file_yields_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

    let backend = LocalBackend::new(test_registry());
    let h = backend.text_file(path.to_str().unwrap(), None).await.unwrap();
    let out = collected(backend.materialize(h, "collect", vec![], vec![]).await.unwrap());
    assert_eq!(
        out,
        vec![WireValue::str("alpha"), WireValue::str("beta"), WireValue::str("gamma")]
    );
}

#[tokio::test]
async fn test_cogroup_applies_requested_partition_count() {
    let backend = LocalBackend::new(test_registry());
    let a = backend
        .parallelize(vec![WireValue::pair(WireValue::str("k"), WireValue::int(1))], Some(1))
        .await
        .unwrap();
    let b = backend
        .parallelize(vec![WireValue::pair(WireValue::str("j"), WireValue::int(2))], Some(1))
        .await
        .unwrap();
    let g = backend
        .merge(a, "cogroup", vec![b], vec![WireValue::int(4)])
        .await
        .unwrap();
    assert_eq!(backend.num_partitions(g).await.unwrap(), 4);
}

#[tokio::test]
async fn test_cogroup_buckets_per_side() {
    let backend = LocalBackend::new(test_registry());
    let a = backend
        .parallelize(
            vec![
                WireValue::pair(WireValue::str("k"), WireValue::int(1)),
                WireValue::pair(WireValue::str("k"), WireValue::int(2)),
            ],
            Some(1),
        )
        .await
        .unwrap();
    let b = backend
        .parallelize(vec![WireValue::pair(WireValue::str("k"), WireValue::int(9))], Some(1))
        .await
        .unwrap();
    let g = backend.merge(a, "cogroup", vec![b], vec![]).await.unwrap();
    let out = collected(backend.materialize(g, "collect", vec![], vec![]).await.unwrap());
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0],
        WireValue::pair(
            WireValue::str("k"),
            WireValue::list(vec![
                WireValue::list(vec![WireValue::int(1), WireValue::int(2)]),
                WireValue::list(vec![WireValue::int(9)]),
            ]),
        )
    );
}
