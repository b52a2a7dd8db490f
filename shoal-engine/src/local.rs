//! In-process backend implementation.
//!
//! A single-node engine holding every dataset as partitioned `WireValue`
//! vectors. Used for embedded mode and as the executing side in tests;
//! shipped functions are resolved against the shared `FunctionRegistry`
//! and invoked per their stamped calling convention.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use uuid::Uuid;

use shoal_model::Value;
use shoal_proto::{wire_value::Kind, FunctionPayload, WireValue};

use crate::backend::{AsyncResult, EngineBackend, EngineError, HandleId};
use crate::registry::{BoundFunction, FunctionRegistry};

type Parts = Vec<Vec<WireValue>>;

pub struct LocalBackend {
    registry: Arc<FunctionRegistry>,
    default_parallelism: usize,
    datasets: Mutex<HashMap<HandleId, Arc<Parts>>>,
}

impl LocalBackend {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            default_parallelism: 2,
            datasets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_parallelism(mut self, n: usize) -> Self {
        self.default_parallelism = n.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    async fn fetch(&self, id: HandleId) -> Result<Arc<Parts>, EngineError> {
        self.datasets
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownHandle(id))
    }

    async fn store(&self, parts: Parts) -> HandleId {
        let id = Uuid::new_v4();
        self.datasets.lock().await.insert(id, Arc::new(parts));
        id
    }

    fn bound(&self, funcs: &[FunctionPayload], idx: usize, op: &str) -> Result<BoundFunction, EngineError> {
        let payload = funcs
            .get(idx)
            .ok_or_else(|| EngineError::Decode(format!("{}: missing function payload {}", op, idx)))?;
        self.registry.instantiate(payload)
    }

    fn run_transform(
        &self,
        parts: &Parts,
        op: &str,
        funcs: &[FunctionPayload],
        args: &[WireValue],
    ) -> Result<Parts, EngineError> {
        match op {
            "map" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| Ok(vec![to_wire(&f.call1(&to_host(v)?)?)?]))
            }
            "mapToDouble" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| Ok(vec![WireValue::float(f.call_numeric(&to_host(v)?)?)]))
            }
            "mapToPair" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    let (k, val) = f.call_pair(&to_host(v)?)?;
                    Ok(vec![WireValue::pair(to_wire(&k)?, to_wire(&val)?)])
                })
            }
            "flatMap" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    f.call_flat(&to_host(v)?)?.iter().map(to_wire).collect()
                })
            }
            "flatMapToDouble" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    f.call_flat(&to_host(v)?)?
                        .iter()
                        .map(|r| {
                            r.as_f64().map(WireValue::float).ok_or_else(|| {
                                EngineError::Type(format!("flatMapToDouble: {}", r.type_name()))
                            })
                        })
                        .collect()
                })
            }
            "filter" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    if f.call1(&to_host(v)?)?.is_truthy() {
                        Ok(vec![v.clone()])
                    } else {
                        Ok(Vec::new())
                    }
                })
            }
            "keyBy" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    Ok(vec![WireValue::pair(to_wire(&f.call1(&to_host(v)?)?)?, v.clone())])
                })
            }
            "groupBy" => {
                let f = self.bound(funcs, 0, op)?;
                let mut grouped = Grouped::new();
                for v in flat_iter(parts) {
                    let k = f.call1(&to_host(v)?)?;
                    grouped.push(k.clone(), to_wire(&k)?, v.clone());
                }
                let items = grouped
                    .into_groups()
                    .into_iter()
                    .map(|(_, wk, vals)| WireValue::pair(wk, WireValue::list(vals)))
                    .collect();
                Ok(chunk(items, arg_usize(args, 0).unwrap_or(parts.len())))
            }
            "sortBy" => {
                let f = self.bound(funcs, 0, op)?;
                let ascending = arg_bool(args, 0).unwrap_or(true);
                let n = arg_usize(args, 1).unwrap_or(parts.len());
                let mut keyed = Vec::new();
                for v in flat_iter(parts) {
                    keyed.push((f.call1(&to_host(v)?)?, v.clone()));
                }
                keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                if !ascending {
                    keyed.reverse();
                }
                Ok(chunk(keyed.into_iter().map(|(_, v)| v).collect(), n))
            }
            "mapValues" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    let (wk, wv) = expect_pair(v)?;
                    Ok(vec![WireValue::pair(wk, to_wire(&f.call1(&to_host(&wv)?)?)?)])
                })
            }
            "flatMapValues" => {
                let f = self.bound(funcs, 0, op)?;
                per_element(parts, |v| {
                    let (wk, wv) = expect_pair(v)?;
                    f.call_flat(&to_host(&wv)?)?
                        .iter()
                        .map(|r| Ok(WireValue::pair(wk.clone(), to_wire(r)?)))
                        .collect()
                })
            }
            "reduceByKey" => {
                let f = self.bound(funcs, 0, op)?;
                let n = arg_usize(args, 0).unwrap_or(parts.len());
                let items = reduce_groups(group_pairs(parts)?, None, &f)?;
                Ok(chunk(items, n))
            }
            "foldByKey" => {
                let zero = to_host(args.first().ok_or_else(|| EngineError::Decode("foldByKey: missing zero".into()))?)?;
                let f = self.bound(funcs, 0, op)?;
                let n = arg_usize(args, 1).unwrap_or(parts.len());
                let items = reduce_groups(group_pairs(parts)?, Some(zero), &f)?;
                Ok(chunk(items, n))
            }
            "combineByKey" => {
                let create = self.bound(funcs, 0, op)?;
                let merge_value = self.bound(funcs, 1, op)?;
                let merge_combiners = self.bound(funcs, 2, op)?;
                let n = arg_usize(args, 0).unwrap_or(parts.len());
                // Combine within each partition, then merge combiners across
                // partitions, so all three functions are exercised.
                let mut grouped = Grouped::new();
                for part in parts {
                    let mut local: Vec<(Value, WireValue, Value)> = Vec::new();
                    for elem in part {
                        let (wk, wv) = expect_pair(elem)?;
                        let k = to_host(&wk)?;
                        let v = to_host(&wv)?;
                        match local.iter_mut().find(|(lk, _, _)| *lk == k) {
                            Some((_, _, acc)) => *acc = merge_value.call2(acc, &v)?,
                            None => local.push((k, wk, create.call1(&v)?)),
                        }
                    }
                    for (k, wk, acc) in local {
                        grouped.push(k, wk, to_wire(&acc)?);
                    }
                }
                let mut items = Vec::new();
                for (_, wk, accs) in grouped.into_groups() {
                    let mut merged = to_host(&accs[0])?;
                    for acc in &accs[1..] {
                        merged = merge_combiners.call2(&merged, &to_host(acc)?)?;
                    }
                    items.push(WireValue::pair(wk, to_wire(&merged)?));
                }
                Ok(chunk(items, n))
            }
            "mapPartitions" => {
                let f = self.bound(funcs, 0, op)?;
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    let input = Value::List(part.iter().map(to_host).collect::<Result<_, _>>()?);
                    out.push(f.call_flat(&input)?.iter().map(to_wire).collect::<Result<_, _>>()?);
                }
                Ok(out)
            }
            "mapPartitionsWithIndex" => {
                let f = self.bound(funcs, 0, op)?;
                let mut out = Vec::with_capacity(parts.len());
                for (idx, part) in parts.iter().enumerate() {
                    let input = Value::List(part.iter().map(to_host).collect::<Result<_, _>>()?);
                    let result = f.call2(&Value::Int(idx as i64), &input)?;
                    let items = match result {
                        Value::List(items) => items,
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    out.push(items.iter().map(to_wire).collect::<Result<_, _>>()?);
                }
                Ok(out)
            }
            other => Err(EngineError::UnknownOp(other.to_string())),
        }
    }

    fn run_invoke(&self, parts: &Parts, op: &str, args: &[WireValue]) -> Result<Parts, EngineError> {
        match op {
            // Storage-level hints are no-ops for an in-memory engine; the
            // handle contract still requires a fresh handle.
            "cache" | "persist" | "unpersist" => Ok(parts.clone()),
            "distinct" => {
                let mut seen = HashSet::new();
                let mut out: Parts = vec![Vec::new(); parts.len().max(1)];
                for (i, part) in parts.iter().enumerate() {
                    for v in part {
                        if seen.insert(to_host(v)?) {
                            out[i].push(v.clone());
                        }
                    }
                }
                Ok(out)
            }
            "coalesce" | "repartition" => {
                let n = arg_usize(args, 0)
                    .ok_or_else(|| EngineError::Decode(format!("{}: missing partition count", op)))?;
                Ok(chunk(flatten(parts), n))
            }
            "sample" => {
                let replace = arg_bool(args, 0).unwrap_or(false);
                let fraction = arg_f64(args, 1)
                    .ok_or_else(|| EngineError::Decode("sample: missing fraction".into()))?;
                let seed = arg_i64(args, 2)
                    .ok_or_else(|| EngineError::Decode("sample: missing seed".into()))? as u64;
                let mut rng = StdRng::seed_from_u64(seed);
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    if replace {
                        let draws = (fraction * part.len() as f64).round() as usize;
                        let picked = (0..draws)
                            .filter(|_| !part.is_empty())
                            .map(|_| part[rng.gen_range(0..part.len())].clone())
                            .collect();
                        out.push(picked);
                    } else {
                        out.push(part.iter().filter(|_| rng.gen::<f64>() < fraction).cloned().collect());
                    }
                }
                Ok(out)
            }
            "sampleByKey" | "sampleByKeyExact" => {
                let replace = arg_bool(args, 0).unwrap_or(false);
                let fractions = arg_key_fractions(args, 1)?;
                let seed = arg_i64(args, 2)
                    .ok_or_else(|| EngineError::Decode(format!("{}: missing seed", op)))?
                    as u64;
                let mut rng = StdRng::seed_from_u64(seed);
                let fraction_for = |k: &Value| {
                    fractions.get(k).copied().ok_or_else(|| {
                        EngineError::Invoke(format!("{}: no fraction for key {}", op, k))
                    })
                };
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    let mut p = Vec::new();
                    if op == "sampleByKeyExact" {
                        // Exact per-key counts within each partition.
                        let mut grouped: Vec<(Value, Vec<&WireValue>)> = Vec::new();
                        for v in part {
                            let (wk, _) = expect_pair(v)?;
                            let k = to_host(&wk)?;
                            match grouped.iter_mut().find(|(gk, _)| *gk == k) {
                                Some((_, vs)) => vs.push(v),
                                None => grouped.push((k, vec![v])),
                            }
                        }
                        for (k, vs) in grouped {
                            let draws = (fraction_for(&k)? * vs.len() as f64).round() as usize;
                            if replace {
                                for _ in 0..draws {
                                    if !vs.is_empty() {
                                        p.push(vs[rng.gen_range(0..vs.len())].clone());
                                    }
                                }
                            } else {
                                let draws = draws.min(vs.len());
                                let mut idx = rand::seq::index::sample(&mut rng, vs.len(), draws).into_vec();
                                idx.sort_unstable();
                                for i in idx {
                                    p.push(vs[i].clone());
                                }
                            }
                        }
                    } else {
                        for v in part {
                            let (wk, _) = expect_pair(v)?;
                            let frac = fraction_for(&to_host(&wk)?)?;
                            if replace {
                                let mut copies = frac.trunc() as usize;
                                if rng.gen::<f64>() < frac.fract() {
                                    copies += 1;
                                }
                                for _ in 0..copies {
                                    p.push(v.clone());
                                }
                            } else if rng.gen::<f64>() < frac {
                                p.push(v.clone());
                            }
                        }
                    }
                    out.push(p);
                }
                Ok(out)
            }
            "repartitionAndSortWithinPartitions" => {
                let n = arg_usize(args, 0).ok_or_else(|| {
                    EngineError::Decode(format!("{}: missing partition count", op))
                })?;
                let ascending = arg_bool(args, 1).unwrap_or(true);
                let mut out = chunk(flatten(parts), n);
                for part in &mut out {
                    let mut keyed = Vec::with_capacity(part.len());
                    for v in std::mem::take(part) {
                        let (wk, _) = expect_pair(&v)?;
                        keyed.push((to_host(&wk)?, v));
                    }
                    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                    if !ascending {
                        keyed.reverse();
                    }
                    part.extend(keyed.into_iter().map(|(_, v)| v));
                }
                Ok(out)
            }
            "groupByKey" => {
                let items = group_pairs(parts)?
                    .into_groups()
                    .into_iter()
                    .map(|(_, wk, vals)| WireValue::pair(wk, WireValue::list(vals)))
                    .collect();
                Ok(chunk(items, parts.len()))
            }
            "sortByKey" => {
                let ascending = arg_bool(args, 0).unwrap_or(true);
                let mut keyed = Vec::new();
                for v in flat_iter(parts) {
                    let (wk, _) = expect_pair(v)?;
                    keyed.push((to_host(&wk)?, v.clone()));
                }
                keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                if !ascending {
                    keyed.reverse();
                }
                Ok(chunk(keyed.into_iter().map(|(_, v)| v).collect(), parts.len()))
            }
            "values" => per_element(parts, |v| Ok(vec![expect_pair(v)?.1])),
            "keys" => per_element(parts, |v| Ok(vec![expect_pair(v)?.0])),
            "zipWithIndex" => {
                let mut idx = 0i64;
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    let mut p = Vec::with_capacity(part.len());
                    for v in part {
                        p.push(WireValue::pair(v.clone(), WireValue::int(idx)));
                        idx += 1;
                    }
                    out.push(p);
                }
                Ok(out)
            }
            "zipWithUniqueId" => {
                let stride = parts.len().max(1) as i64;
                let mut out = Vec::with_capacity(parts.len());
                for (pi, part) in parts.iter().enumerate() {
                    let mut p = Vec::with_capacity(part.len());
                    for (i, v) in part.iter().enumerate() {
                        p.push(WireValue::pair(v.clone(), WireValue::int(i as i64 * stride + pi as i64)));
                    }
                    out.push(p);
                }
                Ok(out)
            }
            other => Err(EngineError::UnknownOp(other.to_string())),
        }
    }

    fn run_merge(
        &self,
        parts: &Parts,
        op: &str,
        others: &[Arc<Parts>],
        args: &[WireValue],
    ) -> Result<Parts, EngineError> {
        let first = others
            .first()
            .ok_or_else(|| EngineError::Decode(format!("{}: missing operand", op)))?;
        match op {
            "union" => {
                let mut out = parts.clone();
                out.extend(first.iter().cloned());
                Ok(out)
            }
            "intersection" => {
                let theirs: HashSet<Value> =
                    flat_iter(first).map(to_host).collect::<Result<_, _>>()?;
                let mut seen = HashSet::new();
                let mut items = Vec::new();
                for v in flat_iter(parts) {
                    let h = to_host(v)?;
                    if theirs.contains(&h) && seen.insert(h) {
                        items.push(v.clone());
                    }
                }
                Ok(chunk(items, parts.len()))
            }
            "subtract" => {
                let theirs: HashSet<Value> =
                    flat_iter(first).map(to_host).collect::<Result<_, _>>()?;
                per_element(parts, |v| {
                    if theirs.contains(&to_host(v)?) {
                        Ok(Vec::new())
                    } else {
                        Ok(vec![v.clone()])
                    }
                })
            }
            "subtractByKey" => {
                let their_keys: HashSet<Value> = group_pairs(first)?
                    .into_groups()
                    .into_iter()
                    .map(|(k, _, _)| k)
                    .collect();
                per_element(parts, |v| {
                    let (wk, _) = expect_pair(v)?;
                    if their_keys.contains(&to_host(&wk)?) {
                        Ok(Vec::new())
                    } else {
                        Ok(vec![v.clone()])
                    }
                })
            }
            "cartesian" => {
                let right: Vec<WireValue> = flatten(first);
                let mut items = Vec::new();
                for a in flat_iter(parts) {
                    for b in &right {
                        items.push(WireValue::pair(a.clone(), b.clone()));
                    }
                }
                Ok(chunk(items, parts.len()))
            }
            "zip" => {
                let left = flatten(parts);
                let right = flatten(first);
                if left.len() != right.len() {
                    return Err(EngineError::Invoke(format!(
                        "zip: element counts differ ({} vs {})",
                        left.len(),
                        right.len()
                    )));
                }
                let items = left
                    .into_iter()
                    .zip(right)
                    .map(|(a, b)| WireValue::pair(a, b))
                    .collect();
                Ok(chunk(items, parts.len()))
            }
            "join" | "leftOuterJoin" | "rightOuterJoin" | "fullOuterJoin" => {
                self.run_join(parts, op, first)
            }
            "cogroup" => {
                let mut sides = Vec::with_capacity(others.len() + 1);
                sides.push(group_pairs(parts)?);
                for o in others {
                    sides.push(group_pairs(o)?);
                }
                // Key order: first appearance across sides, left to right.
                let mut keys: Vec<(Value, WireValue)> = Vec::new();
                for side in &sides {
                    for (k, wk, _) in side.groups() {
                        if !keys.iter().any(|(seen, _)| seen == k) {
                            keys.push((k.clone(), wk.clone()));
                        }
                    }
                }
                let items = keys
                    .into_iter()
                    .map(|(k, wk)| {
                        let buckets = sides
                            .iter()
                            .map(|side| WireValue::list(side.values_for(&k)))
                            .collect();
                        WireValue::pair(wk, WireValue::list(buckets))
                    })
                    .collect();
                Ok(chunk(items, arg_usize(args, 0).unwrap_or(parts.len())))
            }
            other => Err(EngineError::UnknownOp(other.to_string())),
        }
    }

    fn run_join(&self, parts: &Parts, op: &str, other: &Parts) -> Result<Parts, EngineError> {
        let left = group_pairs(parts)?;
        let right = group_pairs(other)?;
        let mut items = Vec::new();
        match op {
            "join" => {
                for (k, wk, vals) in left.groups() {
                    for v in vals {
                        for w in right.values_for(k) {
                            items.push(WireValue::pair(wk.clone(), WireValue::pair(v.clone(), w)));
                        }
                    }
                }
            }
            "leftOuterJoin" => {
                for (k, wk, vals) in left.groups() {
                    let matches = right.values_for(k);
                    for v in vals {
                        if matches.is_empty() {
                            items.push(WireValue::pair(
                                wk.clone(),
                                WireValue::pair(v.clone(), WireValue::absent()),
                            ));
                        } else {
                            for w in &matches {
                                items.push(WireValue::pair(
                                    wk.clone(),
                                    WireValue::pair(v.clone(), WireValue::some(w.clone())),
                                ));
                            }
                        }
                    }
                }
            }
            "rightOuterJoin" => {
                for (k, wk, vals) in right.groups() {
                    let matches = left.values_for(k);
                    for w in vals {
                        if matches.is_empty() {
                            items.push(WireValue::pair(
                                wk.clone(),
                                WireValue::pair(WireValue::absent(), w.clone()),
                            ));
                        } else {
                            for v in &matches {
                                items.push(WireValue::pair(
                                    wk.clone(),
                                    WireValue::pair(WireValue::some(v.clone()), w.clone()),
                                ));
                            }
                        }
                    }
                }
            }
            "fullOuterJoin" => {
                let mut keys: Vec<(Value, WireValue)> = Vec::new();
                for (k, wk, _) in left.groups().iter().chain(right.groups().iter()) {
                    if !keys.iter().any(|(seen, _)| seen == k) {
                        keys.push((k.clone(), wk.clone()));
                    }
                }
                for (k, wk) in keys {
                    let ls = left.values_for(&k);
                    let rs = right.values_for(&k);
                    match (ls.is_empty(), rs.is_empty()) {
                        (false, false) => {
                            for v in &ls {
                                for w in &rs {
                                    items.push(WireValue::pair(
                                        wk.clone(),
                                        WireValue::pair(
                                            WireValue::some(v.clone()),
                                            WireValue::some(w.clone()),
                                        ),
                                    ));
                                }
                            }
                        }
                        (false, true) => {
                            for v in &ls {
                                items.push(WireValue::pair(
                                    wk.clone(),
                                    WireValue::pair(WireValue::some(v.clone()), WireValue::absent()),
                                ));
                            }
                        }
                        (true, false) => {
                            for w in &rs {
                                items.push(WireValue::pair(
                                    wk.clone(),
                                    WireValue::pair(WireValue::absent(), WireValue::some(w.clone())),
                                ));
                            }
                        }
                        (true, true) => {}
                    }
                }
            }
            _ => unreachable!("run_join called with {}", op),
        }
        Ok(chunk(items, parts.len()))
    }

    fn run_materialize(
        &self,
        parts: &Parts,
        op: &str,
        funcs: &[FunctionPayload],
        args: &[WireValue],
    ) -> Result<WireValue, EngineError> {
        match op {
            "collect" => Ok(WireValue::list(flatten(parts))),
            "collectAsMap" => {
                // Last write wins for duplicate keys.
                let mut order: Vec<Value> = Vec::new();
                let mut entries: HashMap<Value, (WireValue, WireValue)> = HashMap::new();
                for v in flat_iter(parts) {
                    let (wk, wv) = expect_pair(v)?;
                    let k = to_host(&wk)?;
                    if !entries.contains_key(&k) {
                        order.push(k.clone());
                    }
                    entries.insert(k, (wk, wv));
                }
                let mut items = Vec::with_capacity(order.len());
                for k in order {
                    if let Some((wk, wv)) = entries.remove(&k) {
                        items.push(WireValue::pair(wk, wv));
                    }
                }
                Ok(WireValue::list(items))
            }
            "reduce" | "treeReduce" => {
                let f = self.bound(funcs, 0, op)?;
                let mut acc: Option<Value> = None;
                for v in flat_iter(parts) {
                    let h = to_host(v)?;
                    acc = Some(match acc {
                        None => h,
                        Some(a) => f.call2(&a, &h)?,
                    });
                }
                let out = acc.ok_or_else(|| EngineError::Invoke(format!("{}: empty collection", op)))?;
                to_wire(&out)
            }
            "fold" => {
                let zero = to_host(args.first().ok_or_else(|| EngineError::Decode("fold: missing zero".into()))?)?;
                let f = self.bound(funcs, 0, op)?;
                let mut acc = zero.clone();
                for part in parts {
                    let mut pacc = zero.clone();
                    for v in part {
                        pacc = f.call2(&pacc, &to_host(v)?)?;
                    }
                    acc = f.call2(&acc, &pacc)?;
                }
                to_wire(&acc)
            }
            "aggregate" | "treeAggregate" => {
                let zero = to_host(args.first().ok_or_else(|| EngineError::Decode(format!("{}: missing zero", op)))?)?;
                let seq = self.bound(funcs, 0, op)?;
                let comb = self.bound(funcs, 1, op)?;
                let mut acc = zero.clone();
                for part in parts {
                    let mut pacc = zero.clone();
                    for v in part {
                        pacc = seq.call2(&pacc, &to_host(v)?)?;
                    }
                    acc = comb.call2(&acc, &pacc)?;
                }
                to_wire(&acc)
            }
            "foreach" => {
                let f = self.bound(funcs, 0, op)?;
                for v in flat_iter(parts) {
                    f.call_void(&to_host(v)?)?;
                }
                Ok(WireValue::null())
            }
            "foreachPartition" => {
                let f = self.bound(funcs, 0, op)?;
                for part in parts {
                    let input = Value::List(part.iter().map(to_host).collect::<Result<_, _>>()?);
                    f.call_void(&input)?;
                }
                Ok(WireValue::null())
            }
            "reduceByKeyLocally" => {
                let f = self.bound(funcs, 0, op)?;
                let items = reduce_groups(group_pairs(parts)?, None, &f)?;
                Ok(WireValue::list(items))
            }
            "isEmpty" => Ok(WireValue::bool(parts.iter().all(|p| p.is_empty()))),
            "count" => Ok(WireValue::int(parts.iter().map(|p| p.len() as i64).sum())),
            "sum" => Ok(WireValue::float(numeric_elements(parts)?.iter().sum())),
            "mean" | "min" | "max" | "variance" | "stdev" => {
                let nums = numeric_elements(parts)?;
                if nums.is_empty() {
                    return Err(EngineError::Invoke(format!("{}: empty collection", op)));
                }
                let mean = nums.iter().sum::<f64>() / nums.len() as f64;
                let out = match op {
                    "mean" => mean,
                    "min" => nums.iter().copied().fold(f64::INFINITY, f64::min),
                    "max" => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    _ => {
                        let var =
                            nums.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / nums.len() as f64;
                        if op == "variance" {
                            var
                        } else {
                            var.sqrt()
                        }
                    }
                };
                Ok(WireValue::float(out))
            }
            other => Err(EngineError::UnknownOp(other.to_string())),
        }
    }
}

impl EngineBackend for LocalBackend {
    fn parallelize(&self, elements: Vec<WireValue>, partitions: Option<u32>) -> AsyncResult<'_, HandleId> {
        Box::pin(async move {
            let n = partitions.map(|n| n as usize).unwrap_or(self.default_parallelism);
            Ok(self.store(chunk(elements, n)).await)
        })
    }

    fn text_file<'a>(&'a self, path: &'a str, min_partitions: Option<u32>) -> AsyncResult<'a, HandleId> {
        Box::pin(async move {
            let content = std::fs::read_to_string(path).map_err(EngineError::Io)?;
            let lines = content.lines().map(WireValue::str).collect();
            let n = min_partitions.map(|n| n as usize).unwrap_or(1);
            Ok(self.store(chunk(lines, n)).await)
        })
    }

    fn whole_text_files<'a>(&'a self, path: &'a str, min_partitions: Option<u32>) -> AsyncResult<'a, HandleId> {
        Box::pin(async move {
            let mut paths: Vec<_> = std::fs::read_dir(path)
                .map_err(EngineError::Io)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            paths.sort();
            let mut items = Vec::with_capacity(paths.len());
            for p in paths {
                let content = std::fs::read_to_string(&p).map_err(EngineError::Io)?;
                items.push(WireValue::pair(
                    WireValue::str(p.display().to_string()),
                    WireValue::str(content),
                ));
            }
            let n = min_partitions.map(|n| n as usize).unwrap_or(1);
            Ok(self.store(chunk(items, n)).await)
        })
    }

    fn transform<'a>(
        &'a self,
        handle: HandleId,
        op: &'a str,
        funcs: Vec<FunctionPayload>,
        args: Vec<WireValue>,
    ) -> AsyncResult<'a, HandleId> {
        Box::pin(async move {
            tracing::debug!(%handle, op, "transform");
            let parts = self.fetch(handle).await?;
            let out = self.run_transform(&parts, op, &funcs, &args)?;
            Ok(self.store(out).await)
        })
    }

    fn invoke<'a>(&'a self, handle: HandleId, op: &'a str, args: Vec<WireValue>) -> AsyncResult<'a, HandleId> {
        Box::pin(async move {
            tracing::debug!(%handle, op, "invoke");
            let parts = self.fetch(handle).await?;
            let out = self.run_invoke(&parts, op, &args)?;
            Ok(self.store(out).await)
        })
    }

    fn merge<'a>(
        &'a self,
        handle: HandleId,
        op: &'a str,
        others: Vec<HandleId>,
        args: Vec<WireValue>,
    ) -> AsyncResult<'a, HandleId> {
        Box::pin(async move {
            tracing::debug!(%handle, op, operands = others.len(), "merge");
            let parts = self.fetch(handle).await?;
            let mut other_parts = Vec::with_capacity(others.len());
            for id in others {
                other_parts.push(self.fetch(id).await?);
            }
            let out = self.run_merge(&parts, op, &other_parts, &args)?;
            Ok(self.store(out).await)
        })
    }

    fn random_split(&self, handle: HandleId, weights: Vec<f64>, seed: u64) -> AsyncResult<'_, Vec<HandleId>> {
        Box::pin(async move {
            let parts = self.fetch(handle).await?;
            let total: f64 = weights.iter().sum();
            if !(total > 0.0) {
                return Err(EngineError::Invoke("randomSplit: weights must sum to a positive value".into()).into());
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let mut buckets: Vec<Vec<WireValue>> = vec![Vec::new(); weights.len()];
            for v in flat_iter(&parts) {
                let mut draw = rng.gen::<f64>() * total;
                let mut idx = 0;
                for (i, w) in weights.iter().enumerate() {
                    idx = i;
                    if draw < *w {
                        break;
                    }
                    draw -= w;
                }
                buckets[idx].push(v.clone());
            }
            let mut handles = Vec::with_capacity(buckets.len());
            for bucket in buckets {
                handles.push(self.store(chunk(bucket, parts.len())).await);
            }
            Ok(handles)
        })
    }

    fn materialize<'a>(
        &'a self,
        handle: HandleId,
        op: &'a str,
        funcs: Vec<FunctionPayload>,
        args: Vec<WireValue>,
    ) -> AsyncResult<'a, WireValue> {
        Box::pin(async move {
            tracing::debug!(%handle, op, "materialize");
            let parts = self.fetch(handle).await?;
            Ok(self.run_materialize(&parts, op, &funcs, &args)?)
        })
    }

    fn num_partitions(&self, handle: HandleId) -> AsyncResult<'_, u32> {
        Box::pin(async move {
            let parts = self.fetch(handle).await?;
            Ok(parts.len() as u32)
        })
    }
}

// ==================== Argument helpers ====================

fn arg_bool(args: &[WireValue], i: usize) -> Option<bool> {
    match args.get(i)?.kind {
        Some(Kind::Bool(b)) => Some(b),
        _ => None,
    }
}

fn arg_i64(args: &[WireValue], i: usize) -> Option<i64> {
    match args.get(i)?.kind {
        Some(Kind::Int(n)) => Some(n),
        _ => None,
    }
}

fn arg_usize(args: &[WireValue], i: usize) -> Option<usize> {
    arg_i64(args, i).and_then(|n| usize::try_from(n).ok())
}

/// Per-key fraction table: a list of (key, fraction) pairs.
fn arg_key_fractions(args: &[WireValue], i: usize) -> Result<HashMap<Value, f64>, EngineError> {
    let v = args
        .get(i)
        .ok_or_else(|| EngineError::Decode("missing per-key fraction table".into()))?;
    let items = match &v.kind {
        Some(Kind::List(l)) => &l.items,
        _ => return Err(EngineError::Type("fraction table must be a list of pairs".into())),
    };
    let mut out = HashMap::with_capacity(items.len());
    for item in items {
        let (wk, wf) = expect_pair(item)?;
        let f = to_host(&wf)?
            .as_f64()
            .ok_or_else(|| EngineError::Type("fraction must be numeric".into()))?;
        out.insert(to_host(&wk)?, f);
    }
    Ok(out)
}

fn arg_f64(args: &[WireValue], i: usize) -> Option<f64> {
    match args.get(i)?.kind {
        Some(Kind::Float(f)) => Some(f),
        Some(Kind::Int(n)) => Some(n as f64),
        _ => None,
    }
}

// ==================== Partition helpers ====================

fn to_host(w: &WireValue) -> Result<Value, EngineError> {
    Value::try_from(w.clone()).map_err(EngineError::Type)
}

fn to_wire(v: &Value) -> Result<WireValue, EngineError> {
    WireValue::try_from(v).map_err(EngineError::Type)
}

fn expect_pair(v: &WireValue) -> Result<(WireValue, WireValue), EngineError> {
    v.clone()
        .into_pair()
        .ok_or_else(|| EngineError::Type("expected key/value pairs".into()))
}

fn flatten(parts: &Parts) -> Vec<WireValue> {
    parts.iter().flatten().cloned().collect()
}

fn flat_iter(parts: &Parts) -> impl Iterator<Item = &WireValue> {
    parts.iter().flatten()
}

/// Split into `n` partitions of near-equal size, preserving order.
fn chunk(items: Vec<WireValue>, n: usize) -> Parts {
    let n = n.max(1);
    let base = items.len() / n;
    let rem = items.len() % n;
    let mut out = Vec::with_capacity(n);
    let mut iter = items.into_iter();
    for i in 0..n {
        let size = base + usize::from(i < rem);
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

fn per_element<F>(parts: &Parts, f: F) -> Result<Parts, EngineError>
where
    F: Fn(&WireValue) -> Result<Vec<WireValue>, EngineError>,
{
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let mut p = Vec::with_capacity(part.len());
        for v in part {
            p.extend(f(v)?);
        }
        out.push(p);
    }
    Ok(out)
}

fn numeric_elements(parts: &Parts) -> Result<Vec<f64>, EngineError> {
    flat_iter(parts)
        .map(|v| {
            let h = to_host(v)?;
            h.as_f64()
                .ok_or_else(|| EngineError::Type(format!("non-numeric element: {}", h.type_name())))
        })
        .collect()
}

/// Key groups in first-appearance order.
struct Grouped {
    index: HashMap<Value, usize>,
    groups: Vec<(Value, WireValue, Vec<WireValue>)>,
}

impl Grouped {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    fn push(&mut self, key: Value, wire_key: WireValue, value: WireValue) {
        match self.index.get(&key) {
            Some(&i) => self.groups[i].2.push(value),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, wire_key, vec![value]));
            }
        }
    }

    fn groups(&self) -> &[(Value, WireValue, Vec<WireValue>)] {
        &self.groups
    }

    fn values_for(&self, key: &Value) -> Vec<WireValue> {
        match self.index.get(key) {
            Some(&i) => self.groups[i].2.clone(),
            None => Vec::new(),
        }
    }

    fn into_groups(self) -> Vec<(Value, WireValue, Vec<WireValue>)> {
        self.groups
    }
}

fn group_pairs(parts: &Parts) -> Result<Grouped, EngineError> {
    let mut grouped = Grouped::new();
    for v in flat_iter(parts) {
        let (wk, wv) = expect_pair(v)?;
        grouped.push(to_host(&wk)?, wk, wv);
    }
    Ok(grouped)
}

/// Reduce each key group with a combining function, optionally seeding the
/// accumulator with a zero value.
fn reduce_groups(
    grouped: Grouped,
    zero: Option<Value>,
    f: &BoundFunction,
) -> Result<Vec<WireValue>, EngineError> {
    let mut items = Vec::new();
    for (_, wk, vals) in grouped.into_groups() {
        let mut acc = zero.clone();
        for v in &vals {
            let h = to_host(v)?;
            acc = Some(match acc {
                None => h,
                Some(a) => f.call2(&a, &h)?,
            });
        }
        let out = acc.ok_or_else(|| EngineError::Invoke("empty key group".into()))?;
        items.push(WireValue::pair(wk, to_wire(&out)?));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_even_distribution() {
        let items: Vec<_> = (0..7).map(WireValue::int).collect();
        let parts = chunk(items, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 2);
        assert_eq!(parts[0][0], WireValue::int(0));
        assert_eq!(parts[2][1], WireValue::int(6));
    }

    #[test]
    fn test_chunk_empty_keeps_partition_count() {
        let parts = chunk(Vec::new(), 4);
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| p.is_empty()));
    }

    #[test]
    fn test_group_pairs_preserves_first_seen_order() {
        let parts = vec![vec![
            WireValue::pair(WireValue::str("b"), WireValue::int(1)),
            WireValue::pair(WireValue::str("a"), WireValue::int(2)),
            WireValue::pair(WireValue::str("b"), WireValue::int(3)),
        ]];
        let grouped = group_pairs(&parts).unwrap();
        let groups = grouped.into_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Value::str("b"));
        assert_eq!(groups[0].2.len(), 2);
        assert_eq!(groups[1].0, Value::str("a"));
    }
}
