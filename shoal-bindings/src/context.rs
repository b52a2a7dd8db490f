//! Blocking entry point.
//!
//! A `Context` owns the tokio runtime and the backend handle; every
//! collection created from it shares both. The host sees a fully
//! synchronous surface; asynchrony is an engine implementation detail.

use std::sync::Arc;

use std::future::Future;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shoal_engine::{Engine, EngineBackend, FunctionRegistry, LocalBackend};
use shoal_model::Value;
use shoal_proto::WireValue;

use crate::collection::Collection;
use crate::error::BindError;
use crate::ops::Variant;

pub(crate) struct ContextCore {
    rt: tokio::runtime::Runtime,
    pub(crate) backend: Engine,
}

impl ContextCore {
    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }
}

pub struct Context {
    core: Arc<ContextCore>,
}

pub struct ContextBuilder {
    backend: Option<Engine>,
    registry: Option<Arc<FunctionRegistry>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        ContextBuilder { backend: None, registry: None }
    }

    /// Attach an already-constructed backend. Overrides any registry
    /// set on the builder.
    pub fn backend(mut self, backend: Arc<dyn EngineBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Function registry for the default in-process backend.
    pub fn registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Context, BindError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| BindError::Engine(format!("runtime startup failed: {e}")))?;

        let backend = match self.backend {
            Some(b) => b,
            None => {
                let registry = self
                    .registry
                    .unwrap_or_else(|| Arc::new(FunctionRegistry::with_builtins()));
                Arc::new(LocalBackend::new(registry))
            }
        };

        info!("context started");
        Ok(Context { core: Arc::new(ContextCore { rt, backend }) })
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// In-process context over the default engine.
    pub fn local() -> Result<Self, BindError> {
        ContextBuilder::new().build()
    }

    pub(crate) fn core(&self) -> Arc<ContextCore> {
        self.core.clone()
    }

    /// Distributes host values into a generic collection.
    pub fn parallelize(&self, data: Vec<Value>, num_partitions: Option<u32>) -> Result<Collection, BindError> {
        let wire = to_wire(&data)?;
        let handle = self
            .core
            .block_on(self.core.backend.parallelize(wire, num_partitions))
            .map_err(BindError::engine)?;
        Ok(Collection::new(self.core(), handle, Variant::Generic))
    }

    /// Distributes key-value pairs into a key-value collection.
    pub fn parallelize_pairs(&self, data: Vec<(Value, Value)>, num_partitions: Option<u32>) -> Result<Collection, BindError> {
        let pairs: Vec<Value> = data.into_iter().map(|(k, v)| Value::pair(k, v)).collect();
        let wire = to_wire(&pairs)?;
        let handle = self
            .core
            .block_on(self.core.backend.parallelize(wire, num_partitions))
            .map_err(BindError::engine)?;
        Ok(Collection::new(self.core(), handle, Variant::KeyValue))
    }

    /// Distributes numbers into a numeric collection.
    pub fn parallelize_numeric(&self, data: Vec<f64>, num_partitions: Option<u32>) -> Result<Collection, BindError> {
        let wire = data.into_iter().map(WireValue::float).collect();
        let handle = self
            .core
            .block_on(self.core.backend.parallelize(wire, num_partitions))
            .map_err(BindError::engine)?;
        Ok(Collection::new(self.core(), handle, Variant::Numeric))
    }

    /// Reads a text file as a generic collection of lines.
    pub fn text_file(&self, path: &str, min_partitions: Option<u32>) -> Result<Collection, BindError> {
        let handle = self
            .core
            .block_on(self.core.backend.text_file(path, min_partitions))
            .map_err(BindError::engine)?;
        Ok(Collection::new(self.core(), handle, Variant::Generic))
    }

    /// Reads every file under a directory as (path, contents) pairs.
    pub fn whole_text_files(&self, path: &str, min_partitions: Option<u32>) -> Result<Collection, BindError> {
        let handle = self
            .core
            .block_on(self.core.backend.whole_text_files(path, min_partitions))
            .map_err(BindError::engine)?;
        Ok(Collection::new(self.core(), handle, Variant::KeyValue))
    }
}

fn to_wire(data: &[Value]) -> Result<Vec<WireValue>, BindError> {
    data.iter()
        .map(WireValue::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(BindError::Serialization)
}
