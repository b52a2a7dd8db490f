//! Backend abstraction
//!
//! `EngineBackend` is the canonical interface to the distributed execution
//! runtime. The binding layer only ever talks to `Arc<dyn EngineBackend>`;
//! `LocalBackend` implements it in-process, remote engines behind their own
//! transports implement the same surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use shoal_proto::{FunctionPayload, WireValue};

/// Opaque reference to a partitioned dataset held by the engine.
pub type HandleId = Uuid;

/// Backend error type. Engine failures are propagated unmodified; the
/// binding layer never interprets or retries them.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;
pub type BackendResult<T> = Result<T, BackendError>;

/// Async return type for trait methods.
pub type AsyncResult<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// Errors raised inside an engine implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown handle: {0}")]
    UnknownHandle(HandleId),
    #[error("unknown operation: {0}")]
    UnknownOp(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("payload decode failed: {0}")]
    Decode(String),
    #[error("function invocation failed: {0}")]
    Invoke(String),
    #[error("type error: {0}")]
    Type(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The engine boundary. Operation names are the engine's own vocabulary
/// (`textFile`, `reduceByKey`, `collectAsMap`, ...); the binding layer's
/// operation table maps its methods onto them.
///
/// Every method either returns a new handle (lazy from the host's point of
/// view) or materializes a result. Nothing here mutates an existing handle.
pub trait EngineBackend: Send + Sync {
    // ---- Handle creation ----
    fn parallelize(&self, elements: Vec<WireValue>, partitions: Option<u32>) -> AsyncResult<'_, HandleId>;
    fn text_file<'a>(&'a self, path: &'a str, min_partitions: Option<u32>) -> AsyncResult<'a, HandleId>;
    fn whole_text_files<'a>(&'a self, path: &'a str, min_partitions: Option<u32>) -> AsyncResult<'a, HandleId>;

    // ---- Handle-producing operations ----
    /// A named operation driven by one or more shipped functions
    /// (map, filter, combineByKey, ...).
    fn transform<'a>(
        &'a self,
        handle: HandleId,
        op: &'a str,
        funcs: Vec<FunctionPayload>,
        args: Vec<WireValue>,
    ) -> AsyncResult<'a, HandleId>;

    /// A named operation taking only plain arguments (cache, coalesce,
    /// sortByKey, ...). Also the escape hatch for operations the binding
    /// layer has not given a typed signature.
    fn invoke<'a>(&'a self, handle: HandleId, op: &'a str, args: Vec<WireValue>) -> AsyncResult<'a, HandleId>;

    /// A named operation combining this handle with one or more others
    /// (union, join, cogroup, ...).
    fn merge<'a>(
        &'a self,
        handle: HandleId,
        op: &'a str,
        others: Vec<HandleId>,
        args: Vec<WireValue>,
    ) -> AsyncResult<'a, HandleId>;

    fn random_split(&self, handle: HandleId, weights: Vec<f64>, seed: u64) -> AsyncResult<'_, Vec<HandleId>>;

    // ---- Materializing operations ----
    /// Blocks until the engine completes and pulls the result back
    /// (collect, reduce, isEmpty, sum, ...).
    fn materialize<'a>(
        &'a self,
        handle: HandleId,
        op: &'a str,
        funcs: Vec<FunctionPayload>,
        args: Vec<WireValue>,
    ) -> AsyncResult<'a, WireValue>;

    fn num_partitions(&self, handle: HandleId) -> AsyncResult<'_, u32>;
}

/// Type alias for shared backend reference.
pub type Engine = Arc<dyn EngineBackend>;
