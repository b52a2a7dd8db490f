//! Shoal Engine Boundary
//!
//! The opaque-runtime side of the binding layer: the `EngineBackend` trait
//! consumed by `shoal-bindings`, the function registry that deserializes and
//! invokes shipped functions, and `LocalBackend`, an in-process engine for
//! embedded mode and tests.

pub mod backend;
pub mod local;
pub mod registry;

pub use backend::{AsyncResult, BackendError, BackendResult, Engine, EngineBackend, EngineError, HandleId};
pub use local::LocalBackend;
pub use registry::{BoundFunction, FunctionRegistry, DEFAULT_NUMERIC_FN, IDENTITY_FN};
