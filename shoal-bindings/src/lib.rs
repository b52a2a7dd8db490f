//! Shoal Bindings
//!
//! The typed client surface over an external partitioned-collection engine.
//! A `Context` produces `Collection` handles; every transformation either
//! ships a host function to the engine (through the function codec) and
//! rewraps the returned handle in its declared variant, merges two
//! variant-checked handles, or passes through rewrapped. Materializing
//! calls block, pull results back, and scrub the engine's foreign optional
//! representation before handing values to the host.

pub mod codec;
pub mod collection;
pub mod context;
pub mod error;
pub mod normalize;
pub mod ops;

pub use collection::Collection;
pub use context::{Context, ContextBuilder};
pub use error::BindError;
pub use ops::Variant;

// Re-exports for consumers
pub use shoal_engine::{Engine, EngineBackend, FunctionRegistry, HandleId, LocalBackend};
pub use shoal_model::{FuncRef, Value};
pub use shoal_proto::AdapterKind;
