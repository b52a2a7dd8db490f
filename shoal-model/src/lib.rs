//! Shoal Model
//!
//! Pure data types shared by the binding layer and the engine boundary,
//! decoupled from wire formats and backends.

pub mod value;

pub use value::{FuncRef, Value};
