//! Binding-layer error type.
//!
//! Every variant except `Engine` is raised synchronously at the call site,
//! before any engine invocation. Engine failures are propagated unmodified;
//! there is no retry or local recovery in this layer.

use crate::ops::Variant;

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("not a callable: got {0}")]
    NotCallable(&'static str),
    #[error("function serialization failed: {0}")]
    Serialization(String),
    #[error("{op}: variant mismatch, expected {expected}, got {found}")]
    VariantMismatch {
        op: &'static str,
        expected: Variant,
        found: Variant,
    },
    #[error("{op}: unsupported argument count {given}")]
    ArgumentCount { op: &'static str, given: usize },
    #[error("engine error: {0}")]
    Engine(String),
}

impl BindError {
    /// Wrap an engine-reported failure without interpreting it.
    pub(crate) fn engine<E: std::fmt::Display>(e: E) -> Self {
        BindError::Engine(e.to_string())
    }
}
