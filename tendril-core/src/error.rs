//! Error types for the reactive core.
//!
//! Most of the engine is infallible: tracking outside a computation is a
//! no-op and cyclic structures are handled during traversal. Errors only
//! surface where loosely typed input (text) is turned into engine types.

/// Errors produced by the reactive core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A mutation kind name did not match `set`, `add` or `delete`.
    #[error("unknown mutation kind `{0}`")]
    UnknownMutationKind(String),

    /// A flush mode name did not match `sync` or `post`.
    #[error("unknown flush mode `{0}`")]
    UnknownFlushMode(String),
}
