//! Error types for coregistration.
//!
//! Non-convergence of ICP is deliberately absent here: an exhausted iteration
//! budget still yields a usable transform and is reported through
//! [`IcpStatus::Exhausted`](crate::IcpStatus::Exhausted).

/// Result type alias
pub type Result<T> = std::result::Result<T, CoregError>;

/// Coregistration error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoregError {
    /// Two inputs that must correspond row-by-row have different lengths.
    #[error("shape mismatch: expected {expected} rows, got {actual}")]
    ShapeMismatch {
        /// Row count of the reference input
        expected: usize,
        /// Row count of the offending input
        actual: usize,
    },

    /// A fit was requested on a point set without any rows.
    #[error("point set is empty")]
    EmptyPointSet,

    /// The surface lookup structure was never built.
    #[error("surface index has not been built")]
    SurfaceNotReady,

    /// The surface collaborator could not answer a closest-point query.
    #[error("surface query failed: {0}")]
    SurfaceQueryFailure(String),

    /// The 3×3 block of a transform is not invertible.
    #[error("transform is singular and cannot be inverted")]
    SingularTransform,

    /// A triangulated surface refers to vertices that do not exist.
    #[error("invalid surface: {0}")]
    InvalidSurface(String),
}
