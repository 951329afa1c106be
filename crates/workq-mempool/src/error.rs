//! Pool errors

/// Result alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Recoverable allocation failures.
///
/// Every variant means "not now": the caller backs off or drops the work
/// item. Contract violations (double free, foreign free) are not errors,
/// they panic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Pool {pool} exhausted: {capacity} slices outstanding")]
    Exhausted { pool: String, capacity: usize },

    #[error("Backing allocation of {size} bytes failed")]
    AllocFailed { size: usize },

    #[error("Constructor rejected a slice from pool {pool}")]
    ConstructRejected { pool: String },
}

impl PoolError {
    /// True for the capacity-bound case
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
