use crate::session::SessionState;

/// Errors returned by the session engine boundary.
///
/// Upstream provider failures are deliberately absent: the examiner adapter
/// absorbs those into deterministic fallbacks (see `examiner`), so the only
/// errors a caller can see are authorization, lifecycle and invariant
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum VivaError {
    #[error("viva session not found")]
    NotFound,

    #[error("not authorized to act on this viva session")]
    Forbidden,

    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("no pending question to respond to")]
    NoPendingTurn,

    /// An internal invariant was violated (e.g. two pending turns). Always a
    /// defect; callers should surface it for operator attention rather than
    /// retry.
    #[error("session invariant violated: {0}")]
    Inconsistent(String),
}
