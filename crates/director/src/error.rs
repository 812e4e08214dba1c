//! Error taxonomy — the director's single error enum, and the engine-error
//! mapping rules that turn raw `bollard` failures into one of its variants.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectorError {
    /// The container engine returned a failure. 404-equivalents on `get`/`wait`
    /// are handled before this variant is ever constructed — they are success
    /// or absence, not errors.
    #[error("engine error ({status}): {message}")]
    EngineError { status: u16, message: String },

    /// No free ports left in the allocator's range for a requested reservation.
    #[error("resource exhausted: no free ports for {wanted} port(s)")]
    ResourceExhausted { wanted: usize },

    /// The config store connection was refused or otherwise unreachable.
    #[error("config store unavailable: {0}")]
    ConfigStoreUnavailable(String),

    /// A status-RPC probe exceeded the per-service timeout.
    #[error("RPC timeout probing service {service}")]
    RpcTimeout { service: String },

    /// The calling task was cancelled; must propagate, never be reclassified.
    #[error("cancelled")]
    Cancelled,

    /// An invariant the code assumes was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DirectorError {
    /// Build an `EngineError` from a raw bollard failure, collapsing the
    /// common "not found" case callers are expected to check for separately
    /// via `is_not_found`.
    pub fn from_bollard(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError { status_code, message } => {
                DirectorError::EngineError { status: status_code, message }
            }
            other => DirectorError::EngineError { status: 0, message: other.to_string() },
        }
    }

    /// True if this error represents the engine's 404-equivalent — callers
    /// use this to collapse "not found" into `Ok(None)`/`Ok(false)` rather
    /// than propagating an error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectorError::EngineError { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection() {
        let err = DirectorError::EngineError { status: 404, message: "gone".into() };
        assert!(err.is_not_found());
        let err = DirectorError::EngineError { status: 500, message: "boom".into() };
        assert!(!err.is_not_found());
    }

    #[test]
    fn from_bollard_server_error() {
        let raw = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such container".into(),
        };
        let mapped = DirectorError::from_bollard(raw);
        assert!(mapped.is_not_found());
    }
}
