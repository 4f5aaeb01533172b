//! Downstream error taxonomy.
//!
//! Retry policy: 412 (conditional-write conflict), 429, and 5xx are
//! transient; other 4xx are terminal. Authorization failures are surfaced
//! verbatim so the user sees what the platform said.

#[derive(thiserror::Error, Debug, Clone)]
pub enum PlatformError {
    /// HTTP 412 — the conditional write lost a race; re-read and retry.
    #[error("precondition failed (concurrent modification)")]
    PreconditionFailed,

    /// HTTP 429.
    #[error("rate limited by the platform")]
    RateLimited,

    /// HTTP 5xx.
    #[error("platform server error {status}: {body}")]
    Server { status: u16, body: String },

    /// HTTP 401/403 — credentials rejected; surfaced verbatim.
    #[error("platform rejected credentials: {0}")]
    Auth(String),

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Remaining 4xx — a bad request; not retryable.
    #[error("platform client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("network: {0}")]
    Network(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::PreconditionFailed
                | PlatformError::RateLimited
                | PlatformError::Server { .. }
                | PlatformError::Network(_)
        )
    }

    /// Map an HTTP status + body to the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            412 => PlatformError::PreconditionFailed,
            429 => PlatformError::RateLimited,
            401 | 403 => PlatformError::Auth(body),
            404 => PlatformError::NotFound(body),
            s if s >= 500 => PlatformError::Server { status: s, body },
            s => PlatformError::Client { status: s, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(PlatformError::from_status(412, String::new()).is_retryable());
        assert!(PlatformError::from_status(429, String::new()).is_retryable());
        assert!(PlatformError::from_status(503, String::new()).is_retryable());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!PlatformError::from_status(400, String::new()).is_retryable());
        assert!(!PlatformError::from_status(401, String::new()).is_retryable());
        assert!(!PlatformError::from_status(404, String::new()).is_retryable());
    }

    #[test]
    fn auth_preserves_platform_message() {
        let err = PlatformError::from_status(403, "token expired".into());
        assert!(err.to_string().contains("token expired"));
    }
}
