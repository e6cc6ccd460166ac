use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Whether a failed gateway call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Network trouble, rate limit, 5xx. The retry scheduler may resend.
    Transient,
    /// Invalid number, blocked, opted out, rejected template. Never retried.
    Permanent,
}

#[derive(Debug, Clone, Error)]
#[error("gateway error {code:?}: {message}")]
pub struct GatewayError {
    pub code: Option<i32>,
    pub message: String,
    pub kind: GatewayErrorKind,
}

impl GatewayError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            kind: GatewayErrorKind::Transient,
        }
    }

    pub fn permanent(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: GatewayErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GatewayErrorKind::Transient
    }
}
