use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by the authentication core.
///
/// Every variant except `Provider`, `CodeGeneration` and `Store` is a caller
/// fault and carries enough detail for the client to act on it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid challenge code")]
    InvalidCode,
    #[error("challenge code expired")]
    Expired,
    #[error("device {0} is already registered to another mobile number")]
    DuplicateDevice(String),
    #[error("no push address bound to the device")]
    NoToken,
    #[error("push address rejected by provider: {0}")]
    InvalidToken(String),
    #[error("old push address does not match")]
    TokenMismatch,
    #[error("push provider failure: {0}")]
    Provider(String),
    #[error("failed to generate challenge code")]
    CodeGeneration(#[source] BoxError),
    #[error("storage failure")]
    Store(#[source] BoxError),
}

impl AuthError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::Store(err.into())
    }

    pub(crate) fn code_generation(err: anyhow::Error) -> Self {
        Self::CodeGeneration(err.into())
    }

    /// Stable machine-readable code for transports.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidCode => "invalid_code",
            Self::Expired => "expired",
            Self::DuplicateDevice(_) => "duplicate_device",
            Self::NoToken => "no_token",
            Self::InvalidToken(_) => "invalid_token",
            Self::TokenMismatch => "token_mismatch",
            Self::Provider(_) => "provider_error",
            Self::CodeGeneration(_) => "code_generation_error",
            Self::Store(_) => "store_error",
        }
    }

    /// Caller faults are never worth retrying without changing the request.
    #[must_use]
    pub const fn is_caller_fault(&self) -> bool {
        !matches!(
            self,
            Self::Provider(_) | Self::CodeGeneration(_) | Self::Store(_)
        )
    }
}
