use thiserror::Error;

/// Input rejected before any store call was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid input: {message}")]
pub struct ValidationError {
    pub message: String,
}

/// Any failure reported by the remote store: transport, constraint, not-found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error: {message}")]
pub struct StoreError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(message))
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(StoreError::new(message))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(err) => &err.message,
            Self::Store(err) => &err.message,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_displays_the_wrapped_message() {
        let err: CoreError = StoreError::new("connection reset").into();
        assert_eq!(err.to_string(), "store error: connection reset");
        assert_eq!(err.message(), "connection reset");
        assert!(std::error::Error::source(&err).is_none());

        let err = CoreError::validation("title is required");
        assert_eq!(err.to_string(), "invalid input: title is required");
        assert!(err.is_validation());
    }
}
