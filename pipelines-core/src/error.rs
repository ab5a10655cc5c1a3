//! Error types shared by the API server layers

use thiserror::Error;

/// Result type alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed collaborator error kept as the source of an internal error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by conversion, resolution and orchestration
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing required field, ambiguous reference
    #[error("Invalid input error: {0}")]
    InvalidInput(String),

    /// Entity absent from the store
    #[error("{resource} {id} not found")]
    ResourceNotFound {
        /// Kind of the missing entity
        resource: String,
        /// Identifier that was looked up
        id: String,
    },

    /// Absence reported by a collaborator outside the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conversion invoked with an unrecognized wire version
    #[error("Unknown API version: {operation} does not support {api}")]
    UnknownApiVersion { operation: String, api: String },

    /// Unexpected collaborator failure
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Authorization check failed
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Request carries no usable identity
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Operation not legal in the current state
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation context attached to an inner error
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Kind of an error once all context layers are peeled off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    UnknownApiVersion,
    Internal,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn resource_not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn unknown_api_version(operation: impl Into<String>, api: impl Into<String>) -> Self {
        Self::UnknownApiVersion {
            operation: operation.into(),
            api: api.into(),
        }
    }

    /// Internal error wrapping the collaborator failure that caused it
    pub fn internal<E>(source: E, message: impl Into<String>) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Internal error with no underlying cause
    pub fn internal_msg(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Attach operation context, keeping the inner kind intact
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error after removing context layers
    pub fn root(&self) -> &Error {
        match self {
            Self::Wrapped { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Wrapped { source, .. } => source.kind(),
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ResourceNotFound { .. } | Self::NotFound(_) => ErrorKind::NotFound,
            Self::UnknownApiVersion { .. } => ErrorKind::UnknownApiVersion,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Context helpers for `Result<T, Error>`
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.wrap(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_survives_wrapping() {
        let err = Error::resource_not_found("Run", "r1")
            .wrap("Failed to get run")
            .wrap("Failed to terminate run r1");

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert!(matches!(err.root(), Error::ResourceNotFound { id, .. } if id == "r1"));
    }

    #[test]
    fn test_wrapped_message_keeps_chain() {
        let err = Error::invalid_input("name is empty").wrap("Validate experiment request failed");
        assert_eq!(
            err.to_string(),
            "Validate experiment request failed: Invalid input error: name is empty"
        );
    }

    #[test]
    fn test_internal_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let err = Error::internal(io, "Failed to read file");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_result_ext_context() {
        let res: Result<()> = Err(Error::PermissionDenied("nope".into()));
        let err = res.with_context(|| format!("Failed to authorize {}", "exp-1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().starts_with("Failed to authorize exp-1"));
    }
}
