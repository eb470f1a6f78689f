//! Error types for stratus.
//!
//! Every failure carries a kind that callers can branch on, plus a
//! human-readable message. Populate/validate phases collect errors per
//! workflow into a [`MultiError`] instead of stopping at the first one.

use thiserror::Error;

use crate::compute::ApiError;

/// Result type alias for stratus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// stratus error kinds.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource does not exist: {0}")]
    ResourceDoesNotExist(String),

    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("multiple creators: {0}")]
    MultipleCreators(String),

    #[error("image obsolete: {0}")]
    ImageObsolete(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Multi(MultiError),
}

impl Error {
    /// Get the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::ResourceDoesNotExist(_) => "RESOURCE_DOES_NOT_EXIST",
            Error::ResourceAlreadyExists(_) => "RESOURCE_ALREADY_EXISTS",
            Error::MissingDependency(_) => "MISSING_DEPENDENCY",
            Error::MultipleCreators(_) => "MULTIPLE_CREATORS",
            Error::ImageObsolete(_) => "IMAGE_OBSOLETE",
            Error::Api(_) => "API_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::Cancelled(_) => "CANCELLED",
            Error::CleanupFailed(_) => "CLEANUP_FAILED",
            Error::Execution(_) => "EXECUTION_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Multi(_) => "MULTIPLE_ERRORS",
        }
    }

    /// Whether this error should cancel sibling steps.
    ///
    /// Everything except `Cancelled` is fatal to the workflow.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Cancelled(_) => false,
            Error::Multi(m) => m.errors.iter().any(Error::is_fatal),
            _ => true,
        }
    }
}

/// An aggregate of errors collected across a phase.
///
/// Populate/validate collect one entry per failing step; the scheduler
/// collects one entry per failed step; cleanup appends its own failures
/// without masking the primary error.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    /// Record the error of a result, passing successful values through.
    pub fn collect<T>(&mut self, res: Result<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Collapse into a single error, or `Ok(())` when empty.
    ///
    /// `Cancelled` entries are suppressed when any non-cancelled error
    /// exists; a single surviving error is returned as itself.
    pub fn into_result(self) -> Result<()> {
        match self.into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn into_error(mut self) -> Option<Error> {
        if self.errors.iter().any(Error::is_fatal) {
            self.errors.retain(|e| !matches!(e, Error::Cancelled(_)));
        }
        match self.errors.len() {
            0 => None,
            1 => Some(self.errors.remove(0)),
            _ => Some(Error::Multi(self)),
        }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.errors[0]),
            _ => {
                write!(f, "{}", self.errors[0])?;
                for err in &self.errors[1..] {
                    write!(f, "\n  * {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl From<Error> for MultiError {
    fn from(err: Error) -> Self {
        let mut m = MultiError::new();
        m.push(err);
        m
    }
}
