use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ConfigError,
    FetchError,
    EngineError,
    CacheError,
    SubmissionNotFound,
    InvalidRequest,
    PathOutOfBounds,
    IoError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError => write!(f, "CONFIG_ERROR"),
            Self::FetchError => write!(f, "FETCH_ERROR"),
            Self::EngineError => write!(f, "ENGINE_ERROR"),
            Self::CacheError => write!(f, "CACHE_ERROR"),
            Self::SubmissionNotFound => write!(f, "SUBMISSION_NOT_FOUND"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::PathOutOfBounds => write!(f, "PATH_OUT_OF_BOUNDS"),
            Self::IoError => write!(f, "IO_ERROR"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalysisError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AnalysisError {}

impl AnalysisError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FetchError, message)
    }

    pub fn engine(engine: &str, message: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EngineError,
            format!("Engine '{engine}' failed: {message}"),
        )
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheError, message)
    }

    pub fn submission_not_found(id: &str) -> Self {
        Self::new(
            ErrorCode::SubmissionNotFound,
            format!("Submission not found: {id}"),
        )
    }
}

/// Extract the error code of an `anyhow` chain, if it carries an `AnalysisError`.
pub fn error_code(e: &anyhow::Error) -> Option<ErrorCode> {
    e.downcast_ref::<AnalysisError>()
        .or_else(|| {
            e.chain()
                .find_map(|cause| cause.downcast_ref::<AnalysisError>())
        })
        .map(|ae| ae.code)
}
