//! Error taxonomy for the REST client.
//!
//! Every failure surfaced to a person is mapped onto an [`ErrorCategory`],
//! and each category carries exactly one user-facing message.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 401 from the service. The stored session has already been cleared.
    #[error("authentication failed")]
    Unauthorized,

    /// 4xx other than 401, with the server's `error` text when it sent one.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    /// 5xx.
    #[error("server error ({status}): {message}")]
    Server { status: StatusCode, message: String },

    /// The response body did not match the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    /// Local session could not be persisted.
    #[error("session storage failed: {0}")]
    Session(#[from] std::io::Error),
}

impl ApiError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: StatusCode, message: String) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            ApiError::Unauthorized
        } else if status.is_server_error() {
            ApiError::Server { status, message }
        } else {
            ApiError::Rejected { status, message }
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::Rejected { status, .. } | ApiError::Server { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Network(_) => ErrorCategory::Network,
            ApiError::Unauthorized => ErrorCategory::Auth,
            ApiError::Rejected { .. } => ErrorCategory::Validation,
            ApiError::Server { .. } | ApiError::Decode(_) => ErrorCategory::Server,
            ApiError::Url(_) | ApiError::Session(_) => ErrorCategory::Configuration,
        }
    }

    /// Message suitable for showing to a person. Server-provided text wins
    /// for rejections since it names the offending field.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { message, .. } if !message.is_empty() => message.clone(),
            other => other.category().message().to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Categorized error types for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Could not reach the service
    Network,

    /// Missing or rejected credentials
    Auth,

    /// Input the service refused
    Validation,

    /// Service-side failure
    Server,

    /// Training run or training data failure
    Training,

    /// Local setup problem
    Configuration,
}

impl ErrorCategory {
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Network error. Please check your connection and try again.",
            ErrorCategory::Auth => "Authentication failed. Please login again.",
            ErrorCategory::Validation => "Please check your input and try again.",
            ErrorCategory::Server => "Server error. Please try again later.",
            ErrorCategory::Training => "Training failed. Please check your data and try again.",
            ErrorCategory::Configuration => "Configuration error. Please check your settings.",
        }
    }

    /// Worth offering the user a retry
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Server)
    }
}

/// Categorize an error
pub fn categorize_error(error: &anyhow::Error) -> ErrorCategory {
    if let Some(api) = error.downcast_ref::<ApiError>() {
        return api.category();
    }

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("network")
        || error_str.contains("connection")
        || error_str.contains("timeout")
        || error_str.contains("dns")
    {
        ErrorCategory::Network
    } else if error_str.contains("token") || error_str.contains("unauthorized") {
        ErrorCategory::Auth
    } else if error_str.contains("training") {
        ErrorCategory::Training
    } else if error_str.contains("config") || error_str.contains("url") {
        ErrorCategory::Configuration
    } else {
        ErrorCategory::Server
    }
}
