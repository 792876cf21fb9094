use http::StatusCode;
use thiserror::Error;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub(crate) type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong in the forwarder
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Failed to generate upstream request for backend: {0}")]
    FailedToGenerateUpstreamRequest(String),

    #[error("Failed to get response from backend: {0}")]
    FailedToGetResponseFromBackend(String),
}

impl HttpError {
    /// Label used for the `error_type` metric attribute
    pub fn error_type(&self) -> &'static str {
        match self {
            HttpError::InvalidUri(_) => "invalid_uri",
            HttpError::FailedToGenerateUpstreamRequest(_) => "upstream_request_failed",
            HttpError::FailedToGetResponseFromBackend(_) => "backend_error",
        }
    }
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        match e {
            HttpError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            HttpError::FailedToGenerateUpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::FailedToGetResponseFromBackend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
