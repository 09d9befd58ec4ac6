use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the archiving client
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an error that fits no other class
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Provider rejected the call with HTTP 429
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Connection-level failure (reset, timeout, TLS)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Provider response is missing fields we rely on
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// A transient failure that persisted through every allowed retry
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<GmailError>,
    },

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Building the compressed archive failed
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// User cancelled operation
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),
}

impl GmailError {
    /// Check if the error is transient and should be retried
    ///
    /// Only 429, 500 and 503 responses plus connection-level failures are
    /// retried. Other 5xx codes are treated as permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            GmailError::RateLimitExceeded(_) | GmailError::NetworkError(_) => true,
            GmailError::ServerError { status, .. } => matches!(status, 500 | 503),
            _ => false,
        }
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Rate-limit class failures are tracked separately from other retries
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GmailError::RateLimitExceeded(_))
    }

    /// Map an HTTP status from the provider into an error class
    pub fn from_status(status: hyper::StatusCode, context: &str) -> Self {
        let status_code = status.as_u16();
        let message = format!(
            "HTTP {}: {}",
            status_code,
            status.canonical_reason().unwrap_or("Unknown")
        );

        match status_code {
            429 => GmailError::RateLimitExceeded(message),
            404 => GmailError::NotFound(context.to_string()),
            400 => GmailError::BadRequest(message),
            401 => GmailError::AuthError(message),
            403 => GmailError::Forbidden(message),
            500..=599 => GmailError::ServerError {
                status: status_code,
                message,
            },
            _ => GmailError::ApiError(message),
        }
    }
}

impl GmailError {
    /// Classify a JSON error body such as `{"error": {"code": 429, ...}}`
    ///
    /// google-gmail1 hands back every non-success response with a JSON body
    /// this way, so the HTTP class has to be read from `error.code`.
    pub fn from_error_body(body: &serde_json::Value) -> Self {
        let error = &body["error"];
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());

        let status = error["code"]
            .as_u64()
            .and_then(|code| u16::try_from(code).ok())
            .and_then(|code| hyper::StatusCode::from_u16(code).ok());

        match status {
            Some(status) => match GmailError::from_status(status, &message) {
                GmailError::RateLimitExceeded(reason) => {
                    GmailError::RateLimitExceeded(format!("{} ({})", reason, message))
                }
                GmailError::ServerError { status, message: reason } => GmailError::ServerError {
                    status,
                    message: format!("{} ({})", reason, message),
                },
                other => other,
            },
            None => GmailError::BadRequest(message),
        }
    }
}

impl From<zip::result::ZipError> for GmailError {
    fn from(error: zip::result::ZipError) -> Self {
        GmailError::ArchiveError(error.to_string())
    }
}

impl From<walkdir::Error> for GmailError {
    fn from(error: walkdir::Error) -> Self {
        GmailError::ArchiveError(error.to_string())
    }
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                GmailError::from_status(response.status(), "Resource not found")
            }
            google_gmail1::Error::BadRequest(ref body) => GmailError::from_error_body(body),
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            google_gmail1::Error::MissingToken(err) => GmailError::AuthError(err.to_string()),
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}
