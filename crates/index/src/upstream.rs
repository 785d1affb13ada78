//! Failure classification for calls to external HTTP services.

/// Error returned by an external service call (embedding API, LLM, vector service).
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Timeouts, connect failures, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Connect(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500 || *status == 429,
            UpstreamError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            UpstreamError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            UpstreamError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            UpstreamError::Decode(e.to_string())
        }
    }
}

/// Turn a non-2xx response into `UpstreamError::Status`, keeping the body as message.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(UpstreamError::Status {
        status: status.as_u16(),
        message,
    })
}
