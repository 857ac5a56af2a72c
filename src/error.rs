use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    BuildRequest(String),

    #[error("{0}")]
    Upstream(String),
}

impl ProxyError {
    /// Status code and body sent back to the caller when forwarding fails.
    pub fn caller_response(&self) -> (StatusCode, &'static str) {
        match self {
            ProxyError::Upstream(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Error sending outbound request",
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error creating outbound request",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_response_mapping() {
        let (status, body) = ProxyError::Upstream("connection refused".to_string()).caller_response();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Error sending outbound request");

        let (status, body) = ProxyError::BuildRequest("missing host".to_string()).caller_response();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Error creating outbound request");
    }

    #[test]
    fn test_forwarding_errors_display_inner_message() {
        assert_eq!(
            ProxyError::BuildRequest("request has no host".to_string()).to_string(),
            "request has no host"
        );
        assert_eq!(
            ProxyError::Upstream("connection refused".to_string()).to_string(),
            "connection refused"
        );
    }
}
