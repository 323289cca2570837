//! Error types for the callback server.

/// Errors raised while starting or stopping the callback server.
#[derive(Debug, thiserror::Error)]
pub enum CallbackServerError {
    /// Every port in the configured range was taken
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// The port range was empty
    #[error("Invalid port range: start {start} is greater than end {end}")]
    InvalidPortRange { start: u16, end: u16 },

    /// The configured public base URL cannot be used for callbacks
    #[error("Invalid public base URL: {0}")]
    InvalidBaseUrl(String),

    /// The server task failed while shutting down
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CallbackServerError::NoAvailablePort { start: 3400, end: 3500 };
        assert_eq!(error.to_string(), "No available port found in range 3400-3500");

        let error = CallbackServerError::InvalidBaseUrl("ftp://x".to_string());
        assert_eq!(error.to_string(), "Invalid public base URL: ftp://x");
    }
}
