use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Request could not be completed (unreachable host, timeout, ...)
    #[error("Failed to {action}: {source}")]
    Network {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Response received but the status indicates failure
    #[error("Failed to {action}: {status_text}")]
    Status {
        action: &'static str,
        status: u16,
        status_text: String,
    },

    /// Response body does not match the expected record shape
    #[error("Invalid {resource} data format: {detail}")]
    InvalidData {
        resource: &'static str,
        detail: String,
    },
}

/// Maximum length for validation details in error messages
const MAX_ERROR_DETAIL_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a detail string to avoid logging excessive data
    fn truncate_detail(detail: &str) -> String {
        if detail.len() <= MAX_ERROR_DETAIL_LENGTH {
            detail.to_string()
        } else {
            let cut: String = detail.chars().take(MAX_ERROR_DETAIL_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, detail.len())
        }
    }

    pub fn from_status(action: &'static str, status: reqwest::StatusCode) -> Self {
        let status_text = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        ApiError::Status {
            action,
            status: status.as_u16(),
            status_text,
        }
    }

    pub fn invalid_data(resource: &'static str, detail: impl std::fmt::Display) -> Self {
        ApiError::InvalidData {
            resource,
            detail: Self::truncate_detail(&detail.to_string()),
        }
    }

    /// Transport failures are recoverable by reconnecting; the others are not.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    /// The message without the "Failed to {action}: " prefix.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Network { source, .. } => source.to_string(),
            ApiError::Status { status_text, .. } => status_text.clone(),
            ApiError::InvalidData { .. } => self.to_string(),
        }
    }
}
