use crate::domain::models::FieldErrors;
use thiserror::Error;

pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again later.";
pub const NETWORK_FAILURE_MESSAGE: &str =
    "Could not reach the server. Check your connection and try again later.";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("api error: http {status}; {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("credential store error: {0}")]
    Credential(String),
    #[error("session has not been resolved yet")]
    SessionUnresolved,
    #[error("not found: {0}")]
    NotFound(String),
}

impl InfraError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Api { status: 401, .. })
    }

    /// Text suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(errors) => errors
                .first_message()
                .unwrap_or(GENERIC_FAILURE_MESSAGE)
                .to_string(),
            Self::Unauthorized(_) | Self::SessionUnresolved => SESSION_EXPIRED_MESSAGE.to_string(),
            Self::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Network(_) => NETWORK_FAILURE_MESSAGE.to_string(),
            Self::NotFound(what) => format!("{what} was not found."),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}
