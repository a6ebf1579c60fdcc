use thiserror::Error;
use warp::http::StatusCode;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("session token expired")]
    Expired,
    #[error("malformed session token")]
    Malformed,
    #[error("invalid session token signature")]
    SignatureInvalid,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("receiver must not be empty")]
    EmptyReceiver,
    #[error("content must not be empty")]
    EmptyContent,
    #[error("content exceeds {0} characters")]
    ContentTooLong(usize),
    #[error("sender must not be empty")]
    EmptySender,
    #[error("sender does not match the authenticated user")]
    SenderMismatch,
    #[error("username must be 1-32 characters of letters, digits, '_', '.' or '-'")]
    InvalidUsername,
    #[error("password must not be empty")]
    InvalidPassword,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Invalid username or password")]
    AuthenticationFailed,
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("Not a participant of this conversation")]
    Forbidden,
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::AuthenticationFailed | ChatError::Unauthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            ChatError::Forbidden | ChatError::InvalidRequest(InvalidRequest::SenderMismatch) => {
                StatusCode::FORBIDDEN
            }
            ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::UsernameTaken => StatusCode::CONFLICT,
            ChatError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::StorageUnavailable(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
