//! Error types shared across the bridge

use thiserror::Error;

use crate::message::{ResponseCode, ResponseMessage};

/// Failures the bridge recovers from at its component boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bus rejected object registration for {path}: {reason}")]
    RegistrationFailed { path: String, reason: String },
    #[error("No object registered at {0}")]
    NotFound(String),
    #[error("Resource {0} is registered but not yet available on the bus")]
    NotYetMirrored(String),
    #[error("Upstream exchange failed: {0}")]
    UpstreamExchangeFailed(String),
}

impl BridgeError {
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::RegistrationFailed { .. } => ResponseCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => ResponseCode::NOT_FOUND,
            Self::NotYetMirrored(_) => ResponseCode::SERVICE_UNAVAILABLE,
            Self::UpstreamExchangeFailed(_) => ResponseCode::BAD_GATEWAY,
        }
    }

    /// Render as a reply for the bus caller, with the error text as payload
    pub fn into_response(self) -> ResponseMessage {
        ResponseMessage::with_text(self.response_code(), &self.to_string())
    }
}

/// Errors reported by the bus transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus is not connected")]
    NotConnected,
    #[error("Object path already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Invalid object path: {0}")]
    InvalidPath(String),
    #[error("Bus rejected request: {0}")]
    Rejected(String),
}

/// Errors reported by the proxy collaborator
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No node context known for {0}")]
    NoContext(String),
    #[error("Invalid node context: {0}")]
    InvalidContext(String),
    #[error("No response within {0} ms")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("Exchange reset by node {0}")]
    Reset(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
}
