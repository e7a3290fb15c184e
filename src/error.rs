//! Error taxonomy surfaced to the operator.

use std::fmt;
use thiserror::Error;

use crate::models::OrderStatus;

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Device capability guarded by an OS permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Location,
    Camera,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Location => f.write_str("location"),
            Capability::Camera => f.write_str("camera"),
        }
    }
}

/// What the operator should do about a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Remedy {
    /// Try the same action again.
    Retry,
    /// Correct the input or finish a missing step first.
    FixInput,
    /// Grant a permission or enable a device service.
    OpenSettings,
    /// Sign in again.
    SignIn,
}

/// Every failure the agent client surfaces.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(String),

    /// Well-formed error response; the message comes from the payload.
    #[error("{message}")]
    ServerRejection { status: Option<u16>, message: String },

    #[error("cannot move order from {} to {}", .from.label(), .to.label())]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("delivery must be completed with proof of delivery and the customer's OTP")]
    DeliveryProofRequired,

    #[error("order {0} is not available to this agent")]
    UnknownOrder(String),

    #[error("no active order")]
    NoActiveOrder,

    #[error("finish order {0} before accepting another one")]
    CurrentOrderActive(String),

    #[error("OTP must be exactly 6 digits")]
    InvalidOtpFormat,

    #[error("take a proof-of-delivery photo before sending the OTP")]
    MissingProof,

    #[error("send the OTP to the customer before verifying")]
    OtpNotRequested,

    #[error("OTP can be resent in {0}s")]
    CooldownActive(u32),

    #[error("OTP verification failed: {0}")]
    VerificationFailed(String),

    #[error("{0} permission denied: allow access in settings")]
    PermissionDenied(Capability),

    #[error("location unavailable: turn on GPS and try again")]
    LocationUnavailable,

    #[error("location request timed out, try again")]
    LocationTimeout,

    #[error("a {0} request is already in progress")]
    OperationInProgress(&'static str),

    #[error("delivery session is closed")]
    SessionClosed,

    #[error("not signed in")]
    Unauthenticated,

    #[error("stored session is invalid: {0}")]
    SessionCorrupted(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),
}

impl AgentError {
    /// Rejection with a message taken from the server, or a generic fallback.
    pub fn rejected(status: Option<u16>, message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| match status {
                Some(code) => format!("request failed with status {code}"),
                None => "request failed".to_string(),
            });
        AgentError::ServerRejection { status, message }
    }

    /// What the operator should do about this error.
    pub fn remedy(&self) -> Remedy {
        match self {
            AgentError::Network(_)
            | AgentError::ServerRejection { .. }
            | AgentError::LocationTimeout
            | AgentError::OperationInProgress(_)
            | AgentError::CooldownActive(_)
            | AgentError::Storage(_) => Remedy::Retry,
            AgentError::InvalidTransition { .. }
            | AgentError::DeliveryProofRequired
            | AgentError::UnknownOrder(_)
            | AgentError::NoActiveOrder
            | AgentError::CurrentOrderActive(_)
            | AgentError::InvalidOtpFormat
            | AgentError::MissingProof
            | AgentError::OtpNotRequested
            | AgentError::VerificationFailed(_)
            | AgentError::SessionClosed
            | AgentError::Config(_) => Remedy::FixInput,
            AgentError::PermissionDenied(_) | AgentError::LocationUnavailable => {
                Remedy::OpenSettings
            }
            AgentError::Unauthenticated | AgentError::SessionCorrupted(_) => Remedy::SignIn,
        }
    }

    /// Only a broken persisted session ends the signed-in state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AgentError::SessionCorrupted(_))
    }

    /// Local precondition failures never reach the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidTransition { .. }
                | AgentError::DeliveryProofRequired
                | AgentError::UnknownOrder(_)
                | AgentError::NoActiveOrder
                | AgentError::CurrentOrderActive(_)
                | AgentError::InvalidOtpFormat
                | AgentError::MissingProof
                | AgentError::OtpNotRequested
                | AgentError::CooldownActive(_)
                | AgentError::OperationInProgress(_)
                | AgentError::SessionClosed
        )
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => AgentError::rejected(Some(status.as_u16()), None),
            None => AgentError::Network(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Network(format!("unexpected response: {e}"))
    }
}
