use std::fmt;

use thiserror::Error;

use crate::funnel::states::FunnelStage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("funnel stage cannot regress from {from} to {to}")]
    StageRegression { from: FunnelStage, to: FunnelStage },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures surfaced by the turn controller and administrative operations.
/// Only `InvalidInput` and `ConfirmationRequired` are caller mistakes; the
/// rest describe the system.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceErrorKind {
    BadRequest,
    ServiceUnavailable,
    Internal,
}

impl InterfaceErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::ServiceUnavailable => 503,
            Self::Internal => 500,
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::BadRequest => "The request could not be processed. Check inputs and try again.",
            Self::ServiceUnavailable => "The service is temporarily unavailable. Please retry shortly.",
            Self::Internal => "An unexpected internal error occurred.",
        }
    }
}

/// Boundary-facing error: a kind for the transport, a detail message safe to
/// show the caller, and the correlation id to find the request in the logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceError {
    pub kind: InterfaceErrorKind,
    pub message: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

impl fmt::Display for InterfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} [{}]: {}", self.kind, self.correlation_id, self.message)
    }
}

impl std::error::Error for InterfaceError {}

impl ApplicationError {
    pub fn interface_kind(&self) -> InterfaceErrorKind {
        match self {
            Self::Domain(_) | Self::InvalidInput(_) | Self::ConfirmationRequired(_) => {
                InterfaceErrorKind::BadRequest
            }
            Self::Persistence(_) | Self::Integration(_) => InterfaceErrorKind::ServiceUnavailable,
            Self::Configuration(_) => InterfaceErrorKind::Internal,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let kind = self.interface_kind();
        let message = match self {
            Self::Domain(domain) => domain.to_string(),
            Self::InvalidInput(message)
            | Self::ConfirmationRequired(message)
            | Self::Persistence(message)
            | Self::Integration(message)
            | Self::Configuration(message) => message,
        };
        InterfaceError { kind, message, correlation_id: correlation_id.into() }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceErrorKind};
    use crate::funnel::states::FunnelStage;

    #[test]
    fn stage_regression_is_a_bad_request_with_its_stages_named() {
        let interface = ApplicationError::from(DomainError::StageRegression {
            from: FunnelStage::Financing,
            to: FunnelStage::Intake,
        })
        .into_interface("req-1");

        assert_eq!(interface.kind, InterfaceErrorKind::BadRequest);
        assert_eq!(interface.correlation_id, "req-1");
        assert!(interface.message.contains("financing"));
    }

    #[test]
    fn caller_mistakes_keep_their_detail() {
        let invalid =
            ApplicationError::InvalidInput("user_id must not be empty".to_owned()).into_interface("req-2");
        let unconfirmed = ApplicationError::ConfirmationRequired("pass confirm".to_owned())
            .into_interface("req-3");

        assert_eq!(invalid.message, "user_id must not be empty");
        assert_eq!(invalid.kind.http_status(), 400);
        assert_eq!(unconfirmed.kind.http_status(), 400);
        assert_eq!(
            invalid.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn system_failures_map_to_5xx() {
        let store = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");
        let config = ApplicationError::Configuration("missing api key".to_owned())
            .into_interface("req-5");

        assert_eq!(store.kind, InterfaceErrorKind::ServiceUnavailable);
        assert_eq!(store.kind.http_status(), 503);
        assert_eq!(config.kind.http_status(), 500);
        assert!(store.to_string().contains("req-4"));
    }
}
