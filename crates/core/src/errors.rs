use thiserror::Error;

use crate::approvals::ports::RepositoryError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(
        "entry `{entry_id}` is at level {actual_level} but level {expected_level} is still pending"
    )]
    OutOfOrder { entry_id: String, expected_level: u8, actual_level: u8 },
    #[error("entry `{entry_id}` is `{actual}`, expected `{expected}`")]
    StaleState { entry_id: String, expected: String, actual: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ApprovalError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn stale(entry_id: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::StaleState {
            entry_id: entry_id.into(),
            expected: "pending".to_owned(),
            actual: actual.into(),
        }
    }

    /// Stable machine-readable class used by transports.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::OutOfOrder { .. } => "out_of_order_error",
            Self::StaleState { .. } => "stale_state_error",
            Self::Forbidden(_) => "forbidden_error",
            Self::Conflict(_) => "conflict_error",
            Self::NotFound { .. } => "not_found_error",
            Self::Repository(_) => "persistence_error",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { class: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { class: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { class: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { class: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { class: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this approval action.",
            Self::NotFound { .. } => "The requested approval record does not exist.",
            Self::Conflict { .. } => {
                "The approval changed while you were working on it. Refresh and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 422,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ServiceUnavailable { .. } => 503,
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::BadRequest { class, .. }
            | Self::Forbidden { class, .. }
            | Self::NotFound { class, .. }
            | Self::Conflict { class, .. }
            | Self::ServiceUnavailable { class, .. } => class,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApprovalError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let class = self.class();
        let message = self.to_string();
        match self {
            Self::Validation(_) | Self::OutOfOrder { .. } => {
                InterfaceError::BadRequest { class, message, correlation_id }
            }
            Self::Forbidden(_) => InterfaceError::Forbidden { class, message, correlation_id },
            Self::NotFound { .. } => InterfaceError::NotFound { class, message, correlation_id },
            Self::StaleState { .. } | Self::Conflict(_) => {
                InterfaceError::Conflict { class, message, correlation_id }
            }
            Self::Repository(_) => {
                InterfaceError::ServiceUnavailable { class, message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::ports::RepositoryError;
    use crate::errors::{ApprovalError, InterfaceError};

    #[test]
    fn out_of_order_maps_to_bad_request_with_levels_in_message() {
        let interface = ApprovalError::OutOfOrder {
            entry_id: "E-2".to_owned(),
            expected_level: 1,
            actual_level: 2,
        }
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(interface.class(), "out_of_order_error");
        assert!(interface.message().contains("level 1 is still pending"));
    }

    #[test]
    fn stale_state_maps_to_conflict() {
        let interface = ApprovalError::stale("E-1", "approved").into_interface("req-2");

        assert_eq!(interface.status_code(), 409);
        assert_eq!(interface.class(), "stale_state_error");
        assert_eq!(
            interface.user_message(),
            "The approval changed while you were working on it. Refresh and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApprovalError::from(RepositoryError::Database("database lock timeout".to_owned()))
                .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.status_code(), 503);
    }

    #[test]
    fn forbidden_and_not_found_keep_their_classes() {
        let forbidden = ApprovalError::Forbidden("cross-tenant access".to_owned()).into_interface("r");
        let missing = ApprovalError::not_found("queue entry", "E-404").into_interface("r");

        assert_eq!(forbidden.status_code(), 403);
        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.message(), "queue entry `E-404` not found");
    }
}
