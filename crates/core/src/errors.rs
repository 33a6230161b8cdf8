use thiserror::Error;

use crate::domain::expense::ExpenseStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvariantViolation,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid expense transition from {from:?} to {to:?}")]
    InvalidExpenseTransition { from: ExpenseStatus, to: ExpenseStatus },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidExpenseTransition { .. } | Self::InvariantViolation(_) => {
                ErrorKind::InvariantViolation
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict on {entity} `{id}`: stored version differs from loaded version")]
    Conflict { entity: &'static str, id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { .. } => Self::Conflict(value.to_string()),
            RepositoryError::Backend(_) | RepositoryError::Decode(_) => {
                Self::Persistence(value.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested expense, rule, or approver does not exist.",
            Self::Conflict { .. } => {
                "The expense was modified concurrently. Reload it and submit the decision again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => match error.kind() {
                ErrorKind::Validation => {
                    Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
                }
                ErrorKind::NotFound => {
                    Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
                }
                // Corrupted persisted state; the detail stays in the logs.
                ErrorKind::InvariantViolation => Self::Internal {
                    message: "approval state invariant violated".to_owned(),
                    correlation_id: unassigned(),
                },
            },
            ApplicationError::Conflict(message) => {
                Self::Conflict { message, correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{
        ApplicationError, DomainError, ErrorKind, InterfaceError, RepositoryError,
    };

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::validation(
            "decision must be approve or reject",
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn not_found_maps_to_not_found_interface_error() {
        let interface = ApplicationError::from(DomainError::not_found("expense", "EXP-404"))
            .into_interface("req-2");

        match interface {
            InterfaceError::NotFound { message, correlation_id } => {
                assert_eq!(message, "expense `EXP-404` not found");
                assert_eq!(correlation_id, "req-2");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn invariant_violation_is_internal_and_hides_detail() {
        let interface = ApplicationError::from(DomainError::invariant(
            "duplicate approver `u-1` in approver state",
        ))
        .into_interface("req-3");

        match interface {
            InterfaceError::Internal { ref message, .. } => {
                assert!(!message.contains("u-1"));
            }
            ref other => panic!("expected internal, got {other:?}"),
        }
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn repository_conflict_maps_to_conflict() {
        let error = ApplicationError::from(RepositoryError::Conflict {
            entity: "expense",
            id: "EXP-1".to_owned(),
        });
        assert!(matches!(error, ApplicationError::Conflict(_)));
        assert!(matches!(error.into_interface("req-4"), InterfaceError::Conflict { .. }));
    }

    #[test]
    fn backend_failure_maps_to_service_unavailable() {
        let backend = RepositoryError::Backend("database is locked".into());
        let interface = ApplicationError::from(backend).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn domain_error_kinds_follow_error_taxonomy() {
        assert_eq!(DomainError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(DomainError::not_found("rule", "R-1").kind(), ErrorKind::NotFound);
        assert_eq!(DomainError::invariant("x").kind(), ErrorKind::InvariantViolation);
    }
}
