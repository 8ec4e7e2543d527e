//! Broker error taxonomy.
//!
//! Every variant carries its own status code; the lifecycle services are the
//! only place where lower-level errors are translated into these.

use thiserror::Error;

use osbsim_core::response::ErrorBody;
use osbsim_state::StateError;

use crate::reply::Status;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Gone(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotRetrievable(String),

    #[error("{0}")]
    ValidationMismatch(String),

    #[error("{0}")]
    BlockedByDependency(String),

    #[error("{description}")]
    OperationFailed {
        description: String,
        instance_usable: Option<bool>,
        update_repeatable: Option<bool>,
    },

    #[error("{0}")]
    AsyncRequired(String),

    #[error("{0}")]
    ConcurrencyError(String),

    #[error("{0}")]
    MaintenanceInfoConflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn status(&self) -> Status {
        match self {
            BrokerError::NotFound(_) => Status::NotFound,
            BrokerError::Gone(_) => Status::Gone,
            BrokerError::Conflict(_) => Status::Conflict,
            BrokerError::BadRequest(_)
            | BrokerError::NotRetrievable(_)
            | BrokerError::ValidationMismatch(_)
            | BrokerError::BlockedByDependency(_)
            | BrokerError::OperationFailed { .. } => Status::BadRequest,
            BrokerError::AsyncRequired(_)
            | BrokerError::ConcurrencyError(_)
            | BrokerError::MaintenanceInfoConflict(_) => Status::UnprocessableEntity,
            BrokerError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Machine-readable error code, for the variants the protocol names.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            BrokerError::AsyncRequired(_) => Some("AsyncRequired"),
            BrokerError::ConcurrencyError(_) => Some("ConcurrencyError"),
            BrokerError::MaintenanceInfoConflict(_) => Some("MaintenanceInfoConflict"),
            BrokerError::NotRetrievable(_) => Some("NotRetrievable"),
            BrokerError::ValidationMismatch(_) => Some("ValidationMismatch"),
            BrokerError::BlockedByDependency(_) => Some("BlockedByDependency"),
            BrokerError::OperationFailed { .. } => Some("OperationFailed"),
            _ => None,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (instance_usable, update_repeatable) = match self {
            BrokerError::OperationFailed {
                instance_usable,
                update_repeatable,
                ..
            } => (*instance_usable, *update_repeatable),
            _ => (None, None),
        };
        ErrorBody {
            error: self.code().map(str::to_string),
            description: self.to_string(),
            instance_usable,
            update_repeatable,
        }
    }
}

impl From<StateError> for BrokerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::AlreadyExists { .. } => BrokerError::Conflict(err.to_string()),
            StateError::NotFound { .. } | StateError::OperationNotFound { .. } => {
                BrokerError::NotFound(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(BrokerError::Gone("x".into()).status(), Status::Gone);
        assert_eq!(
            BrokerError::BlockedByDependency("x".into()).status(),
            Status::BadRequest
        );
        assert_eq!(
            BrokerError::ConcurrencyError("x".into()).status(),
            Status::UnprocessableEntity
        );
        assert_eq!(
            BrokerError::Internal("x".into()).status().as_u16(),
            500
        );
    }

    #[test]
    fn operation_failed_body_carries_flags() {
        let err = BrokerError::OperationFailed {
            description: "provision failed".into(),
            instance_usable: Some(false),
            update_repeatable: None,
        };
        let body = err.body();
        assert_eq!(body.error.as_deref(), Some("OperationFailed"));
        assert_eq!(body.description, "provision failed");
        assert_eq!(body.instance_usable, Some(false));
        assert_eq!(body.update_repeatable, None);
    }

    #[test]
    fn state_errors_translate() {
        let err: BrokerError = StateError::AlreadyExists {
            kind: "binding",
            id: "b1".into(),
        }
        .into();
        assert!(matches!(err, BrokerError::Conflict(_)));
        assert_eq!(err.body().description, "binding already exists: b1");
    }
}
