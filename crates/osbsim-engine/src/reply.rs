//! Successful engine replies and the shared last-operation bodies.

use osbsim_core::OperationState;
use osbsim_core::response::LastOperationResponse;
use osbsim_state::Operation;

/// Status codes the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    Accepted,
    BadRequest,
    NotFound,
    Conflict,
    Gone,
    PreconditionFailed,
    UnprocessableEntity,
    InternalServerError,
}

impl Status {
    pub fn as_u16(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::Gone => 410,
            Status::PreconditionFailed => 412,
            Status::UnprocessableEntity => 422,
            Status::InternalServerError => 500,
        }
    }
}

/// A reply with an optional body; `None` renders as an empty object.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub status: Status,
    pub body: Option<T>,
}

impl<T> Reply<T> {
    pub fn new(status: Status, body: T) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    pub fn ok(body: T) -> Self {
        Self::new(Status::Ok, body)
    }

    pub fn empty(status: Status) -> Self {
        Self { status, body: None }
    }
}

/// Poll body for an operation of a live resource.
pub(crate) fn describe(op: &Operation) -> LastOperationResponse {
    LastOperationResponse {
        state: op.state(),
        description: Some(op.description()),
        instance_usable: op.instance_usable(),
        update_repeatable: op.update_repeatable(),
    }
}

/// Poll reply for a resource that has been deleted.
///
/// An asynchronous delete reports its own state under 410. A synchronous one
/// was already confirmed to the caller, so the poll reports `failed` to mark
/// the resource as used up.
pub(crate) fn describe_retired(op: &Operation) -> Reply<LastOperationResponse> {
    if op.is_async() {
        Reply::new(Status::Gone, describe(op))
    } else {
        Reply::ok(LastOperationResponse {
            state: OperationState::Failed,
            description: Some(format!("{} already completed", op.kind())),
            instance_usable: None,
            update_repeatable: None,
        })
    }
}
