//! The `(payload, status)` pair every public store operation resolves to.
//!
//! Store failures never escape as errors past this point: [`Outcome::settle`]
//! folds a [`RepoResult`] into either the requested value, the rows that
//! collided with a rejected create, or a `{"message": ...}` body.

use actix_web::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::Existing;
use crate::repo::{RepoError, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Ok,
    Created,
    NotFound,
    Conflict,
    AuthorNotFound,
    Internal,
}

impl StatusKind {
    pub fn http_status(self) -> StatusCode {
        match self {
            StatusKind::Ok => StatusCode::OK,
            StatusKind::Created => StatusCode::CREATED,
            // a dangling author reference reads as a missing entity to clients
            StatusKind::NotFound | StatusKind::AuthorNotFound => StatusCode::NOT_FOUND,
            StatusKind::Conflict => StatusCode::CONFLICT,
            StatusKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusKind::Ok | StatusKind::Created)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Value(T),
    Existing(Existing),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub payload: Payload<T>,
    pub status: StatusKind,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { payload: Payload::Value(value), status: StatusKind::Ok }
    }

    pub fn created(value: T) -> Self {
        Self { payload: Payload::Value(value), status: StatusKind::Created }
    }

    pub fn failure(err: RepoError) -> Self {
        let (payload, status) = match err {
            RepoError::Duplicate(existing) => (Payload::Existing(existing), StatusKind::Conflict),
            RepoError::NotFound(entity) => (Payload::Error(ErrorBody::new(format!("Can't find {entity}"))), StatusKind::NotFound),
            RepoError::Conflict => (Payload::Error(ErrorBody::new("conflict")), StatusKind::Conflict),
            RepoError::AuthorNotFound => (Payload::Error(ErrorBody::new("Can't find author")), StatusKind::AuthorNotFound),
            RepoError::Internal(detail) => {
                log::error!("store operation failed: {detail}");
                (Payload::Error(ErrorBody::new("internal error")), StatusKind::Internal)
            }
        };
        Self { payload, status }
    }

    /// Folds a store result; `success` is the kind reported for `Ok`.
    pub fn settle(result: RepoResult<T>, success: StatusKind) -> Self {
        match result {
            Ok(value) => Self { payload: Payload::Value(value), status: success },
            Err(e) => Self::failure(e),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match &self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        let payload = match self.payload {
            Payload::Value(v) => Payload::Value(f(v)),
            Payload::Existing(e) => Payload::Existing(e),
            Payload::Error(e) => Payload::Error(e),
        };
        Outcome { payload, status: self.status }
    }
}
