use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::outcome::ErrorBody;

/// Failures raised by the request layer itself, before the store is reached.
/// Store outcomes are encoded by [`crate::outcome::Outcome`] instead.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] BadRequest(String),
    #[error("malformed request body: {0}")] MalformedBody(String),
}

impl ApiError {
    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        ApiError::BadRequest(msg.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_are_bad_requests() {
        let e = ApiError::bad_request("vote value must be -1 or 1, got 3");
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(e.to_string(), "vote value must be -1 or 1, got 3");
        assert!(ApiError::MalformedBody("eof".into()).to_string().starts_with("malformed"));
    }
}
