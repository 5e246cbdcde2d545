//! Error responses in the Redfish error envelope.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use redfishd_domain::DomainError;
use redfishd_domain::messages::error_body;
use tracing::error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("The credentials supplied with the request are invalid.")]
    BadCredentials,

    #[error("Method {0} is not supported by this service.")]
    MethodNotAllowed(String),

    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Domain(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::BadCredentials => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::MalformedJson(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Base registry message id reported in the envelope.
    pub const fn message_id(&self) -> &'static str {
        match self {
            Self::Domain(e) => e.message_id(),
            Self::BadCredentials => "InsufficientPrivilege",
            Self::MethodNotAllowed(_) => "OperationNotAllowed",
            Self::MalformedJson(_) => "MalformedJSON",
            Self::BadRequest(_) => "GeneralError",
            Self::NotFound(_) => "ResourceMissingAtURI",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let Self::Domain(DomainError::NotModified { etag, .. }) = &self {
            let mut response = status.into_response();
            if let Ok(value) = HeaderValue::from_str(etag) {
                response.headers_mut().insert(header::ETAG, value);
            }
            return response;
        }

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = error_body(self.message_id(), &self.to_string(), Vec::new());
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"redfishd\""),
            );
        }
        response
    }
}
