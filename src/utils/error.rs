use std::convert::Infallible;

use axum::{response::IntoResponse, Json};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[allow(clippy::error_impl_error)]
pub(crate) enum Error {
    #[cfg(feature = "sqlite")]
    #[error("There was a problem with the connection to the sqlite database: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },
    #[error("Could not reach peer: {source}")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },
    #[error("Could not encode or decode a stored value: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    #[error("{0}")]
    BadConfig(&'static str),
    #[error("{0}")]
    /// Don't create this directly. Use Error::bad_database instead.
    BadDatabase(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    PreconditionFailed(String),
}

impl Error {
    pub(crate) fn bad_database(message: &'static str) -> Self {
        error!("BadDatabase: {}", message);
        Self::BadDatabase(message)
    }

    pub(crate) fn bad_config(message: &'static str) -> Self {
        error!("BadConfig: {}", message);
        Self::BadConfig(message)
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) | Self::QuotaExceeded(_) => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sanitizes public-facing errors that can leak sensitive information.
    pub(crate) fn sanitized_message(&self) -> String {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite { .. } => "Database or I/O error occurred.".to_owned(),
            Self::Serialization { .. }
            | Self::BadConfig { .. }
            | Self::BadDatabase { .. } => {
                "Database or I/O error occurred.".to_owned()
            }
            _ => self.to_string(),
        }
    }
}

impl From<Infallible> for Error {
    fn from(i: Infallible) -> Self {
        match i {}
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();
        let message = self.sanitized_message();

        info!("Returning an error: {}: {}", status_code, message);

        (status_code, Json(json!({ "error": { "message": message } })))
            .into_response()
    }
}
