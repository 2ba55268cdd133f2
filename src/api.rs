pub(crate) mod client_server;
pub(crate) mod server_server;

use axum::{async_trait, extract::FromRequestParts};
use http::{header, request::Parts, HeaderMap};

use crate::{config, Error, Result};

/// Header the fronting authentication layer uses to convey the request
/// principal. Requests reach this service only through that layer.
pub(crate) const AUTH_PRINCIPAL_HEADER: &str = "x-auth-principal";

/// The authenticated principal of a request.
pub(crate) struct AuthenticatedUser(pub(crate) String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self> {
        parts
            .headers
            .get(AUTH_PRINCIPAL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_owned()))
            .ok_or_else(|| {
                Error::Forbidden("Request is not authenticated".to_owned())
            })
    }
}

/// Raw query pairs; several token endpoints take repeatable parameters.
pub(crate) struct QueryParams(pub(crate) Vec<(String, String)>);

impl QueryParams {
    pub(crate) fn first(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn include(&self, what: &str) -> bool {
        self.0
            .iter()
            .any(|(key, value)| key == "include" && value == what)
    }
}

pub(crate) fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| config::strip_port(host).to_owned())
}

/// The expected content hash, with any ETag quoting removed.
pub(crate) fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_matches('"').to_owned())
        .filter(|value| !value.is_empty())
}
