//! User-facing token endpoints

use std::collections::{BTreeMap, HashSet};

use axum::{extract::Query, response::IntoResponse, Json};
use http::{header, HeaderMap};
use serde_json::{json, Value};

use super::{if_match, request_host, AuthenticatedUser, QueryParams};
use crate::{
    service::{
        sending::RefreshRequest,
        tokens::{
            self, describe, is_token_data_key, ListOptions,
            StoreTokenRequest, UpdateMode,
        },
    },
    services, Error, Result,
};

/// # `GET /token`
///
/// Returns the service description a token resolves to, with an `ETag` of
/// its content hash. The token comes from the `token` query parameter or,
/// failing that, from the request's `Host` header when that host is not one
/// of this node's own hostnames.
///
/// - Soft-deleted tokens 404 unless `include=deleted`
/// - `include=metadata` adds the system metadata to the body
pub(crate) async fn get_token_route(
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let query = QueryParams(query);
    let token = resolve_token_name(&query, &headers)?;
    let include_deleted = query.include("deleted");

    let record = services()
        .tokens
        .token(&token, false)?
        .filter(|record| !tokens::record_deleted(record) || include_deleted)
        .ok_or_else(|| {
            Error::NotFound(format!("Couldn't find token {token}"))
        })?;

    let body = describe(&record, query.include("metadata"));

    Ok((
        [(header::ETAG, tokens::token_hash(&record))],
        Json(Value::Object(body)),
    ))
}

/// # `POST /token`
///
/// Creates or updates a token. `update-mode=admin` selects administrative
/// mode; an `If-Match` header opts into optimistic concurrency.
pub(crate) async fn post_token_route(
    user: AuthenticatedUser,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse> {
    let query = QueryParams(query);

    let Value::Object(mut body) = body else {
        return Err(Error::bad_request(
            "Request body must be a JSON object",
        ));
    };

    let body_token = match body.remove("token") {
        None => None,
        Some(Value::String(token)) => Some(token),
        Some(_) => {
            return Err(Error::bad_request("token must be a string"));
        }
    };

    let token = match (body_token, query.first("token")) {
        (Some(from_body), Some(from_query)) if from_body != from_query => {
            return Err(Error::bad_request(
                "The token name in the body does not match the token \
                 query parameter",
            ));
        }
        (Some(token), _) => token,
        (None, Some(token)) => token.to_owned(),
        (None, None) => {
            return Err(Error::bad_request(
                "Couldn't find token in request",
            ));
        }
    };

    let update_mode = match query.first("update-mode") {
        None => UpdateMode::Normal,
        Some("admin") => UpdateMode::Admin,
        Some(other) => {
            return Err(Error::BadRequest(format!(
                "Invalid update-mode {other}"
            )));
        }
    };

    let request = StoreTokenRequest {
        token,
        body,
        authenticated_user: user.0,
        if_match: if_match(&headers),
        update_mode,
        request_host: request_host(&headers),
    };

    services().tokens.validate_store_request(&request)?;

    let lock = services().globals.lock_registry().await;
    let outcome = services().tokens.store_token(&request, &lock)?;
    drop(lock);

    if !outcome.no_changes {
        services()
            .sending
            .broadcast_refresh(RefreshRequest::for_token(
                &request.token,
                Some(&outcome.owner),
            ))
            .await;
    }

    Ok((
        [(header::ETAG, outcome.hash)],
        Json(json!({
            "message": outcome.message,
            "service-description": outcome.description,
        })),
    ))
}

/// # `DELETE /token`
///
/// Soft-deletes the token named by the `token` query parameter, or removes
/// it outright with `hard-delete=true` (administrators only; requires an
/// `If-Match` unless the token is already soft-deleted).
pub(crate) async fn delete_token_route(
    user: AuthenticatedUser,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let query = QueryParams(query);

    let token = query.first("token").map(ToOwned::to_owned).ok_or_else(
        || Error::bad_request("Couldn't find token in request"),
    )?;

    let hard = match query.first("hard-delete") {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(Error::BadRequest(format!(
                "Invalid hard-delete {other}"
            )));
        }
    };

    let if_match = if_match(&headers);

    let lock = services().globals.lock_registry().await;
    let outcome = services().tokens.delete_token(
        &token,
        &user.0,
        if_match.as_deref(),
        hard,
        &lock,
    )?;
    drop(lock);

    services()
        .sending
        .broadcast_refresh(RefreshRequest::for_token(
            &token,
            outcome.owner.as_deref(),
        ))
        .await;

    Ok(Json(json!({
        "message": outcome.message,
        "hard-delete": outcome.hard,
    })))
}

/// # `GET /tokens`
///
/// Owner-scoped enumeration. `owner` is repeatable; `include` accepts
/// `deleted` and `metadata`; `can-manage-as-user` keeps only tokens that
/// principal could manage; any token-data key filters on its stringified
/// value.
pub(crate) async fn list_tokens_route(
    Query(query): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse> {
    let mut options = ListOptions::default();
    let mut filters: BTreeMap<String, HashSet<String>> = BTreeMap::new();

    for (name, value) in &query {
        match name.as_str() {
            "owner" => {
                options.owners.insert(value.clone());
            }
            "include" => match value.as_str() {
                "deleted" => options.include_deleted = true,
                "metadata" => options.show_metadata = true,
                other => {
                    return Err(Error::BadRequest(format!(
                        "Invalid include {other}"
                    )));
                }
            },
            "can-manage-as-user" => {
                options.can_manage_as = Some(value.clone());
            }
            name if is_token_data_key(name) => {
                filters
                    .entry(name.to_owned())
                    .or_default()
                    .insert(value.clone());
            }
            other => {
                return Err(Error::BadRequest(format!(
                    "Unsupported query parameter {other}"
                )));
            }
        }
    }

    options.parameter_filters = filters.into_iter().collect();

    let listed = services().tokens.list_tokens(&options)?;

    Ok(Json(Value::Array(
        listed.into_iter().map(Value::Object).collect(),
    )))
}

/// # `GET /token-owners`
///
/// Dumps the raw owner directory, for operator inspection.
pub(crate) async fn token_owners_route() -> Result<impl IntoResponse> {
    Ok(Json(Value::Object(services().tokens.owners_map()?)))
}

fn resolve_token_name(
    query: &QueryParams,
    headers: &HeaderMap,
) -> Result<String> {
    if let Some(token) = query.first("token") {
        return Ok(token.to_owned());
    }

    request_host(headers)
        .filter(|host| {
            !services().globals.config.hostnames.contains(host)
        })
        .ok_or_else(|| Error::bad_request("Couldn't find token in request"))
}
