//! Replica- and operator-facing token endpoints

use axum::{response::IntoResponse, Json};
use serde_json::json;

use super::AuthenticatedUser;
use crate::{service::sending::RefreshRequest, services, Error, Result};

/// # `POST /tokens/refresh`
///
/// Peer-only cache invalidation: re-reads the named records from
/// authoritative storage. `index` refreshes the owner directory and every
/// shard it references; `token` refreshes one record, plus the owner's
/// shard when `owner` is given.
pub(crate) async fn refresh_route(
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse> {
    services().tokens.refresh(&request)?;

    Ok(Json(json!({ "success": true })))
}

/// # `POST /tokens/reindex`
///
/// Operator action: rebuilds the owner directory and every shard from the
/// stored token records, then tells peers to drop their cached index.
pub(crate) async fn reindex_route(
    user: AuthenticatedUser,
) -> Result<impl IntoResponse> {
    if !services().authz.is_admin(&user.0) {
        return Err(Error::Forbidden(format!(
            "{} is not allowed to re-index tokens",
            user.0
        )));
    }

    let token_names = services().tokens.all_token_names()?;

    let lock = services().globals.lock_registry().await;
    let indexed = services().tokens.reindex(&token_names, &lock)?;
    drop(lock);

    services()
        .sending
        .broadcast_refresh(RefreshRequest::for_index())
        .await;

    Ok(Json(json!({
        "message": format!("Successfully re-indexed {indexed} tokens"),
    })))
}
