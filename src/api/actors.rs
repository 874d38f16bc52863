//! Federation endpoints and the index listing
//!
//! - GET /            - top items, ranked by score
//! - GET /actors/:hash - local actor document
//! - POST /inbox, /actors/:hash/inbox - signed activity submission

use axum::{
    Json, Router, middleware,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;

use crate::AppState;
use crate::auth::{LoggedAccount, load_session, verify_signature_middleware};
use crate::data::{Hash, MAX_CONTENT_ITEMS, Vote};
use crate::data::AccountFilter;
use crate::error::AppError;
use crate::federation::reference_hash;
use crate::service::score;

/// Routes that establish identity from the session cookie
pub fn frontend_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/about", get(about))
        .route_layer(middleware::from_fn_with_state(state, load_session))
}

/// Routes that establish identity from a detached HTTP signature
pub fn federation_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/actors/:hash", get(actor))
        .route("/actors/:hash/inbox", post(inbox))
        .route("/inbox", post(inbox))
        .route_layer(middleware::from_fn_with_state(
            state,
            verify_signature_middleware,
        ))
}

/// GET /
///
/// Returns the top-level items ordered by score, then recency, with
/// display-ready score and date strings. The authenticated account's
/// votes for the listed items ride along so a client can mark them.
async fn index(
    State(state): State<AppState>,
    LoggedAccount(account): LoggedAccount,
) -> Result<Json<serde_json::Value>, AppError> {
    let items = state.db.load_top_items(MAX_CONTENT_ITEMS).await?;

    let visible: Vec<Hash> = items.iter().map(|i| i.key.clone()).collect();
    let account = state.accounts.reconcile(account, &visible).await;

    let rendered: Vec<serde_json::Value> = items
        .iter()
        .filter(|item| !item.deleted())
        .map(|item| {
            serde_json::json!({
                "hash": item.key.short(),
                "title": item.title,
                "domain": item.domain(),
                "score": score::format_score(item.score),
                "submitted_by": item.handle,
                "submitted_at": item.submitted_at.map(score::format_date),
                "when": item.submitted_at.map(score::relative_date),
                "voted": account.votes.iter().find(|v| v.item == item.key).map(|v| v.weight),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "title": "Index",
        "items": rendered,
        "account": if account.is_logged() { Some(&account.handle) } else { None },
        "providers": state.config.federation.enabled_providers(),
    })))
}

/// GET /about
///
/// Node information, including whether account self-registration is
/// currently possible. The flag drops when the service actor could not
/// be authenticated at startup.
async fn about(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "title": state.config.server.domain,
        "registrations_open": state
            .user_creating_enabled
            .load(std::sync::atomic::Ordering::Relaxed),
        "providers": state.config.federation.enabled_providers(),
    }))
}

/// GET /actors/:hash
///
/// Serves the local actor document, public key included.
async fn actor(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let account = state
        .db
        .load_account(&AccountFilter::by_key(hash))
        .await?;

    let base_url = state.config.server.base_url();
    let actor_iri = format!("{}/actors/{}", base_url, account.hash);
    let key_pem = account
        .metadata
        .as_ref()
        .and_then(|m| m.key.as_ref())
        .map(|k| k.pem.clone())
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Person",
        "id": actor_iri,
        "preferredUsername": account.handle,
        "inbox": format!("{}/inbox", actor_iri),
        "outbox": format!("{}/outbox", actor_iri),
        "followers": format!("{}/followers", actor_iri),
        "following": format!("{}/following", actor_iri),
        "liked": format!("{}/liked", actor_iri),
        "publicKey": {
            "id": format!("{}#main-key", actor_iri),
            "owner": actor_iri,
            "publicKeyPem": key_pem
        }
    })))
}

/// POST /inbox, POST /actors/:hash/inbox
///
/// Accepts a signed activity. Like/Dislike activities become votes and
/// the target item's score is refolded from the current vote set;
/// anything else is acknowledged and left for the federation backend.
async fn inbox(
    State(state): State<AppState>,
    LoggedAccount(account): LoggedAccount,
    body: axum::body::Bytes,
) -> Result<StatusCode, AppError> {
    let activity: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("undecodable activity: {}", e)))?;

    let kind = activity
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    let weight = match kind.as_str() {
        "Like" => 1,
        "Dislike" => -1,
        _ => {
            tracing::debug!(
                activity = %kind,
                handle = %account.handle,
                "acknowledged activity without local effect"
            );
            return Ok(StatusCode::ACCEPTED);
        }
    };

    // Votes need an authenticated submitter even under the opportunistic
    // signature policy.
    if !account.is_logged() {
        return Err(AppError::Unauthorized);
    }

    let item_key = activity
        .get("object")
        .and_then(reference_hash)
        .ok_or_else(|| AppError::Validation("activity has no object reference".to_string()))?;

    let item = state.db.load_item(&item_key).await?;

    state
        .db
        .save_vote(&Vote {
            submitted_by: account.hash.clone(),
            item: item.key.clone(),
            weight,
            submitted_at: Utc::now(),
        })
        .await?;

    let votes = state
        .db
        .load_votes(&crate::data::VoteFilter {
            items: vec![item.key.as_str().to_string()],
            ..Default::default()
        })
        .await?;
    let new_score = score::stored_score(&votes);
    state.db.update_item_score(&item.key, new_score).await?;

    tracing::info!(
        handle = %account.handle,
        item = %item.key.short(),
        weight,
        score = new_score,
        "recorded vote"
    );

    Ok(StatusCode::ACCEPTED)
}
