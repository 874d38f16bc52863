//! OAuth2 callback route
//!
//! Handles `/auth/{provider}/callback` after a provider login: surfaces
//! provider errors, exchanges the code for a token, and attaches the
//! token to the session account.

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::AppState;
use crate::auth::session::{SESSION_COOKIE, create_session_token, decode_session_token};
use crate::data::{Account, AccountMetadata, OAuthState};
use crate::error::AppError;

pub fn oauth_router() -> Router<AppState> {
    Router::new().route("/auth/:provider/callback", get(callback))
}

/// GET /auth/:provider/callback?code=&state=&error=&error_description=
///
/// Provider errors are surfaced verbatim from `error_description`; a
/// missing code is forbidden. On success the token lands in the session
/// account's metadata and the client is redirected home.
async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    RawQuery(query): RawQuery,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let query = query.unwrap_or_default();
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    let has_error = pairs.iter().any(|(k, _)| k == "error");
    if has_error {
        let mut errors = vec![format!("Error for provider {:?}:", provider)];
        errors.extend(
            pairs
                .iter()
                .filter(|(k, _)| k == "error_description")
                .map(|(_, v)| v.clone()),
        );
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "errors": errors })),
        )
            .into_response());
    }

    let value_of = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    let code = value_of("code");
    let oauth_state = value_of("state");

    if code.is_empty() {
        return Err(AppError::Forbidden(format!(
            "{} error: Empty authentication token",
            provider
        )));
    }

    let config = state
        .tokens
        .config_for(&provider, &state.config.server.base_url());
    let token = match state.tokens.exchange_code(&config, &code).await {
        Ok(token) => token,
        Err(error) => {
            tracing::error!(provider = %provider, error = %error, "unable to load token");
            return Err(error);
        }
    };

    let mut account = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| {
            decode_session_token(cookie.value(), &state.config.session.secret).ok()
        })
        .unwrap_or_else(Account::anonymous);

    let metadata = account.metadata.get_or_insert_with(AccountMetadata::default);
    metadata.oauth = Some(OAuthState {
        provider: provider.clone(),
        code,
        state: oauth_state,
        token: Some(token),
    });

    let session_token = create_session_token(
        &account,
        &state.config.session.secret,
        state.config.session.max_age,
    )?;
    let cookie = Cookie::build((SESSION_COOKIE, session_token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.server.is_secure())
        .build();

    tracing::info!(provider = %provider, handle = %account.handle, "login successful");

    Ok((jar.add(cookie), Redirect::to("/")).into_response())
}
