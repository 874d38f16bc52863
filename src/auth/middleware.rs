//! Request identity middleware
//!
//! Two layers establish who a request comes from:
//! - `verify_signature` checks a detached HTTP signature when one is
//!   present; unsigned requests pass through as anonymous. Verification
//!   is a trust enhancement, not a gate.
//! - `load_session` decodes the session cookie, reconciles the snapshot
//!   with the stored record and re-saves the merged result.
//!
//! Both store the resulting [`Account`] on the request for handlers to
//! read through the [`LoggedAccount`] extractor.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use super::session::{SESSION_COOKIE, create_session_token, decode_session_token};
use crate::AppState;
use crate::data::Account;
use crate::error::AppError;
use crate::federation::{challenge, parse_signature_header, signature_header, verify_signature};
use crate::metrics::SIGNATURE_VERIFICATIONS_TOTAL;

/// Opportunistic HTTP signature verification
///
/// A request without signature parameters proceeds as anonymous with no
/// error. A request with a failing signature also proceeds as anonymous,
/// but the failure is logged and the response carries the
/// `WWW-Authenticate` challenge.
pub async fn verify_signature_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(params) = signature_header(request.headers()) else {
        SIGNATURE_VERIFICATIONS_TOTAL
            .with_label_values(&["absent"])
            .inc();
        request.extensions_mut().insert(Account::anonymous());
        return next.run(request).await;
    };

    let method = request.method().as_str().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let verified = verify_request(&state, &method, &path_and_query, request.headers(), &params).await;

    match verified {
        Ok(account) => {
            SIGNATURE_VERIFICATIONS_TOTAL
                .with_label_values(&["success"])
                .inc();
            tracing::debug!(
                handle = %account.handle,
                hash = %account.hash,
                "loaded account from HTTP signature header"
            );
            request.extensions_mut().insert(account);
            next.run(request).await
        }
        Err(error) => {
            SIGNATURE_VERIFICATIONS_TOTAL
                .with_label_values(&["failure"])
                .inc();
            let anonymous = Account::anonymous();
            tracing::warn!(
                handle = %anonymous.handle,
                hash = %anonymous.hash,
                header = ?request.headers(),
                error = %error,
                "invalid HTTP signature"
            );
            request.extensions_mut().insert(anonymous);
            let mut response = next.run(request).await;
            let challenge = challenge(&state.config.server.domain);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .append(http::header::WWW_AUTHENTICATE, value);
            }
            response
        }
    }
}

async fn verify_request(
    state: &AppState,
    method: &str,
    path_and_query: &str,
    headers: &http::HeaderMap,
    params: &str,
) -> Result<Account, AppError> {
    let parsed = parse_signature_header(params)?;
    let resolved = state.keys.resolve(&parsed.key_id).await?;
    verify_signature(
        method,
        path_and_query,
        headers,
        &parsed,
        &resolved.public_key,
    )?;
    Ok(resolved.account)
}

/// Session loading and account reconciliation
///
/// Decodes the session cookie into an account snapshot, merges it with
/// the freshly loaded record, and re-saves the merged account so the
/// next request starts warm. A corrupt session payload is logged at
/// error level and the request continues as anonymous.
pub async fn load_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.config.session.enabled {
        request.extensions_mut().insert(Account::anonymous());
        return next.run(request).await;
    }

    let jar = CookieJar::from_headers(request.headers());
    let mut account = match jar.get(SESSION_COOKIE) {
        None => Account::anonymous(),
        Some(cookie) => match decode_session_token(cookie.value(), &state.config.session.secret) {
            Ok(account) => {
                tracing::info!(
                    handle = %account.handle,
                    hash = %account.hash,
                    "loaded account from session"
                );
                account
            }
            Err(AppError::Malformed(message)) => {
                tracing::error!(error = %message, "invalid account in session");
                Account::anonymous()
            }
            Err(error) => {
                tracing::debug!(error = %error, "no usable account in session");
                Account::anonymous()
            }
        },
    };

    if account.is_logged() {
        account = state.accounts.reconcile(account, &[]).await;
    }

    request.extensions_mut().insert(account.clone());
    let mut response = next.run(request).await;

    if account.is_logged() {
        match create_session_token(&account, &state.config.session.secret, state.config.session.max_age)
        {
            Ok(token) => {
                let mut cookie = format!(
                    "{}={}; Path=/; HttpOnly; SameSite=Lax",
                    SESSION_COOKIE, token
                );
                if state.config.server.is_secure() {
                    cookie.push_str("; Secure");
                }
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response.headers_mut().append(http::header::SET_COOKIE, value);
                }
            }
            Err(error) => {
                tracing::error!(
                    handle = %account.handle,
                    hash = %account.hash,
                    error = %error,
                    "unable to save account to session"
                );
            }
        }
    }

    response
}

/// Extractor for the account established by the identity middleware
///
/// Falls back to the anonymous account when no middleware ran.
#[derive(Debug, Clone)]
pub struct LoggedAccount(pub Account);

#[async_trait]
impl<S> FromRequestParts<S> for LoggedAccount
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account = parts
            .extensions
            .get::<Account>()
            .cloned()
            .unwrap_or_else(Account::anonymous);
        Ok(LoggedAccount(account))
    }
}
