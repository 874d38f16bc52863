//! Kindling - a federated discussion and link-aggregator node
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - index listing, actor documents, inboxes                  │
//! │  - OAuth2 callback                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - account reconciliation                                   │
//! │  - score aggregation and formatting                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Federation & Data Layer                         │
//! │  - HTTP signatures, key and actor resolution                │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `auth`: OAuth2 token lifecycle, sessions, identity middleware
//! - `federation`: HTTP signatures, key and actor resolution
//! - `service`: account reconciliation, score engine
//! - `data`: models and SQLite store
//! - `config`: configuration management
//! - `error`: error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::auth::{TokenManager, hide_string};
use crate::data::{Account, Database, OAuthState};
use crate::error::AppError;
use crate::federation::{ActorResolver, KeyResolver};
use crate::service::AccountService;

/// Deadline applied to each outbound federation request
const FEDERATION_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider name of the node's own federation backend
const DEFAULT_PROVIDER: &str = "fedbox";

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains shared resources
/// like the database pool, the HTTP client and the resolved components.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<Database>,

    /// HTTP client for federation
    pub http_client: Arc<reqwest::Client>,

    /// OAuth2 token lifecycle for the service actor
    pub tokens: Arc<TokenManager>,

    /// Remote actor resolution
    pub resolver: Arc<ActorResolver>,

    /// Signing key resolution for inbound signatures
    pub keys: Arc<KeyResolver>,

    /// Account reconciliation
    pub accounts: Arc<AccountService>,

    /// The local service actor, once authenticated. Token replacement
    /// happens atomically under the lock; readers never observe a
    /// half-updated token.
    pub service_actor: Arc<RwLock<Option<Account>>>,

    /// Whether account self-registration is currently possible; cleared
    /// when the service actor cannot be authenticated.
    pub user_creating_enabled: Arc<AtomicBool>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to the SQLite database
    /// 2. Build the federation HTTP client
    /// 3. Wire the resolvers and services
    /// 4. Authenticate the local service actor (best effort)
    ///
    /// # Errors
    /// Returns error when the database or HTTP client cannot be set up.
    /// A failed service-actor authentication degrades functionality but
    /// does not fail initialization.
    pub async fn new(config: config::AppConfig) -> Result<Self, AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent("Kindling/0.1.0")
                .timeout(FEDERATION_REQUEST_TIMEOUT)
                .build()
                .map_err(|e| AppError::Internal(e.into()))?,
        );

        let tokens = Arc::new(TokenManager::new(
            http_client.clone(),
            config.federation.clone(),
        ));
        let resolver = Arc::new(ActorResolver::new(
            http_client.clone(),
            FEDERATION_REQUEST_TIMEOUT,
        ));
        let keys = Arc::new(KeyResolver::new(db.clone()));
        let accounts = Arc::new(AccountService::new(
            db.clone(),
            resolver.clone(),
            config.federation.actors_url(),
        ));

        let state = Self {
            user_creating_enabled: Arc::new(AtomicBool::new(
                config.federation.user_creating_enabled,
            )),
            config: Arc::new(config),
            db,
            http_client,
            tokens,
            resolver,
            keys,
            accounts,
            service_actor: Arc::new(RwLock::new(None)),
        };

        state.authenticate_service_actor().await;

        tracing::info!("Application state initialized");
        Ok(state)
    }

    /// Resolve the local service actor and obtain its OAuth2 token
    ///
    /// Failure disables account self-registration and logs the cause,
    /// but never aborts startup.
    pub async fn authenticate_service_actor(&self) {
        let config = self
            .tokens
            .config_for(DEFAULT_PROVIDER, &self.config.server.base_url());

        if config.client_id.is_empty() {
            self.user_creating_enabled.store(false, Ordering::Relaxed);
            tracing::error!(provider = DEFAULT_PROVIDER, "Failed to load OAuth2 client id");
            return;
        }

        let actor_iri = format!(
            "{}/{}",
            self.config.federation.actors_url(),
            config.client_id
        );
        let actor = match self.resolver.resolve(&actor_iri).await {
            Ok(actor) => actor,
            Err(error) => {
                self.user_creating_enabled.store(false, Ordering::Relaxed);
                tracing::error!(iri = %actor_iri, error = %error, "Failed to load actor");
                return;
            }
        };

        let mut service_account = actor.to_account();
        let handle = service_account.handle.clone();

        match self
            .tokens
            .password_grant(&config, &handle, &config.client_secret)
            .await
        {
            Ok(token) => {
                tracing::info!(
                    handle = %handle,
                    provider = DEFAULT_PROVIDER,
                    client = %config.client_id,
                    token = %hide_string(&token.access_token),
                    token_type = %token.token_type,
                    refresh = %token.refresh_token.as_deref().map(hide_string).unwrap_or_else(|| "***".to_string()),
                    "Loaded valid OAuth2 token for client"
                );
                let metadata = service_account.metadata.get_or_insert_default();
                metadata.oauth = Some(OAuthState {
                    provider: DEFAULT_PROVIDER.to_string(),
                    token: Some(token),
                    ..OAuthState::default()
                });
                *self.service_actor.write().await = Some(service_account);
            }
            Err(error) => {
                self.user_creating_enabled.store(false, Ordering::Relaxed);
                tracing::error!(
                    handle = %handle,
                    provider = DEFAULT_PROVIDER,
                    client = %config.client_id,
                    pw = %hide_string(&config.client_secret),
                    auth_url = %config.auth_url,
                    token_url = %config.token_url,
                    redirect_url = %config.redirect_url,
                    error = %error,
                    "Failed to authenticate client"
                );
            }
        }
    }

    /// Refresh the service actor's token when it approaches expiry
    ///
    /// A failed refresh leaves the previous valid token in place.
    pub async fn refresh_service_token(&self) {
        let snapshot = self.service_actor.read().await.clone();
        let Some(account) = snapshot else {
            // Never authenticated; retry the full flow.
            self.authenticate_service_actor().await;
            return;
        };

        let needs_refresh = account
            .oauth_token()
            .map(|token| token.expires_within(300))
            .unwrap_or(true);
        if !needs_refresh {
            return;
        }

        let config = self
            .tokens
            .config_for(DEFAULT_PROVIDER, &self.config.server.base_url());
        match self
            .tokens
            .password_grant(&config, &account.handle, &config.client_secret)
            .await
        {
            Ok(token) => {
                let mut guard = self.service_actor.write().await;
                if let Some(account) = guard.as_mut() {
                    let metadata = account.metadata.get_or_insert_default();
                    let oauth = metadata.oauth.get_or_insert_default();
                    oauth.provider = DEFAULT_PROVIDER.to_string();
                    oauth.token = Some(token);
                    tracing::info!(handle = %account.handle, "Refreshed service actor token");
                }
            }
            Err(error) => {
                tracing::warn!(
                    handle = %account.handle,
                    error = %error,
                    "Token refresh failed; keeping previous token"
                );
            }
        }
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use axum::routing::get;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", get(health_check))
        .merge(api::frontend_router(state.clone()))
        .merge(api::federation_router(state.clone()))
        .merge(api::oauth_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security_headers,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

/// Static security headers, plus HSTS outside dev on secure nodes
async fn security_headers(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Xss-Protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("same-origin"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    if !state.config.server.is_dev() && state.config.server.is_secure() {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
        );
    }
    response
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.is_secure() {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
