//! OAuth2 client flows
//!
//! Provider configuration and the token lifecycle for the local service
//! actor: authorization-code exchange for interactive logins and the
//! password-credential grant used at node startup.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::config::FederationConfig;
use crate::data::OAuthToken;
use crate::error::AppError;
use crate::metrics::TOKEN_GRANTS_TOTAL;

/// Mask a secret for logging, keeping only the last 3 characters
///
/// Strings of length 3 or less are fully masked.
pub fn hide_string(s: &str) -> String {
    let count = s.chars().count();
    if count <= 3 {
        return "***".to_string();
    }
    let tail: String = s.chars().skip(count - 3).collect();
    format!("{}{}", "*".repeat(count - 3), tail)
}

/// Resolved OAuth2 configuration for one provider
#[derive(Debug, Clone)]
pub struct Oauth2Config {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
}

/// Wire shape of a token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    fn into_token(self) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        }
    }
}

/// Manages OAuth2 configuration and token grants per provider
pub struct TokenManager {
    client: Arc<reqwest::Client>,
    federation: FederationConfig,
}

impl TokenManager {
    pub fn new(client: Arc<reqwest::Client>, federation: FederationConfig) -> Self {
        Self { client, federation }
    }

    /// Static provider table, keyed by lower-cased provider name
    ///
    /// Unknown providers fall through to the node's own federation
    /// backend. The redirect URL defaults to the local callback route
    /// unless an external OAuth2 base URL with a non-empty host is
    /// configured.
    pub fn config_for(&self, provider: &str, local_base_url: &str) -> Oauth2Config {
        let fed = &self.federation;
        let (client_id, client_secret, auth_url, token_url) =
            match provider.to_lowercase().as_str() {
                "github" => (
                    fed.github.key.clone(),
                    fed.github.secret.clone(),
                    "https://github.com/login/oauth/authorize".to_string(),
                    "https://github.com/login/oauth/access_token".to_string(),
                ),
                "gitlab" => (
                    fed.gitlab.key.clone(),
                    fed.gitlab.secret.clone(),
                    "https://gitlab.com/login/oauth/authorize".to_string(),
                    "https://gitlab.com/login/oauth/access_token".to_string(),
                ),
                "facebook" => (
                    fed.facebook.key.clone(),
                    fed.facebook.secret.clone(),
                    "https://graph.facebook.com/oauth/authorize".to_string(),
                    "https://graph.facebook.com/oauth/access_token".to_string(),
                ),
                "google" => (
                    fed.google.key.clone(),
                    fed.google.secret.clone(),
                    "https://accounts.google.com/o/oauth2/auth".to_string(),
                    "https://accounts.google.com/o/oauth2/token".to_string(),
                ),
                // "fedbox" and anything unknown
                _ => {
                    let api_url = fed.api_url.trim_end_matches('/');
                    (
                        fed.oauth2.key.clone(),
                        fed.oauth2.secret.clone(),
                        format!("{}/oauth/authorize", api_url),
                        format!("{}/oauth/token", api_url),
                    )
                }
            };

        let external_host_configured = fed
            .oauth2_url
            .as_deref()
            .and_then(|raw| url::Url::parse(raw).ok())
            .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
            .unwrap_or(false);

        let redirect_url = if external_host_configured {
            String::new()
        } else {
            format!("{}/auth/{}/callback", local_base_url, provider)
        };

        Oauth2Config {
            provider: provider.to_string(),
            client_id,
            client_secret,
            auth_url,
            token_url,
            redirect_url,
        }
    }

    /// Exchange an authorization code for a token
    pub async fn exchange_code(
        &self,
        config: &Oauth2Config,
        code: &str,
    ) -> Result<OAuthToken, AppError> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("client_id", config.client_id.clone()),
            ("client_secret", config.client_secret.clone()),
        ];
        if !config.redirect_url.is_empty() {
            params.push(("redirect_uri", config.redirect_url.clone()));
        }

        self.request_token(config, "authorization_code", &params)
            .await
    }

    /// Obtain a token with the resource-owner password grant
    ///
    /// Used for the local service actor, whose handle and client secret
    /// double as credentials against the federation backend.
    pub async fn password_grant(
        &self,
        config: &Oauth2Config,
        handle: &str,
        secret: &str,
    ) -> Result<OAuthToken, AppError> {
        let params = vec![
            ("grant_type", "password".to_string()),
            ("username", handle.to_string()),
            ("password", secret.to_string()),
            ("client_id", config.client_id.clone()),
            ("client_secret", config.client_secret.clone()),
        ];

        self.request_token(config, "password", &params).await
    }

    async fn request_token(
        &self,
        config: &Oauth2Config,
        grant_type: &str,
        params: &[(&str, String)],
    ) -> Result<OAuthToken, AppError> {
        let result = self.request_token_inner(config, params).await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        TOKEN_GRANTS_TOTAL
            .with_label_values(&[&config.provider, grant_type, outcome])
            .inc();

        result
    }

    async fn request_token_inner(
        &self,
        config: &Oauth2Config,
        params: &[(&str, String)],
    ) -> Result<OAuthToken, AppError> {
        let response = self
            .client
            .post(&config.token_url)
            .header(http::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AppError::Forbidden(format!(
                "{} rejected the token request with {}",
                config.provider, status
            )));
        }
        if !status.is_success() {
            return Err(AppError::Unreachable(format!(
                "{} token endpoint responded with {}",
                config.provider, status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Malformed(e.to_string()))?;

        Ok(token.into_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;

    fn federation_config() -> FederationConfig {
        FederationConfig {
            api_url: "https://fed.example.com".to_string(),
            github: ProviderCredentials {
                key: "gh-id".to_string(),
                secret: "gh-secret".to_string(),
            },
            oauth2: ProviderCredentials {
                key: "fed-id".to_string(),
                secret: "fed-secret".to_string(),
            },
            ..FederationConfig::default()
        }
    }

    fn manager(federation: FederationConfig) -> TokenManager {
        TokenManager::new(Arc::new(reqwest::Client::new()), federation)
    }

    #[test]
    fn hide_string_masks_all_but_last_three() {
        assert_eq!(hide_string("abcd"), "*bcd");
        assert_eq!(hide_string("ab"), "***");
        assert_eq!(hide_string("abc"), "***");
        assert_eq!(hide_string(""), "***");
        assert_eq!(hide_string("super-secret"), "*********ret");
    }

    #[test]
    fn config_for_github_uses_fixed_endpoints() {
        let config = manager(federation_config()).config_for("GitHub", "https://node.example.com");
        assert_eq!(config.client_id, "gh-id");
        assert_eq!(config.auth_url, "https://github.com/login/oauth/authorize");
        assert_eq!(
            config.token_url,
            "https://github.com/login/oauth/access_token"
        );
        assert_eq!(
            config.redirect_url,
            "https://node.example.com/auth/GitHub/callback"
        );
    }

    #[test]
    fn config_for_unknown_provider_falls_back_to_federation_backend() {
        let config = manager(federation_config()).config_for("fedbox", "https://node.example.com");
        assert_eq!(config.client_id, "fed-id");
        assert_eq!(config.auth_url, "https://fed.example.com/oauth/authorize");
        assert_eq!(config.token_url, "https://fed.example.com/oauth/token");
    }

    #[test]
    fn external_oauth2_url_suppresses_local_redirect() {
        let mut federation = federation_config();
        federation.oauth2_url = Some("https://sso.example.com/oauth".to_string());
        let config = manager(federation).config_for("fedbox", "https://node.example.com");
        assert!(config.redirect_url.is_empty());

        // A URL without a host keeps the local callback.
        let mut federation = federation_config();
        federation.oauth2_url = Some("not-a-url".to_string());
        let config = manager(federation).config_for("fedbox", "https://node.example.com");
        assert_eq!(
            config.redirect_url,
            "https://node.example.com/auth/fedbox/callback"
        );
    }

    #[test]
    fn token_response_computes_expiry() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "tok", "token_type": "Bearer", "expires_in": 3600, "refresh_token": "ref"}"#,
        )
        .unwrap();
        let token = response.into_token();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.refresh_token.as_deref(), Some("ref"));
        assert!(token.expires_at.is_some());
        assert!(!token.expires_within(60));
        assert!(token.expires_within(7200));
    }

    #[test]
    fn token_response_defaults_token_type() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();
        let token = response.into_token();
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expires_at.is_none());
        assert!(!token.expires_within(60));
    }

    async fn spawn_token_endpoint(status: http::StatusCode, body: &'static str) -> String {
        use axum::Router;
        use axum::routing::post;

        let app = Router::new().route(
            "/oauth/token",
            post(move || async move { (status, [("content-type", "application/json")], body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn password_grant_decodes_token_response() {
        let base = spawn_token_endpoint(
            http::StatusCode::OK,
            r#"{"access_token": "granted", "token_type": "Bearer", "expires_in": 3600}"#,
        )
        .await;

        let mut federation = federation_config();
        federation.api_url = base;
        let manager = manager(federation);
        let config = manager.config_for("fedbox", "http://localhost");

        let token = manager
            .password_grant(&config, "service-actor", "fed-secret")
            .await
            .unwrap();
        assert_eq!(token.access_token, "granted");
        assert_eq!(token.token_type, "Bearer");
    }

    #[tokio::test]
    async fn rejected_grants_surface_as_forbidden() {
        let base = spawn_token_endpoint(
            http::StatusCode::UNAUTHORIZED,
            r#"{"error": "invalid_grant"}"#,
        )
        .await;

        let mut federation = federation_config();
        federation.api_url = base;
        let manager = manager(federation);
        let config = manager.config_for("fedbox", "http://localhost");

        let error = manager
            .exchange_code(&config, "bad-code")
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn undecodable_token_response_is_malformed() {
        let base = spawn_token_endpoint(http::StatusCode::OK, "not json").await;

        let mut federation = federation_config();
        federation.api_url = base;
        let manager = manager(federation);
        let config = manager.config_for("fedbox", "http://localhost");

        let error = manager
            .password_grant(&config, "service-actor", "fed-secret")
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Malformed(_)));
    }
}
