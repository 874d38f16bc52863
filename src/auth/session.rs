//! Session codec
//!
//! The session cookie holds an HMAC-signed, typed snapshot of the
//! account; no server-side session storage is needed. Decoding fails
//! loudly on schema mismatch instead of silently handing back an
//! anonymous identity — the middleware decides what to do with the
//! failure.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Account;
use crate::error::AppError;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "_s";

/// Envelope stored in the signed cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionPayload {
    account: Account,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionPayload {
    fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Create a signed session token for an account snapshot
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
pub fn create_session_token(
    account: &Account,
    secret: &str,
    max_age: i64,
) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let now = Utc::now();
    let payload = SessionPayload {
        account: account.clone(),
        created_at: now,
        expires_at: now + Duration::seconds(max_age),
    };
    let payload_json =
        serde_json::to_string(&payload).map_err(|e| AppError::Internal(e.into()))?;
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload_json.as_bytes());

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(e.to_string()))?;
    mac.update(payload_b64.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token back into the account snapshot
///
/// # Errors
/// - `Unauthorized` for a tampered, truncated or expired token
/// - `Malformed` when the payload authenticates but does not match the
///   account schema (a stale cookie from an incompatible version)
pub fn decode_session_token(token: &str, secret: &str) -> Result<Account, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Some((payload_b64, signature_b64)) = token.split_once('.') else {
        return Err(AppError::Unauthorized);
    };

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(e.to_string()))?;
    mac.update(payload_b64.as_bytes());

    let expected_signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;
    mac.verify_slice(&expected_signature)
        .map_err(|_| AppError::Unauthorized)?;

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthorized)?;

    let payload: SessionPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| AppError::Malformed(format!("session payload: {}", e)))?;

    if payload.is_expired() {
        return Err(AppError::Unauthorized);
    }

    Ok(payload.account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Hash;

    const SECRET: &str = "test-session-secret-32-bytes-long!!";

    fn account() -> Account {
        Account {
            hash: Hash::from_content(b"alice"),
            handle: "alice".to_string(),
            email: "alice@example.com".to_string(),
            ..Account::default()
        }
    }

    #[test]
    fn round_trip_preserves_account() {
        let original = account();
        let token = create_session_token(&original, SECRET, 3600).unwrap();
        let decoded = decode_session_token(&token, SECRET).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tampered_token_is_unauthorized() {
        let token = create_session_token(&account(), SECRET, 3600).unwrap();
        let mut tampered = token.clone();
        tampered.insert(4, 'x');

        let error = decode_session_token(&tampered, SECRET).unwrap_err();
        assert!(matches!(error, AppError::Unauthorized));

        let error = decode_session_token("no-dot-in-here", SECRET).unwrap_err();
        assert!(matches!(error, AppError::Unauthorized));
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = create_session_token(&account(), SECRET, 3600).unwrap();
        let error =
            decode_session_token(&token, "another-session-secret-32-bytes!!").unwrap_err();
        assert!(matches!(error, AppError::Unauthorized));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let token = create_session_token(&account(), SECRET, -60).unwrap();
        let error = decode_session_token(&token, SECRET).unwrap_err();
        assert!(matches!(error, AppError::Unauthorized));
    }

    #[test]
    fn schema_mismatch_fails_loudly() {
        use base64::{Engine as _, engine::general_purpose};
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        // A correctly signed payload that is not a session envelope.
        let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"weird": "shape"}"#);
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload_b64.as_bytes());
        let signature_b64 =
            general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        let token = format!("{}.{}", payload_b64, signature_b64);

        let error = decode_session_token(&token, SECRET).unwrap_err();
        assert!(matches!(error, AppError::Malformed(_)));
    }
}
