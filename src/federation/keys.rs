//! Signing key resolution
//!
//! Maps a signature's `keyId` URL onto a stored account and its decoded
//! public key. Resolution has no side effects and every call is
//! independent; concurrent use is safe.

use std::sync::Arc;

use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

use crate::data::{AccountFilter, Database};
use crate::error::AppError;

/// The only key fragment this node issues
pub const KEY_FRAGMENT: &str = "main-key";

/// A resolved signing key together with the account that owns it
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub account: crate::data::Account,
    pub public_key: RsaPublicKey,
}

/// Resolves `keyId` URLs against the account store
pub struct KeyResolver {
    db: Arc<Database>,
}

impl KeyResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve public key material for a key identifier URL
    ///
    /// The fragment must be exactly `main-key` and is checked before any
    /// store access. The identity hash is the final path segment of the
    /// URL.
    ///
    /// # Errors
    /// - `InvalidKeyId` for a URL that does not parse or carries the
    ///   wrong fragment
    /// - `NotFound` when no account matches the extracted hash
    /// - `MalformedKey` when the stored key material does not decode as
    ///   SubjectPublicKeyInfo
    pub async fn resolve(&self, key_id: &str) -> Result<ResolvedKey, AppError> {
        let url = url::Url::parse(key_id)
            .map_err(|e| AppError::InvalidKeyId(format!("{}: {}", key_id, e)))?;

        if url.fragment() != Some(KEY_FRAGMENT) {
            return Err(AppError::InvalidKeyId(format!(
                "key id {} does not name the {} fragment",
                key_id, KEY_FRAGMENT
            )));
        }

        let hash = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                AppError::InvalidKeyId(format!("key id {} has no identity path", key_id))
            })?;

        let account = self.db.load_account(&AccountFilter::by_key(hash)).await?;

        let pem = account
            .metadata
            .as_ref()
            .and_then(|m| m.key.as_ref())
            .map(|k| k.pem.clone())
            .ok_or_else(|| {
                AppError::MalformedKey(format!("account {} has no key material", account.hash))
            })?;

        let public_key = RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|e| AppError::MalformedKey(e.to_string()))?;

        Ok(ResolvedKey {
            account,
            public_key,
        })
    }
}
