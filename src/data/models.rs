//! Data models
//!
//! Rust structs representing accounts, votes and content items.
//! Identifiers are content-derived SHA-256 hashes; timestamps use chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Handle used for the anonymous fallback identity
pub const ANONYMOUS_HANDLE: &str = "anonymous";

/// MIME type marking a content item as an external link
pub const MIME_TYPE_URL: &str = "application/url";

const FLAGS_DELETED: i64 = 1;

// =============================================================================
// Hash
// =============================================================================

/// Content-derived identifier (lower-case SHA-256 hex, 64 characters)
///
/// Two values reference the same identity iff their hashes are bit-equal.
/// An empty hash means "no identity" (the anonymous account).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(String);

impl Hash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive a hash from arbitrary content bytes.
    pub fn from_content(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(data)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display form (first 8 characters), used in URLs and logs.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Hash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Account
// =============================================================================

/// Key material advertised for an account
///
/// `pem` holds the SubjectPublicKeyInfo encoding of the public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyData {
    /// Key identifier IRI, ending in `#main-key`
    pub id: String,
    /// SPKI PEM encoding of the public key
    pub pem: String,
}

/// OAuth2 token held by an account
///
/// Never log these fields directly; pass them through
/// [`crate::auth::hide_string`] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// Whether the token is past (or within `margin` seconds of) expiry.
    pub fn expires_within(&self, margin: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + chrono::Duration::seconds(margin),
            None => false,
        }
    }
}

/// OAuth2 state attached to an account after a login flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthState {
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<OAuthToken>,
}

/// Federation-specific metadata bag for an account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthState>,
    /// IRI of the authoritative actor document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_iri: Option<String>,
}

impl AccountMetadata {
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.oauth.is_none() && self.actor_iri.is_none()
    }
}

/// Identity record for a local or remote participant
///
/// Constructed fresh per request from session data and/or a remote fetch,
/// reconciled, then attached to the request context. Not cached here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub hash: Hash,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Back-reference to the inviting account, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AccountMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<Vote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub followers: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub following: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Hash>,
    /// Cached raw federation object for this account, if one was fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<serde_json::Value>,
}

impl Account {
    /// The anonymous fallback identity used when no signature or session
    /// identifies the caller.
    pub fn anonymous() -> Self {
        Self {
            handle: ANONYMOUS_HANDLE.to_string(),
            ..Self::default()
        }
    }

    pub fn is_logged(&self) -> bool {
        !self.hash.is_empty() && self.handle != ANONYMOUS_HANDLE
    }

    pub fn is_valid(&self) -> bool {
        !self.hash.is_empty() && !self.handle.is_empty()
    }

    /// The OAuth2 token currently attached to this account, if any.
    pub fn oauth_token(&self) -> Option<&OAuthToken> {
        self.metadata.as_ref()?.oauth.as_ref()?.token.as_ref()
    }
}

// =============================================================================
// Vote
// =============================================================================

/// A single vote on a content item
///
/// Votes are append-only from the perspective of this node; score
/// recomputation is a pure fold over the current vote set for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub submitted_by: Hash,
    pub item: Hash,
    /// +1 or -1
    pub weight: i64,
    pub submitted_at: DateTime<Utc>,
}

// =============================================================================
// Content item
// =============================================================================

/// A submitted link or text post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: Hash,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub submitted_by: Hash,
    /// Handle of the submitting account, joined in at load time
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub flags: i64,
    /// Materialized path of ancestor keys, `.`-separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Item {
    /// Derive the content key from data, update time, path and submitter.
    ///
    /// The key is stable once assigned; callers derive it exactly once at
    /// submission time.
    pub fn derive_key(&self) -> Hash {
        let updated = self.updated_at.unwrap_or_else(Utc::now);
        let mut data = self.data.clone();
        data.extend_from_slice(
            format!("{}", updated.timestamp_nanos_opt().unwrap_or_default()).as_bytes(),
        );
        if let Some(path) = &self.path {
            data.extend_from_slice(path.as_bytes());
        }
        data.extend_from_slice(self.submitted_by.as_str().as_bytes());
        Hash::from_content(&data)
    }

    pub fn is_link(&self) -> bool {
        self.mime_type == MIME_TYPE_URL
    }

    pub fn is_top(&self) -> bool {
        self.path.is_none()
    }

    /// Nesting depth, derived from the materialized path.
    pub fn level(&self) -> usize {
        match &self.path {
            None => 0,
            Some(path) => path.matches('.').count() + 1,
        }
    }

    pub fn deleted(&self) -> bool {
        self.flags & FLAGS_DELETED == FLAGS_DELETED
    }

    /// Domain of the linked URL, for link items only.
    pub fn domain(&self) -> Option<String> {
        if !self.is_link() {
            return None;
        }
        let data = String::from_utf8_lossy(&self.data);
        url::Url::parse(data.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}
