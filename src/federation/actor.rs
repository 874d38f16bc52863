//! Remote actor resolution
//!
//! Fetches and decodes federation actor documents into the local account
//! shape. Resolution is a pure function of the actor IRI plus network
//! state; no caching is assumed here.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::data::{Account, AccountMetadata, Hash, KeyData};
use crate::error::AppError;
use crate::metrics::{ACTOR_FETCHES_TOTAL, ACTOR_FETCH_DURATION_SECONDS};

/// Closed set of federation object kinds this node understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Outbox,
    Inbox,
    Liked,
    Followers,
    Following,
    Person,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbox => "outbox",
            Self::Inbox => "inbox",
            Self::Liked => "liked",
            Self::Followers => "followers",
            Self::Following => "following",
            Self::Person => "person",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded remote actor document
#[derive(Debug, Clone)]
pub struct RemoteActor {
    /// Canonical actor IRI
    pub iri: String,
    /// Preferred username
    pub handle: String,
    /// Advertised signing key, if any
    pub key: Option<KeyData>,
    pub inbox: Option<String>,
    pub outbox: Option<String>,
    pub liked: Option<String>,
    pub followers: Option<String>,
    pub following: Option<String>,
    /// The raw document as fetched
    pub raw: Value,
}

impl RemoteActor {
    /// Endpoint IRI for one of the actor's collections
    ///
    /// `Person` resolves to the actor document itself.
    pub fn collection(&self, kind: ObjectKind) -> Option<&str> {
        match kind {
            ObjectKind::Outbox => self.outbox.as_deref(),
            ObjectKind::Inbox => self.inbox.as_deref(),
            ObjectKind::Liked => self.liked.as_deref(),
            ObjectKind::Followers => self.followers.as_deref(),
            ObjectKind::Following => self.following.as_deref(),
            ObjectKind::Person => Some(&self.iri),
        }
    }

    /// Fold the remote representation into a fresh local account value
    pub fn to_account(&self) -> Account {
        Account {
            hash: Hash::new(last_path_segment(&self.iri).unwrap_or_default()),
            handle: self.handle.clone(),
            metadata: Some(AccountMetadata {
                key: self.key.clone(),
                actor_iri: Some(self.iri.clone()),
                ..AccountMetadata::default()
            }),
            remote: Some(self.raw.clone()),
            ..Account::default()
        }
    }
}

/// Fetches remote actor documents and their collections
pub struct ActorResolver {
    client: Arc<reqwest::Client>,
    /// Deadline applied to each fetch; dropping the future cancels the
    /// request outright.
    request_timeout: Duration,
}

impl ActorResolver {
    pub fn new(client: Arc<reqwest::Client>, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    /// Fetch and decode a remote actor document
    ///
    /// # Errors
    /// - `NotFound` when the remote responds with a not-found status
    /// - `Unreachable` on transport failure
    /// - `Malformed` when the document does not decode
    /// - `Cancelled` when the deadline elapses mid-fetch
    pub async fn resolve(&self, actor_iri: &str) -> Result<RemoteActor, AppError> {
        let timer = std::time::Instant::now();
        let result = self.resolve_inner(actor_iri).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NotFound) => "not_found",
            Err(AppError::Cancelled) => "cancelled",
            Err(AppError::Malformed(_)) => "malformed",
            Err(_) => "unreachable",
        };
        ACTOR_FETCHES_TOTAL.with_label_values(&[outcome]).inc();
        ACTOR_FETCH_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(timer.elapsed().as_secs_f64());

        result
    }

    async fn resolve_inner(&self, actor_iri: &str) -> Result<RemoteActor, AppError> {
        url::Url::parse(actor_iri)
            .map_err(|e| AppError::Validation(format!("Invalid actor IRI {}: {}", actor_iri, e)))?;

        let document = self.fetch_document(actor_iri).await?;
        decode_actor(actor_iri, document)
    }

    /// Fetch a collection endpoint and return the member IRIs
    ///
    /// Reads `items` / `orderedItems` from the collection document or its
    /// inlined `first` page.
    pub async fn collection_items(&self, collection_iri: &str) -> Result<Vec<Value>, AppError> {
        let document = self.fetch_document(collection_iri).await?;

        let items = ["orderedItems", "items"]
            .iter()
            .find_map(|field| document.get(field).and_then(Value::as_array).cloned())
            .or_else(|| {
                document
                    .get("first")
                    .and_then(|first| {
                        ["orderedItems", "items"]
                            .iter()
                            .find_map(|field| first.get(field).and_then(Value::as_array))
                    })
                    .cloned()
            })
            .unwrap_or_default();

        Ok(items)
    }

    /// Member identity hashes of a collection, for collections whose
    /// members are actor references.
    pub async fn collection_hashes(&self, collection_iri: &str) -> Result<Vec<Hash>, AppError> {
        let items = self.collection_items(collection_iri).await?;
        Ok(items.iter().filter_map(reference_hash).collect())
    }

    async fn fetch_document(&self, iri: &str) -> Result<Value, AppError> {
        let request = self
            .client
            .get(iri)
            .header(http::header::ACCEPT, "application/activity+json")
            .send();

        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| AppError::Cancelled)??;

        match response.status() {
            status if status == http::StatusCode::NOT_FOUND || status == http::StatusCode::GONE => {
                return Err(AppError::NotFound);
            }
            status if !status.is_success() => {
                return Err(AppError::Unreachable(format!(
                    "{} responded with {}",
                    iri, status
                )));
            }
            _ => {}
        }

        let body = tokio::time::timeout(self.request_timeout, response.bytes())
            .await
            .map_err(|_| AppError::Cancelled)??;

        serde_json::from_slice(&body).map_err(|e| AppError::Malformed(e.to_string()))
    }
}

fn decode_actor(actor_iri: &str, document: Value) -> Result<RemoteActor, AppError> {
    let object = document
        .as_object()
        .ok_or_else(|| AppError::Malformed("actor document is not an object".to_string()))?;

    let iri = object
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(actor_iri)
        .to_string();

    let handle = object
        .get("preferredUsername")
        .or_else(|| object.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Malformed(format!("actor {} has no usable name", iri)))?
        .to_string();

    let key = object.get("publicKey").and_then(|key| {
        Some(KeyData {
            id: key.get("id")?.as_str()?.to_string(),
            pem: key.get("publicKeyPem")?.as_str()?.to_string(),
        })
    });

    let endpoint = |field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(RemoteActor {
        iri,
        handle,
        key,
        inbox: endpoint("inbox"),
        outbox: endpoint("outbox"),
        liked: endpoint("liked"),
        followers: endpoint("followers"),
        following: endpoint("following"),
        raw: document,
    })
}

/// Identity hash of an actor reference: either a bare IRI string or an
/// object with an `id`.
pub fn reference_hash(reference: &Value) -> Option<Hash> {
    let iri = match reference {
        Value::String(iri) => iri.as_str(),
        Value::Object(object) => object.get("id")?.as_str()?,
        _ => return None,
    };
    last_path_segment(iri).map(Hash::new)
}

fn last_path_segment(iri: &str) -> Option<String> {
    let url = url::Url::parse(iri).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(str::to_string)
}
