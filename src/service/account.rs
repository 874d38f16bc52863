//! Account reconciliation
//!
//! Merges a session-cached account snapshot with the freshly loaded
//! record and lazily fills the federation-backed collections. The merge
//! is a gap-fill: the session snapshot stays authoritative for any field
//! it already populated.

use std::sync::Arc;

use crate::data::{Account, AccountFilter, Database, Hash, VoteFilter};
use crate::error::AppError;
use crate::federation::{ActorResolver, ObjectKind, reference_hash};

/// Gap-fill merge of `src` into `dst`
///
/// A no-op unless both values reference the same identity (bit-equal
/// hashes). Copies a field from `src` only when `dst`'s value is empty;
/// populated destination fields are never overwritten. Total over any
/// two account values, commutative and idempotent in effect, which is
/// what makes concurrent reconciliation safe without locks.
pub fn merge_account(dst: &mut Account, src: &Account) {
    if dst.hash != src.hash {
        return;
    }
    if dst.email.is_empty() && !src.email.is_empty() {
        dst.email = src.email.clone();
    }
    if dst.handle.is_empty() && !src.handle.is_empty() {
        dst.handle = src.handle.clone();
    }
    if dst.created_at.is_none() && src.created_at.is_some() {
        dst.created_at = src.created_at;
    }
    if dst.created_by.is_none() && src.created_by.is_some() {
        dst.created_by = src.created_by.clone();
    }
    if dst.updated_at.is_none() && src.updated_at.is_some() {
        dst.updated_at = src.updated_at;
    }
    if dst.metadata.is_none() && src.metadata.is_some() {
        dst.metadata = src.metadata.clone();
    }
    if dst.votes.is_empty() && !src.votes.is_empty() {
        dst.votes = src.votes.clone();
    }
    if dst.followers.is_empty() && !src.followers.is_empty() {
        dst.followers = src.followers.clone();
    }
    if dst.following.is_empty() && !src.following.is_empty() {
        dst.following = src.following.clone();
    }
    if dst.blocked.is_empty() && !src.blocked.is_empty() {
        dst.blocked = src.blocked.clone();
    }
    if dst.ignored.is_empty() && !src.ignored.is_empty() {
        dst.ignored = src.ignored.clone();
    }
    if dst.parent.is_none() && src.parent.is_some() {
        dst.parent = src.parent.clone();
    }
    if dst.children.is_empty() && !src.children.is_empty() {
        dst.children = src.children.clone();
    }
    if dst.remote.is_none() && src.remote.is_some() {
        dst.remote = src.remote.clone();
    }
}

/// Reconciles session snapshots against the store and federation state
pub struct AccountService {
    db: Arc<Database>,
    resolver: Arc<ActorResolver>,
    actors_url: String,
}

impl AccountService {
    pub fn new(db: Arc<Database>, resolver: Arc<ActorResolver>, actors_url: String) -> Self {
        Self {
            db,
            resolver,
            actors_url,
        }
    }

    /// Canonical actor IRI for an account
    pub fn actor_iri(&self, account: &Account) -> String {
        account
            .metadata
            .as_ref()
            .and_then(|m| m.actor_iri.clone())
            .unwrap_or_else(|| format!("{}/{}", self.actors_url, account.hash))
    }

    pub async fn load_accounts(
        &self,
        filter: &AccountFilter,
    ) -> Result<(Vec<Account>, i64), AppError> {
        self.db.load_accounts(filter).await
    }

    /// Reconcile a session snapshot with the stored record and fill the
    /// lazily loaded collections
    ///
    /// Anything that fails here degrades to the snapshot as-is; a page
    /// load must not fail because a federation collection was
    /// unreachable.
    pub async fn reconcile(&self, mut account: Account, visible_items: &[Hash]) -> Account {
        if !account.is_logged() {
            return account;
        }

        match self
            .db
            .load_accounts(&AccountFilter::by_handle(account.handle.clone()))
            .await
        {
            Ok((accounts, count)) => {
                if count == 0 {
                    tracing::info!(
                        handle = %account.handle,
                        hash = %account.hash,
                        "no stored account found for session snapshot"
                    );
                } else if accounts[0].is_valid() {
                    merge_account(&mut account, &accounts[0]);
                }
            }
            Err(error) => {
                tracing::warn!(
                    handle = %account.handle,
                    error = %error,
                    "failed to load stored account for reconciliation"
                );
            }
        }

        self.fill_collections(&mut account).await;
        self.fill_votes(&mut account, visible_items).await;
        account
    }

    /// Fill empty follower/following/blocked/ignored sets from the
    /// account's federation collections.
    async fn fill_collections(&self, account: &mut Account) {
        if !account.followers.is_empty()
            && !account.following.is_empty()
            && !account.blocked.is_empty()
            && !account.ignored.is_empty()
        {
            return;
        }

        let actor_iri = self.actor_iri(account);
        let actor = match self.resolver.resolve(&actor_iri).await {
            Ok(actor) => actor,
            Err(error) => {
                tracing::info!(
                    handle = %account.handle,
                    hash = %account.hash,
                    error = %error,
                    "could not resolve actor for collection refresh"
                );
                return;
            }
        };

        // Followers and following are independent; fetch them together.
        let followers = async {
            match actor.collection(ObjectKind::Followers) {
                Some(iri) if account.followers.is_empty() => {
                    Some(self.resolver.collection_hashes(iri).await)
                }
                _ => None,
            }
        };
        let following = async {
            match actor.collection(ObjectKind::Following) {
                Some(iri) if account.following.is_empty() => {
                    Some(self.resolver.collection_hashes(iri).await)
                }
                _ => None,
            }
        };
        let (followers, following) = futures::future::join(followers, following).await;
        match followers {
            Some(Ok(hashes)) => account.followers = hashes,
            Some(Err(error)) => {
                tracing::info!(handle = %account.handle, error = %error, "followers load failed")
            }
            None => {}
        }
        match following {
            Some(Ok(hashes)) => account.following = hashes,
            Some(Err(error)) => {
                tracing::info!(handle = %account.handle, error = %error, "following load failed")
            }
            None => {}
        }

        if account.blocked.is_empty() || account.ignored.is_empty() {
            if let Some(iri) = actor.collection(ObjectKind::Outbox) {
                match self.resolver.collection_items(iri).await {
                    Ok(items) => {
                        let mut blocked = Vec::new();
                        let mut ignored = Vec::new();
                        for activity in &items {
                            let kind = activity.get("type").and_then(|t| t.as_str());
                            let object = activity.get("object");
                            match (kind, object) {
                                (Some("Block"), Some(object)) => {
                                    if let Some(hash) = reference_hash(object) {
                                        blocked.push(hash);
                                    }
                                }
                                (Some("Ignore"), Some(object)) => {
                                    if let Some(hash) = reference_hash(object) {
                                        ignored.push(hash);
                                    }
                                }
                                _ => {}
                            }
                        }
                        if account.blocked.is_empty() {
                            account.blocked = blocked;
                        }
                        if account.ignored.is_empty() {
                            account.ignored = ignored;
                        }
                    }
                    Err(error) => {
                        tracing::info!(handle = %account.handle, error = %error, "outbox load failed")
                    }
                }
            }
        }
    }

    /// Fill the account's votes for the items currently in view.
    async fn fill_votes(&self, account: &mut Account, visible_items: &[Hash]) {
        if !account.votes.is_empty() || visible_items.is_empty() {
            return;
        }

        let filter = VoteFilter {
            items: visible_items
                .iter()
                .map(|h| h.as_str().to_string())
                .collect(),
            submitted_by: vec![account.hash.as_str().to_string()],
        };
        match self.db.load_votes(&filter).await {
            Ok(votes) => account.votes = votes,
            Err(error) => {
                tracing::info!(
                    handle = %account.handle,
                    error = %error,
                    "vote load failed"
                );
            }
        }
    }
}
