//! Data layer
//!
//! Account, vote and content item models plus the SQLite store.

mod models;
mod store;

pub use models::{
    ANONYMOUS_HANDLE, Account, AccountMetadata, Hash, Item, KeyData, MIME_TYPE_URL, OAuthState,
    OAuthToken, Vote,
};
pub use store::{AccountFilter, Database, MAX_CONTENT_ITEMS, VoteFilter};
