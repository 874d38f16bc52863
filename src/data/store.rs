//! SQLite storage
//!
//! All database access goes through this module. This is the account
//! store collaborator consumed by the key resolver and the session
//! reconciliation flow; it deliberately exposes only filtered loads and
//! whole-record upserts.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::models::{Account, AccountMetadata, Hash, Item, Vote};
use crate::error::AppError;

/// Maximum number of content items returned by a listing
pub const MAX_CONTENT_ITEMS: i64 = 200;

/// Filter for account loads
///
/// All populated fields are AND-ed; values within a field are OR-ed.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Identity hashes
    pub keys: Vec<String>,
    /// Handles (exact match)
    pub handles: Vec<String>,
}

impl AccountFilter {
    pub fn by_key(key: impl Into<String>) -> Self {
        Self {
            keys: vec![key.into()],
            ..Self::default()
        }
    }

    pub fn by_handle(handle: impl Into<String>) -> Self {
        Self {
            handles: vec![handle.into()],
            ..Self::default()
        }
    }
}

/// Filter for vote loads
#[derive(Debug, Clone, Default)]
pub struct VoteFilter {
    /// Item keys the votes apply to
    pub items: Vec<String>,
    /// Accounts that submitted the votes
    pub submitted_by: Vec<String>,
}

/// Database connection pool wrapper
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the SQLite database
    ///
    /// Creates the database file if it doesn't exist and runs pending
    /// migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
        })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Load the single account matching the filter
    ///
    /// # Errors
    /// `NotFound` when no account matches.
    pub async fn load_account(&self, filter: &AccountFilter) -> Result<Account, AppError> {
        let (mut accounts, _) = self.load_accounts(filter).await?;
        accounts.drain(..).next().ok_or(AppError::NotFound)
    }

    /// Load all accounts matching the filter, along with the total count
    pub async fn load_accounts(
        &self,
        filter: &AccountFilter,
    ) -> Result<(Vec<Account>, i64), AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT hash, handle, email, created_at, updated_at, created_by, metadata \
             FROM accounts WHERE 1=1",
        );
        push_in_clause(&mut query, "hash", &filter.keys);
        push_in_clause(&mut query, "handle", &filter.handles);
        query.push(" ORDER BY handle");

        let rows = query.build().fetch_all(&self.pool).await?;
        let accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let count = accounts.len() as i64;
        Ok((accounts, count))
    }

    /// Insert or update an account record
    ///
    /// The in-memory fields (votes, collections) are not persisted here;
    /// they live in their own tables or on the federation side.
    pub async fn save_account(&self, account: &Account) -> Result<(), AppError> {
        let metadata = serde_json::to_string(&account.metadata.clone().unwrap_or_default())
            .map_err(|e| AppError::Internal(e.into()))?;

        sqlx::query(
            "INSERT INTO accounts (hash, handle, email, created_at, updated_at, created_by, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(hash) DO UPDATE SET \
                 handle = excluded.handle, \
                 email = excluded.email, \
                 updated_at = excluded.updated_at, \
                 metadata = excluded.metadata",
        )
        .bind(account.hash.as_str())
        .bind(&account.handle)
        .bind(&account.email)
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.created_by.as_ref().map(Hash::as_str))
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Votes
    // =========================================================================

    /// Load votes matching the filter
    pub async fn load_votes(&self, filter: &VoteFilter) -> Result<Vec<Vote>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT submitted_by, item, weight, submitted_at FROM votes WHERE 1=1",
        );
        push_in_clause(&mut query, "item", &filter.items);
        push_in_clause(&mut query, "submitted_by", &filter.submitted_by);
        query.push(" ORDER BY submitted_at");

        let rows = query.build().fetch_all(&self.pool).await?;
        let votes = rows
            .iter()
            .map(|row| {
                Ok(Vote {
                    submitted_by: Hash::new(row.try_get::<String, _>("submitted_by")?),
                    item: Hash::new(row.try_get::<String, _>("item")?),
                    weight: row.try_get("weight")?,
                    submitted_at: row.try_get("submitted_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(votes)
    }

    /// Record a vote, replacing any previous vote by the same account on
    /// the same item.
    pub async fn save_vote(&self, vote: &Vote) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO votes (submitted_by, item, weight, submitted_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(submitted_by, item) DO UPDATE SET \
                 weight = excluded.weight, \
                 submitted_at = excluded.submitted_at",
        )
        .bind(vote.submitted_by.as_str())
        .bind(vote.item.as_str())
        .bind(vote.weight)
        .bind(vote.submitted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Content items
    // =========================================================================

    /// Load top-level items ordered by score, then recency
    pub async fn load_top_items(&self, max_items: i64) -> Result<Vec<Item>, AppError> {
        let limit = max_items.clamp(1, MAX_CONTENT_ITEMS);
        let rows = sqlx::query(
            "SELECT i.key, i.title, i.mime_type, i.data, i.score, i.submitted_at, \
                    i.updated_at, i.submitted_by, a.handle, i.flags, i.path \
             FROM content_items i \
                 LEFT JOIN accounts a ON a.hash = i.submitted_by \
             WHERE i.path IS NULL \
             ORDER BY i.score DESC, i.submitted_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Load a single item by key
    pub async fn load_item(&self, key: &Hash) -> Result<Item, AppError> {
        let row = sqlx::query(
            "SELECT i.key, i.title, i.mime_type, i.data, i.score, i.submitted_at, \
                    i.updated_at, i.submitted_by, a.handle, i.flags, i.path \
             FROM content_items i \
                 LEFT JOIN accounts a ON a.hash = i.submitted_by \
             WHERE i.key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(AppError::NotFound),
        }
    }

    /// Insert or update a content item
    pub async fn save_item(&self, item: &Item) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO content_items \
                 (key, title, mime_type, data, score, submitted_at, updated_at, submitted_by, flags, path) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET \
                 title = excluded.title, \
                 data = excluded.data, \
                 score = excluded.score, \
                 updated_at = excluded.updated_at, \
                 flags = excluded.flags",
        )
        .bind(item.key.as_str())
        .bind(&item.title)
        .bind(&item.mime_type)
        .bind(&item.data)
        .bind(item.score)
        .bind(item.submitted_at)
        .bind(item.updated_at)
        .bind(item.submitted_by.as_str())
        .bind(item.flags)
        .bind(item.path.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrite an item's aggregate score
    pub async fn update_item_score(&self, key: &Hash, score: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE content_items SET score = ?, updated_at = ? WHERE key = ?")
            .bind(score)
            .bind(Utc::now())
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn push_in_clause(query: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    query.push(format!(" AND {} IN (", column));
    let mut separated = query.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    query.push(")");
}

fn account_from_row(row: &SqliteRow) -> Result<Account, AppError> {
    let metadata_json: String = row.try_get("metadata").map_err(AppError::Database)?;
    let metadata: AccountMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| AppError::Malformed(format!("account metadata: {}", e)))?;

    Ok(Account {
        hash: Hash::new(row.try_get::<String, _>("hash").map_err(AppError::Database)?),
        handle: row.try_get("handle").map_err(AppError::Database)?,
        email: row.try_get("email").map_err(AppError::Database)?,
        created_at: row
            .try_get::<Option<DateTime<Utc>>, _>("created_at")
            .map_err(AppError::Database)?,
        updated_at: row
            .try_get::<Option<DateTime<Utc>>, _>("updated_at")
            .map_err(AppError::Database)?,
        created_by: row
            .try_get::<Option<String>, _>("created_by")
            .map_err(AppError::Database)?
            .map(Hash::new),
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        },
        ..Account::default()
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item, AppError> {
    Ok(Item {
        key: Hash::new(row.try_get::<String, _>("key").map_err(AppError::Database)?),
        title: row.try_get("title").map_err(AppError::Database)?,
        mime_type: row.try_get("mime_type").map_err(AppError::Database)?,
        data: row
            .try_get::<Option<Vec<u8>>, _>("data")
            .map_err(AppError::Database)?
            .unwrap_or_default(),
        score: row.try_get("score").map_err(AppError::Database)?,
        submitted_at: row
            .try_get::<Option<DateTime<Utc>>, _>("submitted_at")
            .map_err(AppError::Database)?,
        updated_at: row
            .try_get::<Option<DateTime<Utc>>, _>("updated_at")
            .map_err(AppError::Database)?,
        submitted_by: Hash::new(
            row.try_get::<String, _>("submitted_by")
                .map_err(AppError::Database)?,
        ),
        handle: row
            .try_get::<Option<String>, _>("handle")
            .map_err(AppError::Database)?
            .unwrap_or_default(),
        flags: row.try_get("flags").map_err(AppError::Database)?,
        path: row.try_get("path").map_err(AppError::Database)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{AccountMetadata, KeyData};
    use tempfile::TempDir;

    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store-test.db");
        let db = Database::connect(&db_path).await.unwrap();
        (db, temp_dir)
    }

    fn test_account(handle: &str) -> Account {
        Account {
            hash: Hash::from_content(handle.as_bytes()),
            handle: handle.to_string(),
            email: format!("{}@example.com", handle),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            metadata: Some(AccountMetadata {
                key: Some(KeyData {
                    id: format!("https://example.com/actors/{}#main-key", handle),
                    pem: "-----BEGIN PUBLIC KEY-----\n-----END PUBLIC KEY-----\n".to_string(),
                }),
                ..AccountMetadata::default()
            }),
            ..Account::default()
        }
    }

    #[tokio::test]
    async fn save_and_load_account_by_key_and_handle() {
        let (db, _temp_dir) = create_test_db().await;
        let account = test_account("alice");
        db.save_account(&account).await.unwrap();

        let by_key = db
            .load_account(&AccountFilter::by_key(account.hash.as_str()))
            .await
            .unwrap();
        assert_eq!(by_key.handle, "alice");
        assert_eq!(by_key.metadata, account.metadata);

        let (by_handle, count) = db
            .load_accounts(&AccountFilter::by_handle("alice"))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(by_handle[0].hash, account.hash);
    }

    #[tokio::test]
    async fn load_account_misses_return_not_found() {
        let (db, _temp_dir) = create_test_db().await;

        let error = db
            .load_account(&AccountFilter::by_key("missing"))
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::NotFound));
    }

    #[tokio::test]
    async fn votes_replace_on_resubmission() {
        let (db, _temp_dir) = create_test_db().await;
        let voter = Hash::from_content(b"alice");
        let item = Hash::from_content(b"an item");

        let up = Vote {
            submitted_by: voter.clone(),
            item: item.clone(),
            weight: 1,
            submitted_at: Utc::now(),
        };
        db.save_vote(&up).await.unwrap();
        db.save_vote(&Vote { weight: -1, ..up.clone() }).await.unwrap();

        let votes = db
            .load_votes(&VoteFilter {
                items: vec![item.as_str().to_string()],
                ..VoteFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].weight, -1);
    }

    #[tokio::test]
    async fn top_items_are_ordered_by_score() {
        let (db, _temp_dir) = create_test_db().await;
        let submitter = test_account("alice");
        db.save_account(&submitter).await.unwrap();

        for (title, score) in [("low", 10_000), ("high", 50_000), ("mid", 20_000)] {
            let item = Item {
                key: Hash::from_content(title.as_bytes()),
                title: title.to_string(),
                mime_type: "text/plain".to_string(),
                data: title.as_bytes().to_vec(),
                score,
                submitted_at: Some(Utc::now()),
                submitted_by: submitter.hash.clone(),
                ..Item::default()
            };
            db.save_item(&item).await.unwrap();
        }

        let items = db.load_top_items(10).await.unwrap();
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "mid", "low"]);
        assert_eq!(items[0].handle, "alice");
    }

    #[tokio::test]
    async fn replies_are_excluded_from_top_listing() {
        let (db, _temp_dir) = create_test_db().await;
        let submitter = test_account("alice");
        db.save_account(&submitter).await.unwrap();

        let top = Item {
            key: Hash::from_content(b"top"),
            title: "top".to_string(),
            submitted_at: Some(Utc::now()),
            submitted_by: submitter.hash.clone(),
            ..Item::default()
        };
        let reply = Item {
            key: Hash::from_content(b"reply"),
            title: "reply".to_string(),
            submitted_at: Some(Utc::now()),
            submitted_by: submitter.hash.clone(),
            path: Some(top.key.as_str().to_string()),
            ..Item::default()
        };
        db.save_item(&top).await.unwrap();
        db.save_item(&reply).await.unwrap();

        let items = db.load_top_items(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "top");
    }

    #[tokio::test]
    async fn update_item_score_persists() {
        let (db, _temp_dir) = create_test_db().await;
        let item = Item {
            key: Hash::from_content(b"scored"),
            title: "scored".to_string(),
            submitted_at: Some(Utc::now()),
            submitted_by: Hash::from_content(b"alice"),
            ..Item::default()
        };
        db.save_item(&item).await.unwrap();

        db.update_item_score(&item.key, 420_000).await.unwrap();
        let loaded = db.load_item(&item.key).await.unwrap();
        assert_eq!(loaded.score, 420_000);
    }
}
