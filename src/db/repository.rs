//! Document store repository.
//!
//! Records are JSON documents addressed by `(collection, key)`. Writes are
//! whole-record upserts or top-level field merges, each bumping the store
//! revision and publishing a [`ChangeEvent`] for observers.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;

use crate::errors::AppError;

/// Buffered change notifications before slow observers start lagging.
const CHANGE_FEED_CAPACITY: usize = 256;

/// Top-level collections of the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Posts,
    Comments,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
            Collection::Comments => "comments",
        }
    }
}

/// A stored record and its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Merged,
    Removed,
}

/// Published after every successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub key: String,
    pub kind: ChangeKind,
    pub revision: i64,
}

/// Credentials row for the identity provider.
#[derive(Debug, Clone)]
pub struct Account {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    /// Observe writes as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    // ==================== DOCUMENT OPERATIONS ====================

    /// One-shot read of a single record.
    pub async fn get_document(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<Value>, AppError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND key = ?")
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                let value = serde_json::from_str(&body).map_err(|e| {
                    AppError::Decode(format!(
                        "Malformed record {}/{}: {}",
                        collection.as_str(),
                        key,
                        e
                    ))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// One-shot read of a whole collection.
    pub async fn list_documents(&self, collection: Collection) -> Result<Vec<Document>, AppError> {
        let rows = sqlx::query("SELECT key, body FROM documents WHERE collection = ? ORDER BY key")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(documents_from_rows(collection, &rows))
    }

    /// Records whose top-level `field` equals `value`.
    pub async fn query_documents(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, AppError> {
        let path = format!("$.{}", field);
        let rows = sqlx::query(
            r#"SELECT key, body FROM documents
               WHERE collection = ?
                 AND CASE WHEN json_valid(body) THEN json_extract(body, ?) END = ?
               ORDER BY key"#,
        )
        .bind(collection.as_str())
        .bind(&path)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents_from_rows(collection, &rows))
    }

    /// Whole-record upsert. Returns the new revision.
    pub async fn set_document(
        &self,
        collection: Collection,
        key: &str,
        body: &Value,
    ) -> Result<i64, AppError> {
        let text = serde_json::to_string(body)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        upsert_body(&mut tx, collection, key, &text, &now).await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(collection, key, ChangeKind::Set, revision);
        Ok(revision)
    }

    /// Merge top-level fields into a record, creating it when missing.
    pub async fn update_document(
        &self,
        collection: Collection,
        key: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND key = ?")
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        let mut merged = match row.map(|r| r.get::<String, _>("body")) {
            Some(body) => match serde_json::from_str::<Value>(&body) {
                Ok(Value::Object(map)) => map,
                _ => {
                    tracing::warn!(
                        "Replacing non-object record {}/{} during merge",
                        collection.as_str(),
                        key
                    );
                    Map::new()
                }
            },
            None => Map::new(),
        };
        for (field, value) in fields {
            merged.insert(field.clone(), value.clone());
        }

        let merged = Value::Object(merged);
        let text = serde_json::to_string(&merged)?;
        upsert_body(&mut tx, collection, key, &text, &now).await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(collection, key, ChangeKind::Merged, revision);
        Ok(merged)
    }

    /// Delete a record by key.
    pub async fn remove_document(&self, collection: Collection, key: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND key = ?")
            .bind(collection.as_str())
            .bind(key)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Record {}/{} not found",
                collection.as_str(),
                key
            )));
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.publish(collection, key, ChangeKind::Removed, revision);
        Ok(())
    }

    fn publish(&self, collection: Collection, key: &str, kind: ChangeKind, revision: i64) {
        // No subscribers is fine.
        let _ = self.changes.send(ChangeEvent {
            collection,
            key: key.to_string(),
            kind,
            revision,
        });
    }

    // ==================== ACCOUNT OPERATIONS ====================

    /// Create an account. Emails are stored lowercased and must be unique.
    pub async fn create_account(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Account, AppError> {
        let uid = uuid::Uuid::new_v4().to_string();
        let email = normalize_email(email);
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO accounts (uid, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&uid)
        .bind(&email)
        .bind(password_hash)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Account {
                uid,
                email,
                password_hash: password_hash.to_string(),
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AppError::Conflict(format!("An account for {} already exists", email)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an account by email.
    pub async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let row = sqlx::query("SELECT uid, email, password_hash FROM accounts WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Account {
            uid: row.get("uid"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
        }))
    }
}

// Helper functions

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn upsert_body(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &str,
    body: &str,
    now: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"INSERT INTO documents (collection, key, body, updated_at) VALUES (?, ?, ?, ?)
           ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at"#,
    )
    .bind(collection.as_str())
    .bind(key)
    .bind(body)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn bump_revision(conn: &mut SqliteConnection) -> Result<i64, AppError> {
    let now = Utc::now().to_rfc3339();
    let row = sqlx::query(
        "UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1 RETURNING revision_id",
    )
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get("revision_id"))
}

fn documents_from_rows(collection: Collection, rows: &[sqlx::sqlite::SqliteRow]) -> Vec<Document> {
    rows.iter()
        .filter_map(|row| {
            let key: String = row.get("key");
            let body: String = row.get("body");
            match serde_json::from_str(&body) {
                Ok(body) => Some(Document { key, body }),
                Err(e) => {
                    tracing::warn!(
                        "Skipping malformed record {}/{}: {}",
                        collection.as_str(),
                        key,
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .unwrap();
        (Repository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_set_get_and_revision() {
        let (repo, _dir) = repo().await;
        let before = repo.get_revision_id().await.unwrap();

        let revision = repo
            .set_document(Collection::Posts, "p1", &json!({ "itemName": "Keys" }))
            .await
            .unwrap();
        assert_eq!(revision, before + 1);

        let body = repo.get_document(Collection::Posts, "p1").await.unwrap();
        assert_eq!(body, Some(json!({ "itemName": "Keys" })));
        assert!(repo
            .get_document(Collection::Users, "p1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_merges_top_level_fields() {
        let (repo, _dir) = repo().await;
        repo.set_document(
            Collection::Users,
            "u1",
            &json!({ "name": "Ana", "nim": "0706", "email": "ana@uc.ac.id" }),
        )
        .await
        .unwrap();

        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("Ana Maria"));
        let merged = repo
            .update_document(Collection::Users, "u1", &fields)
            .await
            .unwrap();

        assert_eq!(merged["name"], "Ana Maria");
        assert_eq!(merged["nim"], "0706");
    }

    #[tokio::test]
    async fn test_query_by_field_skips_other_values() {
        let (repo, _dir) = repo().await;
        repo.set_document(Collection::Comments, "c1", &json!({ "postId": "a", "text": "x" }))
            .await
            .unwrap();
        repo.set_document(Collection::Comments, "c2", &json!({ "postId": "b", "text": "y" }))
            .await
            .unwrap();

        let docs = repo
            .query_documents(Collection::Comments, "postId", "a")
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key, "c1");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let (repo, _dir) = repo().await;
        let err = repo
            .remove_document(Collection::Posts, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_change_feed_publishes_writes() {
        let (repo, _dir) = repo().await;
        let mut feed = repo.subscribe();

        repo.set_document(Collection::Posts, "p1", &json!({}))
            .await
            .unwrap();
        repo.remove_document(Collection::Posts, "p1").await.unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Set);
        let second = feed.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Removed);
        assert!(second.revision > first.revision);
    }

    #[tokio::test]
    async fn test_duplicate_account_conflicts() {
        let (repo, _dir) = repo().await;
        repo.create_account("T@t.com", "hash").await.unwrap();
        let err = repo.create_account("t@t.com", "hash").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let found = repo.find_account_by_email(" t@T.com ").await.unwrap();
        assert_eq!(found.unwrap().email, "t@t.com");
    }
}
