// SQLite-backed moderation store.
//
// Tables:
// - warns: warn count per (chat, user)
// - filters: forbidden words per chat
// - flood_records: last message time and consecutive count per (chat, user)
//
// Warn increments and flood updates are single UPSERT ... RETURNING
// statements, so each is an atomic read-modify-write in the database.

use crate::core::moderation::{ChatId, ModerationError, ModerationStore, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

fn storage_error(e: sqlx::Error) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

/// Seconds since the epoch with millisecond precision.
fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn connect(path: &str) -> Result<Self, ModerationError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", path))
            .await
            .map_err(storage_error)?;
        Ok(Self::new(pool))
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warns (
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                warns INTEGER NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filters (
                chat_id INTEGER NOT NULL,
                word TEXT NOT NULL,
                PRIMARY KEY (chat_id, word)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flood_records (
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                last_ts REAL NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn warn_get(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        let row = sqlx::query("SELECT warns FROM warns WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(row.map(|r| r.get::<i64, _>("warns") as u32).unwrap_or(0))
    }

    async fn warn_incr(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        let row = sqlx::query(
            r#"
            INSERT INTO warns (chat_id, user_id, warns)
            VALUES (?, ?, 1)
            ON CONFLICT(chat_id, user_id) DO UPDATE SET
                warns = warns + 1
            RETURNING warns
            "#,
        )
        .bind(chat_id)
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.get::<i64, _>("warns") as u32)
    }

    async fn warn_reset(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ModerationError> {
        sqlx::query("DELETE FROM warns WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn flood_get_and_update(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<u32, ModerationError> {
        let window_secs = window.num_milliseconds() as f64 / 1000.0;

        // On conflict, right-hand sides see the old row.
        let row = sqlx::query(
            r#"
            INSERT INTO flood_records (chat_id, user_id, last_ts, count)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(chat_id, user_id) DO UPDATE SET
                count = CASE
                    WHEN excluded.last_ts - flood_records.last_ts <= ? THEN flood_records.count + 1
                    ELSE 1
                END,
                last_ts = excluded.last_ts
            RETURNING count
            "#,
        )
        .bind(chat_id)
        .bind(user_id as i64)
        .bind(epoch_seconds(now))
        .bind(window_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.get::<i64, _>("count") as u32)
    }

    async fn filter_add(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let result = sqlx::query("INSERT OR IGNORE INTO filters (chat_id, word) VALUES (?, ?)")
            .bind(chat_id)
            .bind(word)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn filter_remove(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let result = sqlx::query("DELETE FROM filters WHERE chat_id = ? AND word = ?")
            .bind(chat_id)
            .bind(word)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn filter_list(&self, chat_id: ChatId) -> Result<Vec<String>, ModerationError> {
        let rows = sqlx::query("SELECT word FROM filters WHERE chat_id = ? ORDER BY word")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(rows.iter().map(|row| row.get::<String, _>("word")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteModerationStore {
        let path = dir.path().join("moderation.db");
        let store = SqliteModerationStore::connect(path.to_str().unwrap())
            .await
            .unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_warn_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert_eq!(store.warn_get(-100, 7).await.unwrap(), 0);
        assert_eq!(store.warn_incr(-100, 7).await.unwrap(), 1);
        assert_eq!(store.warn_incr(-100, 7).await.unwrap(), 2);
        assert_eq!(store.warn_get(-100, 7).await.unwrap(), 2);

        store.warn_reset(-100, 7).await.unwrap();
        store.warn_reset(-100, 7).await.unwrap();
        assert_eq!(store.warn_get(-100, 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flood_counter() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let window = chrono::Duration::seconds(4);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        for expected in 1..=3u32 {
            let now = t0 + chrono::Duration::milliseconds(expected as i64 * 500);
            assert_eq!(
                store.flood_get_and_update(1, 7, now, window).await.unwrap(),
                expected
            );
        }

        let later = t0 + chrono::Duration::seconds(10);
        assert_eq!(store.flood_get_and_update(1, 7, later, window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filters() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert!(store.filter_add(1, "spam").await.unwrap());
        assert!(!store.filter_add(1, "spam").await.unwrap());
        assert!(store.filter_add(1, "crypto").await.unwrap());
        assert!(store.filter_add(2, "other").await.unwrap());

        assert_eq!(
            store.filter_list(1).await.unwrap(),
            vec!["crypto".to_string(), "spam".to_string()]
        );

        assert!(store.filter_remove(1, "spam").await.unwrap());
        assert!(!store.filter_remove(1, "never").await.unwrap());
        assert_eq!(store.filter_list(1).await.unwrap(), vec!["crypto".to_string()]);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store.warn_incr(1, 7).await.unwrap();
            store.filter_add(1, "scam").await.unwrap();
        }

        let store = open_store(&dir).await;
        assert_eq!(store.warn_get(1, 7).await.unwrap(), 1);
        assert_eq!(store.filter_list(1).await.unwrap(), vec!["scam".to_string()]);
    }
}
