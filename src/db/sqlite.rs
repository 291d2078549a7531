// SQLite rating store (sqlx).

use std::collections::HashSet;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::{Reconciliation, RatingStore, StoreError};
use crate::elo::DEFAULT_RATING;

pub struct SqliteRatingStore {
    pool: SqlitePool,
}

impl SqliteRatingStore {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        // Every connection to `:memory:` is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ratings (
                key TEXT PRIMARY KEY,
                rating REAL NOT NULL DEFAULT 1000.0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ratings_rating ON ratings(rating DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl RatingStore for SqliteRatingStore {
    async fn get(&self, key: &str) -> Result<f64, StoreError> {
        let rating: Option<f64> = sqlx::query_scalar("SELECT rating FROM ratings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rating.unwrap_or(DEFAULT_RATING))
    }

    async fn get_all(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, f64)>(
            "SELECT key, rating FROM ratings ORDER BY rating DESC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_many(&self, ratings: &[(String, f64)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (key, rating) in ratings {
            sqlx::query(
                "INSERT INTO ratings (key, rating) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET rating = excluded.rating, updated_at = datetime('now')",
            )
            .bind(key)
            .bind(rating)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_defaults(&self, keys: &HashSet<String>) -> Result<Reconciliation, StoreError> {
        let stored: Vec<String> = sqlx::query_scalar("SELECT key FROM ratings ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        let stored_set: HashSet<&str> = stored.iter().map(String::as_str).collect();

        let mut missing: Vec<&String> = keys
            .iter()
            .filter(|k| !stored_set.contains(k.as_str()))
            .collect();
        missing.sort();

        let mut tx = self.pool.begin().await?;
        for key in &missing {
            sqlx::query("INSERT OR IGNORE INTO ratings (key, rating) VALUES (?, ?)")
                .bind(key.as_str())
                .bind(DEFAULT_RATING)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let orphans = stored.into_iter().filter(|k| !keys.contains(k)).collect();
        Ok(Reconciliation {
            inserted: missing.len(),
            orphans,
        })
    }

    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for key in keys {
            let result = sqlx::query("DELETE FROM ratings WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
