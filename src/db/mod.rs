// Rating persistence: the store contract plus SQLite and in-memory backends.

mod memory;
mod sqlite;

pub use memory::MemoryRatingStore;
pub use sqlite::SqliteRatingStore;

use std::collections::HashSet;
use std::future::Future;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rating store unavailable: {0}")]
    Unavailable(String),
}

/// Result of reconciling the stored keys against the current item set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    /// Keys that were missing and got the default rating.
    pub inserted: usize,
    /// Stored keys with no matching item. Never deleted here.
    pub orphans: Vec<String>,
}

/// Durable mapping from item key to Elo rating.
///
/// Unknown keys read as [`crate::elo::DEFAULT_RATING`]. `set_many` must apply
/// the whole batch or nothing.
pub trait RatingStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<f64, StoreError>> + Send;

    /// All ratings, highest first. Ties keep insertion order.
    fn get_all(&self) -> impl Future<Output = Result<Vec<(String, f64)>, StoreError>> + Send;

    fn set_many(
        &self,
        ratings: &[(String, f64)],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert the default rating for every key not yet stored and report the
    /// stored keys that are not in `keys`.
    fn ensure_defaults(
        &self,
        keys: &HashSet<String>,
    ) -> impl Future<Output = Result<Reconciliation, StoreError>> + Send;

    /// Delete rating rows. Only the confirmed prune path calls this.
    fn remove(&self, keys: &[String]) -> impl Future<Output = Result<usize, StoreError>> + Send;

    fn count(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;
}
