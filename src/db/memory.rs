// In-memory rating store. Used with `--memory` and in tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{Reconciliation, RatingStore, StoreError};
use crate::elo::DEFAULT_RATING;

#[derive(Debug, Default)]
struct Entries {
    /// Insertion order is the tie-break for `get_all`.
    rows: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl Entries {
    fn upsert(&mut self, key: &str, rating: f64) {
        match self.index.get(key) {
            Some(&i) => self.rows[i].1 = rating,
            None => {
                self.index.insert(key.to_string(), self.rows.len());
                self.rows.push((key.to_string(), rating));
            }
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, (k, _))| (k.clone(), i))
            .collect();
    }
}

#[derive(Debug, Default)]
pub struct MemoryRatingStore {
    inner: Mutex<Entries>,
}

impl MemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with initial ratings, in the given order.
    pub fn with_ratings<I, K>(ratings: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut entries = Entries::default();
        for (k, r) in ratings {
            entries.upsert(&k.into(), r);
        }
        Self {
            inner: Mutex::new(entries),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl RatingStore for MemoryRatingStore {
    async fn get(&self, key: &str) -> Result<f64, StoreError> {
        let entries = self.lock()?;
        Ok(entries
            .index
            .get(key)
            .map(|&i| entries.rows[i].1)
            .unwrap_or(DEFAULT_RATING))
    }

    async fn get_all(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let mut rows = self.lock()?.rows.clone();
        // sort_by is stable, so ties stay in insertion order.
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(rows)
    }

    async fn set_many(&self, ratings: &[(String, f64)]) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        for (key, rating) in ratings {
            entries.upsert(key, *rating);
        }
        Ok(())
    }

    async fn ensure_defaults(&self, keys: &HashSet<String>) -> Result<Reconciliation, StoreError> {
        let mut entries = self.lock()?;
        let mut missing: Vec<&String> = keys
            .iter()
            .filter(|k| !entries.index.contains_key(k.as_str()))
            .collect();
        missing.sort();
        for key in &missing {
            entries.upsert(key, DEFAULT_RATING);
        }
        let orphans = entries
            .rows
            .iter()
            .filter(|(k, _)| !keys.contains(k))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(Reconciliation {
            inserted: missing.len(),
            orphans,
        })
    }

    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut entries = self.lock()?;
        let doomed: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let before = entries.rows.len();
        entries.rows.retain(|(k, _)| !doomed.contains(k.as_str()));
        let removed = before - entries.rows.len();
        entries.reindex();
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.rows.len())
    }
}
