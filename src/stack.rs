// Depletable matchup stack.
//
// Each build takes the current rating distribution, optionally narrows it to
// the top of the ranking, splits it into four rating bands and pairs items
// inside each band. The resulting matchups are drained one vote at a time
// and the stack is rebuilt once empty.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics;

pub const TIER_COUNT: usize = 4;

/// An unordered pair of item keys. `(a, b)` and `(b, a)` compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matchup {
    pub a: String,
    pub b: String,
}

impl Matchup {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }

    pub fn is_self_match(&self) -> bool {
        self.a == self.b
    }

    fn ordered(&self) -> (&str, &str) {
        if self.a <= self.b {
            (&self.a, &self.b)
        } else {
            (&self.b, &self.a)
        }
    }
}

impl PartialEq for Matchup {
    fn eq(&self, other: &Self) -> bool {
        self.ordered() == other.ordered()
    }
}

impl Eq for Matchup {}

impl Hash for Matchup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordered().hash(state);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Shrink constant; `None` keeps the whole pool on every build.
    pub pool_shrink: Option<u32>,
    /// Cap on matchups per build; `None` is unlimited.
    pub session_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("need at least two rated items to build matchups, found {count}")]
    DegenerateItemSet { count: usize },
}

/// Number of items kept by pool shrink on a given build.
///
/// `ceil(n * (1 - iteration / (iteration + shrink)))`, computed in integers,
/// never below two items.
pub fn pool_size(n: usize, iteration: u64, shrink: u32) -> usize {
    if shrink == 0 || n <= 2 {
        return n;
    }
    let shrink = shrink as u128;
    let denom = iteration as u128 + shrink;
    let size = (n as u128 * shrink).div_ceil(denom) as usize;
    size.clamp(2, n)
}

/// Band index (0-based) of `rating` within `[min, max]` split into
/// [`TIER_COUNT`] bands of width `(max - min + 1) / TIER_COUNT`.
pub fn tier_index(rating: f64, min: f64, max: f64) -> usize {
    let width = (max - min + 1.0) / TIER_COUNT as f64;
    let idx = ((rating - min) / width).floor();
    if idx <= 0.0 {
        0
    } else {
        (idx as usize).min(TIER_COUNT - 1)
    }
}

#[derive(Debug, Default)]
pub struct MatchSelector {
    config: SelectorConfig,
    iteration: u64,
    /// Generation order; index 0 is the next matchup.
    stack: Vec<Matchup>,
    dequeue_counts: HashMap<String, u64>,
    last_pool_size: usize,
    built_at: Option<DateTime<Utc>>,
}

impl MatchSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Rebuild the stack from `ratings` (sorted highest first).
    ///
    /// Returns the number of matchups generated. On error the current stack
    /// and iteration counter are left as they were.
    pub fn build<R: Rng + ?Sized>(
        &mut self,
        ratings: &[(String, f64)],
        rng: &mut R,
    ) -> Result<usize, SelectorError> {
        let mut seen = HashSet::new();
        let mut pool: Vec<(&str, f64)> = ratings
            .iter()
            .filter(|(k, _)| seen.insert(k.as_str()))
            .map(|(k, r)| (k.as_str(), *r))
            .collect();

        if pool.len() < 2 {
            tracing::warn!(
                "Cannot build matchup stack: only {} rated item(s)",
                pool.len()
            );
            return Err(SelectorError::DegenerateItemSet { count: pool.len() });
        }

        let total = pool.len();
        if let Some(shrink) = self.config.pool_shrink {
            let size = pool_size(total, self.iteration, shrink);
            if size < total {
                tracing::info!(
                    "Pool shrink: keeping top {size} of {total} items (iteration {})",
                    self.iteration
                );
            }
            pool.truncate(size);
        }
        self.iteration += 1;
        self.last_pool_size = pool.len();

        let mut matchups = pair_by_tier(&pool, rng);

        if let Some(cap) = self.config.session_length.filter(|&c| c > 0) {
            if matchups.len() > cap {
                tracing::debug!("Session length cap: {} -> {cap} matchups", matchups.len());
                matchups.truncate(cap);
            }
        }

        tracing::info!(
            "Built matchup stack #{}: {} matchups from {} items",
            self.iteration,
            matchups.len(),
            pool.len()
        );

        self.stack = matchups;
        self.built_at = Some(Utc::now());
        metrics::STACK_REBUILDS_TOTAL.inc();
        metrics::POOL_SIZE.set(self.last_pool_size as i64);
        metrics::STACK_DEPTH.set(self.stack.len() as i64);
        Ok(self.stack.len())
    }

    /// Next matchup without consuming it.
    pub fn peek(&self) -> Option<&Matchup> {
        self.stack.first()
    }

    /// Remove `matchup` in either orientation. Returns false if it was not
    /// in the stack.
    pub fn dequeue(&mut self, matchup: &Matchup) -> bool {
        let Some(pos) = self.stack.iter().position(|m| m == matchup) else {
            return false;
        };
        let removed = self.stack.remove(pos);
        *self.dequeue_counts.entry(removed.a).or_insert(0) += 1;
        *self.dequeue_counts.entry(removed.b).or_insert(0) += 1;
        metrics::STACK_DEPTH.set(self.stack.len() as i64);
        true
    }

    pub fn remaining(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn view_all(&self) -> &[Matchup] {
        &self.stack
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        metrics::STACK_DEPTH.set(0);
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn last_pool_size(&self) -> usize {
        self.last_pool_size
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn config(&self) -> SelectorConfig {
        self.config
    }

    pub fn dequeue_count(&self, key: &str) -> u64 {
        self.dequeue_counts.get(key).copied().unwrap_or(0)
    }

    pub fn dequeue_counts(&self) -> &HashMap<String, u64> {
        &self.dequeue_counts
    }
}

/// Pair items within their rating band, carrying an odd item up to the next
/// band. A final odd item is paired with a random other item from the pool.
///
/// Every item is used exactly once in the band pass, so no matchup repeats.
fn pair_by_tier<R: Rng + ?Sized>(pool: &[(&str, f64)], rng: &mut R) -> Vec<Matchup> {
    let min = pool.iter().map(|(_, r)| *r).fold(f64::INFINITY, f64::min);
    let max = pool.iter().map(|(_, r)| *r).fold(f64::NEG_INFINITY, f64::max);

    let mut tiers: Vec<Vec<&str>> = vec![Vec::new(); TIER_COUNT];
    for (key, rating) in pool {
        tiers[tier_index(*rating, min, max)].push(*key);
    }
    tracing::debug!(
        "Tier sizes over [{min:.1}, {max:.1}]: {:?}",
        tiers.iter().map(Vec::len).collect::<Vec<_>>()
    );

    let mut matchups = Vec::with_capacity(pool.len() / 2 + 1);
    let mut leftover: Vec<&str> = Vec::new();
    for tier in tiers {
        let mut bucket = leftover;
        bucket.extend(tier);
        bucket.shuffle(rng);
        while bucket.len() >= 2 {
            if let (Some(a), Some(b)) = (bucket.pop(), bucket.pop()) {
                matchups.push(Matchup::new(a, b));
            }
        }
        leftover = bucket;
    }

    for item in leftover {
        let Some(idx) = pool.iter().position(|(k, _)| *k == item) else {
            continue;
        };
        let mut other = rng.gen_range(0..pool.len() - 1);
        if other >= idx {
            other += 1;
        }
        let partner = pool[other].0;
        tracing::info!("Leftover item {item} paired across tiers with {partner}");
        matchups.push(Matchup::new(item, partner));
    }

    matchups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ratings(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        let mut v: Vec<(String, f64)> = items.iter().map(|(k, r)| (k.to_string(), *r)).collect();
        v.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        v
    }

    fn spread(n: usize) -> Vec<(String, f64)> {
        (0..n)
            .map(|i| (format!("item{i:03}"), 2000.0 - i as f64 * 37.0))
            .collect()
    }

    #[test]
    fn test_matchup_equality_ignores_orientation() {
        assert_eq!(Matchup::new("a", "b"), Matchup::new("b", "a"));
        assert_ne!(Matchup::new("a", "b"), Matchup::new("a", "c"));
        let set: HashSet<Matchup> = [Matchup::new("x", "y"), Matchup::new("y", "x")].into();
        assert_eq!(set.len(), 1);
        assert!(Matchup::new("z", "z").is_self_match());
    }

    #[test]
    fn test_pool_size_first_build_keeps_everything() {
        assert_eq!(pool_size(100, 0, 50), 100);
    }

    #[test]
    fn test_pool_size_strictly_decreases() {
        let mut previous = pool_size(100, 0, 50);
        for iteration in 1..20 {
            let size = pool_size(100, iteration, 50);
            assert!(size < previous, "iteration {iteration}: {size} >= {previous}");
            previous = size;
        }
        assert_eq!(pool_size(100, 1, 50), 99); // ceil(100 * 50/51)
        assert_eq!(pool_size(100, 50, 50), 50);
    }

    #[test]
    fn test_pool_size_never_below_two() {
        assert_eq!(pool_size(10, 1_000_000, 1), 2);
        assert_eq!(pool_size(2, 5, 1), 2);
        assert_eq!(pool_size(7, 3, 0), 7);
    }

    #[test]
    fn test_tier_index_bands() {
        // min 0, max 399 -> width 100
        assert_eq!(tier_index(0.0, 0.0, 399.0), 0);
        assert_eq!(tier_index(99.9, 0.0, 399.0), 0);
        assert_eq!(tier_index(100.0, 0.0, 399.0), 1);
        assert_eq!(tier_index(250.0, 0.0, 399.0), 2);
        assert_eq!(tier_index(399.0, 0.0, 399.0), 3);
        // Flat distribution lands in the first band.
        assert_eq!(tier_index(1000.0, 1000.0, 1000.0), 0);
    }

    #[test]
    fn test_every_item_appears_in_a_build() {
        for n in 2..=17 {
            for seed in 0..5 {
                let mut rng = StdRng::seed_from_u64(seed);
                let input = spread(n);
                let mut selector = MatchSelector::new(SelectorConfig::default());
                selector.build(&input, &mut rng).unwrap();

                let mut covered = HashSet::new();
                for m in selector.view_all() {
                    assert!(!m.is_self_match());
                    covered.insert(m.a.clone());
                    covered.insert(m.b.clone());
                }
                assert_eq!(covered.len(), n, "n={n} seed={seed}");

                let unique: HashSet<&Matchup> = selector.view_all().iter().collect();
                assert_eq!(unique.len(), selector.remaining());
                assert_eq!(selector.remaining(), n.div_ceil(2));
            }
        }
    }

    #[test]
    fn test_pairs_stay_within_bands() {
        let input = ratings(&[
            ("low1", 0.0),
            ("low2", 1.0),
            ("low3", 2.0),
            ("low4", 3.0),
            ("high1", 3000.0),
            ("high2", 3001.0),
            ("high3", 3002.0),
            ("high4", 3003.0),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut selector = MatchSelector::new(SelectorConfig::default());
        assert_eq!(selector.build(&input, &mut rng).unwrap(), 4);
        for m in selector.view_all() {
            assert_eq!(
                m.a.starts_with("low"),
                m.b.starts_with("low"),
                "cross-band matchup {m:?}"
            );
        }
    }

    #[test]
    fn test_odd_item_carried_to_next_band() {
        // One item per band: each odd item is carried upward and pairs with
        // the next band's item.
        let input = ratings(&[("a", 0.0), ("b", 1000.0), ("c", 2000.0), ("d", 3000.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        let mut selector = MatchSelector::new(SelectorConfig::default());
        selector.build(&input, &mut rng).unwrap();
        let view = selector.view_all();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0], Matchup::new("a", "b"));
        assert_eq!(view[1], Matchup::new("c", "d"));
    }

    #[test]
    fn test_peek_is_idempotent_and_fifo() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut selector = MatchSelector::new(SelectorConfig::default());
        selector.build(&spread(10), &mut rng).unwrap();

        let first = selector.peek().cloned().unwrap();
        assert_eq!(selector.peek(), Some(&first));
        assert_eq!(selector.peek(), Some(&first));
        assert_eq!(selector.view_all()[0], first);
        assert_eq!(selector.remaining(), 5);

        let second = selector.view_all()[1].clone();
        assert!(selector.dequeue(&first));
        assert_eq!(selector.peek(), Some(&second));
    }

    #[test]
    fn test_dequeue_either_orientation() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut selector = MatchSelector::new(SelectorConfig::default());
        selector.build(&spread(6), &mut rng).unwrap();

        let m = selector.view_all()[1].clone();
        let reversed = Matchup::new(m.b.clone(), m.a.clone());
        assert!(selector.dequeue(&reversed));
        assert_eq!(selector.remaining(), 2);
        assert!(!selector.dequeue(&m));
        assert_eq!(selector.remaining(), 2);

        assert_eq!(selector.dequeue_count(&m.a), 1);
        assert_eq!(selector.dequeue_count(&m.b), 1);
    }

    #[test]
    fn test_dequeue_absent_is_noop() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut selector = MatchSelector::new(SelectorConfig::default());
        selector.build(&spread(4), &mut rng).unwrap();
        assert!(!selector.dequeue(&Matchup::new("nope", "never")));
        assert!(!selector.dequeue(&Matchup::new("item000", "item000")));
        assert_eq!(selector.remaining(), 2);
        assert!(selector.dequeue_counts().is_empty());
    }

    #[test]
    fn test_degenerate_item_set() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut selector = MatchSelector::new(SelectorConfig::default());

        let err = selector
            .build(&ratings(&[("only", 1000.0)]), &mut rng)
            .unwrap_err();
        assert_eq!(err, SelectorError::DegenerateItemSet { count: 1 });
        assert!(selector.is_empty());
        assert_eq!(selector.iteration(), 0);
        assert!(selector.built_at().is_none());

        // Duplicated keys count once.
        let dup = vec![("x".to_string(), 1000.0), ("x".to_string(), 990.0)];
        assert!(selector.build(&dup, &mut rng).is_err());
        assert!(selector.build(&[], &mut rng).is_err());
    }

    #[test]
    fn test_pool_shrink_keeps_top_items() {
        let config = SelectorConfig {
            pool_shrink: Some(1),
            session_length: None,
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut selector = MatchSelector::new(config);
        let input = spread(20);

        selector.build(&input, &mut rng).unwrap();
        assert_eq!(selector.last_pool_size(), 20);
        assert_eq!(selector.iteration(), 1);

        // iteration 1, shrink 1: ceil(20 * 1/2) = 10
        selector.build(&input, &mut rng).unwrap();
        assert_eq!(selector.last_pool_size(), 10);
        let top: HashSet<&str> = input[..10].iter().map(|(k, _)| k.as_str()).collect();
        for m in selector.view_all() {
            assert!(top.contains(m.a.as_str()) && top.contains(m.b.as_str()));
        }
    }

    #[test]
    fn test_session_length_caps_in_generation_order() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut uncapped = MatchSelector::new(SelectorConfig::default());
        uncapped.build(&spread(12), &mut rng).unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        let mut capped = MatchSelector::new(SelectorConfig {
            pool_shrink: None,
            session_length: Some(2),
        });
        assert_eq!(capped.build(&spread(12), &mut rng).unwrap(), 2);
        assert_eq!(capped.view_all(), &uncapped.view_all()[..2]);
    }

    #[test]
    fn test_rebuild_replaces_stack() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut selector = MatchSelector::new(SelectorConfig::default());
        selector.build(&spread(8), &mut rng).unwrap();
        let first = selector.peek().cloned().unwrap();
        selector.dequeue(&first);
        assert_eq!(selector.remaining(), 3);

        selector.build(&spread(8), &mut rng).unwrap();
        assert_eq!(selector.remaining(), 4);
        assert_eq!(selector.iteration(), 2);
        // Counters survive rebuilds.
        assert_eq!(selector.dequeue_count(&first.a), 1);

        selector.clear();
        assert!(selector.peek().is_none());
    }
}
