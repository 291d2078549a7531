// Voting session: one rating store plus one matchup stack behind one lock.
//
// Every operation that reads and then writes ratings, or rebuilds the stack,
// runs while holding the session lock, so concurrent votes on overlapping
// items never lose updates.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::{RatingStore, StoreError};
use crate::elo::{score_match, InvalidOutcome, Outcome, DEFAULT_K};
use crate::metrics;
use crate::stack::{MatchSelector, Matchup, SelectorConfig, SelectorError};

#[derive(Debug, Error)]
pub enum TournamentError {
    #[error(transparent)]
    InvalidOutcome(#[from] InvalidOutcome),

    #[error("need at least two rated items to build matchups, found {count}")]
    DegenerateItemSet { count: usize },

    #[error("rating store failure: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl TournamentError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TournamentError::InvalidOutcome(_) => "invalid_outcome",
            TournamentError::DegenerateItemSet { .. } => "degenerate",
            TournamentError::StoreUnavailable(_) => "store",
        }
    }
}

impl From<SelectorError> for TournamentError {
    fn from(e: SelectorError) -> Self {
        match e {
            SelectorError::DegenerateItemSet { count } => {
                TournamentError::DegenerateItemSet { count }
            }
        }
    }
}

/// A single vote: `outcome` is from `a`'s point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub a: String,
    pub b: String,
    pub outcome: Outcome,
}

impl Vote {
    pub fn new(a: impl Into<String>, b: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            outcome,
        }
    }

    /// Build a vote from a raw outcome string (`win`, `0.5`, ...).
    pub fn parse(
        a: impl Into<String>,
        b: impl Into<String>,
        raw_outcome: &str,
    ) -> Result<Self, TournamentError> {
        let outcome = Outcome::parse(raw_outcome)?;
        Ok(Self::new(a, b, outcome))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteReceipt {
    pub a: String,
    pub b: String,
    pub outcome: Outcome,
    /// New ratings; `None` for a self-matchup, which never touches ratings.
    pub rating_a: Option<f64>,
    pub rating_b: Option<f64>,
    /// Whether the matchup was still in the stack.
    pub dequeued: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub rank: usize,
    pub key: String,
    pub rating: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackView {
    pub iteration: u64,
    pub built_at: Option<DateTime<Utc>>,
    pub matchups: Vec<Matchup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub rated_items: usize,
    pub iteration: u64,
    pub remaining: usize,
    pub last_pool_size: usize,
    pub built_at: Option<DateTime<Utc>>,
    pub pool_shrink: Option<u32>,
    pub session_length: Option<usize>,
    pub k: f64,
    /// Items voted on most often, highest first.
    pub most_dequeued: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub k: f64,
    pub selector: SelectorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            selector: SelectorConfig::default(),
        }
    }
}

struct SessionState {
    selector: MatchSelector,
    rng: StdRng,
}

pub struct Session<S> {
    store: S,
    k: f64,
    state: Mutex<SessionState>,
}

const MOST_DEQUEUED_LIMIT: usize = 10;

impl<S: RatingStore> Session<S> {
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// Deterministic matchup generation, for tests and replays.
    pub fn with_seed(store: S, config: SessionConfig, seed: u64) -> Self {
        Self::with_rng(store, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: S, config: SessionConfig, rng: StdRng) -> Self {
        Self {
            store,
            k: config.k,
            state: Mutex::new(SessionState {
                selector: MatchSelector::new(config.selector),
                rng,
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record one vote and drop its matchup from the stack.
    ///
    /// Ratings are persisted before the matchup is dequeued, so a failed
    /// write leaves the matchup available for another vote.
    pub async fn record_vote(
        &self,
        a: &str,
        b: &str,
        outcome: Outcome,
    ) -> Result<VoteReceipt, TournamentError> {
        let mut state = self.state.lock().await;
        self.apply_vote(&mut state, &Vote::new(a, b, outcome))
            .await
            .inspect_err(|e| metrics::VOTE_ERRORS_TOTAL.with_label_values(&[e.kind()]).inc())
    }

    /// Apply a batch of votes in order under a single lock acquisition.
    ///
    /// Stops at the first failure; votes before it stay recorded.
    pub async fn record_votes(&self, votes: &[Vote]) -> Result<Vec<VoteReceipt>, TournamentError> {
        let mut state = self.state.lock().await;
        let mut receipts = Vec::with_capacity(votes.len());
        for vote in votes {
            let receipt = self
                .apply_vote(&mut state, vote)
                .await
                .inspect_err(|e| metrics::VOTE_ERRORS_TOTAL.with_label_values(&[e.kind()]).inc())?;
            receipts.push(receipt);
        }
        tracing::info!("Applied {} votes in batch", receipts.len());
        Ok(receipts)
    }

    async fn apply_vote(
        &self,
        state: &mut SessionState,
        vote: &Vote,
    ) -> Result<VoteReceipt, TournamentError> {
        let matchup = Matchup::new(vote.a.as_str(), vote.b.as_str());

        if matchup.is_self_match() {
            let dequeued = state.selector.dequeue(&matchup);
            tracing::debug!("Self matchup for {} dropped without rating change", vote.a);
            metrics::VOTES_TOTAL.with_label_values(&["self"]).inc();
            return Ok(VoteReceipt {
                a: vote.a.clone(),
                b: vote.b.clone(),
                outcome: vote.outcome,
                rating_a: None,
                rating_b: None,
                dequeued,
            });
        }

        let old_a = self.store.get(&vote.a).await?;
        let old_b = self.store.get(&vote.b).await?;
        let (new_a, new_b) = score_match(old_a, old_b, vote.outcome, self.k);

        if let Err(e) = self
            .store
            .set_many(&[(vote.a.clone(), new_a), (vote.b.clone(), new_b)])
            .await
        {
            tracing::error!("Failed to persist vote {} vs {}: {e}", vote.a, vote.b);
            return Err(e.into());
        }

        let dequeued = state.selector.dequeue(&matchup);
        metrics::VOTES_TOTAL
            .with_label_values(&[vote.outcome.as_str()])
            .inc();
        tracing::info!(
            "Vote {} vs {}: {} ({old_a:.1} -> {new_a:.1}, {old_b:.1} -> {new_b:.1})",
            vote.a,
            vote.b,
            vote.outcome
        );

        Ok(VoteReceipt {
            a: vote.a.clone(),
            b: vote.b.clone(),
            outcome: vote.outcome,
            rating_a: Some(new_a),
            rating_b: Some(new_b),
            dequeued,
        })
    }

    /// The matchup to show next. Rebuilds the stack when it is empty; never
    /// consumes anything.
    pub async fn peek_next_matchup(&self) -> Result<Matchup, TournamentError> {
        let mut state = self.state.lock().await;
        if state.selector.is_empty() {
            self.rebuild_locked(&mut state).await?;
        }
        state
            .selector
            .peek()
            .cloned()
            .ok_or(TournamentError::DegenerateItemSet { count: 0 })
    }

    /// Force a new stack build. Returns the number of matchups generated.
    pub async fn rebuild_selection(&self) -> Result<usize, TournamentError> {
        let mut state = self.state.lock().await;
        self.rebuild_locked(&mut state).await
    }

    async fn rebuild_locked(&self, state: &mut SessionState) -> Result<usize, TournamentError> {
        let ratings = self.store.get_all().await?;
        metrics::RATED_ITEMS.set(ratings.len() as i64);
        let built = state.selector.build(&ratings, &mut state.rng)?;
        Ok(built)
    }

    /// Ratings sorted highest first, paginated.
    pub async fn list_rankings(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RankedItem>, TournamentError> {
        let _state = self.state.lock().await;
        let all = self.store.get_all().await?;
        Ok(all
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, (key, rating))| RankedItem {
                rank: i + 1,
                key,
                rating,
            })
            .collect())
    }

    /// Snapshot of the pending matchups in order. Does not rebuild.
    pub async fn view_stack(&self) -> StackView {
        let state = self.state.lock().await;
        StackView {
            iteration: state.selector.iteration(),
            built_at: state.selector.built_at(),
            matchups: state.selector.view_all().to_vec(),
        }
    }

    pub async fn stats(&self) -> Result<SessionStats, TournamentError> {
        let state = self.state.lock().await;
        let rated_items = self.store.count().await?;
        let selector = &state.selector;
        let config = selector.config();

        let mut most_dequeued: Vec<(String, u64)> = selector
            .dequeue_counts()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        most_dequeued.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_dequeued.truncate(MOST_DEQUEUED_LIMIT);

        Ok(SessionStats {
            rated_items,
            iteration: selector.iteration(),
            remaining: selector.remaining(),
            last_pool_size: selector.last_pool_size(),
            built_at: selector.built_at(),
            pool_shrink: config.pool_shrink,
            session_length: config.session_length,
            k: self.k,
            most_dequeued,
        })
    }
}
