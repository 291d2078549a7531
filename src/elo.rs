// Elo rating calculation for pairwise media votes.
//
// Ratings are plain f64 with no floor or ceiling. A "punish" outcome
// discards the comparison and leaves both ratings untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_RATING: f64 = 1000.0;
pub const DEFAULT_K: f64 = 16.0;

/// Vote outcome from the perspective of the first item in a matchup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
    /// Neither side gains anything; used to throw away an unusable matchup.
    Punish,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid outcome: {0}")]
pub struct InvalidOutcome(pub String);

impl Outcome {
    /// Actual score fed into the Elo formula. `None` for punish.
    pub fn score(self) -> Option<f64> {
        match self {
            Outcome::Win => Some(1.0),
            Outcome::Draw => Some(0.5),
            Outcome::Loss => Some(0.0),
            Outcome::Punish => None,
        }
    }

    /// The same result seen from the other item.
    pub fn opponent(self) -> Outcome {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
            Outcome::Punish => Outcome::Punish,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Draw => "draw",
            Outcome::Punish => "punish",
        }
    }

    /// Parse a client-supplied outcome.
    ///
    /// Accepts the names (`win`, `loss`, `draw`, `punish`) and the numeric
    /// codes older clients send (`1`, `0`, `0.5`, `-1`).
    pub fn parse(raw: &str) -> Result<Self, InvalidOutcome> {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "win" => return Ok(Outcome::Win),
            "loss" | "lose" => return Ok(Outcome::Loss),
            "draw" => return Ok(Outcome::Draw),
            "punish" => return Ok(Outcome::Punish),
            _ => {}
        }
        match trimmed.parse::<f64>() {
            Ok(v) => Self::from_score(v),
            Err(_) => Err(InvalidOutcome(raw.to_string())),
        }
    }

    /// Map a numeric code to an outcome. Only exact codes are accepted.
    pub fn from_score(value: f64) -> Result<Self, InvalidOutcome> {
        if value == 1.0 {
            Ok(Outcome::Win)
        } else if value == 0.5 {
            Ok(Outcome::Draw)
        } else if value == 0.0 {
            Ok(Outcome::Loss)
        } else if value == -1.0 {
            Ok(Outcome::Punish)
        } else {
            Err(InvalidOutcome(value.to_string()))
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = InvalidOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Outcome::parse(s)
    }
}

/// Calculate expected score for item A against item B.
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) / 400.0))
}

/// Compute both new ratings after A and B were compared.
///
/// `outcome` is A's result; B gets `outcome.opponent()`. Punish returns the
/// inputs unchanged.
pub fn score_match(rating_a: f64, rating_b: f64, outcome: Outcome, k: f64) -> (f64, f64) {
    let (Some(actual_a), Some(actual_b)) = (outcome.score(), outcome.opponent().score()) else {
        return (rating_a, rating_b);
    };
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = expected_score(rating_b, rating_a);
    (
        rating_a + k * (actual_a - expected_a),
        rating_b + k * (actual_b - expected_b),
    )
}
