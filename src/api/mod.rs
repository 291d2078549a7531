// HTTP API routes (matchups, votes, rankings, stack control).

use axum::{
    body::Body,
    extract::{Json, MatchedPath, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::db::RatingStore;
use crate::elo::{InvalidOutcome, Outcome};
use crate::metrics;
use crate::tournament::{Session, TournamentError, Vote};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct VoteRequest {
    pub a: String,
    pub b: String,
    /// `"win"`/`"loss"`/`"draw"`/`"punish"` or the numeric codes `1`, `0`,
    /// `0.5`, `-1`.
    pub outcome: Value,
}

#[derive(Deserialize)]
pub struct MassVoteRequest {
    pub votes: Vec<VoteRequest>,
}

#[derive(Deserialize)]
pub struct PaginationParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ── Shared application state ─────────────────────────────────────────

pub struct AppState<S> {
    pub session: Arc<Session<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn tournament_error(e: TournamentError) -> Response {
    match &e {
        TournamentError::InvalidOutcome(_) => {
            json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response()
        }
        TournamentError::DegenerateItemSet { .. } => {
            json_error(StatusCode::CONFLICT, &e.to_string()).into_response()
        }
        TournamentError::StoreUnavailable(err) => {
            tracing::error!("Rating store error: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

fn parse_outcome(raw: &Value) -> Result<Outcome, InvalidOutcome> {
    match raw {
        Value::String(s) => Outcome::parse(s),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| InvalidOutcome(n.to_string()))
            .and_then(Outcome::from_score),
        other => Err(InvalidOutcome(other.to_string())),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router<S: RatingStore + 'static>(session: Arc<Session<S>>) -> Router {
    let state = AppState { session };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/matchup", get(next_matchup::<S>))
        .route("/api/vote", post(vote::<S>))
        .route("/api/votes", post(mass_vote::<S>))
        .route("/api/rankings", get(rankings::<S>))
        .route("/api/stack", get(view_stack::<S>))
        .route("/api/stack/rebuild", post(rebuild_stack::<S>))
        .route("/api/stats", get(stats::<S>))
        .with_state(state)
        .layer(middleware::from_fn(track_request_duration))
}

async fn track_request_duration(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    // Route template, so unknown paths share one series.
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&endpoint])
        .observe(start.elapsed().as_secs_f64());
    response
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "mediarank" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Matchup / vote handlers ───────────────────────────────────────────

async fn next_matchup<S: RatingStore>(State(state): State<AppState<S>>) -> Response {
    match state.session.peek_next_matchup().await {
        Ok(matchup) => (StatusCode::OK, Json(json!(matchup))).into_response(),
        Err(e) => tournament_error(e),
    }
}

async fn vote<S: RatingStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<VoteRequest>,
) -> Response {
    let outcome = match parse_outcome(&req.outcome) {
        Ok(o) => o,
        Err(e) => {
            metrics::VOTE_ERRORS_TOTAL
                .with_label_values(&["invalid_outcome"])
                .inc();
            return tournament_error(e.into());
        }
    };
    match state.session.record_vote(&req.a, &req.b, outcome).await {
        Ok(receipt) => (StatusCode::OK, Json(json!(receipt))).into_response(),
        Err(e) => tournament_error(e),
    }
}

async fn mass_vote<S: RatingStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<MassVoteRequest>,
) -> Response {
    // Reject the whole batch before touching any rating.
    let mut votes = Vec::with_capacity(req.votes.len());
    for (i, v) in req.votes.into_iter().enumerate() {
        match parse_outcome(&v.outcome) {
            Ok(outcome) => votes.push(Vote::new(v.a, v.b, outcome)),
            Err(e) => {
                metrics::VOTE_ERRORS_TOTAL
                    .with_label_values(&["invalid_outcome"])
                    .inc();
                return json_error(StatusCode::BAD_REQUEST, &format!("vote {i}: {e}"))
                    .into_response();
            }
        }
    }
    match state.session.record_votes(&votes).await {
        Ok(receipts) => (StatusCode::OK, Json(json!({ "recorded": receipts }))).into_response(),
        Err(e) => tournament_error(e),
    }
}

// ── Ranking / stack handlers ──────────────────────────────────────────

async fn rankings<S: RatingStore>(
    State(state): State<AppState<S>>,
    Query(params): Query<PaginationParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);
    match state.session.list_rankings(offset, limit).await {
        Ok(entries) => (StatusCode::OK, Json(json!(entries))).into_response(),
        Err(e) => tournament_error(e),
    }
}

async fn view_stack<S: RatingStore>(State(state): State<AppState<S>>) -> Response {
    let view = state.session.view_stack().await;
    (StatusCode::OK, Json(json!(view))).into_response()
}

async fn rebuild_stack<S: RatingStore>(State(state): State<AppState<S>>) -> Response {
    match state.session.rebuild_selection().await {
        Ok(n) => (StatusCode::OK, Json(json!({ "matchups": n }))).into_response(),
        Err(e) => tournament_error(e),
    }
}

async fn stats<S: RatingStore>(State(state): State<AppState<S>>) -> Response {
    match state.session.stats().await {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))).into_response(),
        Err(e) => tournament_error(e),
    }
}
