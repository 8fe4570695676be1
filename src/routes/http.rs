//! HTTP endpoint handlers. These are thin wrappers that forward to the duel
//! modules and core logic. Store errors map onto status codes in one place.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument, warn};

use crate::challenges;
use crate::domain::{ChallengeRecord, ChallengeStatus, Problem};
use crate::error::DuelError;
use crate::leaderboard::{self, RankedEntry};
use crate::logic::{do_explain, do_quiz_hint};
use crate::protocol::*;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorOut>)>;

pub fn status_for(err: &DuelError) -> StatusCode {
  match err {
    DuelError::NotFound(_) => StatusCode::NOT_FOUND,
    DuelError::ClaimConflict { .. } => StatusCode::CONFLICT,
    DuelError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    DuelError::Malformed { .. } => StatusCode::BAD_GATEWAY,
    DuelError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
  }
}

fn api_error(err: DuelError) -> (StatusCode, Json<ErrorOut>) {
  let status = status_for(&err);
  warn!(target: "duel_backend", %status, error = %err, "HTTP request failed");
  (status, Json(ErrorOut { error: err.to_string() }))
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_problems(State(state): State<Arc<AppState>>) -> Json<Vec<Problem>> {
  Json(state.problems.as_ref().clone())
}

#[instrument(level = "info", skip(state))]
pub async fn http_leaderboard(State(state): State<Arc<AppState>>) -> ApiResult<Vec<RankedEntry>> {
  let entries = leaderboard::ranked(&state.store).await.map_err(api_error)?;
  info!(target: "duel_backend", entries = entries.len(), "HTTP leaderboard served");
  Ok(Json(entries))
}

#[instrument(level = "info", skip(state))]
pub async fn http_points(
  State(state): State<Arc<AppState>>,
  Path(user_id): Path<String>,
) -> ApiResult<PointsOut> {
  let points = leaderboard::points_of(&state.store, &user_id).await.map_err(api_error)?;
  Ok(Json(PointsOut { user_id, points }))
}

#[instrument(level = "info", skip(state), fields(status = ?q.status))]
pub async fn http_list_challenges(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ChallengeListQuery>,
) -> ApiResult<Vec<ChallengeRecord>> {
  let status = match q.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
    None => None,
    Some(s) => match ChallengeStatus::parse(s) {
      Some(st) => Some(st),
      None => {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorOut { error: format!("unknown status: {s}") })));
      }
    },
  };
  let records = challenges::list(&state.store, status).await.map_err(api_error)?;
  Ok(Json(records))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_challenge(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> ApiResult<ChallengeRecord> {
  challenges::get(&state.store, &id).await.map(Json).map_err(api_error)
}

#[instrument(level = "info", skip(state, body), fields(topic_len = body.topic.len(), style = %body.style))]
pub async fn http_post_explain(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ExplainIn>,
) -> impl IntoResponse {
  let text = do_explain(&state, &body.topic, &body.style).await;
  Json(AssistantOut { text })
}

#[instrument(level = "info", skip(state, body), fields(question_len = body.question.len(), style = %body.style))]
pub async fn http_post_hint(
  State(state): State<Arc<AppState>>,
  Json(body): Json<HintIn>,
) -> impl IntoResponse {
  let text = do_quiz_hint(&state, &body.question, &body.style).await;
  Json(AssistantOut { text })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_error_maps_to_a_distinct_status() {
    let cases = [
      (DuelError::NotFound("x".into()), StatusCode::NOT_FOUND),
      (DuelError::ClaimConflict { challenge_id: "x".into() }, StatusCode::CONFLICT),
      (DuelError::StoreUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
      (DuelError::Malformed { id: "x".into(), reason: "bad".into() }, StatusCode::BAD_GATEWAY),
      (DuelError::InvalidTransition { action: "submit a solution", phase: "idle".into() }, StatusCode::BAD_REQUEST),
    ];
    for (err, status) in cases {
      assert_eq!(status_for(&err), status, "{err}");
    }
  }
}
