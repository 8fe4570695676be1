//! Challenge records over the document store: queries, creation, the
//! conditional claim and the conditional completion.
//!
//! Claim and completion are transactions. A blind field write would let two
//! opponents claim the same `waiting` record (or two submitters both win) with
//! the last write silently overwriting the first.

use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::domain::{ChallengeRecord, ChallengeStatus, Problem, CHALLENGES};
use crate::error::DuelError;
use crate::leaderboard;
use crate::store::{Direction, DocumentStore, Filter, Patch, Query};

/// Challenges a participant's client must follow.
pub fn active_query() -> Query {
    Query::filter(Filter::one_of(
        "status",
        [ChallengeStatus::Waiting.as_str(), ChallengeStatus::InProgress.as_str()],
    ))
}

/// Joinable challenges, oldest first.
pub fn waiting_query() -> Query {
    Query::filter(Filter::eq("status", ChallengeStatus::Waiting.as_str())).order_by("createdAt", Direction::Asc)
}

/// Parse a batch of documents, dropping (and logging) the malformed ones.
fn parse_all(docs: Vec<crate::store::Document>) -> Vec<ChallengeRecord> {
    docs.iter()
        .filter_map(|d| match ChallengeRecord::from_document(d) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(target: "duel", error = %e, "Skipping malformed challenge document");
                None
            }
        })
        .collect()
}

/// Waiting challenges created by someone other than `me`.
#[instrument(level = "debug", skip(store))]
pub async fn find_joinable(store: &DocumentStore, me: &str) -> Result<Vec<ChallengeRecord>, DuelError> {
    let docs = store.query(CHALLENGES, &waiting_query()).await?;
    Ok(parse_all(docs).into_iter().filter(|r| r.challenger_id != me).collect())
}

pub async fn list(store: &DocumentStore, status: Option<ChallengeStatus>) -> Result<Vec<ChallengeRecord>, DuelError> {
    let query = match status {
        Some(s) => Query::filter(Filter::eq("status", s.as_str())),
        None => Query::all(),
    }
    .order_by("createdAt", Direction::Asc);
    Ok(parse_all(store.query(CHALLENGES, &query).await?))
}

pub async fn get(store: &DocumentStore, id: &str) -> Result<ChallengeRecord, DuelError> {
    let doc = store
        .get(CHALLENGES, id)
        .await?
        .ok_or_else(|| DuelError::NotFound(id.to_string()))?;
    ChallengeRecord::from_document(&doc)
}

pub fn pick_problem(problems: &[Problem]) -> Option<Problem> {
    problems.choose(&mut rand::thread_rng()).cloned()
}

/// Open a new `waiting` challenge with `me` as challenger.
#[instrument(level = "info", skip(store, problem), fields(problem = %problem.title))]
pub async fn create(store: &DocumentStore, me: &str, problem: Problem) -> Result<ChallengeRecord, DuelError> {
    let problem_json = serde_json::to_value(&problem).map_err(|e| DuelError::Malformed {
        id: format!("problem-{}", problem.id),
        reason: e.to_string(),
    })?;
    let id = store
        .create(
            CHALLENGES,
            Patch::new()
                .set("challengerId", me)
                .set("opponentId", Value::Null)
                .set("problem", problem_json)
                .set("status", ChallengeStatus::Waiting.as_str())
                .server_timestamp("createdAt")
                .set("startedAt", Value::Null)
                .set("winnerId", Value::Null),
        )
        .await?;
    info!(target: "duel", %id, challenger = %me, "Challenge created");
    get(store, &id).await
}

/// Join a waiting challenge, only if it is still waiting at write time.
#[instrument(level = "info", skip(store))]
pub async fn claim(store: &DocumentStore, id: &str, me: &str) -> Result<ChallengeRecord, DuelError> {
    let record = store
        .transaction(|tx| {
            let doc = tx.get(CHALLENGES, id).ok_or_else(|| DuelError::NotFound(id.to_string()))?;
            let current = ChallengeRecord::from_document(&doc)?;
            if current.challenger_id == me {
                return Err(DuelError::InvalidTransition { action: "join own challenge", phase: current.status.to_string() });
            }
            if current.status != ChallengeStatus::Waiting || current.opponent_id.is_some() {
                return Err(DuelError::ClaimConflict { challenge_id: id.to_string() });
            }
            tx.update(
                CHALLENGES,
                id,
                Patch::new()
                    .set("opponentId", me)
                    .set("status", ChallengeStatus::InProgress.as_str())
                    .server_timestamp("startedAt"),
            )?;
            let updated = tx.get(CHALLENGES, id).ok_or_else(|| DuelError::NotFound(id.to_string()))?;
            ChallengeRecord::from_document(&updated)
        })
        .await?;
    info!(target: "duel", %id, opponent = %me, "Challenge claimed");
    Ok(record)
}

/// Mark an in-progress challenge completed with `me` as winner and settle the
/// award in the same transaction.
#[instrument(level = "info", skip(store))]
pub async fn complete(store: &DocumentStore, id: &str, me: &str, points: i64) -> Result<ChallengeRecord, DuelError> {
    let (record, awarded) = store
        .transaction(|tx| {
            let doc = tx.get(CHALLENGES, id).ok_or_else(|| DuelError::NotFound(id.to_string()))?;
            let current = ChallengeRecord::from_document(&doc)?;
            if !current.is_participant(me) {
                return Err(DuelError::InvalidTransition { action: "submit to a foreign challenge", phase: current.status.to_string() });
            }
            match current.status {
                ChallengeStatus::InProgress if current.winner_id.is_none() => {}
                ChallengeStatus::Waiting => {
                    return Err(DuelError::InvalidTransition { action: "submit without an opponent", phase: current.status.to_string() });
                }
                _ => return Err(DuelError::ClaimConflict { challenge_id: id.to_string() }),
            }
            tx.update(
                CHALLENGES,
                id,
                Patch::new().set("status", ChallengeStatus::Completed.as_str()).set("winnerId", me),
            )?;
            let updated = tx.get(CHALLENGES, id).ok_or_else(|| DuelError::NotFound(id.to_string()))?;
            let record = ChallengeRecord::from_document(&updated)?;
            let awarded = leaderboard::settle_in(tx, &record, points);
            Ok((record, awarded))
        })
        .await?;
    debug!(target: "duel", %id, winner = %me, %awarded, "Challenge completed");
    Ok(record)
}
