//! Leaderboard: point settlement, ranking and display names.
//!
//! Settlement is idempotent per challenge id. A `settlements/{challengeId}`
//! marker is written in the same transaction as the points increment, so a
//! replayed completion finds the marker and awards nothing.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::domain::{ChallengeRecord, LeaderboardEntry, DEFAULT_NAME, LEADERBOARD, SETTLEMENTS};
use crate::error::DuelError;
use crate::store::{Direction, DocumentStore, Patch, Query, Transaction};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    pub points: i64,
}

pub fn leaderboard_query() -> Query {
    Query::all().order_by("points", Direction::Desc)
}

/// Award `points` to the record's winner unless this challenge was already
/// settled. Returns whether an award happened.
pub fn settle_in(tx: &mut Transaction<'_>, record: &ChallengeRecord, points: i64) -> bool {
    let Some(winner) = record.winner_id.as_deref() else { return false };
    if tx.get(SETTLEMENTS, &record.id).is_some() {
        return false;
    }
    tx.set(
        SETTLEMENTS,
        &record.id,
        Patch::new()
            .set("challengeId", record.id.as_str())
            .set("winnerId", winner)
            .set("points", points)
            .server_timestamp("settledAt"),
    );
    tx.set(LEADERBOARD, winner, Patch::new().increment("points", points));
    true
}

/// Client-side backstop run when `me` observes its own win. Never touches
/// another user's score.
#[instrument(level = "info", skip(store))]
pub async fn settle(store: &DocumentStore, challenge_id: &str, me: &str, points: i64) -> Result<bool, DuelError> {
    let awarded = store
        .transaction(|tx| {
            let doc = tx
                .get(crate::domain::CHALLENGES, challenge_id)
                .ok_or_else(|| DuelError::NotFound(challenge_id.to_string()))?;
            let record = ChallengeRecord::from_document(&doc)?;
            if record.winner_id.as_deref() != Some(me) {
                return Ok(false);
            }
            Ok(settle_in(tx, &record, points))
        })
        .await?;
    if awarded {
        // Completion normally settles in its own transaction; reaching this means it did not.
        warn!(target: "duel", %challenge_id, winner = %me, points, "Late settlement applied");
    }
    Ok(awarded)
}

pub async fn points_of(store: &DocumentStore, user: &str) -> Result<i64, DuelError> {
    match store.get(LEADERBOARD, user).await? {
        Some(doc) => Ok(LeaderboardEntry::from_document(&doc)?.points),
        None => Ok(0),
    }
}

/// Assign 1-based ranks; input must already be ordered.
pub fn rank_entries(entries: Vec<LeaderboardEntry>) -> Vec<RankedEntry> {
    entries
        .into_iter()
        .enumerate()
        .map(|(i, e)| RankedEntry { rank: i + 1, user_id: e.user_id, name: e.name, points: e.points })
        .collect()
}

pub async fn ranked(store: &DocumentStore) -> Result<Vec<RankedEntry>, DuelError> {
    let docs = store.query(LEADERBOARD, &leaderboard_query()).await?;
    let entries = docs
        .iter()
        .filter_map(|d| match LeaderboardEntry::from_document(d) {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(target: "duel", error = %e, "Skipping malformed leaderboard document");
                None
            }
        })
        .collect();
    Ok(rank_entries(entries))
}

/// Set the display label; blank names fall back to the default.
pub async fn set_name(store: &DocumentStore, user: &str, name: &str) -> Result<(), DuelError> {
    let name = name.trim();
    let name = if name.is_empty() { DEFAULT_NAME } else { name };
    store
        .set(LEADERBOARD, user, Patch::new().set("name", name).increment("points", 0))
        .await
}

/// Insert demo rows that do not exist yet.
pub async fn seed(store: &DocumentStore, rows: &[(&str, &str, i64)]) -> Result<usize, DuelError> {
    let inserted = store
        .transaction(|tx| {
            let mut n = 0;
            for (user, name, points) in rows {
                if tx.get(LEADERBOARD, user).is_none() {
                    tx.set(LEADERBOARD, user, Patch::new().set("name", *name).set("points", Value::from(*points)));
                    n += 1;
                }
            }
            Ok(n)
        })
        .await?;
    info!(target: "duel", inserted, "Leaderboard seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges;
    use crate::seeds::{dsa_problems, seed_leaderboard};

    async fn finished(store: &DocumentStore, winner: &str) -> ChallengeRecord {
        let r = challenges::create(store, "alice", dsa_problems()[1].clone()).await.unwrap();
        challenges::claim(store, &r.id, "bob").await.unwrap();
        challenges::complete(store, &r.id, winner, 100).await.unwrap()
    }

    #[tokio::test]
    async fn settlement_is_idempotent_per_challenge() {
        let store = DocumentStore::new();
        let r = finished(&store, "bob").await;
        assert_eq!(points_of(&store, "bob").await.unwrap(), 100);

        for _ in 0..3 {
            assert!(!settle(&store, &r.id, "bob", 100).await.unwrap());
        }
        assert_eq!(points_of(&store, "bob").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn loser_cannot_settle_for_anyone() {
        let store = DocumentStore::new();
        let r = finished(&store, "bob").await;
        assert!(!settle(&store, &r.id, "alice", 100).await.unwrap());
        assert_eq!(points_of(&store, "alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn settle_unknown_challenge_is_not_found() {
        let store = DocumentStore::new();
        assert_eq!(settle(&store, "ghost", "bob", 100).await.unwrap_err(), DuelError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn ranking_orders_by_points_with_one_based_ranks() {
        let store = DocumentStore::new();
        assert_eq!(seed(&store, &seed_leaderboard()).await.unwrap(), 4);
        assert_eq!(seed(&store, &seed_leaderboard()).await.unwrap(), 0);
        finished(&store, "bob").await;

        let board = ranked(&store).await.unwrap();
        assert_eq!(board.len(), 5);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].name, "Alice");
        let last = board.last().unwrap();
        assert_eq!((last.rank, last.user_id.as_str(), last.points), (5, "bob", 100));
        assert_eq!(last.name, "Anonymous");
        assert!(board.windows(2).all(|w| w[0].points >= w[1].points));
    }

    #[tokio::test]
    async fn set_name_keeps_points() {
        let store = DocumentStore::new();
        finished(&store, "bob").await;
        set_name(&store, "bob", "Bobby").await.unwrap();
        set_name(&store, "newcomer", "   ").await.unwrap();

        let board = ranked(&store).await.unwrap();
        let bob = board.iter().find(|e| e.user_id == "bob").unwrap();
        assert_eq!((bob.name.as_str(), bob.points), ("Bobby", 100));
        let newcomer = board.iter().find(|e| e.user_id == "newcomer").unwrap();
        assert_eq!((newcomer.name.as_str(), newcomer.points), ("Anonymous", 0));
    }
}
