//! Domain models: problems, challenge records and leaderboard entries.
//!
//! Store documents are untyped JSON; everything crossing into the duel logic
//! is parsed here first and rejected as `Malformed` if it does not fit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DuelError;
use crate::store::Document;

pub const CHALLENGES: &str = "dsaChallenges";
pub const LEADERBOARD: &str = "leaderboard";
pub const SETTLEMENTS: &str = "settlements";

pub const DEFAULT_NAME: &str = "Anonymous";

pub type UserId = String;

/// One entry of the static problem set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
  pub id: u32,
  pub title: String,
  pub description: String,
  pub difficulty: String,
}

/// Lifecycle of a challenge record. Ordered: a record only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeStatus {
  Waiting,
  InProgress,
  Completed,
}

impl ChallengeStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      ChallengeStatus::Waiting => "waiting",
      ChallengeStatus::InProgress => "in-progress",
      ChallengeStatus::Completed => "completed",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "waiting" => Some(ChallengeStatus::Waiting),
      "in-progress" => Some(ChallengeStatus::InProgress),
      "completed" => Some(ChallengeStatus::Completed),
      _ => None,
    }
  }
}

impl fmt::Display for ChallengeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Typed view of a `dsaChallenges` document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRecord {
  pub id: String,
  pub challenger_id: UserId,
  pub opponent_id: Option<UserId>,
  pub problem: Problem,
  pub status: ChallengeStatus,
  pub created_at: Option<u64>,
  pub started_at: Option<u64>,
  pub winner_id: Option<UserId>,
}

// Wire shape of the document body; the id lives outside it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeFields {
  challenger_id: UserId,
  #[serde(default)] opponent_id: Option<UserId>,
  problem: Problem,
  status: ChallengeStatus,
  #[serde(default)] created_at: Option<u64>,
  #[serde(default)] started_at: Option<u64>,
  #[serde(default)] winner_id: Option<UserId>,
}

impl ChallengeRecord {
  pub fn from_document(doc: &Document) -> Result<Self, DuelError> {
    let f: ChallengeFields = serde_json::from_value(serde_json::Value::Object(doc.data.clone()))
      .map_err(|e| DuelError::Malformed { id: doc.id.clone(), reason: e.to_string() })?;

    let record = ChallengeRecord {
      id: doc.id.clone(),
      challenger_id: f.challenger_id,
      opponent_id: f.opponent_id,
      problem: f.problem,
      status: f.status,
      created_at: f.created_at,
      started_at: f.started_at,
      winner_id: f.winner_id,
    };
    record.check_shape()?;
    Ok(record)
  }

  // Cross-field rules the schema alone cannot express.
  fn check_shape(&self) -> Result<(), DuelError> {
    let bad = |reason: &str| -> Result<(), DuelError> {
      Err(DuelError::Malformed { id: self.id.clone(), reason: reason.into() })
    };
    if self.status != ChallengeStatus::Waiting && self.opponent_id.is_none() {
      return bad("active or completed challenge without an opponent");
    }
    if let Some(w) = &self.winner_id {
      if !self.is_participant(w) {
        return bad("winner is not a participant");
      }
      if self.status != ChallengeStatus::Completed {
        return bad("winner set before completion");
      }
    }
    Ok(())
  }

  pub fn is_participant(&self, user: &str) -> bool {
    self.challenger_id == user || self.opponent_id.as_deref() == Some(user)
  }
}

/// Typed view of a `leaderboard` document (id = user id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
  pub user_id: UserId,
  pub name: String,
  pub points: i64,
}

#[derive(Deserialize)]
struct EntryFields {
  #[serde(default)] name: Option<String>,
  #[serde(default)] points: i64,
}

impl LeaderboardEntry {
  pub fn from_document(doc: &Document) -> Result<Self, DuelError> {
    let f: EntryFields = serde_json::from_value(serde_json::Value::Object(doc.data.clone()))
      .map_err(|e| DuelError::Malformed { id: doc.id.clone(), reason: e.to_string() })?;
    let name = f.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| DEFAULT_NAME.into());
    Ok(Self { user_id: doc.id.clone(), name, points: f.points })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn doc(id: &str, v: serde_json::Value) -> Document {
    Document { id: id.into(), data: v.as_object().cloned().unwrap() }
  }

  fn problem() -> serde_json::Value {
    json!({ "id": 1, "title": "Reverse a String", "description": "d", "difficulty": "Easy" })
  }

  #[test]
  fn parses_a_waiting_record() {
    let d = doc("c1", json!({
      "challengerId": "alice", "opponentId": null, "problem": problem(),
      "status": "waiting", "createdAt": 10, "winnerId": null
    }));
    let r = ChallengeRecord::from_document(&d).unwrap();
    assert_eq!(r.status, ChallengeStatus::Waiting);
    assert_eq!(r.opponent_id, None);
    assert!(r.is_participant("alice"));
    assert!(!r.is_participant("bob"));
  }

  #[test]
  fn rejects_unknown_status_and_missing_fields() {
    let d = doc("c1", json!({ "challengerId": "a", "problem": problem(), "status": "paused" }));
    assert!(matches!(ChallengeRecord::from_document(&d), Err(DuelError::Malformed { .. })));

    let d = doc("c2", json!({ "status": "waiting" }));
    assert!(matches!(ChallengeRecord::from_document(&d), Err(DuelError::Malformed { .. })));
  }

  #[test]
  fn rejects_inconsistent_records() {
    let d = doc("c1", json!({
      "challengerId": "a", "problem": problem(), "status": "in-progress"
    }));
    assert!(ChallengeRecord::from_document(&d).is_err());

    let d = doc("c2", json!({
      "challengerId": "a", "opponentId": "b", "problem": problem(),
      "status": "completed", "winnerId": "mallory"
    }));
    assert!(ChallengeRecord::from_document(&d).is_err());
  }

  #[test]
  fn status_order_is_the_lifecycle() {
    assert!(ChallengeStatus::Waiting < ChallengeStatus::InProgress);
    assert!(ChallengeStatus::InProgress < ChallengeStatus::Completed);
    assert_eq!(ChallengeStatus::parse("in-progress"), Some(ChallengeStatus::InProgress));
    assert_eq!(serde_json::to_value(ChallengeStatus::InProgress).unwrap(), json!("in-progress"));
  }

  #[test]
  fn leaderboard_name_defaults_to_anonymous() {
    let e = LeaderboardEntry::from_document(&doc("u1", json!({ "points": 300 }))).unwrap();
    assert_eq!(e.name, "Anonymous");
    assert_eq!(e.points, 300);
    let e = LeaderboardEntry::from_document(&doc("u2", json!({ "name": "  ", "points": 1 }))).unwrap();
    assert_eq!(e.name, "Anonymous");
  }
}
