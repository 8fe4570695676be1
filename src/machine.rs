//! Per-user duel state machine.
//!
//! `DuelState::apply` is a pure reducer over (state, event). It performs no
//! I/O; side effects it needs (settling a win) come back as `Effect`s for the
//! driver in `client.rs` to execute.
//!
//! Local phase follows `idle → waiting → in-progress → completed` and never
//! moves backwards for the same challenge. Any observed record carrying a
//! winner short-circuits to `completed`.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::domain::{ChallengeRecord, ChallengeStatus, UserId};
use crate::error::DuelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
  Idle,
  Waiting,
  InProgress,
  Completed,
}

impl From<ChallengeStatus> for Phase {
  fn from(s: ChallengeStatus) -> Self {
    match s {
      ChallengeStatus::Waiting => Phase::Waiting,
      ChallengeStatus::InProgress => Phase::InProgress,
      ChallengeStatus::Completed => Phase::Completed,
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Phase::Idle => "idle",
      Phase::Waiting => "waiting",
      Phase::InProgress => "in-progress",
      Phase::Completed => "completed",
    })
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Won,
  Lost,
}

#[derive(Clone, Debug)]
pub enum Event {
  SearchStarted,
  SubmitStarted,
  /// We opened a new waiting challenge.
  Created(ChallengeRecord),
  /// We claimed someone else's waiting challenge.
  Joined(ChallengeRecord),
  /// Our completion write went through.
  Submitted(ChallengeRecord),
  /// A store operation failed.
  Failed(DuelError),
  /// The subscription delivered a (possibly duplicate) record state.
  Observed(ChallengeRecord),
  PointsLoaded(i64),
  PlayAgain,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
  /// We won this challenge; make sure the award is settled.
  Settle { challenge_id: String },
}

#[derive(Clone, Debug)]
pub struct DuelState {
  me: UserId,
  pub phase: Phase,
  pub challenge: Option<ChallengeRecord>,
  pub outcome: Option<Outcome>,
  pub points: i64,
  pub busy: bool,
  pub error: Option<String>,
  // Challenges whose win was already handed to settlement.
  settled: HashSet<String>,
  // Challenges the user walked away from; late deliveries for them are dropped.
  retired: HashSet<String>,
}

impl DuelState {
  pub fn new(me: impl Into<UserId>) -> Self {
    Self {
      me: me.into(),
      phase: Phase::Idle,
      challenge: None,
      outcome: None,
      points: 0,
      busy: false,
      error: None,
      settled: HashSet::new(),
      retired: HashSet::new(),
    }
  }

  pub fn me(&self) -> &str {
    &self.me
  }

  pub fn can_search(&self) -> bool {
    self.phase == Phase::Idle && !self.busy
  }

  pub fn can_submit(&self) -> bool {
    self.phase == Phase::InProgress && self.challenge.is_some() && !self.busy
  }

  pub fn challenge_id(&self) -> Option<&str> {
    self.challenge.as_ref().map(|c| c.id.as_str())
  }

  pub fn apply(&mut self, event: Event) -> Vec<Effect> {
    match event {
      Event::SearchStarted => {
        if self.can_search() {
          self.busy = true;
          self.error = None;
        }
        vec![]
      }
      Event::SubmitStarted => {
        if self.can_submit() {
          self.busy = true;
          self.error = None;
        }
        vec![]
      }
      Event::Created(record) | Event::Joined(record) | Event::Submitted(record) => {
        self.busy = false;
        self.error = None;
        self.absorb(record)
      }
      Event::Observed(record) => self.absorb(record),
      Event::Failed(err) => {
        self.busy = false;
        self.error = Some(err.user_message());
        if err.resets_to_idle() {
          self.phase = Phase::Idle;
          self.challenge = None;
          self.outcome = None;
        }
        vec![]
      }
      Event::PointsLoaded(points) => {
        self.points = points;
        vec![]
      }
      Event::PlayAgain => {
        if self.phase == Phase::Completed {
          if let Some(c) = self.challenge.take() {
            self.retired.insert(c.id);
          }
          self.phase = Phase::Idle;
          self.outcome = None;
          self.error = None;
        }
        vec![]
      }
    }
  }

  fn absorb(&mut self, record: ChallengeRecord) -> Vec<Effect> {
    if !record.is_participant(&self.me) || self.retired.contains(&record.id) {
      return vec![];
    }

    match &self.challenge {
      Some(current) if current.id == record.id => {
        // Stale delivery: status must not regress.
        if record.status < current.status {
          return vec![];
        }
      }
      Some(_) if matches!(self.phase, Phase::Waiting | Phase::InProgress) => {
        // Already busy with another duel.
        return vec![];
      }
      _ => {}
    }

    let mut effects = vec![];
    self.phase = Phase::from(record.status);
    self.outcome = None;
    if let Some(winner) = record.winner_id.as_deref() {
      self.phase = Phase::Completed;
      if winner == self.me {
        self.outcome = Some(Outcome::Won);
        if self.settled.insert(record.id.clone()) {
          effects.push(Effect::Settle { challenge_id: record.id.clone() });
        }
      } else {
        self.outcome = Some(Outcome::Lost);
      }
    }
    self.challenge = Some(record);
    effects
  }
}
