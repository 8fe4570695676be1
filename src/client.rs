//! Duel client: drives one user's `DuelState` against the store.
//!
//! Owns the user's live subscription to active challenges, turns store results
//! and pushed changes into reducer events, and executes the reducer's effects.
//! Dropping the client (or calling `teardown`) ends the subscription.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::challenges;
use crate::config::DuelSettings;
use crate::domain::{ChallengeRecord, Problem, CHALLENGES};
use crate::error::DuelError;
use crate::leaderboard;
use crate::machine::{DuelState, Effect, Event, Phase};
use crate::store::{Change, DocumentStore, Subscription};

pub struct DuelClient {
    store: DocumentStore,
    settings: DuelSettings,
    problems: Arc<Vec<Problem>>,
    state: DuelState,
    subscription: Option<Subscription>,
}

impl DuelClient {
    /// Subscribe to active challenges and load the user's current points.
    #[instrument(level = "info", skip(store, settings, problems))]
    pub async fn connect(
        store: DocumentStore,
        me: String,
        settings: DuelSettings,
        problems: Arc<Vec<Problem>>,
    ) -> Result<Self, DuelError> {
        let subscription = store.subscribe(CHALLENGES, challenges::active_query()).await?;
        let points = leaderboard::points_of(&store, &me).await?;
        let mut state = DuelState::new(me);
        state.apply(Event::PointsLoaded(points));
        Ok(Self { store, settings, problems, state, subscription: Some(subscription) })
    }

    pub fn state(&self) -> &DuelState {
        &self.state
    }

    pub fn me(&self) -> &str {
        self.state.me()
    }

    /// Join the oldest joinable challenge, or open a new one.
    #[instrument(level = "info", skip(self), fields(me = %self.me()))]
    pub async fn find_or_create(&mut self) -> Result<(), DuelError> {
        if !self.state.can_search() {
            return Err(DuelError::InvalidTransition { action: "find an opponent", phase: self.state.phase.to_string() });
        }
        self.state.apply(Event::SearchStarted);
        match self.search().await {
            Ok(event) => {
                let effects = self.state.apply(event);
                self.run(effects).await;
                Ok(())
            }
            Err(e) => {
                warn!(target: "duel", me = %self.me(), error = %e, "Find-or-create failed");
                self.state.apply(Event::Failed(e.clone()));
                Err(e)
            }
        }
    }

    async fn search(&self) -> Result<Event, DuelError> {
        let me = self.state.me();
        for attempt in 1..=self.settings.max_claim_attempts {
            let candidates = challenges::find_joinable(&self.store, me).await?;
            let Some(candidate) = candidates.first() else { break };
            match challenges::claim(&self.store, &candidate.id, me).await {
                Ok(record) => return Ok(Event::Joined(record)),
                Err(e @ (DuelError::ClaimConflict { .. } | DuelError::NotFound(_))) => {
                    debug!(target: "duel", %me, attempt, error = %e, "Claim lost; retrying");
                }
                Err(e) => return Err(e),
            }
        }

        let problem = challenges::pick_problem(&self.problems)
            .ok_or_else(|| DuelError::NotFound("problem set".into()))?;
        Ok(Event::Created(challenges::create(&self.store, me, problem).await?))
    }

    /// Declare victory on the current in-progress challenge.
    #[instrument(level = "info", skip(self), fields(me = %self.me()))]
    pub async fn submit_solution(&mut self) -> Result<(), DuelError> {
        let id = match self.state.challenge_id() {
            Some(id) if self.state.can_submit() => id.to_string(),
            _ => {
                return Err(DuelError::InvalidTransition { action: "submit a solution", phase: self.state.phase.to_string() });
            }
        };
        self.state.apply(Event::SubmitStarted);
        match challenges::complete(&self.store, &id, self.state.me(), self.settings.points_per_win).await {
            Ok(record) => {
                info!(target: "duel", challenge = %id, winner = %self.me(), "Solution submitted");
                let effects = self.state.apply(Event::Submitted(record));
                self.run(effects).await;
                Ok(())
            }
            Err(e) => {
                warn!(target: "duel", challenge = %id, error = %e, "Submit failed");
                self.state.apply(Event::Failed(e.clone()));
                Err(e)
            }
        }
    }

    pub fn play_again(&mut self) -> Result<(), DuelError> {
        if self.state.phase != Phase::Completed {
            return Err(DuelError::InvalidTransition { action: "start over", phase: self.state.phase.to_string() });
        }
        self.state.apply(Event::PlayAgain);
        Ok(())
    }

    /// Wait for the next pushed change. Pending forever once torn down. Cancel-safe.
    pub async fn next_change(&mut self) -> Option<Change> {
        match &mut self.subscription {
            Some(sub) => {
                let change = sub.recv().await;
                if change.is_none() {
                    self.subscription = None;
                }
                change
            }
            None => std::future::pending().await,
        }
    }

    /// Feed one pushed change through the reducer. Returns whether it concerned us.
    pub async fn apply_change(&mut self, change: Change) -> bool {
        match ChallengeRecord::from_document(&change.doc) {
            Ok(record) => {
                if !record.is_participant(self.me()) {
                    return false;
                }
                debug!(target: "duel", me = %self.me(), challenge = %record.id, status = %record.status, kind = ?change.kind, "Challenge changed");
                let effects = self.state.apply(Event::Observed(record));
                self.run(effects).await;
                true
            }
            Err(e) => {
                if !mentions(&change, self.me()) {
                    return false;
                }
                warn!(target: "duel", me = %self.me(), error = %e, "Rejected malformed challenge");
                self.state.apply(Event::Failed(e));
                true
            }
        }
    }

    async fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Settle { challenge_id } => {
                    let me = self.state.me().to_string();
                    if let Err(e) = leaderboard::settle(&self.store, &challenge_id, &me, self.settings.points_per_win).await {
                        warn!(target: "duel", %challenge_id, error = %e, "Settlement check failed");
                    }
                    self.refresh_points().await;
                }
            }
        }
    }

    pub async fn refresh_points(&mut self) {
        match leaderboard::points_of(&self.store, self.state.me()).await {
            Ok(points) => {
                self.state.apply(Event::PointsLoaded(points));
            }
            Err(e) => warn!(target: "duel", me = %self.me(), error = %e, "Could not load points"),
        }
    }

    /// Stop listening. No change is delivered after this returns.
    pub fn teardown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
            debug!(target: "duel", me = %self.me(), "Duel client torn down");
        }
    }
}

// Whether a raw document names `me` as a participant, even if it fails to parse.
fn mentions(change: &Change, me: &str) -> bool {
    ["challengerId", "opponentId"]
        .iter()
        .any(|f| change.doc.get(f).and_then(|v| v.as_str()) == Some(me))
}
