//! Error taxonomy for the duel flow.
//!
//! Nothing here is fatal to the process: every variant is surfaced to the user
//! as a transient message with a retry affordance.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuelError {
    /// Network/query/write failure talking to the store.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An optimistic write was rejected because the record changed underneath us.
    #[error("challenge {challenge_id} changed concurrently")]
    ClaimConflict { challenge_id: String },

    /// A referenced document vanished.
    #[error("document {0} not found")]
    NotFound(String),

    /// A document failed schema parsing at the store boundary.
    #[error("malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },

    /// Operation invoked from a state that does not allow it.
    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: String },
}

impl DuelError {
    /// Whether the client state machine must drop back to `idle`.
    pub fn resets_to_idle(&self) -> bool {
        matches!(
            self,
            DuelError::StoreUnavailable(_) | DuelError::NotFound(_) | DuelError::Malformed { .. }
        )
    }

    /// Message shown to the user next to the retry button.
    pub fn user_message(&self) -> String {
        match self {
            DuelError::StoreUnavailable(_) | DuelError::Malformed { .. } => {
                "Failed to reach the challenge server. Please try again.".into()
            }
            DuelError::ClaimConflict { .. } => {
                "Someone else got there first. Please try again.".into()
            }
            DuelError::NotFound(_) => "That challenge no longer exists. Please try again.".into(),
            DuelError::InvalidTransition { .. } => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_class_errors_reset_to_idle() {
        assert!(DuelError::StoreUnavailable("down".into()).resets_to_idle());
        assert!(DuelError::NotFound("c1".into()).resets_to_idle());
        assert!(DuelError::Malformed { id: "c1".into(), reason: "status".into() }.resets_to_idle());
    }

    #[test]
    fn conflicts_and_bad_transitions_keep_state() {
        assert!(!DuelError::ClaimConflict { challenge_id: "c1".into() }.resets_to_idle());
        let e = DuelError::InvalidTransition { action: "submit", phase: "idle".into() };
        assert!(!e.resets_to_idle());
        assert_eq!(e.user_message(), "cannot submit while idle");
    }
}
