//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{ChallengeRecord, UserId};
use crate::leaderboard::RankedEntry;
use crate::machine::{DuelState, Outcome, Phase};
use crate::seeds::STYLES;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    FindOpponent,
    SubmitSolution,
    PlayAgain,
    Leaderboard,
    SetName {
        name: String,
    },
    Explain {
        topic: String,
        #[serde(default = "default_style")]
        style: String,
    },
    QuizHint {
        question: String,
        #[serde(default = "default_style")]
        style: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Welcome {
        #[serde(rename = "userId")]
        user_id: UserId,
        points: i64,
    },
    Duel {
        duel: DuelView,
    },
    Leaderboard {
        entries: Vec<RankedEntry>,
    },
    Assistant {
        text: String,
    },
    Error {
        message: String,
        retry: bool,
    },
}

/// Everything the duel page renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelView {
    pub status: Phase,
    pub challenge: Option<ChallengeRecord>,
    pub outcome: Option<Outcome>,
    pub points: i64,
    pub busy: bool,
    pub error: Option<String>,
}

pub fn duel_view(state: &DuelState) -> DuelView {
    DuelView {
        status: state.phase,
        challenge: state.challenge.clone(),
        outcome: state.outcome,
        points: state.points,
        busy: state.busy,
        error: state.error.clone(),
    }
}

fn default_style() -> String {
    STYLES[0].to_string()
}

// ---------- HTTP DTOs ----------

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsOut {
    pub user_id: UserId,
    pub points: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExplainIn {
    pub topic: String,
    #[serde(default = "default_style")]
    pub style: String,
}

#[derive(Debug, Deserialize)]
pub struct HintIn {
    pub question: String,
    #[serde(default = "default_style")]
    pub style: String,
}

#[derive(Debug, Serialize)]
pub struct AssistantOut {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}
