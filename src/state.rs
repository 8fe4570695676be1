//! Application state: the shared document store, duel tuning, problem bank,
//! prompts, and the optional assistant client.
//!
//! One `AppState` is shared by every connection; each WebSocket session opens
//! its own `DuelClient` against the same store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::assistant::Assistant;
use crate::client::DuelClient;
use crate::config::{load_config_from_env, AppConfig, AssistantSettings, DuelSettings, Prompts};
use crate::domain::{Problem, UserId};
use crate::error::DuelError;
use crate::leaderboard;
use crate::seeds::{dsa_problems, seed_leaderboard};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub problems: Arc<Vec<Problem>>,
    pub duel: DuelSettings,
    pub assistant: Option<Assistant>,
    pub assistant_settings: AssistantSettings,
    pub prompts: Prompts,
}

impl AppState {
    /// Build state from env: load config, pick the problem bank, seed the leaderboard, init the assistant.
    #[instrument(level = "info", skip_all)]
    pub async fn new() -> Self {
        let cfg = load_config_from_env().unwrap_or_default();

        let assistant = Assistant::from_env();
        if let Some(a) = &assistant {
            info!(target: "duel_backend", base_url = %a.base_url, model = %a.model, hint_model = %a.hint_model, "Assistant enabled.");
        } else {
            info!(target: "duel_backend", "Assistant disabled (no GEMINI_API_KEY). Using canned answers.");
        }

        Self::from_config(cfg, assistant).await
    }

    pub async fn from_config(cfg: AppConfig, assistant: Option<Assistant>) -> Self {
        let mut problems = cfg.problem_bank();
        if problems.is_empty() {
            problems = dsa_problems();
        }
        info!(target: "duel_backend", problems = problems.len(), points_per_win = cfg.duel.points_per_win, "Startup problem bank");

        let store = DocumentStore::new().with_latency(Duration::from_millis(cfg.store.latency_ms));
        if cfg.store.latency_ms > 0 {
            warn!(target: "store", latency_ms = cfg.store.latency_ms, "Simulated store latency enabled");
        }
        if cfg.store.seed_leaderboard {
            if let Err(e) = leaderboard::seed(&store, &seed_leaderboard()).await {
                error!(target: "duel_backend", error = %e, "Leaderboard seeding failed");
            }
        }

        Self {
            store,
            problems: Arc::new(problems),
            duel: cfg.duel,
            assistant,
            assistant_settings: cfg.assistant,
            prompts: cfg.prompts,
        }
    }

    /// Start a duel session for one connected user.
    pub async fn open_duel(&self, me: UserId) -> Result<DuelClient, DuelError> {
        DuelClient::connect(self.store.clone(), me, self.duel.clone(), self.problems.clone()).await
    }

    /// Offline state with no artificial delays.
    #[cfg(test)]
    pub async fn for_tests() -> Self {
        let mut cfg = AppConfig::default();
        cfg.assistant.stub_delay_ms = 0;
        Self::from_config(cfg, None).await
    }
}
