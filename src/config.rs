//! Loading application configuration (duel tuning, store options, assistant
//! prompts, optional problem bank) from TOML.
//!
//! See `AppConfig` for the expected schema. Every section is optional.

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::domain::Problem;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub duel: DuelSettings,
  #[serde(default)]
  pub store: StoreSettings,
  #[serde(default)]
  pub assistant: AssistantSettings,
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub problems: Vec<ProblemCfg>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DuelSettings {
  /// Points awarded to the winner of a duel.
  pub points_per_win: i64,
  /// Claim attempts before giving up on joining and creating a fresh challenge.
  pub max_claim_attempts: usize,
}

impl Default for DuelSettings {
  fn default() -> Self {
    Self { points_per_win: 100, max_claim_attempts: 3 }
  }
}

impl DuelSettings {
  /// Zero claim attempts would never join anyone; a negative award would make winning cost points.
  fn sanitized(mut self) -> Self {
    let defaults = Self::default();
    if self.max_claim_attempts == 0 {
      warn!(target: "duel_backend", default = defaults.max_claim_attempts, "max_claim_attempts must be at least 1; using default");
      self.max_claim_attempts = defaults.max_claim_attempts;
    }
    if self.points_per_win < 0 {
      warn!(target: "duel_backend", value = self.points_per_win, default = defaults.points_per_win, "points_per_win must not be negative; using default");
      self.points_per_win = defaults.points_per_win;
    }
    self
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
  /// Simulated round trip applied to every store operation.
  pub latency_ms: u64,
  pub seed_leaderboard: bool,
}

impl Default for StoreSettings {
  fn default() -> Self {
    Self { latency_ms: 0, seed_leaderboard: true }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
  /// Delay of the offline mock, mimicking a network call.
  pub stub_delay_ms: u64,
}

impl Default for AssistantSettings {
  fn default() -> Self {
    Self { stub_delay_ms: 1000 }
  }
}

/// Problem entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ProblemCfg {
  #[serde(default)] pub id: Option<u32>,
  pub title: String,
  pub description: String,
  #[serde(default)] pub difficulty: Option<String>,
}

/// Prompts used by the assistant client. `{style}`, `{topic}` and `{question}`
/// are filled per request.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub explain_system: String,
  pub explain_user_template: String,
  pub hint_system: String,
  pub hint_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      explain_system: "Act as a senior software engineer who is an expert in computer science education. Provide a concise, single-paragraph explanation. Keep the tone of the explanation consistent with this style: \"{style}\".".into(),
      explain_user_template: "Explain the programming topic: \"{topic}\".".into(),
      hint_system: "You are an expert tutor. Provide a concise hint to help the student answer the following question. Do not give the direct answer. Keep the tone of the explanation consistent with this style: \"{style}\".".into(),
      hint_user_template: "Help me with this question: \"{question}\".".into(),
    }
  }
}

impl AppConfig {
  /// Problems from config, numbered where ids are missing. Invalid entries are skipped.
  pub fn problem_bank(&self) -> Vec<Problem> {
    let mut out = Vec::new();
    for (i, p) in self.problems.iter().enumerate() {
      if p.title.trim().is_empty() || p.description.trim().is_empty() {
        warn!(target: "duel_backend", index = i, "Skipping problem with empty title/description");
        continue;
      }
      out.push(Problem {
        id: p.id.unwrap_or(i as u32 + 1),
        title: p.title.clone(),
        description: p.description.clone(),
        difficulty: p.difficulty.clone().unwrap_or_else(|| "Easy".into()),
      });
    }
    out
  }
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  let mut cfg = toml::from_str::<AppConfig>(s)?;
  cfg.duel = cfg.duel.sanitized();
  Ok(cfg)
}

/// Attempt to load `AppConfig` from APP_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("APP_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "duel_backend", %path, "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "duel_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "duel_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
