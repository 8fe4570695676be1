//! Duel Backend · realtime 1v1 coding duels
//!
//! - Axum HTTP + WebSocket API over an in-process realtime document store
//! - Transactional matchmaking, completion and leaderboard settlement
//! - Optional Gemini-style assistant (via environment variables)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT             : u16 (default 3000)
//!   GEMINI_API_KEY   : enables the remote assistant if present
//!   GEMINI_BASE_URL  : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_MODEL     : default "gemini-2.0-flash" (explanations)
//!   GEMINI_HINT_MODEL: quiz hints, defaults to GEMINI_MODEL
//!   APP_CONFIG_PATH  : path to TOML config (duel tuning, store, prompts, problem bank)
//!   LOG_LEVEL        : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT       : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod store;
mod domain;
mod config;
mod seeds;
mod challenges;
mod leaderboard;
mod machine;
mod client;
mod identity;
mod assistant;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: document store (seeded), duel settings, prompts, assistant client.
  let state = Arc::new(AppState::new().await);

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "duel_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "duel_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "duel_backend", error = %e, "Could not listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "duel_backend", "Shutdown requested");
}
