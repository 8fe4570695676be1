//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Explaining a topic in a chosen tone (remote model, else canned answers)
//!   - Quiz hints that never give the answer away
//!
//! Remote failures never surface to the user; every path degrades to the
//! local stub after the configured delay.

use std::time::Duration;

use tracing::{debug, error, instrument};

use crate::seeds::canned_explanation;
use crate::state::AppState;
use crate::util::trunc_for_log;

pub fn trainee_message(topic: &str, style: &str) -> String {
  format!("I am a trainee AI and do not yet have data for the topic: \"{topic}\" with the personality trait: \"{style}\".")
}

pub fn trainee_hint(style: &str) -> String {
  format!("I am a trainee AI and cannot give a hint for this question yet. Try breaking it into smaller steps (personality trait: \"{style}\").")
}

async fn stub_delay(state: &AppState) {
  let ms = state.assistant_settings.stub_delay_ms;
  if ms > 0 {
    tokio::time::sleep(Duration::from_millis(ms)).await;
  }
}

#[instrument(level = "info", skip(state, topic, style), fields(topic = %trunc_for_log(topic, 40), %style))]
pub async fn do_explain(state: &AppState, topic: &str, style: &str) -> String {
  let topic = topic.trim();
  if topic.is_empty() {
    return "Please enter a topic to explain.".into();
  }
  if let Some(assistant) = &state.assistant {
    match assistant.explain(&state.prompts, topic, style).await {
      Ok(text) => return text,
      Err(e) => error!(target: "assistant", error = %e, "Explain failed; using local answers"),
    }
  }
  stub_delay(state).await;
  match canned_explanation(&topic.to_lowercase(), style) {
    Some(text) => text.to_string(),
    None => {
      debug!(target: "assistant", "No canned answer");
      trainee_message(topic, style)
    }
  }
}

#[instrument(level = "info", skip(state, question, style), fields(question = %trunc_for_log(question, 40), %style))]
pub async fn do_quiz_hint(state: &AppState, question: &str, style: &str) -> String {
  let question = question.trim();
  if question.is_empty() {
    return "Please pick a question first.".into();
  }
  if let Some(assistant) = &state.assistant {
    match assistant.quiz_hint(&state.prompts, question, style).await {
      Ok(text) => return text,
      Err(e) => error!(target: "assistant", error = %e, "Quiz hint failed; using local answer"),
    }
  }
  stub_delay(state).await;
  trainee_hint(style)
}
