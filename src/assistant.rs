//! Minimal client for a Gemini-style `generateContent` endpoint.
//!
//! Two use-cases: explaining a programming topic in a chosen tone, and giving a
//! hint for a quiz question without revealing the answer. Calls are
//! instrumented and log model name, latency and token usage (not contents).
//!
//! NOTE: the API key travels in a header, never in the URL, and is never logged.

use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::Prompts;
use crate::util::fill_template;

pub const NO_RESPONSE: &str = "No response generated.";

#[derive(Clone)]
pub struct Assistant {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  /// Explanations.
  pub model: String,
  /// Quiz hints.
  pub hint_model: String,
}

impl Assistant {
  /// Construct the client if we find GEMINI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("GEMINI_BASE_URL")
      .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());
    let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into());
    let hint_model = std::env::var("GEMINI_HINT_MODEL").unwrap_or_else(|_| model.clone());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model, hint_model })
  }

  /// One system instruction + one user turn, plain-text answer.
  #[instrument(level = "info", skip(self, system, user), target = "assistant")]
  async fn generate(&self, model: &str, system: &str, user: &str) -> Result<String, String> {
    let url = generate_url(&self.base_url, model);
    let req = GenerateRequest {
      contents: vec![Content { role: Some("user".into()), parts: vec![Part { text: Some(user.into()) }] }],
      system_instruction: Content { role: None, parts: vec![Part { text: Some(system.into()) }] },
      tools: vec![serde_json::json!({ "google_search": {} })],
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "duel-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_api_error(&body).unwrap_or(body);
      error!(target: "assistant", %status, elapsed = ?start.elapsed(), "Generation request rejected");
      return Err(format!("API call failed with status {}: {}", status, msg));
    }

    let body: GenerateResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage_metadata {
      info!(target: "assistant", prompt_tokens = ?usage.prompt_token_count, candidate_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, elapsed = ?start.elapsed(), "Generation usage");
    }
    Ok(response_text(&body))
  }

  #[instrument(level = "info", skip(self, prompts, topic, style), fields(topic_len = topic.len(), %style), target = "assistant")]
  pub async fn explain(&self, prompts: &Prompts, topic: &str, style: &str) -> Result<String, String> {
    let system = fill_template(&prompts.explain_system, &[("style", style)]);
    let user = fill_template(&prompts.explain_user_template, &[("topic", topic), ("style", style)]);
    self.generate(&self.model, &system, &user).await
  }

  #[instrument(level = "info", skip(self, prompts, question, style), fields(question_len = question.len(), %style), target = "assistant")]
  pub async fn quiz_hint(&self, prompts: &Prompts, question: &str, style: &str) -> Result<String, String> {
    let system = fill_template(&prompts.hint_system, &[("style", style)]);
    let user = fill_template(&prompts.hint_user_template, &[("question", question), ("style", style)]);
    self.generate(&self.hint_model, &system, &user).await
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
  contents: Vec<Content>,
  system_instruction: Content,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  tools: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<Usage>,
}

#[derive(Deserialize)]
struct Candidate {
  #[serde(default)] content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Usage {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

fn generate_url(base_url: &str, model: &str) -> String {
  format!("{}/models/{}:generateContent", base_url.trim_end_matches('/'), model)
}

/// First candidate's first text part, or the fixed fallback line.
fn response_text(body: &GenerateResponse) -> String {
  body.candidates.first()
    .and_then(|c| c.content.as_ref())
    .and_then(|c| c.parts.first())
    .and_then(|p| p.text.as_deref())
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .unwrap_or(NO_RESPONSE)
    .to_string()
}

/// Try to extract a clean error message from an API error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn picks_first_candidate_text() {
    let body: GenerateResponse = serde_json::from_str(r#"{
      "candidates": [{ "content": { "role": "model", "parts": [{ "text": " An array is a list. " }] } }],
      "usageMetadata": { "promptTokenCount": 12, "totalTokenCount": 30 }
    }"#).unwrap();
    assert_eq!(response_text(&body), "An array is a list.");
    assert_eq!(body.usage_metadata.unwrap().prompt_token_count, Some(12));
  }

  #[test]
  fn empty_responses_fall_back() {
    let body: GenerateResponse = serde_json::from_str(r#"{ "candidates": [] }"#).unwrap();
    assert_eq!(response_text(&body), NO_RESPONSE);
    let body: GenerateResponse = serde_json::from_str(r#"{ "candidates": [{ "content": { "parts": [] } }] }"#).unwrap();
    assert_eq!(response_text(&body), NO_RESPONSE);
  }

  #[test]
  fn request_uses_camel_case_system_instruction() {
    let req = GenerateRequest {
      contents: vec![Content { role: Some("user".into()), parts: vec![Part { text: Some("q".into()) }] }],
      system_instruction: Content { role: None, parts: vec![Part { text: Some("s".into()) }] },
      tools: vec![],
    };
    let v = serde_json::to_value(&req).unwrap();
    assert_eq!(v["systemInstruction"]["parts"][0]["text"], "s");
    assert!(v["systemInstruction"].get("role").is_none());
    assert!(v.get("tools").is_none());
  }

  #[test]
  fn url_targets_the_requested_model() {
    assert_eq!(
      generate_url("https://example.test/v1beta/", "gemini-pro"),
      "https://example.test/v1beta/models/gemini-pro:generateContent"
    );
  }

  #[test]
  fn extracts_api_error_message() {
    assert_eq!(extract_api_error(r#"{"error":{"code":400,"message":"API key not valid"}}"#).as_deref(), Some("API key not valid"));
    assert_eq!(extract_api_error("<html>"), None);
  }
}
