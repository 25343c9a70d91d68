/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Anthropic Messages API client.
//!
//! Three call shapes: plain single-turn completion (intent classifier,
//! extractors), multi-turn with tool definitions (calendar/drive
//! micro-agent), and two structured extractors that parse fenced JSON out
//! of model replies with tolerant fallbacks.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(String),
    #[error("llm api error: {0}")]
    Api(String),
    #[error("llm response parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Domain types produced by the extractors
// ---------------------------------------------------------------------------

/// Task extracted from a Slack conversation, shown in the task preview and
/// ultimately handed to the product-owner agent.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExtractedTask {
    #[serde(default = "default_task_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_status")]
    pub status: String,
}

impl Default for ExtractedTask {
    fn default() -> Self {
        Self {
            name: default_task_name(),
            description: String::new(),
            assignee: String::new(),
            priority: default_priority(),
            status: default_status(),
        }
    }
}

fn default_task_name() -> String {
    "Task from conversation".to_string()
}

fn default_priority() -> String {
    "Medium".to_string()
}

fn default_status() -> String {
    "To Do".to_string()
}

/// Meeting-notes analysis produced from a transcript.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MeetingAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default, alias = "actionItems")]
    pub action_items: Vec<ActionItem>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default, alias = "suggestedBoardId")]
    pub suggested_board_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ActionItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

// ---------------------------------------------------------------------------
// Assistant turn (tool-use aware)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Clone, Debug, Default)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// Raw content blocks, needed verbatim when appending the assistant
    /// message back into the conversation for a tool round-trip.
    pub raw_content: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &waggle_config::LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    /// Single-turn completion. Returns the concatenated text blocks.
    pub async fn complete(&self, system: Option<&str>, user: &str) -> Result<String, LlmError> {
        let messages = vec![serde_json::json!({ "role": "user", "content": user })];
        let turn = self.messages_request(system, &messages, None).await?;
        Ok(turn.text)
    }

    /// One assistant turn over an explicit message list, with optional tool
    /// definitions. The caller owns the loop.
    pub async fn messages_request(
        &self,
        system: Option<&str>,
        messages: &[serde_json::Value],
        tools: Option<&[serde_json::Value]>,
    ) -> Result<AssistantTurn, LlmError> {
        let body = build_messages_body(&self.model, self.max_tokens, system, messages, tools);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %self.model, messages = messages.len(), "llm request");

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        if !status.is_success() {
            let msg = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(LlmError::Api(format!("HTTP {status}: {msg}")));
        }

        parse_messages_response(&payload)
    }

    /// Run the task extractor over a formatted conversation transcript.
    /// Unparseable replies degrade to defaults rather than failing the flow.
    pub async fn extract_task(&self, transcript: &str) -> ExtractedTask {
        const SYSTEM: &str = "You extract a single actionable task from a Slack conversation. \
            Reply with ONLY a JSON object with keys: name (short imperative title), \
            description, assignee (display name or empty string), \
            priority (one of Low, Medium, High, Critical), \
            status (one of To Do, Working on it, In Progress, Done). No prose.";

        let reply = match self.complete(Some(SYSTEM), transcript).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "task extractor call failed — using defaults");
                return ExtractedTask::default();
            }
        };

        parse_extracted_task(&reply)
    }

    /// Run the meeting-notes extractor over a transcript.
    pub async fn analyze_meeting(
        &self,
        title: &str,
        transcript: &str,
    ) -> Result<MeetingAnalysis, LlmError> {
        const SYSTEM: &str = "You analyse a meeting transcript and produce structured notes. \
            Reply with ONLY a JSON object with keys: summary (2-3 sentences), \
            action_items (array of {title, description, assignee?, priority?, deadline?}), \
            decisions (array of strings). Only include action items that were \
            explicitly agreed in the meeting. No prose outside the JSON.";

        let user = format!("Meeting: {title}\n\nTranscript:\n{transcript}");
        let reply = self.complete(Some(SYSTEM), &user).await?;
        let cleaned = strip_code_fences(&reply);
        serde_json::from_str::<MeetingAnalysis>(cleaned)
            .map_err(|e| LlmError::Parse(format!("meeting analysis not valid JSON: {e}")))
    }
}

fn build_messages_body(
    model: &str,
    max_tokens: u32,
    system: Option<&str>,
    messages: &[serde_json::Value],
    tools: Option<&[serde_json::Value]>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
    });
    if let Some(sys) = system {
        body["system"] = serde_json::Value::String(sys.to_string());
    }
    if let Some(defs) = tools {
        if !defs.is_empty() {
            body["tools"] = serde_json::Value::Array(defs.to_vec());
        }
    }
    body
}

fn parse_messages_response(payload: &serde_json::Value) -> Result<AssistantTurn, LlmError> {
    let content = payload
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::Parse("response missing content array".to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or_default(),
                });
            }
            _ => {}
        }
    }

    Ok(AssistantTurn {
        text,
        tool_calls,
        raw_content: serde_json::Value::Array(content.clone()),
    })
}

/// Parse the task extractor reply, degrading to field defaults on anything
/// the model got wrong.
pub fn parse_extracted_task(reply: &str) -> ExtractedTask {
    let cleaned = strip_code_fences(reply);
    match serde_json::from_str::<ExtractedTask>(cleaned) {
        Ok(task) => task,
        Err(e) => {
            warn!(error = %e, "task extractor reply not valid JSON — using defaults");
            ExtractedTask::default()
        }
    }
}

/// Strip a leading/trailing markdown code fence (```json … ```) if present.
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ===========================================================================
// Tests
// ===========================================================================
