/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! A2A (Agent-to-Agent) JSON-RPC 2.0 client.
//!
//! Outbound counterpart of the protocol the worker agents speak:
//! `message/send` submits a message into an agent conversation and
//! `task/get` polls a task. Context continuity is carried by
//! `params.configuration.context_id` — when no context id is supplied the
//! `configuration` key is omitted entirely, which is how agents distinguish
//! a fresh conversation from a continuation.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Synthetic error code for transport-level failures (timeout, refused
/// connection, unparseable body). Callers branch on `error` vs `result`;
/// this client never returns `Err`.
pub const TRANSPORT_ERROR: i64 = -32000;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct A2aResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<Task>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Task envelope produced by downstream agents. The gateway only reads it.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "contextId")]
    pub context_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub history: Option<serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TaskStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: Option<TaskMessage>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TaskMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// A message part. Agents are inconsistent about the discriminator key —
/// older ones send `type`, newer ones send `kind` — so both are accepted.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct MessagePart {
    #[serde(default, rename = "type")]
    pub part_type: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessagePart {
    fn is_text(&self) -> bool {
        self.part_type.as_deref() == Some("text") || self.kind.as_deref() == Some("text")
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct A2aClient {
    http: reqwest::Client,
    api_key: Option<String>,
    timeout: std::time::Duration,
}

impl A2aClient {
    /// Build a client. `api_key` is sent as `X-API-Key` on every request
    /// when configured. Agents may be slow; the default deadline is 120 s
    /// and a missed deadline is reported as an error response, not thrown.
    pub fn new(api_key: Option<String>, timeout_seconds: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            timeout: std::time::Duration::from_secs(timeout_seconds),
        }
    }

    /// Send a message to an agent, optionally continuing an existing
    /// conversation context.
    pub async fn send_message(
        &self,
        agent_base_url: &str,
        text: &str,
        context_id: Option<&str>,
    ) -> A2aResponse {
        let body = build_send_body(text, context_id);
        self.post(agent_base_url, body).await
    }

    /// Query the status of a previously submitted task.
    pub async fn get_task(&self, agent_base_url: &str, task_id: &str) -> A2aResponse {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "task/get",
            "params": { "id": task_id },
        });
        self.post(agent_base_url, body).await
    }

    async fn post(&self, agent_base_url: &str, body: serde_json::Value) -> A2aResponse {
        let correlation_id = Uuid::new_v4().to_string();
        debug!(url = %agent_base_url, correlation_id = %correlation_id, "A2A request");

        let mut req = self
            .http
            .post(agent_base_url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .header("X-Correlation-ID", &correlation_id)
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("X-API-Key", key);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(url = %agent_base_url, "A2A request timed out");
                return transport_error(format!("agent request timed out: {e}"));
            }
            Err(e) => {
                warn!(url = %agent_base_url, error = %e, "A2A request failed");
                return transport_error(format!("agent unreachable: {e}"));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return transport_error(format!("agent returned HTTP {status}: {text}"));
        }

        match resp.json::<A2aResponse>().await {
            Ok(parsed) => parsed,
            Err(e) => transport_error(format!("invalid agent response: {e}")),
        }
    }
}

/// Build the `message/send` request body. The `configuration` key is only
/// present when a context id is supplied.
fn build_send_body(text: &str, context_id: Option<&str>) -> serde_json::Value {
    let mut params = serde_json::json!({
        "message": {
            "role": "user",
            "parts": [{ "type": "text", "text": text }],
            "messageId": Uuid::new_v4().to_string(),
        },
    });
    if let Some(ctx) = context_id {
        params["configuration"] = serde_json::json!({ "context_id": ctx });
    }

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": "message/send",
        "params": params,
    })
}

fn transport_error(message: String) -> A2aResponse {
    A2aResponse {
        jsonrpc: "2.0".to_string(),
        id: None,
        result: None,
        error: Some(RpcError {
            code: TRANSPORT_ERROR,
            message,
        }),
    }
}

/// First text part of the task's status message. Falls back to a bracketed
/// placeholder naming the task and its state when no text part exists.
pub fn extract_text(task: &Task) -> String {
    if let Some(ref msg) = task.status.message {
        for part in &msg.parts {
            if part.is_text() {
                if let Some(ref text) = part.text {
                    return text.clone();
                }
            }
        }
    }
    format!("[Agent task {} is {}]", task.id, task.status.state)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;

    #[test]
    fn test_send_body_includes_context_when_given() {
        let body = build_send_body("hello", Some("ctx-123"));
        assert_eq!(body["method"], "message/send");
        assert_eq!(body["params"]["configuration"]["context_id"], "ctx-123");
        assert_eq!(body["params"]["message"]["role"], "user");
        assert_eq!(body["params"]["message"]["parts"][0]["type"], "text");
        assert_eq!(body["params"]["message"]["parts"][0]["text"], "hello");
    }

    #[test]
    fn test_send_body_omits_configuration_without_context() {
        let body = build_send_body("hello", None);
        assert!(
            body["params"].get("configuration").is_none(),
            "configuration key must be absent — this signals a fresh conversation"
        );
    }

    #[test]
    fn test_send_body_fresh_ids_per_request() {
        let a = build_send_body("x", None);
        let b = build_send_body("x", None);
        assert_ne!(a["id"], b["id"]);
        assert_ne!(
            a["params"]["message"]["messageId"],
            b["params"]["message"]["messageId"]
        );
    }

    #[test]
    fn test_extract_text_type_discriminator() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "t-1",
            "contextId": "c-1",
            "status": {
                "state": "completed",
                "message": { "role": "agent", "parts": [{ "type": "text", "text": "done" }] }
            }
        }))
        .unwrap();
        assert_eq!(extract_text(&task), "done");
        assert_eq!(task.context_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_extract_text_kind_discriminator() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "t-2",
            "status": {
                "state": "completed",
                "message": { "parts": [{ "kind": "text", "text": "also done" }] }
            }
        }))
        .unwrap();
        assert_eq!(extract_text(&task), "also done");
    }

    #[test]
    fn test_extract_text_fallback_placeholder() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "t-3",
            "status": { "state": "working" }
        }))
        .unwrap();
        assert_eq!(extract_text(&task), "[Agent task t-3 is working]");

        let no_text_part: Task = serde_json::from_value(serde_json::json!({
            "id": "t-4",
            "status": {
                "state": "failed",
                "message": { "parts": [{ "type": "data" }] }
            }
        }))
        .unwrap();
        assert_eq!(extract_text(&no_text_part), "[Agent task t-4 is failed]");
    }

    #[tokio::test]
    async fn test_transport_failure_returns_synthetic_error() {
        // Nothing listens on this port.
        let client = A2aClient::new(None, 2);
        let resp = client.send_message("http://127.0.0.1:1", "hi", None).await;
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_context_and_headers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo the received context id back inside the task envelope so the
        // test can assert both requests carried the same one.
        let app = Router::new().route(
            "/",
            post(
                |headers: axum::http::HeaderMap, axum::Json(body): axum::Json<serde_json::Value>| async move {
                    assert!(headers.get("X-Correlation-ID").is_some());
                    assert_eq!(headers.get("X-API-Key").unwrap(), "shared-secret");
                    let ctx = body["params"]["configuration"]["context_id"]
                        .as_str()
                        .unwrap_or("absent")
                        .to_string();
                    axum::Json(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": body["id"],
                        "result": {
                            "id": "task-1",
                            "contextId": ctx,
                            "status": {
                                "state": "completed",
                                "message": { "parts": [{ "kind": "text", "text": "ok" }] }
                            }
                        }
                    }))
                },
            ),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("http://{addr}/");
        let client = A2aClient::new(Some("shared-secret".to_string()), 5);

        let first = client.send_message(&url, "one", Some("ctx-9")).await;
        let second = client.send_message(&url, "two", Some("ctx-9")).await;
        assert_eq!(
            first.result.unwrap().context_id.as_deref(),
            Some("ctx-9")
        );
        assert_eq!(
            second.result.unwrap().context_id.as_deref(),
            Some("ctx-9")
        );

        let fresh = client.send_message(&url, "three", None).await;
        assert_eq!(
            fresh.result.unwrap().context_id.as_deref(),
            Some("absent"),
            "no configuration key may be sent without a context id"
        );
    }

    #[tokio::test]
    async fn test_server_error_field_passes_through() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/",
            post(|| async {
                axum::Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": "x",
                    "error": { "code": -32601, "message": "method not found" }
                }))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = A2aClient::new(None, 5);
        let resp = client.get_task(&format!("http://{addr}/"), "t-1").await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "method not found");
    }
}
