/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Slack Web API client, inbound payload parsing, and request signing.
//!
//! All outbound calls return `Result<_, String>` — Slack failures are
//! reported upward as text and never panic a handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::blocks::Rendered;

const SLACK_API_BASE: &str = "https://slack.com/api";

// ---------------------------------------------------------------------------
// Request signature verification
// ---------------------------------------------------------------------------

/// Verify a Slack request signature (`v0=` HMAC-SHA256 over
/// `v0:{timestamp}:{body}`). Requests older than 5 minutes are rejected to
/// prevent replay.
pub fn verify_signature(signing_secret: &str, timestamp: &str, body: &str, signature: &str) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > 300 {
        return false;
    }

    let basestring = format!("v0:{timestamp}:{body}");
    let mut mac = match Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(basestring.as_bytes());
    let computed = format!("v0={}", hex_encode(mac.finalize().into_bytes().as_slice()));
    constant_time_eq(computed.as_bytes(), signature.as_bytes())
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ---------------------------------------------------------------------------
// Inbound event payloads
// ---------------------------------------------------------------------------

/// A message-like event (`app_mention` or `message`) lifted out of the
/// Events API envelope.
#[derive(Clone, Debug, Default)]
pub struct MessageEvent {
    pub event_type: String,
    pub channel: String,
    pub user: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub channel_type: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl MessageEvent {
    pub fn parse(event: &Value) -> Self {
        let get = |key: &str| {
            event
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            event_type: get("type").unwrap_or_default(),
            channel: get("channel").unwrap_or_default(),
            user: get("user").unwrap_or_default(),
            text: get("text").unwrap_or_default(),
            ts: get("ts").unwrap_or_default(),
            thread_ts: get("thread_ts"),
            channel_type: get("channel_type"),
            bot_id: get("bot_id"),
            subtype: get("subtype"),
        }
    }

    /// The key of the reply chain this event belongs to.
    pub fn thread_key(&self) -> String {
        self.thread_ts.clone().unwrap_or_else(|| self.ts.clone())
    }

    pub fn is_dm(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }
}

/// Strip the bot's own `<@U…>` mention from message text.
pub fn strip_bot_mention(text: &str, bot_user_id: &str) -> String {
    let needle = format!("<@{bot_user_id}>");
    text.replace(&needle, "").trim().to_string()
}

/// Replace every `<@U…>` (optionally `<@U…|name>`) mention with a resolved
/// display name from the given map, or the raw id when unknown.
pub fn replace_mentions(text: &str, names: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('>') {
            Some(end) => {
                let inner = &after[..end];
                let id = inner.split('|').next().unwrap_or(inner);
                match names.get(id) {
                    Some(name) => out.push_str(name),
                    None => out.push_str(id),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("<@");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Web API client
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SlackUser {
    pub id: String,
    pub display_name: String,
    pub is_bot: bool,
}

#[derive(Clone, Debug)]
pub struct HistoryMessage {
    pub user: Option<String>,
    pub text: String,
    pub bot_id: Option<String>,
    pub ts: String,
}

pub struct SlackClient {
    http: reqwest::Client,
    bot_token: String,
}

impl SlackClient {
    pub fn new(bot_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { http, bot_token }
    }

    async fn api_post(&self, method: &str, payload: &Value) -> Result<Value, String> {
        let url = format!("{SLACK_API_BASE}/{method}");
        debug!(method = method, "slack api call");
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .header("Content-Type", "application/json; charset=utf-8")
            .json(payload)
            .send()
            .await
            .map_err(|e| format!("slack request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("slack API returned {status}: {body}"));
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse slack response: {e}"))?;
        if !parsed["ok"].as_bool().unwrap_or(false) {
            let error = parsed["error"].as_str().unwrap_or("unknown_error");
            return Err(format!("slack API error: {error}"));
        }
        Ok(parsed)
    }

    async fn api_get(&self, method_and_query: &str) -> Result<Value, String> {
        let url = format!("{SLACK_API_BASE}/{method_and_query}");
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .send()
            .await
            .map_err(|e| format!("slack request failed: {e}"))?;

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse slack response: {e}"))?;
        if !parsed["ok"].as_bool().unwrap_or(false) {
            let error = parsed["error"].as_str().unwrap_or("unknown_error");
            return Err(format!("slack API error: {error}"));
        }
        Ok(parsed)
    }

    /// Post a message; returns its `ts`. `metadata`, when given, is attached
    /// as `{event_type, event_payload}` and is the durable side of every
    /// interactive preview.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        rendered: &Rendered,
        metadata: Option<Value>,
    ) -> Result<String, String> {
        let mut payload = json!({
            "channel": channel,
            "text": rendered.text,
            "blocks": rendered.blocks,
        });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = json!(ts);
        }
        if let Some(meta) = metadata {
            payload["metadata"] = meta;
        }
        let resp = self.api_post("chat.postMessage", &payload).await?;
        Ok(resp["ts"].as_str().unwrap_or_default().to_string())
    }

    /// Replace a posted message's blocks and text in place.
    pub async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        rendered: &Rendered,
    ) -> Result<(), String> {
        let payload = json!({
            "channel": channel,
            "ts": ts,
            "text": rendered.text,
            "blocks": rendered.blocks,
        });
        self.api_post("chat.update", &payload).await.map(|_| ())
    }

    pub async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        rendered: &Rendered,
    ) -> Result<(), String> {
        let payload = json!({
            "channel": channel,
            "user": user,
            "text": rendered.text,
            "blocks": rendered.blocks,
        });
        self.api_post("chat.postEphemeral", &payload).await.map(|_| ())
    }

    pub async fn open_view(&self, trigger_id: &str, view: Value) -> Result<(), String> {
        let payload = json!({ "trigger_id": trigger_id, "view": view });
        self.api_post("views.open", &payload).await.map(|_| ())
    }

    /// Resolve the bot's own user id. Called once at startup and cached.
    pub async fn auth_test(&self) -> Result<String, String> {
        let resp = self.api_post("auth.test", &json!({})).await?;
        Ok(resp["user_id"].as_str().unwrap_or_default().to_string())
    }

    pub async fn list_users(&self) -> Result<Vec<SlackUser>, String> {
        let resp = self.api_get("users.list?limit=200").await?;
        let users = resp["members"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|u| SlackUser {
                        id: u["id"].as_str().unwrap_or_default().to_string(),
                        display_name: pick_display_name(u),
                        is_bot: u["is_bot"].as_bool().unwrap_or(false),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(users)
    }

    pub async fn user_info(&self, user_id: &str) -> Result<SlackUser, String> {
        let resp = self.api_get(&format!("users.info?user={user_id}")).await?;
        let u = &resp["user"];
        Ok(SlackUser {
            id: u["id"].as_str().unwrap_or(user_id).to_string(),
            display_name: pick_display_name(u),
            is_bot: u["is_bot"].as_bool().unwrap_or(false),
        })
    }

    /// Most recent channel messages, newest first (Slack's native order).
    pub async fn channel_history(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<HistoryMessage>, String> {
        let resp = self
            .api_get(&format!("conversations.history?channel={channel}&limit={limit}"))
            .await?;
        Ok(parse_history(&resp))
    }
}

fn pick_display_name(user: &Value) -> String {
    let profile = &user["profile"];
    for candidate in [
        profile["display_name"].as_str(),
        profile["real_name"].as_str(),
        user["real_name"].as_str(),
        user["name"].as_str(),
    ]
    .into_iter()
    .flatten()
    {
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    user["id"].as_str().unwrap_or_default().to_string()
}

fn parse_history(resp: &Value) -> Vec<HistoryMessage> {
    resp["messages"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|m| HistoryMessage {
                    user: m["user"].as_str().map(str::to_string),
                    text: m["text"].as_str().unwrap_or_default().to_string(),
                    bot_id: m["bot_id"].as_str().map(str::to_string),
                    ts: m["ts"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// User directory cache
// ---------------------------------------------------------------------------

/// Lazily-populated user-id → display-name cache. On `missing_scope` the
/// static map from configuration takes over; individual lookups are cached
/// opportunistically either way.
pub struct UserDirectory {
    cache: RwLock<HashMap<String, String>>,
    bulk_loaded: AtomicBool,
    fallback: HashMap<String, String>,
}

impl UserDirectory {
    pub fn new(fallback: HashMap<String, String>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            bulk_loaded: AtomicBool::new(false),
            fallback,
        }
    }

    /// Resolve one user id to a display name.
    pub async fn display_name(&self, client: &SlackClient, user_id: &str) -> String {
        if let Some(name) = self.cache.read().await.get(user_id) {
            return name.clone();
        }
        if let Some(name) = self.fallback.get(user_id) {
            return name.clone();
        }

        match client.user_info(user_id).await {
            Ok(user) => {
                let name = user.display_name;
                self.cache
                    .write()
                    .await
                    .insert(user_id.to_string(), name.clone());
                name
            }
            Err(e) => {
                warn!(user_id = user_id, error = %e, "user lookup failed");
                user_id.to_string()
            }
        }
    }

    /// Replace every mention in `text` with a display name, bulk-loading the
    /// workspace directory on first use.
    pub async fn resolve_mentions(&self, client: &SlackClient, text: &str) -> String {
        if !text.contains("<@") {
            return text.to_string();
        }

        if !self.bulk_loaded.swap(true, Ordering::AcqRel) {
            match client.list_users().await {
                Ok(users) => {
                    let mut cache = self.cache.write().await;
                    for user in users {
                        cache.insert(user.id, user.display_name);
                    }
                }
                Err(e) if e.contains("missing_scope") => {
                    warn!("users.list missing scope — using static user map");
                    let mut cache = self.cache.write().await;
                    for (id, name) in &self.fallback {
                        cache.insert(id.clone(), name.clone());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "users.list failed");
                }
            }
        }

        let cache = self.cache.read().await;
        let mut names = cache.clone();
        for (id, name) in &self.fallback {
            names.entry(id.clone()).or_insert_with(|| name.clone());
        }
        replace_mentions(text, &names)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:{body}").as_bytes());
        format!("v0={}", hex_encode(mac.finalize().into_bytes().as_slice()))
    }

    #[test]
    fn test_verify_signature_valid() {
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = sign("secret", &ts, "payload=x");
        assert!(verify_signature("secret", &ts, "payload=x", &sig));
    }

    #[test]
    fn test_verify_signature_tampered_body() {
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = sign("secret", &ts, "payload=x");
        assert!(!verify_signature("secret", &ts, "payload=y", &sig));
    }

    #[test]
    fn test_verify_signature_replay_window() {
        let old_ts = (chrono::Utc::now().timestamp() - 600).to_string();
        let sig = sign("secret", &old_ts, "body");
        assert!(!verify_signature("secret", &old_ts, "body", &sig));
        assert!(!verify_signature("secret", "not-a-number", "body", "v0=ffff"));
    }

    #[test]
    fn test_message_event_parse() {
        let event = serde_json::json!({
            "type": "app_mention",
            "channel": "C123",
            "user": "U456",
            "text": "<@UBOT> what is the status?",
            "ts": "1700000000.000001",
            "thread_ts": "1699999999.000001",
        });
        let parsed = MessageEvent::parse(&event);
        assert_eq!(parsed.event_type, "app_mention");
        assert_eq!(parsed.thread_key(), "1699999999.000001");
        assert!(!parsed.is_dm());

        let root = serde_json::json!({
            "type": "message", "channel": "D1", "user": "U1",
            "text": "hi", "ts": "1.2", "channel_type": "im",
        });
        let parsed = MessageEvent::parse(&root);
        assert_eq!(parsed.thread_key(), "1.2", "root message keys on its own ts");
        assert!(parsed.is_dm());
    }

    #[test]
    fn test_strip_bot_mention() {
        assert_eq!(
            strip_bot_mention("<@UBOT> what is the status?", "UBOT"),
            "what is the status?"
        );
        assert_eq!(strip_bot_mention("<@UBOT>", "UBOT"), "");
        assert_eq!(strip_bot_mention("no mention here", "UBOT"), "no mention here");
    }

    #[test]
    fn test_replace_mentions() {
        let mut names = HashMap::new();
        names.insert("U1".to_string(), "Dana".to_string());
        assert_eq!(
            replace_mentions("ask <@U1> about it", &names),
            "ask Dana about it"
        );
        assert_eq!(
            replace_mentions("ping <@U2>", &names),
            "ping U2",
            "unknown ids degrade to the raw id"
        );
        assert_eq!(
            replace_mentions("piped <@U1|dana>", &names),
            "piped Dana"
        );
        assert_eq!(replace_mentions("broken <@U1", &names), "broken <@U1");
    }

    #[test]
    fn test_pick_display_name_preference_order() {
        let user = serde_json::json!({
            "id": "U9",
            "name": "dkay",
            "real_name": "Dana Kay",
            "profile": { "display_name": "", "real_name": "Dana K." }
        });
        assert_eq!(pick_display_name(&user), "Dana K.");

        let bare = serde_json::json!({ "id": "U9", "profile": {} });
        assert_eq!(pick_display_name(&bare), "U9");
    }

    #[test]
    fn test_parse_history() {
        let resp = serde_json::json!({
            "ok": true,
            "messages": [
                { "ts": "3.0", "text": "newest", "user": "U1" },
                { "ts": "2.0", "text": "bot note", "bot_id": "B1" },
                { "ts": "1.0", "text": "oldest", "user": "U2" },
            ]
        });
        let messages = parse_history(&resp);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text, "newest");
        assert!(messages[1].bot_id.is_some());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
