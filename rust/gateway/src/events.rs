/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Inbound HTTP surface: Slack events, slash commands, interactivity,
//! the agent-notify webhook, and the Google OAuth callback.
//!
//! Slack expects an answer within three seconds, so event handling follows
//! the acknowledge-then-work pattern: verify, spawn the real work, return
//! 200 immediately. No handler failure ever propagates past this module.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::blocks;
use crate::handlers::{self, EventCtx};
use crate::intent::{self, AgentKey, Classification, Intent};
use crate::preview::{self, MeetingPreviewPayload, TaskPreviewPayload};
use crate::slack::{self, MessageEvent};
use crate::store::MeetingStatus;
use crate::AppState;

// ---------------------------------------------------------------------------
// Form decoding (Slack sends slash commands and interactivity as forms)
// ---------------------------------------------------------------------------

pub fn urldecode(s: &str) -> String {
    let s = s.replace('+', " ");
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                result.push(byte as char);
            } else {
                result.push('%');
                result.push_str(&hex);
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn parse_form(body: &str) -> std::collections::HashMap<String, String> {
    body.split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((urldecode(key), urldecode(value)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Signature guard
// ---------------------------------------------------------------------------

fn signature_ok(state: &AppState, headers: &HeaderMap, body: &str) -> bool {
    let Some(ref secret) = state.config.slack.signing_secret else {
        return true; // verification disabled
    };
    let timestamp = headers
        .get("X-Slack-Request-Timestamp")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let signature = headers
        .get("X-Slack-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    slack::verify_signature(secret, timestamp, body, signature)
}

// ---------------------------------------------------------------------------
// Loop suppression
// ---------------------------------------------------------------------------

/// True when an event must be dropped silently: bot-authored, edited or
/// otherwise subtyped, or our own echo.
pub fn should_suppress(event: &MessageEvent, bot_user_id: &str) -> bool {
    if event.bot_id.is_some() {
        return true;
    }
    if event.subtype.is_some() {
        return true;
    }
    !bot_user_id.is_empty() && event.user == bot_user_id
}

// ---------------------------------------------------------------------------
// POST /slack/events
// ---------------------------------------------------------------------------

pub async fn slack_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !signature_ok(&state, &headers, &body) {
        warn!("slack event signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let payload: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid json: {e}")).into_response(),
    };

    match payload.get("type").and_then(|t| t.as_str()) {
        Some("url_verification") => {
            let challenge = payload
                .get("challenge")
                .and_then(|c| c.as_str())
                .unwrap_or("");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                challenge.to_string(),
            )
                .into_response()
        }
        Some("event_callback") => {
            if let Some(event) = payload.get("event").cloned() {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    process_event(&state, &event).await;
                });
            }
            (StatusCode::OK, "ok").into_response()
        }
        _ => (StatusCode::OK, "ignored").into_response(),
    }
}

async fn process_event(state: &Arc<AppState>, event: &Value) {
    let parsed = MessageEvent::parse(event);
    let bot_user_id = state.bot_user_id.read().await.clone();

    if should_suppress(&parsed, &bot_user_id) {
        return;
    }

    match parsed.event_type.as_str() {
        "app_mention" => handle_addressed_message(state, &parsed, &bot_user_id).await,
        "message" if parsed.is_dm() && parsed.thread_ts.is_none() => {
            handle_addressed_message(state, &parsed, &bot_user_id).await;
        }
        "message" if parsed.thread_ts.is_some() => {
            // A threaded reply that mentions the bot also arrives as an
            // app_mention; let that path handle it once.
            if bot_user_id.is_empty() || !parsed.text.contains(&format!("<@{bot_user_id}>")) {
                handle_thread_reply(state, &parsed).await;
            }
        }
        _ => {}
    }
}

/// Mention and DM flow: resolve mentions, classify, pin the session, and
/// dispatch to the intent handler.
async fn handle_addressed_message(state: &Arc<AppState>, event: &MessageEvent, bot_user_id: &str) {
    let stripped = slack::strip_bot_mention(&event.text, bot_user_id);
    let text = state
        .directory
        .resolve_mentions(&state.slack, &stripped)
        .await;

    if text.is_empty() {
        // A bare mention gets a greeting threaded on the triggering message.
        if let Err(e) = state
            .slack
            .post_message(&event.channel, Some(&event.ts), &blocks::greeting(), None)
            .await
        {
            warn!(error = %e, "failed to post greeting");
        }
        return;
    }

    let thread_ts = event.thread_key();

    if let Err(e) = state
        .slack
        .post_ephemeral(&event.channel, &event.user, &blocks::loading())
        .await
    {
        // Purely cosmetic; the real reply still lands in the thread.
        warn!(error = %e, "failed to post loading indicator");
    }

    let classification = intent::classify(&text, &state.llm).await;

    // Session is pinned before any long-running call so a concurrent
    // follow-up in the same thread observes a stable context id.
    state
        .sessions
        .upsert(&thread_ts, classification.agent, classification.intent)
        .await;

    let ctx = EventCtx {
        channel: event.channel.clone(),
        thread_ts,
        user: event.user.clone(),
        text,
    };
    handlers::dispatch(state, classification, &ctx).await;
}

/// Thread continuation: no re-classification, straight to agent-chat.
async fn handle_thread_reply(state: &Arc<AppState>, event: &MessageEvent) {
    let Some(ref thread_ts) = event.thread_ts else {
        return;
    };
    if event.text.is_empty() {
        return;
    }

    let Some(session) = state.sessions.get(thread_ts).await else {
        return; // not a conversation we track
    };

    // In channels only agent-chat threads stay interactive; other intents
    // are single-shot previews. DMs keep every thread alive.
    if !event.is_dm() && session.intent != Some(Intent::AgentChat) {
        return;
    }

    let text = state
        .directory
        .resolve_mentions(&state.slack, &event.text)
        .await;
    let ctx = EventCtx {
        channel: event.channel.clone(),
        thread_ts: thread_ts.clone(),
        user: event.user.clone(),
        text,
    };
    handlers::dispatch(
        state,
        Classification {
            intent: Intent::AgentChat,
            agent: session.agent,
        },
        &ctx,
    )
    .await;
}

// ---------------------------------------------------------------------------
// POST /slack/commands
// ---------------------------------------------------------------------------

fn ephemeral(text: &str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        json!({ "response_type": "ephemeral", "text": text }).to_string(),
    )
        .into_response()
}

pub async fn slack_commands(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !signature_ok(&state, &headers, &body) {
        warn!("slash command signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let form = parse_form(&body);
    let command = form.get("command").cloned().unwrap_or_default();
    let text = form.get("text").cloned().unwrap_or_default();
    let user = form.get("user_id").cloned().unwrap_or_default();
    let channel = form.get("channel_id").cloned().unwrap_or_default();

    info!(command = %command, user = %user, "slash command");

    let ctx = EventCtx {
        channel,
        thread_ts: String::new(),
        user,
        text: text.clone(),
    };

    match command.as_str() {
        "/agents" => {
            let agents = &state.config.agents;
            ephemeral(&format!(
                "Worker agents:\n• Product Owner — {}\n• Developer — {}\n• Reviewer — {}\n• Scrum Master — {}",
                agents.product_owner_url,
                agents.developer_url,
                agents.reviewer_url,
                agents.scrum_master_url,
            ))
        }
        "/status" => {
            spawn_dispatch(&state, Intent::BoardStatus, AgentKey::ScrumMaster, ctx);
            ephemeral("Fetching the board status…")
        }
        "/scheduler" => scheduler_command(&state, &text).await,
        "/google" => google_command(&state, &ctx.user, &text).await,
        "/gcal" => {
            if text.is_empty() {
                return ephemeral("Usage: /gcal <what you want to know or do>");
            }
            spawn_dispatch(&state, Intent::Calendar, AgentKey::ProductOwner, ctx);
            ephemeral("Checking your calendar…")
        }
        "/gdrive" => {
            if text.is_empty() {
                return ephemeral("Usage: /gdrive <what to find>");
            }
            spawn_dispatch(&state, Intent::Drive, AgentKey::ProductOwner, ctx);
            ephemeral("Searching your drive…")
        }
        "/create-task" => {
            spawn_dispatch(&state, Intent::CreateTask, AgentKey::ProductOwner, ctx);
            ephemeral("Drafting a task from the recent conversation…")
        }
        "/meeting-sync" => {
            spawn_dispatch(&state, Intent::MeetingSync, AgentKey::ProductOwner, ctx);
            ephemeral("Checking recent meetings…")
        }
        other => ephemeral(&format!("Unknown command: {other}")),
    }
}

fn spawn_dispatch(state: &Arc<AppState>, intent: Intent, agent: AgentKey, ctx: EventCtx) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        handlers::dispatch(&state, Classification { intent, agent }, &ctx).await;
    });
}

async fn scheduler_command(state: &Arc<AppState>, text: &str) -> Response {
    let mut parts = text.split_whitespace();
    match parts.next() {
        Some("run") => {
            let Some(job_id) = parts.next() else {
                return ephemeral("Usage: /scheduler run <job-id>");
            };
            if state.scheduler.trigger(job_id).await {
                ephemeral(&format!("Job `{job_id}` triggered."))
            } else {
                ephemeral(&format!("Job `{job_id}` is unknown or already running."))
            }
        }
        _ => {
            let statuses = state.scheduler.get_status().await;
            if statuses.is_empty() {
                return ephemeral("No scheduled jobs registered.");
            }
            let lines: Vec<String> = statuses
                .iter()
                .map(|s| {
                    format!(
                        "• `{}` ({}) — {} | failures: {} | last run: {}",
                        s.id,
                        s.cron_expression,
                        if s.enabled { "enabled" } else { "disabled" },
                        s.consecutive_failures,
                        s.last_run
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string()),
                    )
                })
                .collect();
            ephemeral(&format!("Scheduled jobs:\n{}", lines.join("\n")))
        }
    }
}

async fn google_command(state: &Arc<AppState>, user: &str, text: &str) -> Response {
    let Some(ref broker) = state.broker else {
        return ephemeral("Google integration is not configured on this deployment.");
    };

    match text.trim() {
        "connect" => ephemeral(&format!(
            "Connect your Google account: {}",
            broker.auth_url(user)
        )),
        "disconnect" => match broker.disconnect(user).await {
            Ok(()) => ephemeral("Google account disconnected."),
            Err(e) => {
                warn!(error = %e, "disconnect failed");
                ephemeral("Disconnect failed. Check the gateway logs.")
            }
        },
        "status" => {
            if broker.is_connected(user).await {
                ephemeral("Google account: connected.")
            } else {
                ephemeral("Google account: not connected. Use `/google connect`.")
            }
        }
        _ => ephemeral("Usage: /google <connect|disconnect|status>"),
    }
}

// ---------------------------------------------------------------------------
// POST /slack/interactive
// ---------------------------------------------------------------------------

pub async fn slack_interactive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !signature_ok(&state, &headers, &body) {
        warn!("interactivity signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let form = parse_form(&body);
    let Some(raw_payload) = form.get("payload") else {
        return (StatusCode::BAD_REQUEST, "missing payload").into_response();
    };
    let payload: Value = match serde_json::from_str(raw_payload) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid payload: {e}")).into_response(),
    };

    match payload["type"].as_str() {
        Some("block_actions") => handle_block_action(&state, &payload).await,
        Some("view_submission") => handle_view_submission(&state, &payload).await,
        other => {
            info!(kind = ?other, "ignoring interactivity payload");
        }
    }

    StatusCode::OK.into_response()
}

async fn handle_block_action(state: &Arc<AppState>, payload: &Value) {
    let action_id = payload["actions"][0]["action_id"].as_str().unwrap_or("");
    let channel = payload["channel"]["id"].as_str().unwrap_or("").to_string();
    let message_ts = payload["message"]["ts"].as_str().unwrap_or("").to_string();
    let actor = payload["user"]["id"].as_str().unwrap_or("").to_string();
    let trigger_id = payload["trigger_id"].as_str().unwrap_or("").to_string();
    let metadata = &payload["message"]["metadata"];

    info!(action = action_id, channel = %channel, "block action");

    match action_id {
        "mention_create_task" => {
            let Some(task_payload) = TaskPreviewPayload::from_metadata(metadata) else {
                warn!("create action without task metadata");
                return;
            };
            if !state.begin_interaction(&message_ts).await {
                info!("duplicate create click suppressed");
                return;
            }
            let state = Arc::clone(state);
            tokio::spawn(async move {
                submit_task(&state, &task_payload.task, None, &channel, &message_ts, &actor).await;
                state.end_interaction(&message_ts).await;
            });
        }
        "mention_edit_task" => {
            let Some(task_payload) = TaskPreviewPayload::from_metadata(metadata) else {
                warn!("edit action without task metadata");
                return;
            };
            let modal = preview::task_edit_modal(&task_payload, &message_ts);
            if let Err(e) = state.slack.open_view(&trigger_id, modal).await {
                warn!(error = %e, "failed to open task edit modal");
            }
        }
        "mention_cancel_task" => {
            let rendered = blocks::task_cancelled(&actor);
            if let Err(e) = state.slack.update_message(&channel, &message_ts, &rendered).await {
                warn!(error = %e, "failed to update cancelled preview");
            }
        }
        "meeting_approve" => {
            let Some(meeting_payload) = MeetingPreviewPayload::from_metadata(metadata) else {
                warn!("approve action without meeting metadata");
                return;
            };
            let boards = state.monday.boards().await;
            let modal = preview::meeting_edit_modal(&meeting_payload, &message_ts, &boards);
            if let Err(e) = state.slack.open_view(&trigger_id, modal).await {
                warn!(error = %e, "failed to open meeting edit modal");
            }
        }
        "meeting_dismiss" => {
            let Some(meeting_payload) = MeetingPreviewPayload::from_metadata(metadata) else {
                warn!("dismiss action without meeting metadata");
                return;
            };
            if let Err(e) = state
                .meetings
                .set_status(&meeting_payload.event_id, MeetingStatus::Dismissed, None)
                .await
            {
                warn!(error = %e, "failed to mark meeting dismissed");
            }
            let rendered = blocks::meeting_dismissed(&meeting_payload.title, &actor);
            if let Err(e) = state.slack.update_message(&channel, &message_ts, &rendered).await {
                warn!(error = %e, "failed to update dismissed preview");
            }
        }
        other => {
            info!(action = other, "unhandled block action");
        }
    }
}

/// Send the final task prompt to the product-owner agent and replace the
/// preview message with the outcome.
async fn submit_task(
    state: &Arc<AppState>,
    task: &crate::llm::ExtractedTask,
    board: Option<&str>,
    channel: &str,
    message_ts: &str,
    actor: &str,
) {
    let prompt = preview::create_task_prompt(task, board);
    let url = AgentKey::ProductOwner.url(&state.config.agents);
    let resp = state.a2a.send_message(url, &prompt, None).await;

    let rendered = match resp.error {
        Some(err) => blocks::error(&format!("Task creation failed: {}", err.message)),
        None => blocks::task_created(&task.name, actor),
    };
    if let Err(e) = state.slack.update_message(channel, message_ts, &rendered).await {
        warn!(error = %e, "failed to update task preview");
    }
}

async fn handle_view_submission(state: &Arc<AppState>, payload: &Value) {
    let callback_id = payload["view"]["callback_id"].as_str().unwrap_or("");
    let values = &payload["view"]["state"]["values"];
    let actor = payload["user"]["id"].as_str().unwrap_or("").to_string();
    let private: Value = payload["view"]["private_metadata"]
        .as_str()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let channel = private["channel"].as_str().unwrap_or("").to_string();
    let message_ts = private["message_ts"].as_str().unwrap_or("").to_string();

    info!(callback = callback_id, "view submission");

    match callback_id {
        "create_task_submit" => {
            let (task, board) = preview::parse_task_submission(values);
            let state = Arc::clone(state);
            tokio::spawn(async move {
                submit_task(&state, &task, board.as_deref(), &channel, &message_ts, &actor).await;
            });
        }
        "meeting_edit_submit" => {
            let (analysis, board) = preview::parse_meeting_submission(values);
            let event_id = private["event_id"].as_str().unwrap_or("").to_string();
            let title = private["title"].as_str().unwrap_or("").to_string();
            let state = Arc::clone(state);
            tokio::spawn(async move {
                let prompt = preview::meeting_tasks_prompt(&title, &analysis, board.as_deref());
                let url = AgentKey::ProductOwner.url(&state.config.agents);
                let resp = state.a2a.send_message(url, &prompt, None).await;

                let rendered = match resp.error {
                    Some(err) => {
                        blocks::error(&format!("Task creation failed: {}", err.message))
                    }
                    None => {
                        if let Err(e) = state
                            .meetings
                            .set_status(&event_id, MeetingStatus::Approved, None)
                            .await
                        {
                            warn!(error = %e, "failed to mark meeting approved");
                        }
                        blocks::meeting_approved(&title, &actor)
                    }
                };
                if !channel.is_empty() && !message_ts.is_empty() {
                    if let Err(e) = state
                        .slack
                        .update_message(&channel, &message_ts, &rendered)
                        .await
                    {
                        warn!(error = %e, "failed to update meeting preview");
                    }
                }
            });
        }
        other => {
            info!(callback = other, "unhandled view submission");
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/agent-notify
// ---------------------------------------------------------------------------

/// Inbound push from a downstream agent: post a message into the workspace.
pub async fn agent_notify(
    State(state): State<Arc<AppState>>,
    body: Result<axum::Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(axum::Json(payload)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({ "ok": false, "error": "invalid JSON body" })),
        )
            .into_response();
    };

    let channel = payload["channel"].as_str().unwrap_or("");
    let text = payload["text"].as_str().unwrap_or("");
    if channel.is_empty() || text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({ "ok": false, "error": "channel and text are required" })),
        )
            .into_response();
    }
    let thread_ts = payload["thread_ts"].as_str();
    let custom_blocks = payload["blocks"].as_array().cloned();

    let rendered = blocks::notification(text, custom_blocks);
    match state
        .slack
        .post_message(channel, thread_ts, &rendered, None)
        .await
    {
        Ok(_) => {
            info!(channel = channel, "agent notification posted");
            axum::Json(json!({ "ok": true })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "agent notification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "ok": false, "error": e })),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/google/callback
// ---------------------------------------------------------------------------

pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let Some(ref broker) = state.broker else {
        return (StatusCode::BAD_REQUEST, "Google integration is not configured.").into_response();
    };
    let (Some(code), Some(oauth_state)) = (params.get("code"), params.get("state")) else {
        return (
            StatusCode::BAD_REQUEST,
            "Missing code or state. Please retry /google connect from Slack.",
        )
            .into_response();
    };

    match broker.handle_callback(code, oauth_state).await {
        Ok(subject) => {
            info!(subject = %subject, "oauth callback completed");
            Html(
                "<html><body style=\"font-family: sans-serif; text-align: center; padding-top: 4em;\">\
                 <h2>Google account connected</h2>\
                 <p>You can close this tab and head back to Slack.</p>\
                 </body></html>",
            )
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "oauth callback rejected");
            (
                StatusCode::BAD_REQUEST,
                "Authorization failed. Please retry /google connect from Slack.",
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let bot_resolved = !state.bot_user_id.read().await.is_empty();
    let status = if bot_resolved { "ok" } else { "degraded" };
    axum::Json(json!({
        "status": status,
        "service": crate::SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "slack_identity": bot_resolved,
            "google": state.broker.is_some(),
        },
    }))
    .into_response()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_urldecode() {
        assert_eq!(urldecode("hello+world"), "hello world");
        assert_eq!(urldecode("foo%20bar"), "foo bar");
        assert_eq!(urldecode("100%25"), "100%");
        assert_eq!(urldecode("broken%2"), "broken%2");
    }

    #[test]
    fn test_parse_form() {
        let form = parse_form("command=%2Fstatus&text=&user_id=U1&channel_id=C2");
        assert_eq!(form.get("command").unwrap(), "/status");
        assert_eq!(form.get("text").unwrap(), "");
        assert_eq!(form.get("user_id").unwrap(), "U1");
        assert_eq!(form.get("channel_id").unwrap(), "C2");
    }

    fn event(bot_id: Option<&str>, subtype: Option<&str>, user: &str) -> MessageEvent {
        MessageEvent {
            event_type: "message".to_string(),
            channel: "C1".to_string(),
            user: user.to_string(),
            text: "hello".to_string(),
            ts: "1.0".to_string(),
            thread_ts: None,
            channel_type: None,
            bot_id: bot_id.map(str::to_string),
            subtype: subtype.map(str::to_string),
        }
    }

    #[test]
    fn test_suppresses_bot_messages() {
        assert!(should_suppress(&event(Some("B1"), None, "U1"), "UBOT"));
    }

    #[test]
    fn test_suppresses_subtypes() {
        assert!(should_suppress(&event(None, Some("message_changed"), "U1"), "UBOT"));
        assert!(should_suppress(&event(None, Some("channel_join"), "U1"), "UBOT"));
    }

    #[test]
    fn test_suppresses_own_echo() {
        assert!(should_suppress(&event(None, None, "UBOT"), "UBOT"));
    }

    #[test]
    fn test_passes_normal_user_message() {
        assert!(!should_suppress(&event(None, None, "U1"), "UBOT"));
    }

    #[test]
    fn test_unresolved_bot_id_does_not_suppress_users() {
        // Before auth.test resolves, only bot_id/subtype rules apply.
        assert!(!should_suppress(&event(None, None, "U1"), ""));
    }
}
