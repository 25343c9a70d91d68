/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Intent handlers: one per intent, composing history fetch, context
//! enrichment, the downstream A2A call, and rendering.
//!
//! Handlers are the catch-all boundary — nothing here returns an error to
//! the event dispatcher. Every failure ends as a rendered block in the
//! originating thread.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::a2a::{self, TRANSPORT_ERROR};
use crate::blocks;
use crate::google::{self, GoogleClient};
use crate::intent::{AgentKey, Classification, Intent};
use crate::llm::LlmClient;
use crate::preview;
use crate::slack::HistoryMessage;
use crate::AppState;

/// Hard cap on LLM turns in the calendar/drive micro-agent loop.
const MAX_TOOL_TURNS: usize = 5;

const CHAT_CONTEXT_MESSAGES: usize = 15;
const TASK_CONTEXT_MESSAGES: usize = 20;

/// Coordinates of the inbound event a handler is answering.
#[derive(Clone, Debug)]
pub struct EventCtx {
    pub channel: String,
    pub thread_ts: String,
    pub user: String,
    pub text: String,
}

pub async fn dispatch(state: &Arc<AppState>, classification: Classification, ctx: &EventCtx) {
    info!(
        intent = classification.intent.as_str(),
        agent = classification.agent.as_str(),
        channel = %ctx.channel,
        "dispatching intent"
    );
    match classification.intent {
        Intent::AgentChat => agent_chat(state, classification.agent, ctx).await,
        Intent::BoardStatus => board_status(state, ctx).await,
        Intent::CreateTask => create_task(state, ctx).await,
        Intent::MeetingSync => meeting_sync(state, ctx).await,
        Intent::Calendar => google_micro_agent(state, ctx, GoogleAgentKind::Calendar).await,
        Intent::Drive => google_micro_agent(state, ctx, GoogleAgentKind::Drive).await,
    }
}

async fn post_in_thread(state: &AppState, ctx: &EventCtx, rendered: &blocks::Rendered) {
    // Slash commands carry no thread; their replies land in the channel.
    let thread = (!ctx.thread_ts.is_empty()).then_some(ctx.thread_ts.as_str());
    if let Err(e) = state
        .slack
        .post_message(&ctx.channel, thread, rendered, None)
        .await
    {
        warn!(channel = %ctx.channel, error = %e, "failed to post reply");
    }
}

// ---------------------------------------------------------------------------
// agent-chat
// ---------------------------------------------------------------------------

/// Chronological texts of the most recent non-bot messages.
pub fn recent_texts(history: &[HistoryMessage], limit: usize) -> Vec<String> {
    let mut texts: Vec<String> = history
        .iter()
        .filter(|m| m.bot_id.is_none() && !m.text.is_empty())
        .take(limit)
        .map(|m| m.text.clone())
        .collect();
    texts.reverse();
    texts
}

pub fn compose_chat_prompt(context: &[String], request: &str) -> String {
    if context.is_empty() {
        return format!("User request: {request}");
    }
    let mut prompt = String::from("Recent Slack channel messages for context:\n");
    for line in context {
        prompt.push_str(&format!("- {line}\n"));
    }
    prompt.push_str(&format!("\nUser request: {request}"));
    prompt
}

async fn agent_chat(state: &Arc<AppState>, agent: AgentKey, ctx: &EventCtx) {
    let context_id = match state.sessions.get(&ctx.thread_ts).await {
        Some(session) => session.context_id,
        // The dispatcher upserts before any await, so this is only reachable
        // for synthetic calls; create the session rather than drop the turn.
        None => {
            state
                .sessions
                .upsert(&ctx.thread_ts, agent, Intent::AgentChat)
                .await
        }
    };

    let history = state
        .slack
        .channel_history(&ctx.channel, 30)
        .await
        .unwrap_or_default();
    let context = recent_texts(&history, CHAT_CONTEXT_MESSAGES);
    let prompt = compose_chat_prompt(&context, &ctx.text);

    let url = agent.url(&state.config.agents);
    let resp = state.a2a.send_message(url, &prompt, Some(&context_id)).await;

    let rendered = match (resp.result, resp.error) {
        (_, Some(err)) if err.code == TRANSPORT_ERROR => blocks::warning(&format!(
            "Could not reach the {} agent. It may be offline — try again shortly.",
            agent.display_name()
        )),
        (_, Some(err)) => blocks::error(&err.message),
        (Some(task), None) => blocks::agent_response(agent, &a2a::extract_text(&task)),
        (None, None) => blocks::no_response(),
    };
    post_in_thread(state, ctx, &rendered).await;
}

// ---------------------------------------------------------------------------
// board-status
// ---------------------------------------------------------------------------

async fn board_status(state: &Arc<AppState>, ctx: &EventCtx) {
    let url = AgentKey::ScrumMaster.url(&state.config.agents);

    // A mention passes the user's words through under the thread's context;
    // the slash and scheduled paths ask the fixed question single-shot.
    let (prompt, context_id) = if ctx.text.is_empty() || ctx.thread_ts.is_empty() {
        ("Give me the current board status summary.".to_string(), None)
    } else {
        let context_id = state
            .sessions
            .get(&ctx.thread_ts)
            .await
            .map(|session| session.context_id);
        (ctx.text.clone(), context_id)
    };
    let resp = state
        .a2a
        .send_message(url, &prompt, context_id.as_deref())
        .await;

    let rendered = match (resp.result, resp.error) {
        (_, Some(err)) if err.code == TRANSPORT_ERROR => blocks::warning(&format!(
            "Could not reach the {} agent. It may be offline — try again shortly.",
            AgentKey::ScrumMaster.display_name()
        )),
        (_, Some(err)) => blocks::error(&err.message),
        (Some(task), None) => blocks::status_dashboard(&a2a::extract_text(&task)),
        (None, None) => blocks::no_response(),
    };
    post_in_thread(state, ctx, &rendered).await;
}

// ---------------------------------------------------------------------------
// create-task
// ---------------------------------------------------------------------------

/// True when the trigger message is itself the instruction ("create a task
/// …") rather than conversation content worth extracting from.
pub fn looks_like_imperative(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    ["create", "make a task", "add a task", "new task"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

async fn create_task(state: &Arc<AppState>, ctx: &EventCtx) {
    let history = state
        .slack
        .channel_history(&ctx.channel, 40)
        .await
        .unwrap_or_default();

    // Oldest-first author/text pairs with resolved display names.
    let mut recent: Vec<&HistoryMessage> = history
        .iter()
        .filter(|m| m.bot_id.is_none() && !m.text.is_empty())
        .take(TASK_CONTEXT_MESSAGES)
        .collect();
    recent.reverse();

    let mut lines = Vec::with_capacity(recent.len() + 1);
    for message in recent {
        let author = match message.user.as_deref() {
            Some(id) => state.directory.display_name(&state.slack, id).await,
            None => "someone".to_string(),
        };
        let text = state.directory.resolve_mentions(&state.slack, &message.text).await;
        lines.push(format!("{author}: {text}"));
    }
    if !looks_like_imperative(&ctx.text) {
        let author = state.directory.display_name(&state.slack, &ctx.user).await;
        lines.push(format!("{author}: {}", ctx.text));
    }
    let transcript = lines.join("\n");

    let (task, boards, users) = tokio::join!(
        state.llm.extract_task(&transcript),
        state.monday.boards(),
        state.monday.users(),
    );

    let payload = preview::TaskPreviewPayload {
        task,
        channel: ctx.channel.clone(),
        thread_ts: ctx.thread_ts.clone(),
        user: ctx.user.clone(),
        boards,
        users,
    };
    let rendered = blocks::task_preview(&payload.task);
    let metadata = preview::task_preview_metadata(&payload);

    let thread = (!ctx.thread_ts.is_empty()).then_some(ctx.thread_ts.as_str());
    if let Err(e) = state
        .slack
        .post_message(&ctx.channel, thread, &rendered, Some(metadata))
        .await
    {
        warn!(error = %e, "failed to post task preview");
    }
}

// ---------------------------------------------------------------------------
// meeting-sync
// ---------------------------------------------------------------------------

async fn meeting_sync(state: &Arc<AppState>, ctx: &EventCtx) {
    let (Some(service), Some(broker)) = (&state.meeting_sync, &state.broker) else {
        let rendered = blocks::error("Google integration is not configured on this deployment.");
        post_in_thread(state, ctx, &rendered).await;
        return;
    };

    match service.check_recent_meetings(&ctx.user).await {
        Ok(report) => {
            let rendered = blocks::sync_report(
                report.meetings_found,
                report.transcripts_found,
                report.previews_posted,
                report.skipped,
                report.errors,
            );
            post_in_thread(state, ctx, &rendered).await;
        }
        Err(crate::google::OAuthError::NotConnected) => {
            let rendered = blocks::google_connect(&broker.auth_url(&ctx.user));
            post_in_thread(state, ctx, &rendered).await;
        }
        Err(e) => {
            warn!(error = %e, "meeting sync failed");
            let rendered = blocks::error("Meeting sync failed. Check the gateway logs.");
            post_in_thread(state, ctx, &rendered).await;
        }
    }
}

// ---------------------------------------------------------------------------
// calendar / drive micro-agents
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum GoogleAgentKind {
    Calendar,
    Drive,
}

async fn google_micro_agent(state: &Arc<AppState>, ctx: &EventCtx, kind: GoogleAgentKind) {
    let Some(ref broker) = state.broker else {
        let rendered = blocks::error("Google integration is not configured on this deployment.");
        post_in_thread(state, ctx, &rendered).await;
        return;
    };

    let client = match broker.get_client(&ctx.user).await {
        Ok(client) => client,
        Err(crate::google::OAuthError::NotConnected) => {
            let rendered = blocks::google_connect(&broker.auth_url(&ctx.user));
            post_in_thread(state, ctx, &rendered).await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "google client unavailable");
            let rendered = blocks::error("Could not reach Google. Try reconnecting with /google connect.");
            post_in_thread(state, ctx, &rendered).await;
            return;
        }
    };

    let (tools, system) = match kind {
        GoogleAgentKind::Calendar => (
            google::calendar_tool_definitions(),
            format!(
                "You are a calendar assistant with tool access to the user's Google Calendar. \
                 Today is {}. Answer concisely; use tools only when needed.",
                chrono::Utc::now().format("%Y-%m-%d")
            ),
        ),
        GoogleAgentKind::Drive => (
            google::drive_tool_definitions(),
            "You are a Google Drive assistant with tool access to the user's files. \
             Answer concisely; use tools only when needed."
                .to_string(),
        ),
    };

    let reply = run_tool_agent(&state.llm, &client, &tools, &system, &ctx.text).await;
    let rendered = blocks::agent_response(AgentKey::ProductOwner, &reply);
    post_in_thread(state, ctx, &rendered).await;
}

/// Bounded tool-use loop: at most [`MAX_TOOL_TURNS`] LLM turns, executing
/// every requested tool call in order between turns.
async fn run_tool_agent(
    llm: &LlmClient,
    google: &GoogleClient,
    tools: &[serde_json::Value],
    system: &str,
    request: &str,
) -> String {
    let mut messages = vec![json!({ "role": "user", "content": request })];

    for turn_index in 0..MAX_TOOL_TURNS {
        let turn = match llm.messages_request(Some(system), &messages, Some(tools)).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(error = %e, turn = turn_index, "micro-agent llm call failed");
                return "I couldn't reach the language model just now. Please try again.".to_string();
            }
        };

        if turn.tool_calls.is_empty() {
            return turn.text;
        }

        messages.push(json!({ "role": "assistant", "content": turn.raw_content }));

        let mut results = Vec::with_capacity(turn.tool_calls.len());
        for call in &turn.tool_calls {
            info!(tool = %call.name, turn = turn_index, "micro-agent tool call");
            let output = google::execute_tool(google, &call.name, &call.input).await;
            results.push(json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": output,
            }));
        }
        messages.push(json!({ "role": "user", "content": results }));
    }

    "I wasn't able to finish that within my tool budget. Please try a simpler request.".to_string()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn msg(ts: &str, text: &str, bot: bool) -> HistoryMessage {
        HistoryMessage {
            user: (!bot).then(|| "U1".to_string()),
            text: text.to_string(),
            bot_id: bot.then(|| "B1".to_string()),
            ts: ts.to_string(),
        }
    }

    #[test]
    fn test_recent_texts_filters_and_reorders() {
        // Input is newest-first, as Slack returns it.
        let history = vec![
            msg("5", "newest", false),
            msg("4", "from the bot", true),
            msg("3", "middle", false),
            msg("2", "", false),
            msg("1", "oldest", false),
        ];
        let texts = recent_texts(&history, 15);
        assert_eq!(texts, vec!["oldest", "middle", "newest"]);
    }

    #[test]
    fn test_recent_texts_limit_keeps_most_recent() {
        let history: Vec<HistoryMessage> = (0..20)
            .map(|i| msg(&i.to_string(), &format!("m{}", 19 - i), false))
            .collect();
        let texts = recent_texts(&history, 15);
        assert_eq!(texts.len(), 15);
        assert_eq!(texts.last().unwrap(), "m19", "newest message kept");
        assert_eq!(texts.first().unwrap(), "m5", "oldest beyond the limit dropped");
    }

    #[test]
    fn test_compose_chat_prompt_with_context() {
        let prompt = compose_chat_prompt(
            &["first".to_string(), "second".to_string()],
            "what's next?",
        );
        assert!(prompt.starts_with("Recent Slack channel messages for context:\n- first\n- second"));
        assert!(prompt.ends_with("User request: what's next?"));
    }

    #[test]
    fn test_compose_chat_prompt_without_context() {
        assert_eq!(compose_chat_prompt(&[], "hi"), "User request: hi");
    }

    #[test]
    fn test_looks_like_imperative() {
        assert!(looks_like_imperative("create a task for the login bug"));
        assert!(looks_like_imperative("Create task: fix it"));
        assert!(looks_like_imperative("new task please"));
        assert!(!looks_like_imperative("the login flow is broken for everyone"));
        assert!(!looks_like_imperative("we should probably track this"));
    }
}
