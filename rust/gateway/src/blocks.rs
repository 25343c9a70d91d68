/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Block Kit rendering library.
//!
//! Pure builders from domain values to `(blocks, fallback_text)` payloads.
//! No Slack calls happen here; every user-visible message in the gateway is
//! assembled by one of these functions so the posting sites stay thin.

use serde_json::{json, Value};

use crate::intent::AgentKey;
use crate::llm::{ExtractedTask, MeetingAnalysis};

/// A renderable message: Block Kit blocks plus notification fallback text.
#[derive(Clone, Debug)]
pub struct Rendered {
    pub blocks: Vec<Value>,
    pub text: String,
}

// ---------------------------------------------------------------------------
// mrkdwn conversion
// ---------------------------------------------------------------------------

/// Convert common LLM markdown to Slack mrkdwn: `#`-headings become bold
/// lines and `**bold**` becomes `*bold*`. Everything else passes through.
pub fn markdown_to_mrkdwn(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let heading = trimmed
            .strip_prefix("####")
            .or_else(|| trimmed.strip_prefix("###"))
            .or_else(|| trimmed.strip_prefix("##"))
            .or_else(|| trimmed.strip_prefix('#'));
        match heading {
            Some(rest) if rest.starts_with(' ') || rest.is_empty() => {
                out.push(format!("*{}*", rest.trim()));
            }
            _ => out.push(line.replace("**", "*")),
        }
    }
    out.join("\n")
}

fn section(text: &str) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

fn header(text: &str) -> Value {
    json!({ "type": "header", "text": { "type": "plain_text", "text": text, "emoji": true } })
}

fn context(text: &str) -> Value {
    json!({ "type": "context", "elements": [{ "type": "mrkdwn", "text": text }] })
}

fn divider() -> Value {
    json!({ "type": "divider" })
}

fn button(label: &str, action_id: &str, style: Option<&str>) -> Value {
    let mut b = json!({
        "type": "button",
        "text": { "type": "plain_text", "text": label, "emoji": true },
        "action_id": action_id,
        "value": action_id,
    });
    if let Some(s) = style {
        b["style"] = json!(s);
    }
    b
}

// ---------------------------------------------------------------------------
// Conversational messages
// ---------------------------------------------------------------------------

pub fn loading() -> Rendered {
    Rendered {
        blocks: vec![context(":hourglass_flowing_sand: Working on it…")],
        text: "Working on it…".to_string(),
    }
}

pub fn greeting() -> Rendered {
    Rendered {
        blocks: vec![section("Hey! How can I help?")],
        text: "Hey! How can I help?".to_string(),
    }
}

pub fn agent_response(agent: AgentKey, text: &str) -> Rendered {
    let body = markdown_to_mrkdwn(text);
    Rendered {
        blocks: vec![
            section(&body),
            context(&format!(":robot_face: {}", agent.display_name())),
        ],
        text: body,
    }
}

pub fn error(message: &str) -> Rendered {
    let text = format!(":x: {message}");
    Rendered {
        blocks: vec![section(&text)],
        text,
    }
}

pub fn warning(message: &str) -> Rendered {
    let text = format!(":warning: {message}");
    Rendered {
        blocks: vec![section(&text)],
        text,
    }
}

pub fn no_response() -> Rendered {
    warning("The agent returned no response. Try again in a moment.")
}

/// Connect prompt shown when a Google-backed intent runs without OAuth.
pub fn google_connect(auth_url: &str) -> Rendered {
    Rendered {
        blocks: vec![
            section("Connect your Google account to use calendar, drive and meeting sync."),
            json!({
                "type": "actions",
                "elements": [{
                    "type": "button",
                    "text": { "type": "plain_text", "text": "Connect Google", "emoji": true },
                    "url": auth_url,
                    "style": "primary",
                    "action_id": "google_connect_link",
                }]
            }),
        ],
        text: "Connect your Google account".to_string(),
    }
}

/// Agent-notify payload: pass custom blocks through untouched, or wrap the
/// text in a single section.
pub fn notification(text: &str, custom_blocks: Option<Vec<Value>>) -> Rendered {
    let body = markdown_to_mrkdwn(text);
    Rendered {
        blocks: custom_blocks.unwrap_or_else(|| vec![section(&body)]),
        text: body,
    }
}

// ---------------------------------------------------------------------------
// Scheduled-job and status messages
// ---------------------------------------------------------------------------

pub fn status_dashboard(text: &str) -> Rendered {
    let body = markdown_to_mrkdwn(text);
    Rendered {
        blocks: vec![header("Board Status"), section(&body)],
        text: body,
    }
}

pub fn standup(text: &str) -> Rendered {
    let body = markdown_to_mrkdwn(text);
    Rendered {
        blocks: vec![
            header("Daily Standup"),
            section(&body),
            context(":robot_face: Scrum Master"),
        ],
        text: body,
    }
}

pub fn stale_tasks(text: &str) -> Rendered {
    let body = markdown_to_mrkdwn(text);
    Rendered {
        blocks: vec![
            header("Stale Tasks"),
            section(&body),
            context(":robot_face: Scrum Master"),
        ],
        text: body,
    }
}

pub fn weekly_summary(text: &str) -> Rendered {
    let body = markdown_to_mrkdwn(text);
    Rendered {
        blocks: vec![
            header("Weekly Summary"),
            section(&body),
            context(":robot_face: Scrum Master"),
        ],
        text: body,
    }
}

pub fn sync_report(found: u32, transcripts: u32, previews: u32, skipped: u32, errors: u32) -> Rendered {
    let text = format!(
        "Meeting sync: {found} meeting(s) found, {transcripts} transcript(s), \
         {previews} preview(s) posted, {skipped} skipped, {errors} error(s)."
    );
    Rendered {
        blocks: vec![section(&text)],
        text,
    }
}

// ---------------------------------------------------------------------------
// Task preview
// ---------------------------------------------------------------------------

pub fn task_preview(task: &ExtractedTask) -> Rendered {
    let assignee = if task.assignee.is_empty() {
        "_unassigned_"
    } else {
        &task.assignee
    };
    let description = if task.description.is_empty() {
        "_none_"
    } else {
        &task.description
    };
    let details = format!(
        "*Name:* {}\n*Description:* {}\n*Assignee:* {}\n*Priority:* {}\n*Status:* {}",
        task.name, description, assignee, task.priority, task.status,
    );

    Rendered {
        blocks: vec![
            header("Task Preview"),
            section(&details),
            json!({
                "type": "actions",
                "elements": [
                    button("Create Task", "mention_create_task", Some("primary")),
                    button("Edit", "mention_edit_task", None),
                    button("Cancel", "mention_cancel_task", Some("danger")),
                ]
            }),
        ],
        text: format!("Task preview: {}", task.name),
    }
}

pub fn task_created(task_name: &str, actor: &str) -> Rendered {
    let text = format!(":white_check_mark: Task *{task_name}* sent to the Product Owner by <@{actor}>.");
    Rendered {
        blocks: vec![section(&text)],
        text: format!("Task {task_name} created"),
    }
}

pub fn task_cancelled(actor: &str) -> Rendered {
    let text = format!("Task preview dismissed by <@{actor}>.");
    Rendered {
        blocks: vec![context(&text)],
        text,
    }
}

// ---------------------------------------------------------------------------
// Meeting preview
// ---------------------------------------------------------------------------

pub fn meeting_preview(title: &str, analysis: &MeetingAnalysis) -> Rendered {
    let mut blocks = vec![
        header(&format!("Meeting Notes: {title}")),
        section(&format!("*Summary*\n{}", analysis.summary)),
    ];

    if !analysis.decisions.is_empty() {
        let decisions = analysis
            .decisions
            .iter()
            .map(|d| format!("• {d}"))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(section(&format!("*Key Decisions*\n{decisions}")));
    }

    if !analysis.action_items.is_empty() {
        let mut lines = vec!["*Action Items*".to_string()];
        for (i, item) in analysis.action_items.iter().enumerate() {
            let mut line = format!("{}. *{}*", i + 1, item.title);
            if let Some(ref who) = item.assignee {
                line.push_str(&format!(" — {who}"));
            }
            if let Some(ref prio) = item.priority {
                line.push_str(&format!(" ({prio})"));
            }
            if let Some(ref when) = item.deadline {
                line.push_str(&format!(", due {when}"));
            }
            lines.push(line);
        }
        blocks.push(section(&lines.join("\n")));
    }

    blocks.push(divider());
    blocks.push(json!({
        "type": "actions",
        "elements": [
            button("Approve & Create Tasks", "meeting_approve", Some("primary")),
            button("Dismiss", "meeting_dismiss", None),
        ]
    }));

    Rendered {
        blocks,
        text: format!("Meeting notes ready for review: {title}"),
    }
}

pub fn meeting_approved(title: &str, actor: &str) -> Rendered {
    let text =
        format!(":white_check_mark: Meeting notes for *{title}* approved by <@{actor}> — tasks sent to the Product Owner.");
    Rendered {
        blocks: vec![section(&text)],
        text: format!("Meeting notes for {title} approved"),
    }
}

pub fn meeting_dismissed(title: &str, actor: &str) -> Rendered {
    let text = format!("Meeting notes for *{title}* dismissed by <@{actor}>.");
    Rendered {
        blocks: vec![context(&text)],
        text,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::ActionItem;

    #[test]
    fn test_markdown_headings_become_bold() {
        let input = "# Sprint Report\nAll good.\n## Details\n- item";
        let out = markdown_to_mrkdwn(input);
        assert_eq!(out, "*Sprint Report*\nAll good.\n*Details*\n- item");
    }

    #[test]
    fn test_markdown_double_star_becomes_single() {
        assert_eq!(markdown_to_mrkdwn("this is **bold** text"), "this is *bold* text");
    }

    #[test]
    fn test_markdown_passthrough() {
        assert_eq!(markdown_to_mrkdwn("plain `code` _em_"), "plain `code` _em_");
    }

    #[test]
    fn test_agent_response_has_attribution() {
        let r = agent_response(AgentKey::Developer, "done");
        assert_eq!(r.blocks.len(), 2);
        let ctx = r.blocks[1]["elements"][0]["text"].as_str().unwrap();
        assert!(ctx.contains("Developer"));
    }

    #[test]
    fn test_task_preview_buttons() {
        let task = ExtractedTask {
            name: "Fix login".to_string(),
            description: String::new(),
            assignee: String::new(),
            priority: "High".to_string(),
            status: "To Do".to_string(),
        };
        let r = task_preview(&task);
        let actions = r.blocks.last().unwrap();
        let ids: Vec<&str> = actions["elements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["action_id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec!["mention_create_task", "mention_edit_task", "mention_cancel_task"]
        );
        assert_eq!(actions["elements"][0]["style"], "primary");
        assert_eq!(actions["elements"][2]["style"], "danger");
        assert_eq!(r.text, "Task preview: Fix login");
    }

    #[test]
    fn test_task_preview_placeholders_for_empty_fields() {
        let r = task_preview(&ExtractedTask::default());
        let details = r.blocks[1]["text"]["text"].as_str().unwrap();
        assert!(details.contains("_unassigned_"));
        assert!(details.contains("_none_"));
    }

    #[test]
    fn test_meeting_preview_numbering_and_buttons() {
        let analysis = MeetingAnalysis {
            summary: "We planned the sprint.".to_string(),
            action_items: vec![
                ActionItem {
                    title: "Write RFC".to_string(),
                    assignee: Some("Dana".to_string()),
                    priority: Some("High".to_string()),
                    deadline: Some("Friday".to_string()),
                    ..ActionItem::default()
                },
                ActionItem {
                    title: "Review backlog".to_string(),
                    ..ActionItem::default()
                },
            ],
            decisions: vec!["Ship weekly".to_string()],
            suggested_board_id: None,
        };
        let r = meeting_preview("Sprint Planning", &analysis);

        let items_block = r.blocks[3]["text"]["text"].as_str().unwrap();
        assert!(items_block.contains("1. *Write RFC* — Dana (High), due Friday"));
        assert!(items_block.contains("2. *Review backlog*"));

        let actions = r.blocks.last().unwrap();
        assert_eq!(actions["elements"][0]["action_id"], "meeting_approve");
        assert_eq!(actions["elements"][1]["action_id"], "meeting_dismiss");
    }

    #[test]
    fn test_meeting_preview_omits_empty_sections() {
        let analysis = MeetingAnalysis {
            summary: "Short one.".to_string(),
            ..MeetingAnalysis::default()
        };
        let r = meeting_preview("1:1", &analysis);
        // header + summary + divider + actions, no decisions/items sections
        assert_eq!(r.blocks.len(), 4);
    }

    #[test]
    fn test_notification_passes_custom_blocks_through() {
        let custom = vec![json!({ "type": "divider" })];
        let r = notification("fallback", Some(custom.clone()));
        assert_eq!(r.blocks, custom);
        assert_eq!(r.text, "fallback");
    }

    #[test]
    fn test_every_rendered_message_has_fallback_text() {
        for r in [
            loading(),
            greeting(),
            error("boom"),
            warning("careful"),
            no_response(),
            notification("pushed", None),
            google_connect("https://accounts.google.com/x"),
            status_dashboard("ok"),
            standup("notes"),
            stale_tasks("none"),
            weekly_summary("week"),
            sync_report(1, 1, 1, 0, 0),
            task_created("T", "U1"),
            task_cancelled("U1"),
            meeting_approved("M", "U1"),
            meeting_dismissed("M", "U1"),
        ] {
            assert!(!r.text.is_empty());
            assert!(!r.blocks.is_empty());
        }
    }
}
