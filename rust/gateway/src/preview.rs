/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Interactive preview engine: metadata payloads, modals, and agent prompts.
//!
//! Both proactive flows (task-from-conversation, meeting notes) follow the
//! same pattern: render a preview, persist the structured payload in the
//! message's metadata, and resolve button clicks from that metadata alone.
//! Blocks are never read back — Slack truncates and reflows them, so the
//! `event_payload` is the only source of truth. Values that exceed scalar
//! size limits (the task, the board/user lists, the analysis) are JSON-
//! stringified into single metadata fields.

use serde_json::{json, Value};

use crate::llm::{ActionItem, ExtractedTask, MeetingAnalysis};
use crate::monday::{Board, MondayUser};

pub const TASK_PREVIEW_EVENT: &str = "task_preview";
pub const MEETING_PREVIEW_EVENT: &str = "meeting_preview";

pub const PRIORITIES: &[&str] = &["Low", "Medium", "High", "Critical"];
pub const STATUSES: &[&str] = &["To Do", "Working on it", "In Progress", "Done"];

/// Number of editable action-item slots in the meeting edit modal.
pub const MEETING_ITEM_SLOTS: usize = 5;

// ---------------------------------------------------------------------------
// Task preview payload
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TaskPreviewPayload {
    pub task: ExtractedTask,
    pub channel: String,
    pub thread_ts: String,
    pub user: String,
    pub boards: Vec<Board>,
    pub users: Vec<MondayUser>,
}

pub fn task_preview_metadata(payload: &TaskPreviewPayload) -> Value {
    json!({
        "event_type": TASK_PREVIEW_EVENT,
        "event_payload": {
            "task": serde_json::to_string(&payload.task).unwrap_or_default(),
            "channel": payload.channel,
            "thread_ts": payload.thread_ts,
            "user": payload.user,
            "boards": serde_json::to_string(&payload.boards).unwrap_or_default(),
            "users": serde_json::to_string(&payload.users).unwrap_or_default(),
        }
    })
}

impl TaskPreviewPayload {
    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        if metadata["event_type"].as_str()? != TASK_PREVIEW_EVENT {
            return None;
        }
        let p = &metadata["event_payload"];
        Some(Self {
            task: serde_json::from_str(p["task"].as_str()?).ok()?,
            channel: p["channel"].as_str()?.to_string(),
            thread_ts: p["thread_ts"].as_str().unwrap_or_default().to_string(),
            user: p["user"].as_str().unwrap_or_default().to_string(),
            boards: p["boards"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
            users: p["users"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Meeting preview payload
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct MeetingPreviewPayload {
    pub event_id: String,
    pub title: String,
    pub channel: String,
    pub analysis: MeetingAnalysis,
}

pub fn meeting_preview_metadata(
    event_id: &str,
    title: &str,
    analysis: &MeetingAnalysis,
    channel: &str,
) -> Value {
    json!({
        "event_type": MEETING_PREVIEW_EVENT,
        "event_payload": {
            "event_id": event_id,
            "title": title,
            "channel": channel,
            "analysis": serde_json::to_string(analysis).unwrap_or_default(),
        }
    })
}

impl MeetingPreviewPayload {
    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        if metadata["event_type"].as_str()? != MEETING_PREVIEW_EVENT {
            return None;
        }
        let p = &metadata["event_payload"];
        Some(Self {
            event_id: p["event_id"].as_str()?.to_string(),
            title: p["title"].as_str().unwrap_or_default().to_string(),
            channel: p["channel"].as_str().unwrap_or_default().to_string(),
            analysis: serde_json::from_str(p["analysis"].as_str()?).ok()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Agent prompts
// ---------------------------------------------------------------------------

/// Prompt sent to the product-owner agent when a task preview is confirmed.
pub fn create_task_prompt(task: &ExtractedTask, board: Option<&str>) -> String {
    let mut prompt = format!(
        "Create a task on Monday.com with the following details:\n- Task name: {}\n- Description: {}\n- Assignee: {}\n- Priority: {}\n- Status: {}",
        task.name,
        if task.description.is_empty() { "(none)" } else { &task.description },
        if task.assignee.is_empty() { "(unassigned)" } else { &task.assignee },
        task.priority,
        task.status,
    );
    if let Some(board) = board {
        prompt.push_str(&format!("\n- Board: {board}"));
    }
    prompt
}

/// Prompt sent to the product-owner agent when meeting notes are approved.
pub fn meeting_tasks_prompt(title: &str, analysis: &MeetingAnalysis, board: Option<&str>) -> String {
    let mut prompt = format!(
        "Create tasks on Monday.com from these approved meeting notes.\nMeeting: {title}\nSummary: {}",
        analysis.summary,
    );
    if let Some(board) = board {
        prompt.push_str(&format!("\nBoard: {board}"));
    }
    if !analysis.decisions.is_empty() {
        prompt.push_str("\nDecisions:");
        for decision in &analysis.decisions {
            prompt.push_str(&format!("\n- {decision}"));
        }
    }
    prompt.push_str("\nTasks:");
    for (i, item) in analysis.action_items.iter().enumerate() {
        let mut line = format!("\n{}. {}", i + 1, item.title);
        if !item.description.is_empty() {
            line.push_str(&format!(" — {}", item.description));
        }
        let mut attrs = Vec::new();
        if let Some(ref who) = item.assignee {
            attrs.push(format!("Assignee: {who}"));
        }
        if let Some(ref prio) = item.priority {
            attrs.push(format!("Priority: {prio}"));
        }
        if let Some(ref when) = item.deadline {
            attrs.push(format!("Deadline: {when}"));
        }
        if !attrs.is_empty() {
            line.push_str(&format!(" ({})", attrs.join(", ")));
        }
        prompt.push_str(&line);
    }
    prompt
}

// ---------------------------------------------------------------------------
// Modals
// ---------------------------------------------------------------------------

fn plain(text: &str) -> Value {
    json!({ "type": "plain_text", "text": text, "emoji": true })
}

fn text_input(block_id: &str, label: &str, initial: &str, optional: bool, multiline: bool) -> Value {
    let mut element = json!({
        "type": "plain_text_input",
        "action_id": "value",
        "multiline": multiline,
    });
    if !initial.is_empty() {
        element["initial_value"] = json!(initial);
    }
    json!({
        "type": "input",
        "block_id": block_id,
        "label": plain(label),
        "element": element,
        "optional": optional,
    })
}

fn static_select(
    block_id: &str,
    label: &str,
    options: &[(String, String)],
    initial: Option<&str>,
) -> Value {
    let opts: Vec<Value> = options
        .iter()
        .map(|(text, value)| json!({ "text": plain(text), "value": value }))
        .collect();
    let mut element = json!({
        "type": "static_select",
        "action_id": "value",
        "options": opts,
    });
    if let Some(init) = initial {
        if let Some((text, value)) = options.iter().find(|(_, v)| v == init) {
            element["initial_option"] = json!({ "text": plain(text), "value": value });
        }
    }
    json!({
        "type": "input",
        "block_id": block_id,
        "label": plain(label),
        "element": element,
        "optional": true,
    })
}

fn choices(values: &[&str]) -> Vec<(String, String)> {
    values
        .iter()
        .map(|v| ((*v).to_string(), (*v).to_string()))
        .collect()
}

/// The "Edit" modal for a task preview, pre-filled from the persisted
/// payload so nothing has to be refetched.
pub fn task_edit_modal(payload: &TaskPreviewPayload, message_ts: &str) -> Value {
    let task = &payload.task;
    let mut blocks = vec![
        text_input("task_name", "Task name", &task.name, false, false),
        text_input("description", "Description", &task.description, true, true),
    ];

    if !payload.boards.is_empty() {
        let board_options: Vec<(String, String)> = payload
            .boards
            .iter()
            .map(|b| (b.name.clone(), b.id.clone()))
            .collect();
        blocks.push(static_select("board", "Board", &board_options, None));
    }

    if payload.users.is_empty() {
        blocks.push(text_input("assignee", "Assignee", &task.assignee, true, false));
    } else {
        let user_options: Vec<(String, String)> = payload
            .users
            .iter()
            .map(|u| (u.name.clone(), u.name.clone()))
            .collect();
        blocks.push(static_select(
            "assignee",
            "Assignee",
            &user_options,
            Some(task.assignee.as_str()),
        ));
    }

    blocks.push(static_select("status", "Status", &choices(STATUSES), Some(&task.status)));
    blocks.push(static_select(
        "priority",
        "Priority",
        &choices(PRIORITIES),
        Some(&task.priority),
    ));

    json!({
        "type": "modal",
        "callback_id": "create_task_submit",
        "private_metadata": json!({
            "channel": payload.channel,
            "thread_ts": payload.thread_ts,
            "message_ts": message_ts,
        }).to_string(),
        "title": plain("Edit Task"),
        "submit": plain("Create"),
        "close": plain("Cancel"),
        "blocks": blocks,
    })
}

/// The edit modal opened by "Approve & Create Tasks" on a meeting preview.
pub fn meeting_edit_modal(payload: &MeetingPreviewPayload, message_ts: &str, boards: &[Board]) -> Value {
    let analysis = &payload.analysis;
    let mut blocks = Vec::new();

    if !boards.is_empty() {
        let board_options: Vec<(String, String)> = boards
            .iter()
            .map(|b| (b.name.clone(), b.id.clone()))
            .collect();
        blocks.push(static_select(
            "board",
            "Board",
            &board_options,
            analysis.suggested_board_id.as_deref(),
        ));
    }

    blocks.push(text_input("summary", "Summary", &analysis.summary, false, true));
    blocks.push(text_input(
        "decisions",
        "Decisions (one per line)",
        &analysis.decisions.join("\n"),
        true,
        true,
    ));

    for slot in 0..MEETING_ITEM_SLOTS {
        let item = analysis.action_items.get(slot);
        let title = item.map(|i| i.title.as_str()).unwrap_or_default();
        let description = item.map(|i| i.description.as_str()).unwrap_or_default();
        let assignee = item
            .and_then(|i| i.assignee.as_deref())
            .unwrap_or_default();
        let n = slot + 1;
        blocks.push(text_input(
            &format!("item_{slot}_title"),
            &format!("Action item {n}"),
            title,
            true,
            false,
        ));
        blocks.push(text_input(
            &format!("item_{slot}_description"),
            &format!("Action item {n} description"),
            description,
            true,
            false,
        ));
        blocks.push(text_input(
            &format!("item_{slot}_assignee"),
            &format!("Action item {n} assignee"),
            assignee,
            true,
            false,
        ));
    }

    json!({
        "type": "modal",
        "callback_id": "meeting_edit_submit",
        "private_metadata": json!({
            "channel": payload.channel,
            "message_ts": message_ts,
            "event_id": payload.event_id,
            "title": payload.title,
        }).to_string(),
        "title": plain("Review Meeting Tasks"),
        "submit": plain("Create Tasks"),
        "close": plain("Cancel"),
        "blocks": blocks,
    })
}

// ---------------------------------------------------------------------------
// View-submission parsing
// ---------------------------------------------------------------------------

/// Read one value out of `view.state.values`, covering both plain inputs
/// and static selects.
fn state_value(values: &Value, block_id: &str) -> Option<String> {
    let element = &values[block_id]["value"];
    if let Some(v) = element["value"].as_str() {
        return Some(v.to_string());
    }
    element["selected_option"]["value"]
        .as_str()
        .map(str::to_string)
}

/// Parse the task edit modal submission into the final task plus an
/// optional board id.
pub fn parse_task_submission(values: &Value) -> (ExtractedTask, Option<String>) {
    let task = ExtractedTask {
        name: state_value(values, "task_name").unwrap_or_else(|| "Task from conversation".to_string()),
        description: state_value(values, "description").unwrap_or_default(),
        assignee: state_value(values, "assignee").unwrap_or_default(),
        priority: state_value(values, "priority").unwrap_or_else(|| "Medium".to_string()),
        status: state_value(values, "status").unwrap_or_else(|| "To Do".to_string()),
    };
    (task, state_value(values, "board"))
}

/// Parse the meeting edit modal submission into a cleaned-up analysis plus
/// an optional board id. Slots with an empty title are dropped.
pub fn parse_meeting_submission(values: &Value) -> (MeetingAnalysis, Option<String>) {
    let mut action_items = Vec::new();
    for slot in 0..MEETING_ITEM_SLOTS {
        let title = state_value(values, &format!("item_{slot}_title")).unwrap_or_default();
        if title.trim().is_empty() {
            continue;
        }
        let assignee = state_value(values, &format!("item_{slot}_assignee"))
            .filter(|s| !s.trim().is_empty());
        action_items.push(ActionItem {
            title,
            description: state_value(values, &format!("item_{slot}_description")).unwrap_or_default(),
            assignee,
            priority: None,
            deadline: None,
        });
    }

    let decisions = state_value(values, "decisions")
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let analysis = MeetingAnalysis {
        summary: state_value(values, "summary").unwrap_or_default(),
        action_items,
        decisions,
        suggested_board_id: None,
    };
    (analysis, state_value(values, "board"))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_task() -> ExtractedTask {
        ExtractedTask {
            name: "Fix login bug".to_string(),
            description: "Users cannot log in".to_string(),
            assignee: "Dana".to_string(),
            priority: "High".to_string(),
            status: "To Do".to_string(),
        }
    }

    fn sample_payload() -> TaskPreviewPayload {
        TaskPreviewPayload {
            task: sample_task(),
            channel: "C123".to_string(),
            thread_ts: "1700000000.000001".to_string(),
            user: "U456".to_string(),
            boards: vec![Board {
                id: "101".to_string(),
                name: "Sprint Board".to_string(),
            }],
            users: vec![MondayUser {
                id: "7".to_string(),
                name: "Dana".to_string(),
            }],
        }
    }

    #[test]
    fn test_task_metadata_round_trip() {
        let payload = sample_payload();
        let metadata = task_preview_metadata(&payload);
        assert_eq!(metadata["event_type"], TASK_PREVIEW_EVENT);
        // Non-trivial values are stringified scalars, not nested objects.
        assert!(metadata["event_payload"]["task"].is_string());
        assert!(metadata["event_payload"]["boards"].is_string());

        let parsed = TaskPreviewPayload::from_metadata(&metadata).unwrap();
        assert_eq!(parsed.task.name, "Fix login bug");
        assert_eq!(parsed.channel, "C123");
        assert_eq!(parsed.boards.len(), 1);
        assert_eq!(parsed.users[0].name, "Dana");
    }

    #[test]
    fn test_task_metadata_wrong_event_type() {
        let metadata = json!({ "event_type": "something_else", "event_payload": {} });
        assert!(TaskPreviewPayload::from_metadata(&metadata).is_none());
    }

    #[test]
    fn test_meeting_metadata_round_trip() {
        let analysis = MeetingAnalysis {
            summary: "Planned the sprint.".to_string(),
            action_items: vec![ActionItem {
                title: "Write RFC".to_string(),
                ..ActionItem::default()
            }],
            decisions: vec!["Ship weekly".to_string()],
            suggested_board_id: Some("101".to_string()),
        };
        let metadata = meeting_preview_metadata("evt-1", "Sprint Planning", &analysis, "C9");
        let parsed = MeetingPreviewPayload::from_metadata(&metadata).unwrap();
        assert_eq!(parsed.event_id, "evt-1");
        assert_eq!(parsed.title, "Sprint Planning");
        assert_eq!(parsed.channel, "C9");
        assert_eq!(parsed.analysis.action_items.len(), 1);
    }

    #[test]
    fn test_create_task_prompt_literal_prefix() {
        let prompt = create_task_prompt(&sample_task(), None);
        assert!(prompt.starts_with(
            "Create a task on Monday.com with the following details:\n- Task name: "
        ));
        assert!(prompt.contains("- Priority: High"));
        assert!(!prompt.contains("- Board:"));

        let with_board = create_task_prompt(&sample_task(), Some("101"));
        assert!(with_board.ends_with("- Board: 101"));
    }

    #[test]
    fn test_create_task_prompt_placeholders() {
        let prompt = create_task_prompt(&ExtractedTask::default(), None);
        assert!(prompt.contains("- Description: (none)"));
        assert!(prompt.contains("- Assignee: (unassigned)"));
    }

    #[test]
    fn test_meeting_tasks_prompt_numbers_items() {
        let analysis = MeetingAnalysis {
            summary: "s".to_string(),
            action_items: vec![
                ActionItem {
                    title: "First".to_string(),
                    description: "do it".to_string(),
                    assignee: Some("Dana".to_string()),
                    ..ActionItem::default()
                },
                ActionItem {
                    title: "Second".to_string(),
                    ..ActionItem::default()
                },
            ],
            decisions: vec!["go".to_string()],
            suggested_board_id: None,
        };
        let prompt = meeting_tasks_prompt("Sync", &analysis, Some("101"));
        assert!(prompt.contains("Meeting: Sync"));
        assert!(prompt.contains("Board: 101"));
        assert!(prompt.contains("1. First — do it (Assignee: Dana)"));
        assert!(prompt.contains("\n2. Second"));
    }

    #[test]
    fn test_task_edit_modal_shape() {
        let modal = task_edit_modal(&sample_payload(), "1700.42");
        assert_eq!(modal["callback_id"], "create_task_submit");

        let blocks = modal["blocks"].as_array().unwrap();
        assert_eq!(blocks[0]["block_id"], "task_name");
        assert_eq!(blocks[0]["optional"], false, "task name is required");
        assert_eq!(blocks[0]["element"]["initial_value"], "Fix login bug");

        let ids: Vec<&str> = blocks
            .iter()
            .map(|b| b["block_id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"board"));
        assert!(ids.contains(&"assignee"));
        assert!(ids.contains(&"status"));
        assert!(ids.contains(&"priority"));

        let meta: Value =
            serde_json::from_str(modal["private_metadata"].as_str().unwrap()).unwrap();
        assert_eq!(meta["channel"], "C123");
        assert_eq!(meta["message_ts"], "1700.42");
    }

    #[test]
    fn test_task_edit_modal_assignee_falls_back_to_text() {
        let mut payload = sample_payload();
        payload.users.clear();
        let modal = task_edit_modal(&payload, "1");
        let assignee = modal["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["block_id"] == "assignee")
            .cloned()
            .unwrap();
        assert_eq!(assignee["element"]["type"], "plain_text_input");
    }

    #[test]
    fn test_meeting_edit_modal_has_five_slots() {
        let payload = MeetingPreviewPayload {
            event_id: "evt-1".to_string(),
            title: "Sync".to_string(),
            channel: "C1".to_string(),
            analysis: MeetingAnalysis {
                summary: "s".to_string(),
                action_items: vec![ActionItem {
                    title: "Only one".to_string(),
                    ..ActionItem::default()
                }],
                ..MeetingAnalysis::default()
            },
        };
        let modal = meeting_edit_modal(&payload, "1", &[]);
        assert_eq!(modal["callback_id"], "meeting_edit_submit");

        let blocks = modal["blocks"].as_array().unwrap();
        let slot_titles = blocks
            .iter()
            .filter(|b| {
                b["block_id"]
                    .as_str()
                    .is_some_and(|id| id.starts_with("item_") && id.ends_with("_title"))
            })
            .count();
        assert_eq!(slot_titles, MEETING_ITEM_SLOTS);

        // Slot 0 is pre-filled, slot 1 is blank.
        let first = blocks.iter().find(|b| b["block_id"] == "item_0_title").unwrap();
        assert_eq!(first["element"]["initial_value"], "Only one");
        let second = blocks.iter().find(|b| b["block_id"] == "item_1_title").unwrap();
        assert!(second["element"].get("initial_value").is_none());
    }

    #[test]
    fn test_parse_task_submission() {
        let values = json!({
            "task_name": { "value": { "value": "Renamed task" } },
            "description": { "value": { "value": "details" } },
            "assignee": { "value": { "selected_option": { "value": "Dana" } } },
            "status": { "value": { "selected_option": { "value": "In Progress" } } },
            "priority": { "value": { "selected_option": { "value": "Critical" } } },
            "board": { "value": { "selected_option": { "value": "101" } } },
        });
        let (task, board) = parse_task_submission(&values);
        assert_eq!(task.name, "Renamed task");
        assert_eq!(task.assignee, "Dana");
        assert_eq!(task.status, "In Progress");
        assert_eq!(task.priority, "Critical");
        assert_eq!(board.as_deref(), Some("101"));
    }

    #[test]
    fn test_parse_meeting_submission_drops_empty_slots() {
        let values = json!({
            "summary": { "value": { "value": "Edited summary" } },
            "decisions": { "value": { "value": "keep shipping\n\n  " } },
            "board": { "value": { "selected_option": { "value": "202" } } },
            "item_0_title": { "value": { "value": "Do the thing" } },
            "item_0_description": { "value": { "value": "soon" } },
            "item_0_assignee": { "value": { "value": "Dana" } },
            "item_1_title": { "value": { "value": "  " } },
            "item_2_title": { "value": {} },
        });
        let (analysis, board) = parse_meeting_submission(&values);
        assert_eq!(analysis.summary, "Edited summary");
        assert_eq!(analysis.decisions, vec!["keep shipping"]);
        assert_eq!(analysis.action_items.len(), 1);
        assert_eq!(analysis.action_items[0].assignee.as_deref(), Some("Dana"));
        assert_eq!(board.as_deref(), Some("202"));
    }
}
