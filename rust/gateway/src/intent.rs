/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Two-tier intent router.
//!
//! Tier 1 is a deterministic keyword pre-filter (ordered, first match wins)
//! that keeps the common cases away from the LLM entirely. Tier 2 asks the
//! LLM for a JSON classification. Tier 3 is a broader keyword fallback that
//! also catches every Tier-2 failure mode (network error, fenced garbage,
//! out-of-set labels), so `classify` always lands in the closed intent set.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{strip_code_fences, LlmClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    CreateTask,
    BoardStatus,
    MeetingSync,
    Calendar,
    Drive,
    AgentChat,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTask => "create-task",
            Self::BoardStatus => "board-status",
            Self::MeetingSync => "meeting-sync",
            Self::Calendar => "calendar",
            Self::Drive => "drive",
            Self::AgentChat => "agent-chat",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "create-task" => Some(Self::CreateTask),
            "board-status" => Some(Self::BoardStatus),
            "meeting-sync" => Some(Self::MeetingSync),
            "calendar" => Some(Self::Calendar),
            "drive" => Some(Self::Drive),
            "agent-chat" => Some(Self::AgentChat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKey {
    ProductOwner,
    Developer,
    Reviewer,
    ScrumMaster,
}

impl AgentKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProductOwner => "product-owner",
            Self::Developer => "developer",
            Self::Reviewer => "reviewer",
            Self::ScrumMaster => "scrum-master",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::ProductOwner => "Product Owner",
            Self::Developer => "Developer",
            Self::Reviewer => "Reviewer",
            Self::ScrumMaster => "Scrum Master",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "product-owner" => Some(Self::ProductOwner),
            "developer" => Some(Self::Developer),
            "reviewer" => Some(Self::Reviewer),
            "scrum-master" => Some(Self::ScrumMaster),
            _ => None,
        }
    }

    /// Base URL of the agent, from configuration.
    pub fn url<'a>(self, agents: &'a waggle_config::AgentsConfig) -> &'a str {
        match self {
            Self::ProductOwner => &agents.product_owner_url,
            Self::Developer => &agents.developer_url,
            Self::Reviewer => &agents.reviewer_url,
            Self::ScrumMaster => &agents.scrum_master_url,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    pub agent: AgentKey,
}

// ---------------------------------------------------------------------------
// Tier 1 — deterministic keyword pre-filter
// ---------------------------------------------------------------------------

/// Ordered rules; first case-insensitive substring match wins.
const TIER1_RULES: &[(&str, Intent, AgentKey)] = &[
    ("create a task", Intent::CreateTask, AgentKey::ProductOwner),
    ("create task", Intent::CreateTask, AgentKey::ProductOwner),
    ("make a task", Intent::CreateTask, AgentKey::ProductOwner),
    ("add a task", Intent::CreateTask, AgentKey::ProductOwner),
    ("new task", Intent::CreateTask, AgentKey::ProductOwner),
    ("board status", Intent::BoardStatus, AgentKey::ScrumMaster),
    ("sprint status", Intent::BoardStatus, AgentKey::ScrumMaster),
    ("standup", Intent::BoardStatus, AgentKey::ScrumMaster),
    ("stand-up", Intent::BoardStatus, AgentKey::ScrumMaster),
    ("sync meeting", Intent::MeetingSync, AgentKey::ProductOwner),
    ("meeting sync", Intent::MeetingSync, AgentKey::ProductOwner),
    ("sync meetings", Intent::MeetingSync, AgentKey::ProductOwner),
    ("calendar", Intent::Calendar, AgentKey::ProductOwner),
    ("schedule", Intent::Calendar, AgentKey::ProductOwner),
    ("what's on my", Intent::Calendar, AgentKey::ProductOwner),
    ("my agenda", Intent::Calendar, AgentKey::ProductOwner),
    ("my meetings today", Intent::Calendar, AgentKey::ProductOwner),
    ("book a meeting", Intent::Calendar, AgentKey::ProductOwner),
    ("find the file", Intent::Drive, AgentKey::ProductOwner),
    ("search drive", Intent::Drive, AgentKey::ProductOwner),
    ("google drive", Intent::Drive, AgentKey::ProductOwner),
    ("my drive", Intent::Drive, AgentKey::ProductOwner),
    ("find the doc", Intent::Drive, AgentKey::ProductOwner),
    ("find document", Intent::Drive, AgentKey::ProductOwner),
];

pub fn classify_keyword(text: &str) -> Option<Classification> {
    let lower = text.to_lowercase();
    TIER1_RULES
        .iter()
        .find(|(phrase, _, _)| lower.contains(phrase))
        .map(|&(_, intent, agent)| Classification { intent, agent })
}

// ---------------------------------------------------------------------------
// Tier 2 — LLM classifier
// ---------------------------------------------------------------------------

const CLASSIFIER_SYSTEM: &str = "You classify a Slack message into exactly one intent \
and pick the agent that should handle it.\n\
Intents: create-task, board-status, meeting-sync, calendar, drive, agent-chat.\n\
Agents: product-owner, developer, reviewer, scrum-master.\n\
Use agent-chat for anything conversational that is none of the specific intents.\n\
Reply with ONLY a JSON object: {\"intent\": \"...\", \"agentKey\": \"...\"}";

#[derive(Deserialize)]
struct LlmClassification {
    intent: String,
    #[serde(rename = "agentKey")]
    agent_key: String,
}

/// Parse the Tier-2 reply. `None` means fall through to Tier 3.
pub fn parse_llm_classification(reply: &str) -> Option<Classification> {
    let cleaned = strip_code_fences(reply);
    let parsed: LlmClassification = serde_json::from_str(cleaned).ok()?;
    let intent = Intent::parse(&parsed.intent)?;
    let agent = AgentKey::parse(&parsed.agent_key)?;
    Some(Classification { intent, agent })
}

// ---------------------------------------------------------------------------
// Tier 3 — keyword fallback
// ---------------------------------------------------------------------------

pub fn classify_fallback(text: &str) -> Classification {
    let lower = text.to_lowercase();

    let hit = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if hit(&["status", "blocked", "summary", "progress", "sprint"]) {
        return Classification {
            intent: Intent::BoardStatus,
            agent: AgentKey::ScrumMaster,
        };
    }
    if hit(&["task", "todo", "ticket"]) {
        return Classification {
            intent: Intent::CreateTask,
            agent: AgentKey::ProductOwner,
        };
    }
    if hit(&["meeting"]) {
        return Classification {
            intent: Intent::MeetingSync,
            agent: AgentKey::ProductOwner,
        };
    }
    Classification {
        intent: Intent::AgentChat,
        agent: AgentKey::ProductOwner,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Classify a message. Always returns a member of the closed intent set.
pub async fn classify(text: &str, llm: &LlmClient) -> Classification {
    if let Some(hit) = classify_keyword(text) {
        info!(intent = hit.intent.as_str(), agent = hit.agent.as_str(), tier = 1, "classified");
        return hit;
    }

    match llm.complete(Some(CLASSIFIER_SYSTEM), text).await {
        Ok(reply) => {
            if let Some(hit) = parse_llm_classification(&reply) {
                info!(intent = hit.intent.as_str(), agent = hit.agent.as_str(), tier = 2, "classified");
                return hit;
            }
            warn!(reply = %reply, "classifier reply out of set — using fallback");
        }
        Err(e) => {
            warn!(error = %e, "classifier call failed — using fallback");
        }
    }

    let hit = classify_fallback(text);
    info!(intent = hit.intent.as_str(), agent = hit.agent.as_str(), tier = 3, "classified");
    hit
}

// ===========================================================================
// Tests
// ===========================================================================
