/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! In-memory thread-session store.
//!
//! Maps a Slack thread key (the `thread_ts` of a reply chain) to the A2A
//! conversation identity. Process-local: a restart drops every mapping, and
//! downstream agents must treat a context id arriving from a fresh process
//! as still valid.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::intent::{AgentKey, Intent};

#[derive(Clone, Debug)]
pub struct ThreadSession {
    /// A2A context id. Constant for the lifetime of the thread key.
    pub context_id: String,
    pub agent: AgentKey,
    pub intent: Option<Intent>,
}

#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<String, ThreadSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, thread_key: &str) -> Option<ThreadSession> {
        self.inner.read().await.get(thread_key).cloned()
    }

    /// Create or update the session for a thread key and return its context
    /// id. On an existing key the context id is preserved; the agent key only
    /// changes when the thread moves into agent-chat (single-shot intents
    /// keep talking to the agent that owns the thread).
    pub async fn upsert(
        &self,
        thread_key: &str,
        agent: AgentKey,
        intent: Intent,
    ) -> String {
        let mut map = self.inner.write().await;
        match map.get_mut(thread_key) {
            Some(existing) => {
                if intent == Intent::AgentChat {
                    existing.agent = agent;
                }
                existing.intent = Some(intent);
                existing.context_id.clone()
            }
            None => {
                let context_id = Uuid::new_v4().to_string();
                map.insert(
                    thread_key.to_string(),
                    ThreadSession {
                        context_id: context_id.clone(),
                        agent,
                        intent: Some(intent),
                    },
                );
                context_id
            }
        }
    }

    pub async fn clear(&self, thread_key: &str) {
        self.inner.write().await.remove(thread_key);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_id_stable_across_upserts() {
        let store = SessionStore::new();

        let first = store
            .upsert("1700000000.000001", AgentKey::ProductOwner, Intent::CreateTask)
            .await;
        let second = store
            .upsert("1700000000.000001", AgentKey::ScrumMaster, Intent::AgentChat)
            .await;
        let third = store
            .upsert("1700000000.000001", AgentKey::Developer, Intent::BoardStatus)
            .await;

        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_distinct_threads_get_distinct_contexts() {
        let store = SessionStore::new();
        let a = store
            .upsert("111.000", AgentKey::ProductOwner, Intent::AgentChat)
            .await;
        let b = store
            .upsert("222.000", AgentKey::ProductOwner, Intent::AgentChat)
            .await;
        assert_ne!(a, b);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_agent_only_changes_on_agent_chat() {
        let store = SessionStore::new();
        store
            .upsert("t", AgentKey::ScrumMaster, Intent::BoardStatus)
            .await;

        // Non-chat follow-up keeps the owning agent.
        store
            .upsert("t", AgentKey::ProductOwner, Intent::CreateTask)
            .await;
        let s = store.get("t").await.unwrap();
        assert_eq!(s.agent, AgentKey::ScrumMaster);
        assert_eq!(s.intent, Some(Intent::CreateTask));

        // Transition into agent-chat adopts the new agent.
        store
            .upsert("t", AgentKey::Developer, Intent::AgentChat)
            .await;
        let s = store.get("t").await.unwrap();
        assert_eq!(s.agent, AgentKey::Developer);
        assert_eq!(s.intent, Some(Intent::AgentChat));
    }

    #[tokio::test]
    async fn test_clear_removes_mapping() {
        let store = SessionStore::new();
        store
            .upsert("gone", AgentKey::ProductOwner, Intent::AgentChat)
            .await;
        store.clear("gone").await;
        assert!(store.get("gone").await.is_none());
    }
}
