/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Client-side Monday.com lookups.
//!
//! The worker agents own all board mutations; the gateway only needs board
//! and user lists to populate preview modals, so this client is two cached
//! GraphQL queries. Cache entries live for the configured TTL (5 minutes by
//! default) and failures degrade to empty lists rather than failing a flow.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MondayUser {
    pub id: String,
    pub name: String,
}

type Cached<T> = RwLock<Option<(Vec<T>, Instant)>>;

pub struct MondayClient {
    http: reqwest::Client,
    api_url: String,
    api_version: String,
    api_token: Option<String>,
    ttl: std::time::Duration,
    boards_cache: Cached<Board>,
    users_cache: Cached<MondayUser>,
}

impl MondayClient {
    pub fn new(config: &waggle_config::MondayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_url: config.api_url.clone(),
            api_version: config.api_version.clone(),
            api_token: config.api_token.clone(),
            ttl: std::time::Duration::from_secs(config.cache_ttl_secs),
            boards_cache: RwLock::new(None),
            users_cache: RwLock::new(None),
        }
    }

    async fn graphql(&self, query: &str) -> Result<Value, String> {
        let Some(ref token) = self.api_token else {
            return Err("no monday API token configured".to_string());
        };

        let resp = self
            .http
            .post(&self.api_url)
            .header("Authorization", token)
            .header("Content-Type", "application/json")
            .header("API-Version", &self.api_version)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| format!("monday request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("monday API returned {status}"));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse monday response: {e}"))?;
        if let Some(errors) = body.get("errors") {
            return Err(format!("monday API error: {errors}"));
        }
        Ok(body)
    }

    /// Cached board list for preview modals. Empty on any failure.
    pub async fn boards(&self) -> Vec<Board> {
        {
            let guard = self.boards_cache.read().await;
            if let Some((boards, fetched)) = guard.as_ref() {
                if fetched.elapsed() < self.ttl {
                    debug!("monday boards cache hit");
                    return boards.clone();
                }
            }
        }

        let boards = match self.graphql("query { boards(limit: 50) { id name } }").await {
            Ok(body) => parse_boards(&body),
            Err(e) => {
                warn!(error = %e, "board list fetch failed");
                return Vec::new();
            }
        };

        let mut guard = self.boards_cache.write().await;
        *guard = Some((boards.clone(), Instant::now()));
        boards
    }

    /// Cached workspace user list for assignee selectors. Empty on failure.
    pub async fn users(&self) -> Vec<MondayUser> {
        {
            let guard = self.users_cache.read().await;
            if let Some((users, fetched)) = guard.as_ref() {
                if fetched.elapsed() < self.ttl {
                    debug!("monday users cache hit");
                    return users.clone();
                }
            }
        }

        let users = match self.graphql("query { users(limit: 100) { id name } }").await {
            Ok(body) => parse_users(&body),
            Err(e) => {
                warn!(error = %e, "user list fetch failed");
                return Vec::new();
            }
        };

        let mut guard = self.users_cache.write().await;
        *guard = Some((users.clone(), Instant::now()));
        users
    }
}

fn parse_boards(body: &Value) -> Vec<Board> {
    body["data"]["boards"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|b| {
                    Some(Board {
                        id: b["id"].as_str()?.to_string(),
                        name: b["name"].as_str().unwrap_or("Unnamed board").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_users(body: &Value) -> Vec<MondayUser> {
    body["data"]["users"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|u| {
                    Some(MondayUser {
                        id: u["id"].as_str()?.to_string(),
                        name: u["name"].as_str().unwrap_or("Unknown").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boards() {
        let body = json!({
            "data": { "boards": [
                { "id": "101", "name": "Sprint Board" },
                { "id": "102", "name": "Backlog" },
            ]}
        });
        let boards = parse_boards(&body);
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0], Board { id: "101".to_string(), name: "Sprint Board".to_string() });
    }

    #[test]
    fn test_parse_boards_skips_malformed_entries() {
        let body = json!({
            "data": { "boards": [
                { "name": "no id" },
                { "id": "103" },
            ]}
        });
        let boards = parse_boards(&body);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].name, "Unnamed board");
    }

    #[test]
    fn test_parse_users_empty_payload() {
        assert!(parse_users(&json!({})).is_empty());
        assert!(parse_users(&json!({ "data": { "users": [] } })).is_empty());
    }

    #[tokio::test]
    async fn test_boards_without_token_is_empty() {
        let client = MondayClient::new(&waggle_config::MondayConfig::default());
        assert!(client.boards().await.is_empty());
        assert!(client.users().await.is_empty());
    }
}
