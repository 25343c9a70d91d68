/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Google OAuth broker and API clients.
//!
//! The authorization-code flow binds each callback to its originating Slack
//! user with an HMAC-signed `state` parameter, so no server-side state is
//! needed between redirect and callback. Tokens live in the SQLite token
//! store; `get_client` transparently refreshes an expired access token
//! before handing out an authenticated client.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::slack::{constant_time_eq, hex_encode};
use crate::store::{TokenRecord, TokenStore};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

const SCOPES: &str =
    "https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/drive";

#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    #[error("invalid oauth state parameter")]
    InvalidState,
    #[error("token exchange returned no usable tokens")]
    MissingTokens,
    #[error("subject is not connected to Google")]
    NotConnected,
    #[error("token endpoint error: {0}")]
    TokenExchange(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// State parameter
// ---------------------------------------------------------------------------

fn state_hmac(secret: &str, subject_id: &str) -> String {
    // HMAC-SHA256 accepts any key length; the Err arm is unreachable but
    // degrades to an empty digest that parse_state always rejects.
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(subject_id.as_bytes());
    hex_encode(mac.finalize().into_bytes().as_slice())
}

/// `"<subject>:<hex-hmac-sha256(secret, subject)>"`.
pub fn sign_state(secret: &str, subject_id: &str) -> String {
    format!("{subject_id}:{}", state_hmac(secret, subject_id))
}

/// Verify a callback state and return the subject it was issued for.
pub fn parse_state(secret: &str, state: &str) -> Result<String, OAuthError> {
    let mut parts = state.splitn(3, ':');
    let (Some(subject), Some(sig), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(OAuthError::InvalidState);
    };
    if subject.is_empty() || sig.is_empty() {
        return Err(OAuthError::InvalidState);
    }
    let expected = state_hmac(secret, subject);
    if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
        return Err(OAuthError::InvalidState);
    }
    Ok(subject.to_string())
}

/// Minimal URL-encoding for query parameter values.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

pub struct OAuthBroker {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    state_secret: String,
    store: Arc<TokenStore>,
    token_url: String,
    revoke_url: String,
}

impl OAuthBroker {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        state_secret: String,
        store: Arc<TokenStore>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
            state_secret,
            store,
            token_url: TOKEN_URL.to_string(),
            revoke_url: REVOKE_URL.to_string(),
        }
    }

    /// Point the broker at alternate token/revoke endpoints (loopback mocks).
    pub fn with_endpoints(mut self, token_url: String, revoke_url: String) -> Self {
        self.token_url = token_url;
        self.revoke_url = revoke_url;
        self
    }

    /// Authorization URL to send a user to.
    pub fn auth_url(&self, subject_id: &str) -> String {
        format!(
            "{AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            urlencode(&self.client_id),
            urlencode(&self.redirect_uri),
            urlencode(SCOPES),
            urlencode(&sign_state(&self.state_secret, subject_id)),
        )
    }

    /// Complete the authorization-code flow for a verified callback.
    /// Returns the subject the grant belongs to.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<String, OAuthError> {
        let subject_id = parse_state(&self.state_secret, state)?;

        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token = self.token_request(&params).await?;

        let (Some(access), Some(refresh)) = (token.access_token, token.refresh_token) else {
            return Err(OAuthError::MissingTokens);
        };
        if refresh.is_empty() {
            return Err(OAuthError::MissingTokens);
        }

        let record = TokenRecord {
            subject_id: subject_id.clone(),
            access_token: access,
            refresh_token: refresh,
            expiry_ms: expiry_from_now(token.expires_in),
            scope: token.scope.unwrap_or_else(|| SCOPES.to_string()),
        };
        self.store.upsert(&record).await?;
        info!(subject = %subject_id, "google account connected");
        Ok(subject_id)
    }

    pub async fn is_connected(&self, subject_id: &str) -> bool {
        matches!(self.store.get(subject_id).await, Ok(Some(_)))
    }

    /// Authenticated client for a subject, refreshing the access token first
    /// when it has expired.
    pub async fn get_client(&self, subject_id: &str) -> Result<GoogleClient, OAuthError> {
        let Some(mut record) = self.store.get(subject_id).await? else {
            return Err(OAuthError::NotConnected);
        };

        if record.expiry_ms < Utc::now().timestamp_millis() {
            let params = [
                ("refresh_token", record.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ];
            let token = self.token_request(&params).await?;
            let Some(access) = token.access_token else {
                return Err(OAuthError::MissingTokens);
            };
            record.access_token = access;
            record.expiry_ms = expiry_from_now(token.expires_in);
            // Google only returns a refresh token on the initial grant.
            self.store.upsert(&record).await?;
            info!(subject = %subject_id, "access token refreshed");
        }

        Ok(GoogleClient::new(record.access_token))
    }

    /// Best-effort revoke, then unconditional delete of the stored record.
    pub async fn disconnect(&self, subject_id: &str) -> Result<(), OAuthError> {
        if let Some(record) = self.store.get(subject_id).await? {
            let result = self
                .http
                .post(&self.revoke_url)
                .form(&[("token", record.access_token.as_str())])
                .send()
                .await;
            if let Err(e) = result {
                // Tokens may already be expired or revoked upstream.
                warn!(subject = %subject_id, error = %e, "token revocation failed");
            }
        }
        self.store.delete(subject_id).await?;
        info!(subject = %subject_id, "google account disconnected");
        Ok(())
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, OAuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;
        if !status.is_success() {
            return Err(OAuthError::TokenExchange(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| OAuthError::TokenExchange(e.to_string()))
    }
}

fn expiry_from_now(expires_in: Option<i64>) -> i64 {
    Utc::now().timestamp_millis() + expires_in.unwrap_or(3600) * 1000
}

// ---------------------------------------------------------------------------
// Authenticated API client
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: chrono::DateTime<Utc>,
    pub end: chrono::DateTime<Utc>,
    pub has_conference: bool,
}

#[derive(Clone, Debug)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

pub struct GoogleClient {
    http: reqwest::Client,
    access_token: String,
}

impl GoogleClient {
    pub fn new(access_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, access_token }
    }

    async fn get_json(&self, url: &str) -> Result<Value, String> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| format!("google request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("google API returned {status}: {body}"));
        }
        resp.json()
            .await
            .map_err(|e| format!("failed to parse google response: {e}"))
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, String> {
        let mut req = self.http.request(method, url).bearer_auth(&self.access_token);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| format!("google request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("google API returned {status}: {text}"));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json().await.or(Ok(Value::Null))
    }

    // -- Calendar ----------------------------------------------------------

    /// Events on the primary calendar between the two instants, expanded to
    /// single occurrences in start order.
    pub async fn list_events(
        &self,
        time_min: chrono::DateTime<Utc>,
        time_max: chrono::DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, String> {
        let url = format!(
            "{CALENDAR_API}/calendars/primary/events?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime",
            urlencode(&time_min.to_rfc3339()),
            urlencode(&time_max.to_rfc3339()),
        );
        let body = self.get_json(&url).await?;
        Ok(parse_events(&body))
    }

    /// Today's events that have not ended yet.
    pub async fn today_remaining_events(&self) -> Result<Vec<CalendarEvent>, String> {
        let now = Utc::now();
        let end_of_day = now
            .date_naive()
            .and_hms_opt(23, 59, 59)
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        self.list_events(now, end_of_day).await
    }

    pub async fn create_event(
        &self,
        summary: &str,
        start: &str,
        end: &str,
    ) -> Result<Value, String> {
        let url = format!("{CALENDAR_API}/calendars/primary/events");
        let body = json!({
            "summary": summary,
            "start": { "dateTime": start },
            "end": { "dateTime": end },
        });
        self.send_json(reqwest::Method::POST, &url, Some(&body)).await
    }

    pub async fn update_event(&self, event_id: &str, patch: &Value) -> Result<Value, String> {
        let url = format!("{CALENDAR_API}/calendars/primary/events/{}", urlencode(event_id));
        self.send_json(reqwest::Method::PATCH, &url, Some(patch)).await
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<(), String> {
        let url = format!("{CALENDAR_API}/calendars/primary/events/{}", urlencode(event_id));
        self.send_json(reqwest::Method::DELETE, &url, None)
            .await
            .map(|_| ())
    }

    // -- Drive / Docs ------------------------------------------------------

    /// Newest Drive file whose name starts with the given prefix.
    pub async fn find_file_by_prefix(&self, prefix: &str) -> Result<Option<DriveFile>, String> {
        let escaped = prefix.replace('\'', "\\'");
        let query = format!("name contains '{escaped}' and trashed = false");
        let url = format!(
            "{DRIVE_API}/files?q={}&orderBy=createdTime desc&pageSize=10&fields=files(id,name,mimeType)",
            urlencode(&query),
        );
        let body = self.get_json(&url).await?;
        Ok(parse_drive_files(&body)
            .into_iter()
            .find(|f| f.name.starts_with(prefix)))
    }

    pub async fn search_files(&self, needle: &str) -> Result<Vec<DriveFile>, String> {
        let escaped = needle.replace('\'', "\\'");
        let query = format!("name contains '{escaped}' and trashed = false");
        let url = format!(
            "{DRIVE_API}/files?q={}&orderBy=modifiedTime desc&pageSize=10&fields=files(id,name,mimeType)",
            urlencode(&query),
        );
        let body = self.get_json(&url).await?;
        Ok(parse_drive_files(&body))
    }

    pub async fn list_recent_files(&self) -> Result<Vec<DriveFile>, String> {
        let url = format!(
            "{DRIVE_API}/files?orderBy=modifiedTime desc&pageSize=10&fields=files(id,name,mimeType)"
        );
        let body = self.get_json(&url).await?;
        Ok(parse_drive_files(&body))
    }

    /// Export a Google Doc as plain text (meeting transcripts).
    pub async fn export_doc_text(&self, file_id: &str) -> Result<String, String> {
        let url = format!(
            "{DRIVE_API}/files/{}/export?mimeType=text/plain",
            urlencode(file_id),
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| format!("google request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("doc export returned {status}"));
        }
        resp.text()
            .await
            .map_err(|e| format!("failed to read doc export: {e}"))
    }
}

fn parse_events(body: &Value) -> Vec<CalendarEvent> {
    body["items"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    // All-day events only carry `date`; they have no meeting
                    // window and are skipped.
                    let start = item["start"]["dateTime"].as_str()?;
                    let end = item["end"]["dateTime"].as_str()?;
                    Some(CalendarEvent {
                        id: item["id"].as_str()?.to_string(),
                        summary: item["summary"].as_str().unwrap_or("(untitled)").to_string(),
                        start: chrono::DateTime::parse_from_rfc3339(start).ok()?.to_utc(),
                        end: chrono::DateTime::parse_from_rfc3339(end).ok()?.to_utc(),
                        has_conference: item.get("conferenceData").is_some(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_drive_files(body: &Value) -> Vec<DriveFile> {
    body["files"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|f| {
                    Some(DriveFile {
                        id: f["id"].as_str()?.to_string(),
                        name: f["name"].as_str().unwrap_or_default().to_string(),
                        mime_type: f["mimeType"].as_str().unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Micro-agent tool surface
// ---------------------------------------------------------------------------

/// Tool definitions for the calendar micro-agent (Anthropic schema).
pub fn calendar_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_events",
            "description": "List calendar events between two RFC3339 instants.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "time_min": { "type": "string" },
                    "time_max": { "type": "string" },
                },
                "required": ["time_min", "time_max"],
            }
        }),
        json!({
            "name": "create_event",
            "description": "Create a calendar event.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "start": { "type": "string", "description": "RFC3339 start" },
                    "end": { "type": "string", "description": "RFC3339 end" },
                },
                "required": ["summary", "start", "end"],
            }
        }),
        json!({
            "name": "update_event",
            "description": "Patch fields on an existing event.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "event_id": { "type": "string" },
                    "patch": { "type": "object" },
                },
                "required": ["event_id", "patch"],
            }
        }),
        json!({
            "name": "delete_event",
            "description": "Delete an event by id.",
            "input_schema": {
                "type": "object",
                "properties": { "event_id": { "type": "string" } },
                "required": ["event_id"],
            }
        }),
    ]
}

/// Tool definitions for the drive micro-agent.
pub fn drive_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "search_files",
            "description": "Search Drive files by name fragment.",
            "input_schema": {
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
            }
        }),
        json!({
            "name": "list_recent_files",
            "description": "List the most recently modified Drive files.",
            "input_schema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "read_file",
            "description": "Export a Google Doc as plain text.",
            "input_schema": {
                "type": "object",
                "properties": { "file_id": { "type": "string" } },
                "required": ["file_id"],
            }
        }),
    ]
}

/// Execute one tool call against the authenticated client, returning a
/// plain-text result for the model.
pub async fn execute_tool(client: &GoogleClient, name: &str, input: &Value) -> String {
    let str_arg = |key: &str| input.get(key).and_then(|v| v.as_str()).unwrap_or_default();

    match name {
        "list_events" => {
            let min = chrono::DateTime::parse_from_rfc3339(str_arg("time_min"));
            let max = chrono::DateTime::parse_from_rfc3339(str_arg("time_max"));
            let (Ok(min), Ok(max)) = (min, max) else {
                return "Invalid time range.".to_string();
            };
            match client.list_events(min.to_utc(), max.to_utc()).await {
                Ok(events) if events.is_empty() => "No events in that range.".to_string(),
                Ok(events) => events
                    .iter()
                    .map(|e| format!("{} — {} ({} to {})", e.id, e.summary, e.start, e.end))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("Calendar error: {e}"),
            }
        }
        "create_event" => {
            match client
                .create_event(str_arg("summary"), str_arg("start"), str_arg("end"))
                .await
            {
                Ok(created) => format!(
                    "Created event {}",
                    created["id"].as_str().unwrap_or("(unknown id)")
                ),
                Err(e) => format!("Calendar error: {e}"),
            }
        }
        "update_event" => {
            let patch = input.get("patch").cloned().unwrap_or_else(|| json!({}));
            match client.update_event(str_arg("event_id"), &patch).await {
                Ok(_) => "Event updated.".to_string(),
                Err(e) => format!("Calendar error: {e}"),
            }
        }
        "delete_event" => match client.delete_event(str_arg("event_id")).await {
            Ok(()) => "Event deleted.".to_string(),
            Err(e) => format!("Calendar error: {e}"),
        },
        "search_files" => match client.search_files(str_arg("query")).await {
            Ok(files) if files.is_empty() => "No matching files.".to_string(),
            Ok(files) => files
                .iter()
                .map(|f| format!("{} — {} ({})", f.id, f.name, f.mime_type))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Drive error: {e}"),
        },
        "list_recent_files" => match client.list_recent_files().await {
            Ok(files) if files.is_empty() => "No recent files.".to_string(),
            Ok(files) => files
                .iter()
                .map(|f| format!("{} — {} ({})", f.id, f.name, f.mime_type))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Drive error: {e}"),
        },
        "read_file" => match client.export_doc_text(str_arg("file_id")).await {
            Ok(text) => text,
            Err(e) => format!("Drive error: {e}"),
        },
        other => format!("Unknown tool: {other}"),
    }
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn broker_with_store() -> (tempfile::TempDir, Arc<TokenStore>, OAuthBroker) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.db");
        let store = Arc::new(TokenStore::open(path.to_str().unwrap()).await.unwrap());
        let broker = OAuthBroker::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://localhost:3000/api/google/callback".to_string(),
            "state-secret".to_string(),
            Arc::clone(&store),
        );
        (dir, store, broker)
    }

    #[test]
    fn test_state_round_trip() {
        let state = sign_state("s3cret", "U12345");
        assert!(state.starts_with("U12345:"));
        assert_eq!(parse_state("s3cret", &state).unwrap(), "U12345");
    }

    #[test]
    fn test_state_tampered_hmac_rejected() {
        assert!(matches!(
            parse_state("s3cret", "U12345:ffff"),
            Err(OAuthError::InvalidState)
        ));
    }

    #[test]
    fn test_state_wrong_shape_rejected() {
        for bad in ["nocolon", "a:b:c", ":sig", ""] {
            assert!(
                matches!(parse_state("s3cret", bad), Err(OAuthError::InvalidState)),
                "state {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_state_signed_with_other_secret_rejected() {
        let state = sign_state("other-secret", "U12345");
        assert!(matches!(
            parse_state("s3cret", &state),
            Err(OAuthError::InvalidState)
        ));
    }

    #[tokio::test]
    async fn test_auth_url_contains_signed_state() {
        let (_dir, _store, broker) = broker_with_store().await;
        let url = broker.auth_url("U1");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=U1%3A"));
    }

    #[tokio::test]
    async fn test_callback_upserts_tokens() {
        let (_dir, store, broker) = broker_with_store().await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/token",
            post(|| async {
                axum::Json(json!({
                    "access_token": "at-new",
                    "refresh_token": "rt-new",
                    "expires_in": 3600,
                    "scope": "calendar drive",
                }))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let broker = broker.with_endpoints(
            format!("http://{addr}/token"),
            format!("http://{addr}/revoke"),
        );

        let state = sign_state("state-secret", "U777");
        let subject = broker.handle_callback("auth-code", &state).await.unwrap();
        assert_eq!(subject, "U777");

        let record = store.get("U777").await.unwrap().unwrap();
        assert_eq!(record.access_token, "at-new");
        assert_eq!(record.refresh_token, "rt-new");
        assert!(record.expiry_ms > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_callback_missing_refresh_token_fails() {
        let (_dir, store, broker) = broker_with_store().await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/token",
            post(|| async { axum::Json(json!({ "access_token": "at", "expires_in": 3600 })) }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let broker = broker.with_endpoints(
            format!("http://{addr}/token"),
            format!("http://{addr}/revoke"),
        );
        let state = sign_state("state-secret", "U1");
        let result = broker.handle_callback("code", &state).await;
        assert!(matches!(result, Err(OAuthError::MissingTokens)));
        assert!(store.get("U1").await.unwrap().is_none(), "no partial record");
    }

    #[tokio::test]
    async fn test_tampered_state_never_reaches_exchange() {
        let (_dir, store, broker) = broker_with_store().await;
        // No mock server at all: a tampered state must fail before any HTTP.
        let result = broker.handle_callback("code", "U12345:ffff").await;
        assert!(matches!(result, Err(OAuthError::InvalidState)));
        assert!(store.get("U12345").await.unwrap().is_none());
        assert!(!broker.is_connected("U12345").await);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_exactly_once() {
        let (_dir, store, broker) = broker_with_store().await;

        store
            .upsert(&TokenRecord {
                subject_id: "U42".to_string(),
                access_token: "stale".to_string(),
                refresh_token: "rt-keep".to_string(),
                expiry_ms: 0, // long expired
                scope: "calendar".to_string(),
            })
            .await
            .unwrap();

        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/token",
            post(|| async {
                CALLS.fetch_add(1, Ordering::SeqCst);
                axum::Json(json!({ "access_token": "fresh", "expires_in": 3600 }))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let broker = broker.with_endpoints(
            format!("http://{addr}/token"),
            format!("http://{addr}/revoke"),
        );

        let _client = broker.get_client("U42").await.unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        let record = store.get("U42").await.unwrap().unwrap();
        assert_eq!(record.access_token, "fresh");
        assert_eq!(record.refresh_token, "rt-keep", "refresh token preserved");
        assert!(record.expiry_ms > Utc::now().timestamp_millis());

        // Token is now valid — a second client must not refresh again.
        let _client = broker.get_client("U42").await.unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_client_not_connected() {
        let (_dir, _store, broker) = broker_with_store().await;
        assert!(matches!(
            broker.get_client("nobody").await,
            Err(OAuthError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_deletes_even_when_revoke_unreachable() {
        let (_dir, store, broker) = broker_with_store().await;
        store
            .upsert(&TokenRecord {
                subject_id: "U9".to_string(),
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                expiry_ms: i64::MAX,
                scope: String::new(),
            })
            .await
            .unwrap();

        // Revoke endpoint points at a closed port.
        let broker = broker.with_endpoints(
            "http://127.0.0.1:1/token".to_string(),
            "http://127.0.0.1:1/revoke".to_string(),
        );
        broker.disconnect("U9").await.unwrap();
        assert!(store.get("U9").await.unwrap().is_none());
    }

    #[test]
    fn test_parse_events_skips_all_day() {
        let body = json!({
            "items": [
                {
                    "id": "evt-1",
                    "summary": "Sprint planning",
                    "start": { "dateTime": "2026-08-02T10:00:00Z" },
                    "end": { "dateTime": "2026-08-02T11:00:00Z" },
                    "conferenceData": { "conferenceId": "abc" }
                },
                {
                    "id": "evt-2",
                    "summary": "Company holiday",
                    "start": { "date": "2026-08-03" },
                    "end": { "date": "2026-08-04" }
                },
                {
                    "id": "evt-3",
                    "summary": "Focus time",
                    "start": { "dateTime": "2026-08-02T12:00:00Z" },
                    "end": { "dateTime": "2026-08-02T13:00:00Z" }
                }
            ]
        });
        let events = parse_events(&body);
        assert_eq!(events.len(), 2);
        assert!(events[0].has_conference);
        assert!(!events[1].has_conference);
    }

    #[test]
    fn test_parse_drive_files() {
        let body = json!({
            "files": [
                { "id": "f1", "name": "Sprint planning - 2026-08-02 - Notes by Gemini",
                  "mimeType": "application/vnd.google-apps.document" },
            ]
        });
        let files = parse_drive_files(&body);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "f1");
    }

    #[test]
    fn test_tool_surfaces_are_bounded() {
        assert!(calendar_tool_definitions().len() <= 5);
        assert!(drive_tool_definitions().len() <= 5);
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("a b&c"), "a%20b%26c");
        assert_eq!(urlencode("safe-chars_.~"), "safe-chars_.~");
    }
}
