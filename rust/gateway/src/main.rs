/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 *
 * This program is free software: you can redistribute it
 * and/or modify it under the terms of the GNU Affero
 * General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be
 * useful, but WITHOUT ANY WARRANTY; without even the
 * implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public
 * License for more details.
 *
 * You should have received a copy of the GNU Affero General
 * Public License along with this program. If not, see
 * <https://www.gnu.org/licenses/>.
 */

//! Waggle gateway — the Slack-facing orchestration service.
//!
//! Exposes:
//! - `POST /slack/events`       — Events API (mentions, DMs, thread replies)
//! - `POST /slack/commands`     — slash commands
//! - `POST /slack/interactive`  — block actions and modal submissions
//! - `POST /api/agent-notify`   — unsolicited pushes from worker agents
//! - `GET  /api/google/callback`— OAuth authorization-code callback
//! - `GET  /health`             — health check

mod a2a;
mod blocks;
mod events;
mod google;
mod handlers;
mod intent;
mod llm;
mod meeting_sync;
mod monday;
mod preview;
mod scheduler;
mod session;
mod slack;
mod store;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use waggle_config::Config;

use crate::a2a::A2aClient;
use crate::google::OAuthBroker;
use crate::llm::LlmClient;
use crate::meeting_sync::{MeetingSyncOrchestrator, MeetingSyncService};
use crate::monday::MondayClient;
use crate::scheduler::{JobDeps, Scheduler};
use crate::session::SessionStore;
use crate::slack::{SlackClient, UserDirectory};
use crate::store::{MeetingStore, TokenStore};

pub const SERVICE_NAME: &str = "waggle-gateway";

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub config: Arc<Config>,
    pub slack: Arc<SlackClient>,
    pub a2a: Arc<A2aClient>,
    pub llm: Arc<LlmClient>,
    pub monday: Arc<MondayClient>,
    pub sessions: SessionStore,
    pub directory: UserDirectory,
    pub tokens: Arc<TokenStore>,
    pub meetings: Arc<MeetingStore>,
    pub broker: Option<Arc<OAuthBroker>>,
    pub meeting_sync: Option<Arc<MeetingSyncService>>,
    pub scheduler: Arc<Scheduler>,
    /// Own user id from `auth.test`, used for loop suppression. Empty until
    /// resolved.
    pub bot_user_id: RwLock<String>,
    /// In-flight interactive actions, keyed by preview message ts. Guards
    /// against double-clicks creating duplicate tasks.
    inflight: Mutex<HashSet<String>>,
}

impl AppState {
    /// Claim an interactive action. `false` means the same action is
    /// already being processed.
    pub async fn begin_interaction(&self, key: &str) -> bool {
        self.inflight.lock().await.insert(key.to_string())
    }

    pub async fn end_interaction(&self, key: &str) {
        self.inflight.lock().await.remove(key);
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("fatal: failed to load config: {e}");
            process::exit(1);
        }
    };

    let _telemetry_guard =
        waggle_telemetry::init_telemetry(SERVICE_NAME, &config.waggle, &config.telemetry)
            .unwrap_or_else(|e| {
                eprintln!("fatal: telemetry init failed: {e}");
                process::exit(1);
            });

    info!(service = SERVICE_NAME, env = %config.waggle.env, "starting");

    // Durable stores
    let tokens = match TokenStore::open(&config.stores.token_db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %config.stores.token_db_path, "failed to open token store");
            process::exit(1);
        }
    };
    let meetings = match MeetingStore::open(&config.stores.meeting_db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %config.stores.meeting_db_path, "failed to open meeting store");
            process::exit(1);
        }
    };

    // Shared clients
    let slack_client = Arc::new(SlackClient::new(config.slack.bot_token.clone()));
    let a2a_client = Arc::new(A2aClient::new(
        config.agents.api_key.clone(),
        config.agents.timeout_seconds,
    ));
    let llm_client = Arc::new(LlmClient::new(&config.llm));
    let monday_client = Arc::new(MondayClient::new(&config.monday));

    // OAuth broker, when Google credentials are configured
    let broker = match (
        config.google.client_id.clone(),
        config.google.client_secret.clone(),
        config.oauth_state_secret().map(str::to_string),
    ) {
        (Some(client_id), Some(client_secret), Some(state_secret)) => Some(Arc::new(
            OAuthBroker::new(
                client_id,
                client_secret,
                config.google.redirect_uri.clone(),
                state_secret,
                Arc::clone(&tokens),
            ),
        )),
        (Some(_), Some(_), None) => {
            warn!("google credentials set but no state-signing secret — OAuth disabled");
            None
        }
        _ => {
            info!("google OAuth not configured");
            None
        }
    };

    let sync_service = broker.as_ref().map(|broker| {
        Arc::new(MeetingSyncService::new(
            Arc::clone(broker),
            Arc::clone(&meetings),
            Arc::clone(&llm_client),
            Arc::clone(&slack_client),
            config.slack.notification_channel.clone(),
            config.meeting_sync.lookback_minutes,
        ))
    });

    // Scheduled jobs
    let scheduler = Arc::new(Scheduler::new());
    let deps = JobDeps {
        a2a: Arc::clone(&a2a_client),
        slack: Arc::clone(&slack_client),
        scrum_master_url: config.agents.scrum_master_url.clone(),
        channel: config.slack.notification_channel.clone(),
    };
    for job in scheduler::builtin_jobs(&config.scheduler, &deps) {
        scheduler.register(job).await;
    }
    if config.scheduler.enabled {
        if let Err(e) = scheduler.start_all(&config.scheduler.timezone).await {
            error!(error = %e, "scheduler startup failed");
            process::exit(1);
        }
    } else {
        info!("scheduler disabled by configuration");
    }

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        slack: slack_client,
        a2a: a2a_client,
        llm: llm_client,
        monday: monday_client,
        sessions: SessionStore::new(),
        directory: UserDirectory::new(config.slack.user_map.clone()),
        tokens: Arc::clone(&tokens),
        meetings: Arc::clone(&meetings),
        broker: broker.clone(),
        meeting_sync: sync_service.clone(),
        scheduler: Arc::clone(&scheduler),
        bot_user_id: RwLock::new(String::new()),
        inflight: Mutex::new(HashSet::new()),
    });

    // Resolve our own identity once; loop suppression depends on it.
    match state.slack.auth_test().await {
        Ok(bot_user_id) => {
            info!(bot_user_id = %bot_user_id, "slack identity resolved");
            *state.bot_user_id.write().await = bot_user_id;
        }
        Err(e) => {
            warn!(error = %e, "auth.test failed — own-message suppression limited to bot_id");
        }
    }

    // Calendar-aware meeting sync
    let orchestrator = match (&sync_service, &broker, &config.meeting_sync.subject_id) {
        (Some(service), Some(broker), Some(subject)) if config.meeting_sync.enabled => {
            let orchestrator = MeetingSyncOrchestrator::new(
                Arc::clone(service),
                Arc::clone(&meetings),
                Arc::clone(broker),
                subject.clone(),
                &config.meeting_sync,
            );
            orchestrator.start().await;
            Some(orchestrator)
        }
        _ => {
            if config.meeting_sync.enabled {
                warn!("meeting sync enabled but missing OAuth config or subject_id");
            }
            None
        }
    };

    let app = Router::new()
        .route("/slack/events", post(events::slack_events))
        .route("/slack/commands", post(events::slack_commands))
        .route("/slack/interactive", post(events::slack_interactive))
        .route("/api/agent-notify", post(events::agent_notify))
        .route("/api/google/callback", get(events::google_callback))
        .route("/health", get(events::health))
        .layer(DefaultBodyLimit::max(1_048_576)) // 1 MiB
        .layer(middleware::from_fn(security_headers_middleware))
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.gateway.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %addr, "gateway listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // Orderly teardown: stop timers first, then close the stores.
    scheduler.stop_all().await;
    if let Some(orchestrator) = orchestrator {
        orchestrator.stop().await;
    }
    tokens.close().await;
    meetings.close().await;

    info!("shutdown complete");
}

// ---------------------------------------------------------------------------
// Shutdown signal: SIGINT (ctrl-c) or SIGTERM
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| error!(error = %e, "ctrl-c handler failed"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Security headers middleware (OWASP A05)
// ---------------------------------------------------------------------------

async fn security_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        "X-Content-Type-Options",
        header::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Cache-Control",
        header::HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert("Pragma", header::HeaderValue::from_static("no-cache"));
    headers.insert(
        "Permissions-Policy",
        header::HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    resp
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inflight_guard_claims_once() {
        let inflight = Mutex::new(HashSet::new());
        assert!(inflight.lock().await.insert("m-1".to_string()));
        assert!(!inflight.lock().await.insert("m-1".to_string()));
        inflight.lock().await.remove("m-1");
        assert!(inflight.lock().await.insert("m-1".to_string()));
    }
}
