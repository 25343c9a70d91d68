/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Cron-driven job runtime.
//!
//! Jobs are registered up front, validated at start, and each enabled job
//! gets its own timer task that sleeps until the next cron occurrence in the
//! configured timezone. A per-job overlap guard skips (never queues) ticks
//! that land while the previous run is still in flight, and failures are
//! counted instead of propagated — a broken job can never take the process
//! down.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::a2a::{self, A2aClient};
use crate::blocks;
use crate::slack::SlackClient;

/// Reply literal that lets the stale-task agent opt out of posting.
pub const NO_STALE_TASKS: &str = "NO_STALE_TASKS";

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("invalid cron expression for job {job}: {reason}")]
    InvalidCron { job: String, reason: String },
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct JobOutcome {
    pub success: bool,
    pub posted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub execute: JobFn,
}

#[derive(Default)]
struct JobState {
    running: AtomicBool,
    consecutive_failures: AtomicU32,
    last_run: Mutex<Option<DateTime<Utc>>>,
    last_result: Mutex<Option<JobOutcome>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub running: bool,
    pub consecutive_failures: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<JobOutcome>,
}

/// Accept the conventional five-field cron form by prepending a seconds
/// column; six/seven-field expressions pass through untouched.
pub fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub struct Scheduler {
    jobs: Mutex<Vec<(Arc<ScheduledJob>, Arc<JobState>)>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn register(&self, job: ScheduledJob) {
        info!(job = %job.id, cron = %job.cron_expression, enabled = job.enabled, "job registered");
        self.jobs
            .lock()
            .await
            .push((Arc::new(job), Arc::new(JobState::default())));
    }

    /// Validate every enabled job's cron expression and spawn its timer
    /// loop. An invalid expression on an enabled job is a startup error;
    /// disabled jobs are never scheduled.
    pub async fn start_all(&self, timezone: &str) -> Result<(), SchedulerError> {
        let tz = chrono_tz::Tz::from_str(timezone)
            .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))?;

        let jobs = self.jobs.lock().await;
        let mut handles = self.handles.lock().await;

        for (job, state) in jobs.iter() {
            if !job.enabled {
                continue;
            }
            let schedule = cron::Schedule::from_str(&normalize_cron(&job.cron_expression))
                .map_err(|e| SchedulerError::InvalidCron {
                    job: job.id.clone(),
                    reason: e.to_string(),
                })?;

            let job = Arc::clone(job);
            let state = Arc::clone(state);
            handles.push(tokio::spawn(async move {
                run_job_loop(job, state, schedule, tz).await;
            }));
        }

        info!(scheduled = handles.len(), timezone = timezone, "scheduler started");
        Ok(())
    }

    pub async fn stop_all(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    pub async fn get_status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().await;
        let mut out = Vec::with_capacity(jobs.len());
        for (job, state) in jobs.iter() {
            out.push(JobStatus {
                id: job.id.clone(),
                name: job.name.clone(),
                cron_expression: job.cron_expression.clone(),
                enabled: job.enabled,
                running: state.running.load(Ordering::Relaxed),
                consecutive_failures: state.consecutive_failures.load(Ordering::Relaxed),
                last_run: *state.last_run.lock().await,
                last_result: state.last_result.lock().await.clone(),
            });
        }
        out
    }

    /// Run one tick of a job immediately. Returns `false` when the overlap
    /// guard skipped it (a previous tick is still running) or the id is
    /// unknown. Used by the `/scheduler run` command and tests.
    pub async fn trigger(&self, job_id: &str) -> bool {
        let pair = {
            let jobs = self.jobs.lock().await;
            jobs.iter()
                .find(|(job, _)| job.id == job_id)
                .map(|(job, state)| (Arc::clone(job), Arc::clone(state)))
        };
        match pair {
            Some((job, state)) => run_tick(&job, &state).await,
            None => false,
        }
    }
}

async fn run_job_loop(
    job: Arc<ScheduledJob>,
    state: Arc<JobState>,
    schedule: cron::Schedule,
    tz: chrono_tz::Tz,
) {
    loop {
        let now = Utc::now().with_timezone(&tz);
        let Some(next) = schedule.after(&now).next() else {
            warn!(job = %job.id, "cron schedule has no future occurrences");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        run_tick(&job, &state).await;
    }
}

/// One guarded execution. Returns whether `execute` actually ran.
async fn run_tick(job: &Arc<ScheduledJob>, state: &Arc<JobState>) -> bool {
    if state.running.swap(true, Ordering::AcqRel) {
        info!(job = %job.id, "tick skipped — previous run still in flight");
        return false;
    }

    info!(job = %job.id, "job tick");
    *state.last_run.lock().await = Some(Utc::now());

    // Run inside a spawned task so a panicking job is contained and
    // reported as a failed outcome rather than unwinding the runtime.
    let fut = (job.execute)();
    let outcome = match tokio::spawn(fut).await {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome {
            success: false,
            posted: false,
            error: Some(extract_panic_message(&e)),
        },
    };

    if outcome.success {
        state.consecutive_failures.store(0, Ordering::Relaxed);
    } else {
        let failures = state.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        error!(
            job = %job.id,
            consecutive_failures = failures,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "job failed"
        );
    }
    *state.last_result.lock().await = Some(outcome);

    state.running.store(false, Ordering::Release);
    true
}

fn extract_panic_message(e: &tokio::task::JoinError) -> String {
    if e.is_panic() {
        format!("job panicked: {e}")
    } else {
        format!("job cancelled: {e}")
    }
}

// ---------------------------------------------------------------------------
// Built-in jobs: fixed scrum-master prompts posted to the notification channel
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct JobDeps {
    pub a2a: Arc<A2aClient>,
    pub slack: Arc<SlackClient>,
    pub scrum_master_url: String,
    pub channel: Option<String>,
}

const STANDUP_PROMPT: &str = "Generate a daily standup summary of the board: \
what moved since yesterday, what is in progress today, and any blockers.";

const STALE_TASKS_PROMPT: &str = "Review the board for stale tasks that have had \
no updates for three or more days. If there are none, reply with exactly NO_STALE_TASKS.";

const WEEKLY_SUMMARY_PROMPT: &str = "Generate a weekly summary of board activity: \
completed work, items still in progress, and the focus for next week.";

async fn run_agent_job(
    deps: JobDeps,
    prompt: &str,
    render: fn(&str) -> blocks::Rendered,
    honor_stale_sentinel: bool,
) -> JobOutcome {
    let Some(channel) = deps.channel else {
        return JobOutcome {
            success: false,
            posted: false,
            error: Some("no notification channel configured".to_string()),
        };
    };

    let resp = deps.a2a.send_message(&deps.scrum_master_url, prompt, None).await;
    if let Some(err) = resp.error {
        return JobOutcome {
            success: false,
            posted: false,
            error: Some(err.message),
        };
    }
    let Some(task) = resp.result else {
        return JobOutcome {
            success: false,
            posted: false,
            error: Some("agent returned no result".to_string()),
        };
    };

    let text = a2a::extract_text(&task);
    if honor_stale_sentinel && text.contains(NO_STALE_TASKS) {
        info!("stale-task sentinel received — nothing to post");
        return JobOutcome {
            success: true,
            posted: false,
            error: None,
        };
    }

    match deps.slack.post_message(&channel, None, &render(&text), None).await {
        Ok(_) => JobOutcome {
            success: true,
            posted: true,
            error: None,
        },
        Err(e) => JobOutcome {
            success: false,
            posted: false,
            error: Some(e),
        },
    }
}

fn agent_job(
    id: &str,
    name: &str,
    config: &waggle_config::JobConfig,
    deps: JobDeps,
    prompt: &'static str,
    render: fn(&str) -> blocks::Rendered,
    honor_stale_sentinel: bool,
) -> ScheduledJob {
    ScheduledJob {
        id: id.to_string(),
        name: name.to_string(),
        cron_expression: config.cron.clone(),
        enabled: config.enabled,
        execute: Arc::new(move || {
            let deps = deps.clone();
            Box::pin(run_agent_job(deps, prompt, render, honor_stale_sentinel))
        }),
    }
}

/// The three built-in scrum-master jobs, configured from `[scheduler]`.
pub fn builtin_jobs(config: &waggle_config::SchedulerConfig, deps: &JobDeps) -> Vec<ScheduledJob> {
    vec![
        agent_job(
            "standup",
            "Daily standup",
            &config.standup,
            deps.clone(),
            STANDUP_PROMPT,
            blocks::standup,
            false,
        ),
        agent_job(
            "stale_tasks",
            "Stale task check",
            &config.stale_tasks,
            deps.clone(),
            STALE_TASKS_PROMPT,
            blocks::stale_tasks,
            true,
        ),
        agent_job(
            "weekly_summary",
            "Weekly summary",
            &config.weekly_summary,
            deps.clone(),
            WEEKLY_SUMMARY_PROMPT,
            blocks::weekly_summary,
            false,
        ),
    ]
}

// ===========================================================================
// Tests
// ===========================================================================
