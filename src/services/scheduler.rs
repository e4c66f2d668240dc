//! Daily job scheduler.
//!
//! Two jobs run once per UTC day over all farmers:
//! - moisture refresh (default 06:00): today's soil moisture only
//! - GDD catch-up (default 07:00): advance every farmer up to yesterday
//!
//! Each job is its own task that sleeps until the next fire time. A wakeup
//! later than the misfire grace still runs once, with a warning. Several
//! missed fires collapse into that one run because the next fire time is
//! always computed from the current clock. Optionally a catch-up runs once
//! at startup to cover downtime, since `advance` resumes from each farmer's
//! cursor.
//!
//! State is in-memory (`Arc<RwLock<SchedulerState>>`) and served by the status
//! endpoint.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::services::engine::{Engine, RunSummary, RunTarget};

// ---------------------------------------------------------------------------
// State (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MoistureRefresh,
    GddCatchUp,
}

impl JobKind {
    fn label(self) -> &'static str {
        match self {
            JobKind::MoistureRefresh => "moisture refresh",
            JobKind::GddCatchUp => "GDD catch-up",
        }
    }
}

/// Status of one scheduled job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobStatus {
    pub job: JobKind,
    /// Daily fire time, UTC, "HH:MM"
    pub fire_time_utc: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_summary: Option<RunSummary>,
    pub last_error: Option<String>,
    pub total_runs: u64,
    /// Runs that started later than the misfire grace
    pub late_runs: u64,
}

impl JobStatus {
    fn new(job: JobKind, fire_time: NaiveTime) -> Self {
        Self {
            job,
            fire_time_utc: fire_time.format("%H:%M").to_string(),
            next_run_at: None,
            last_started_at: None,
            last_completed_at: None,
            last_duration_ms: None,
            last_summary: None,
            last_error: None,
            total_runs: 0,
            late_runs: 0,
        }
    }
}

/// Global scheduler state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerState {
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub jobs: Vec<JobStatus>,
}

impl SchedulerState {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            active: true,
            started_at: Utc::now(),
            jobs: vec![
                JobStatus::new(JobKind::MoistureRefresh, settings.moisture_time),
                JobStatus::new(JobKind::GddCatchUp, settings.gdd_time),
            ],
        }
    }

    fn job_mut(&mut self, kind: JobKind) -> Option<&mut JobStatus> {
        self.jobs.iter_mut().find(|j| j.job == kind)
    }
}

/// Shared scheduler state handle.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub moisture_time: NaiveTime,
    pub gdd_time: NaiveTime,
    pub misfire_grace: Duration,
    pub catch_up_on_start: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            moisture_time: config.moisture_job_time,
            gdd_time: config.gdd_job_time,
            misfire_grace: Duration::seconds(config.misfire_grace_secs as i64),
            catch_up_on_start: config.catch_up_on_start,
        }
    }
}

// ---------------------------------------------------------------------------
// Fire-time calculation
// ---------------------------------------------------------------------------

/// First instant strictly after `after` whose UTC wall-clock time is `at`.
pub fn next_fire_at(after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let candidate =
        DateTime::<Utc>::from_naive_utc_and_offset(after.date_naive().and_time(at), Utc);
    if candidate > after {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// A fire is late when we wake up more than `grace` past its scheduled time.
fn is_late(scheduled: DateTime<Utc>, woke: DateTime<Utc>, grace: Duration) -> bool {
    woke - scheduled > grace
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Handle to the running scheduler tasks.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    /// Stop scheduling new runs and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Scheduler: task ended abnormally: {}", e);
            }
        }
        self.state.write().await.active = false;
        tracing::info!("Scheduler stopped");
    }
}

/// Spawn the job loops (and the optional startup catch-up).
pub fn start(
    engine: Engine,
    settings: SchedulerSettings,
    state: SharedSchedulerState,
) -> SchedulerHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if settings.catch_up_on_start {
        let engine = engine.clone();
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            tracing::info!("Scheduler: running startup GDD catch-up");
            run_job(&engine, JobKind::GddCatchUp, &state).await;
        }));
    }

    for (kind, fire_time) in [
        (JobKind::MoistureRefresh, settings.moisture_time),
        (JobKind::GddCatchUp, settings.gdd_time),
    ] {
        tasks.push(tokio::spawn(job_loop(
            engine.clone(),
            kind,
            fire_time,
            settings.misfire_grace,
            state.clone(),
            shutdown_rx.clone(),
        )));
    }

    tracing::info!(
        "Scheduler started (moisture {} UTC, GDD {} UTC)",
        settings.moisture_time.format("%H:%M"),
        settings.gdd_time.format("%H:%M"),
    );

    SchedulerHandle {
        shutdown,
        tasks,
        state,
    }
}

async fn job_loop(
    engine: Engine,
    kind: JobKind,
    fire_time: NaiveTime,
    grace: Duration,
    state: SharedSchedulerState,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        let after = last_fire.map_or(now, |fired| fired.max(now));
        let next = next_fire_at(after, fire_time);

        if let Some(job) = state.write().await.job_mut(kind) {
            job.next_run_at = Some(next);
        }

        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!("Scheduler: {} sleeping until {}", kind.label(), next);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
        last_fire = Some(next);

        let woke = Utc::now();
        if is_late(next, woke, grace) {
            tracing::warn!(
                "Scheduler: {} fire at {} woke {}s late, running once now",
                kind.label(),
                next,
                (woke - next).num_seconds()
            );
            if let Some(job) = state.write().await.job_mut(kind) {
                job.late_runs += 1;
            }
        }

        run_job(&engine, kind, &state).await;
    }
}

/// Execute one run of `kind` over all farmers and record the result.
pub async fn run_job(engine: &Engine, kind: JobKind, state: &SharedSchedulerState) {
    let started = Utc::now();
    let today = started.date_naive();
    if let Some(job) = state.write().await.job_mut(kind) {
        job.last_started_at = Some(started);
    }

    let result = match kind {
        JobKind::MoistureRefresh => engine.run_moisture_refresh(RunTarget::All, today).await,
        JobKind::GddCatchUp => engine.run_catch_up(RunTarget::All, today).await,
    };

    let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
    match &result {
        Ok(summary) => tracing::info!(
            job = kind.label(),
            "Scheduler: {} complete in {}ms ({} farmers, {} failed, {} days)",
            kind.label(),
            duration_ms,
            summary.farmers_total,
            summary.farmers_failed,
            summary.days_processed,
        ),
        Err(e) => tracing::error!(job = kind.label(), "Scheduler: {} failed: {}", kind.label(), e),
    }

    if let Some(job) = state.write().await.job_mut(kind) {
        job.last_completed_at = Some(Utc::now());
        job.last_duration_ms = Some(duration_ms);
        job.total_runs += 1;
        match result {
            Ok(summary) => {
                job.last_summary = Some(summary);
                job.last_error = None;
            }
            Err(e) => job.last_error = Some(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
