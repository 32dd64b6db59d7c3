//! Heartbeat scheduler
//!
//! Each registered job gets its own timer task while the scheduler is started. Every tick
//! runs in a separate task so a slow job never delays its own timer; a tick that fires
//! while the previous run of the same job is still in progress is skipped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::heartbeat::schedule::Schedule;

pub type JobFuture = BoxFuture<'static, Result<(), AgentError>>;

/// A schedulable job
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobFn`]
pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
{
    Arc::new(move || -> JobFuture { Box::pin(f()) })
}

/// Snapshot of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub active: bool,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct JobState {
    running: AtomicBool,
    last_run: RwLock<Option<DateTime<Utc>>>,
    next_run: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl JobState {
    /// Claim the job for one run, `None` if it is already running
    fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(self.clone()))
    }

    fn record(&self, result: &Result<(), AgentError>) {
        *self.last_run.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) =
            result.as_ref().err().map(|e| e.to_string());
    }

    fn set_next_run(&self, next: Option<DateTime<Utc>>) {
        *self.next_run.write().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

/// Clears the running flag even if the run is cancelled
struct RunGuard(Arc<JobState>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

struct RegisteredJob {
    name: String,
    expr: String,
    schedule: Schedule,
    job: JobFn,
    state: Arc<JobState>,
    timer: Option<JoinHandle<()>>,
}

/// Cron-like scheduler for named jobs
#[derive(Default)]
pub struct HeartbeatScheduler {
    jobs: Mutex<Vec<RegisteredJob>>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Names are unique; a running scheduler starts the new job at once.
    pub fn register(&self, name: &str, schedule: &str, job: JobFn) -> Result<(), AgentError> {
        let parsed = Schedule::parse(schedule)?;
        let mut jobs = self.lock();

        if jobs.iter().any(|j| j.name == name) {
            return Err(AgentError::DuplicateJob(name.to_string()));
        }

        let started = jobs.iter().any(|j| j.timer.is_some());
        let mut registered = RegisteredJob {
            name: name.to_string(),
            expr: schedule.to_string(),
            schedule: parsed,
            job,
            state: Arc::new(JobState::default()),
            timer: None,
        };
        if started {
            registered.timer = Some(spawn_timer(&registered));
        }

        debug!("Registered job {} ({})", name, schedule);
        jobs.push(registered);
        Ok(())
    }

    /// Start a timer for every registered job
    pub fn start(&self) {
        let mut jobs = self.lock();
        for job in jobs.iter_mut().filter(|j| j.timer.is_none()) {
            job.timer = Some(spawn_timer(job));
        }
        info!("Heartbeat scheduler started with {} jobs", jobs.len());
    }

    /// Cancel all timers. Jobs stay registered and in-flight runs finish.
    pub fn stop(&self) {
        let mut jobs = self.lock();
        for job in jobs.iter_mut() {
            if let Some(timer) = job.timer.take() {
                timer.abort();
            }
            job.state.set_next_run(None);
        }
        info!("Heartbeat scheduler stopped");
    }

    pub fn is_started(&self) -> bool {
        self.lock().iter().any(|j| j.timer.is_some())
    }

    pub fn job_names(&self) -> Vec<String> {
        self.lock().iter().map(|j| j.name.clone()).collect()
    }

    /// Run a job immediately and return its result
    pub async fn run_now(&self, name: &str) -> Result<(), AgentError> {
        let (job, state) = {
            let jobs = self.lock();
            let registered = jobs
                .iter()
                .find(|j| j.name == name)
                .ok_or_else(|| AgentError::UnknownJob(name.to_string()))?;
            (registered.job.clone(), registered.state.clone())
        };

        let _guard = state
            .try_begin()
            .ok_or_else(|| AgentError::SchedulerError(format!("job {} is already running", name)))?;

        info!("Running job {} on demand", name);
        let result = job().await;
        state.record(&result);
        result
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.lock()
            .iter()
            .map(|j| {
                let active = j.timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
                JobStatus {
                    name: j.name.clone(),
                    schedule: j.expr.clone(),
                    active,
                    running: j.state.running.load(Ordering::SeqCst),
                    last_run: *j.state.last_run.read().unwrap_or_else(|e| e.into_inner()),
                    next_run: if active {
                        *j.state.next_run.read().unwrap_or_else(|e| e.into_inner())
                    } else {
                        None
                    },
                    last_error: j.state.last_error.read().unwrap_or_else(|e| e.into_inner()).clone(),
                }
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RegisteredJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(|e| e.into_inner());
        for job in jobs.iter_mut() {
            if let Some(timer) = job.timer.take() {
                timer.abort();
            }
        }
    }
}

fn spawn_timer(registered: &RegisteredJob) -> JoinHandle<()> {
    let name = registered.name.clone();
    let schedule = registered.schedule.clone();
    let job = registered.job.clone();
    let state = registered.state.clone();

    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(delay) = schedule.delay_from(now) else {
                warn!("Job {} has no future run time, stopping its timer", name);
                state.set_next_run(None);
                return;
            };
            state.set_next_run(schedule.next_after(now));

            tokio::time::sleep(delay).await;
            tokio::spawn(tick(name.clone(), job.clone(), state.clone()));
        }
    })
}

async fn tick(name: String, job: JobFn, state: Arc<JobState>) {
    let Some(_guard) = state.try_begin() else {
        warn!("Skipping tick of {}: previous run still in progress", name);
        return;
    };

    debug!("Running job {}", name);
    let result = job().await;
    if let Err(e) = &result {
        error!("Job {} failed: {}", name, e);
    }
    state.record(&result);
}
