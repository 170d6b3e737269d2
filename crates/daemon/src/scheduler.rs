//! Run-state machine
//!
//! `stopped -> waiting -> running -> waiting -> ...` while the schedule is
//! active; `one-off` is reported while a manual run is in flight and falls
//! back to whatever state preceded it. At most one cycle runs at a time: the
//! pass gate is held for the whole cycle, scheduled ticks wait for it and
//! manual runs are rejected while it is taken.
//!
//! Every transition is persisted to `run_state.json` so a restart can resume
//! the schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use crate::cycle::{CycleReport, PassRunner};
use crate::store::JsonStore;

/// Errors returned by run-state transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("automation is already running")]
    AlreadyRunning,

    #[error("automation is not running")]
    NotRunning,

    #[error("a pass is already in progress")]
    Busy,

    #[error("pass task failed: {0}")]
    TaskFailed(String),
}

/// Externally visible run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    #[default]
    Stopped,
    Waiting,
    Running,
    OneOff,
}

/// Persisted run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunStateRecord {
    pub state: RunStatus,
    /// Whether the interval schedule is on, independent of one-off runs.
    pub schedule_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Labels pinned since local midnight.
    pub pinned_today: Vec<String>,
    /// Local day `pinned_today` belongs to.
    pub pinned_day: Option<NaiveDate>,
    /// Labels pinned by the last cycle.
    pub recently_pinned: Vec<String>,
    pub last_errors: Vec<String>,
    /// Pre-roll installed by the last cycle.
    pub last_preroll: Option<String>,
}

impl RunStateRecord {
    /// Fold a finished cycle into the record.
    fn apply_report(&mut self, report: &CycleReport, finished: DateTime<Local>) {
        let labels = report.pass.pinned_labels();
        let today = finished.date_naive();
        if self.pinned_day != Some(today) {
            self.pinned_today.clear();
            self.pinned_day = Some(today);
        }
        self.pinned_today.extend(labels.iter().cloned());
        self.recently_pinned = labels;
        self.last_errors = report.error_messages();
        self.last_run = Some(finished.with_timezone(&Utc));
        if let Some(preroll) = &report.preroll {
            self.last_preroll = Some(preroll.applied_file.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    OneOff,
}

#[derive(Debug)]
struct Control {
    active: bool,
    phase: Phase,
    /// Incremented on every start so a stale loop cannot reschedule.
    generation: u64,
    cancel: Option<watch::Sender<bool>>,
}

impl Control {
    fn status(&self) -> RunStatus {
        match (self.phase, self.active) {
            (Phase::OneOff, _) => RunStatus::OneOff,
            (_, false) => RunStatus::Stopped,
            (Phase::Running, true) => RunStatus::Running,
            (Phase::Idle, true) => RunStatus::Waiting,
        }
    }
}

/// Owns the run state and the background schedule loop.
pub struct Scheduler {
    runner: Arc<dyn PassRunner>,
    state: Arc<JsonStore<RunStateRecord>>,
    control: Mutex<Control>,
    gate: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn PassRunner>, state: Arc<JsonStore<RunStateRecord>>) -> Arc<Self> {
        Arc::new(Self {
            runner,
            state,
            control: Mutex::new(Control {
                active: false,
                phase: Phase::Idle,
                generation: 0,
                cancel: None,
            }),
            gate: Arc::new(Mutex::new(())),
        })
    }

    /// Current persisted run state.
    pub async fn snapshot(&self) -> RunStateRecord {
        self.state.snapshot().await
    }

    pub async fn status(&self) -> RunStatus {
        self.control.lock().await.status()
    }

    /// Write the derived status plus `f`'s changes. Called with `control` held.
    async fn persist(&self, control: &Control, f: impl FnOnce(&mut RunStateRecord)) {
        let status = control.status();
        let active = control.active;
        let result = self
            .state
            .update(|record| {
                record.state = status;
                record.schedule_active = active;
                f(record);
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "failed to persist run state");
        }
    }

    /// stopped -> waiting. The first run happens one interval from now.
    pub async fn start(self: &Arc<Self>) -> Result<DateTime<Utc>, SchedulerError> {
        let interval = self.runner.interval().await;
        let next_run = next_after(Utc::now(), interval);
        self.activate(next_run).await?;
        info!(next_run = %next_run, "automation started");
        Ok(next_run)
    }

    async fn activate(self: &Arc<Self>, next_run: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut control = self.control.lock().await;
        if control.active {
            return Err(SchedulerError::AlreadyRunning);
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        control.active = true;
        control.generation += 1;
        control.cancel = Some(cancel_tx);
        let generation = control.generation;
        self.persist(&control, |r| r.next_run = Some(next_run)).await;
        drop(control);

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.schedule_loop(generation, cancel_rx).await;
        });
        Ok(())
    }

    /// -> stopped. A pass already in flight finishes on its own.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut control = self.control.lock().await;
        if !control.active {
            return Err(SchedulerError::NotRunning);
        }
        control.active = false;
        if let Some(cancel) = control.cancel.take() {
            let _ = cancel.send(true);
        }
        self.persist(&control, |r| r.next_run = None).await;
        info!("automation stopped");
        Ok(())
    }

    /// Run one cycle now without touching the schedule.
    ///
    /// The cycle runs on its own task, so it completes even if the caller
    /// goes away.
    pub async fn run_once(self: &Arc<Self>) -> Result<CycleReport, SchedulerError> {
        let gate = Arc::clone(&self.gate)
            .try_lock_owned()
            .map_err(|_| SchedulerError::Busy)?;

        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _gate = gate;
            scheduler.set_phase(Phase::OneOff).await;
            info!("one-off run started");
            let report = scheduler.runner.run(Local::now()).await;
            scheduler.finish(&report, None).await;
            report
        });

        task.await.map_err(|e| {
            error!(error = %e, "one-off run failed");
            SchedulerError::TaskFailed(e.to_string())
        })
    }

    /// Run `work` while holding the pass gate, so it never overlaps a cycle.
    ///
    /// Rejected with [`SchedulerError::Busy`] while a cycle is in flight. The
    /// run state is left untouched.
    pub async fn run_exclusive<F, T>(&self, work: F) -> Result<T, SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let gate = Arc::clone(&self.gate)
            .try_lock_owned()
            .map_err(|_| SchedulerError::Busy)?;

        let task = tokio::spawn(async move {
            let _gate = gate;
            work.await
        });
        task.await.map_err(|e| {
            error!(error = %e, "exclusive task failed");
            SchedulerError::TaskFailed(e.to_string())
        })
    }

    /// Resume a schedule that was active before the process stopped.
    ///
    /// A `next_run` still in the future is kept; an overdue one is pushed a
    /// full interval out.
    pub async fn restore(self: &Arc<Self>) -> Result<bool, SchedulerError> {
        let record = self.state.snapshot().await;
        let was_active = record.schedule_active
            || matches!(record.state, RunStatus::Waiting | RunStatus::Running);
        if !was_active {
            if record.state != RunStatus::Stopped {
                let control = self.control.lock().await;
                self.persist(&control, |_| {}).await;
            }
            return Ok(false);
        }

        let now = Utc::now();
        let next_run = match record.next_run {
            Some(next) if next > now => next,
            _ => next_after(now, self.runner.interval().await),
        };
        self.activate(next_run).await?;
        info!(next_run = %next_run, "automation resumed");
        Ok(true)
    }

    async fn set_phase(&self, phase: Phase) {
        let mut control = self.control.lock().await;
        control.phase = phase;
        self.persist(&control, |_| {}).await;
    }

    /// Record a finished cycle. `reschedule` carries the loop generation that
    /// wants a new `next_run`.
    async fn finish(&self, report: &CycleReport, reschedule: Option<u64>) {
        let next_run = match reschedule {
            Some(_) => Some(next_after(Utc::now(), self.runner.interval().await)),
            None => None,
        };
        let mut control = self.control.lock().await;
        control.phase = Phase::Idle;
        let still_current = control.active && reschedule == Some(control.generation);
        let finished = Local::now();
        self.persist(&control, |r| {
            r.apply_report(report, finished);
            if let (true, Some(next)) = (still_current, next_run) {
                r.next_run = Some(next);
            }
        })
        .await;
    }

    async fn schedule_loop(self: Arc<Self>, generation: u64, mut cancel: watch::Receiver<bool>) {
        loop {
            let next_run = self.state.read(|r| r.next_run).await.unwrap_or_else(Utc::now);
            let wait = (next_run - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(wait_secs = wait.as_secs(), "waiting for next scheduled run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.changed() => break,
            }

            // Deferred behind any one-off run in flight, never dropped.
            let _gate = tokio::select! {
                guard = Arc::clone(&self.gate).lock_owned() => guard,
                _ = cancel.changed() => break,
            };

            {
                let mut control = self.control.lock().await;
                if !control.active || control.generation != generation {
                    break;
                }
                control.phase = Phase::Running;
                self.persist(&control, |_| {}).await;
            }

            info!("scheduled run started");
            let report = self.runner.run(Local::now()).await;
            self.finish(&report, Some(generation)).await;

            if *cancel.borrow() {
                break;
            }
        }
        debug!(generation, "schedule loop exited");
    }
}

/// Longest wait between scheduled runs.
const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// When the run after `now` is due. Intervals are capped at [`MAX_INTERVAL`].
fn next_after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let capped = chrono::Duration::from_std(interval.min(MAX_INTERVAL))
        .unwrap_or_else(|_| chrono::Duration::days(36_500));
    now.checked_add_signed(capped).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
