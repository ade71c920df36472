use super::cadence::Eta;
use super::job::{FiredJob, JobSpec, JobTable, PURCHASE_TAG};
use crate::clock::Clock;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Work performed when a job fires
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: FiredJob) -> Result<()>;
}

/// Read-only window onto the job table for status displays
#[derive(Clone)]
pub struct ScheduleView {
    table: Arc<RwLock<JobTable>>,
    clock: Arc<dyn Clock>,
}

impl ScheduleView {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Arc::new(RwLock::new(JobTable::new())),
            clock,
        }
    }

    /// Hours and minutes until `tag` fires next. Never negative.
    pub fn time_until_next(&self, tag: &str) -> Eta {
        let now = self.clock.now();
        self.table.read().unwrap().time_until_next(tag, now)
    }

    pub fn next_fire_at(&self, tag: &str) -> Option<DateTime<Utc>> {
        self.table
            .read()
            .unwrap()
            .get(tag)
            .and_then(|job| job.next_fire_at)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Poll granularity of the tick loop
    pub tick: Duration,
    /// How long `stop()` waits for in-flight jobs
    pub shutdown_grace: Duration,
    /// Fire the purchase job once as soon as the scheduler starts
    pub run_immediately: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            run_immediately: false,
        }
    }
}

struct Inner {
    view: ScheduleView,
    runner: Arc<dyn JobRunner>,
    in_flight: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Inner {
    /// Take every due job and dispatch it. Returns the tags actually dispatched.
    fn run_pending(&self, now: DateTime<Utc>) -> Vec<String> {
        // Next fire times are moved forward here, before any job work starts
        let due = self.view.table.write().unwrap().take_due(now);

        due.into_iter()
            .filter_map(|fired| {
                let tag = fired.tag.clone();
                self.dispatch(fired).then_some(tag)
            })
            .collect()
    }

    /// Spawn a job unless the previous dispatch with the same tag is still running
    fn dispatch(&self, fired: FiredJob) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.retain(|_, handle| !handle.is_finished());

        if in_flight.contains_key(&fired.tag) {
            tracing::warn!(
                "⏭️  Job {} still running from a previous slot, skipping slot {}",
                fired.tag,
                fired.slot
            );
            return false;
        }

        tracing::info!("🚀 Dispatching job {} for slot {}", fired.tag, fired.slot);

        let tag = fired.tag.clone();
        let runner = self.runner.clone();
        let handle = tokio::spawn(async move {
            let job_tag = fired.tag.clone();
            // Inner task so a panic surfaces as a JoinError here instead of
            // tearing down anything else
            let work = tokio::spawn(async move { runner.run(fired).await });

            match work.await {
                Ok(Ok(())) => tracing::debug!("Job {} finished", job_tag),
                Ok(Err(e)) => tracing::error!("Job {} failed: {}", job_tag, e),
                Err(e) if e.is_panic() => tracing::error!("Job {} panicked: {}", job_tag, e),
                Err(e) => tracing::warn!("Job {} was cancelled: {}", job_tag, e),
            }
        });

        in_flight.insert(tag, handle);
        true
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the tick loop and every job's lifecycle
pub struct Scheduler {
    specs: Vec<JobSpec>,
    options: SchedulerOptions,
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        view: ScheduleView,
        specs: Vec<JobSpec>,
        runner: Arc<dyn JobRunner>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            specs,
            options,
            inner: Arc::new(Inner {
                view,
                runner,
                in_flight: Mutex::new(HashMap::new()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Register all jobs, compute their first fire times and start ticking.
    ///
    /// Calling this on a running scheduler logs a warning and does nothing.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            tracing::warn!("Scheduler already running, ignoring start()");
            return Ok(());
        }

        let now = self.inner.view.now();
        {
            let mut table = self.inner.view.table.write().unwrap();
            table.clear();
            for spec in &self.specs {
                table.register(spec.clone())?;
            }
            table.arm(now);
        }

        if self.options.run_immediately {
            let fired = self.inner.view.table.read().unwrap().fire_now(PURCHASE_TAG, now);
            match fired {
                Some(fired) => {
                    tracing::info!("Running purchase immediately on startup");
                    self.inner.dispatch(fired);
                }
                None => tracing::warn!("run_immediately set but no purchase job is registered"),
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tick_loop(self.inner.clone(), self.options.tick, shutdown_rx));

        *running = Some(Running {
            shutdown: shutdown_tx,
            handle,
        });

        tracing::info!(
            "✅ Scheduler started with {} job(s), ticking every {:?}",
            self.specs.len(),
            self.options.tick
        );
        Ok(())
    }

    /// Stop ticking, wait for in-flight jobs (up to the grace period) and drop
    /// all jobs. Jobs still running after the grace period are left to finish
    /// on their own; a submitted order is never aborted.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        let running = match running {
            Some(r) => r,
            None => {
                tracing::debug!("Scheduler not running, ignoring stop()");
                return;
            }
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!("Scheduler loop ended abnormally: {}", e);
        }

        let handles: Vec<(String, JoinHandle<()>)> =
            self.inner.in_flight.lock().unwrap().drain().collect();
        let deadline = Instant::now() + self.options.shutdown_grace;

        for (tag, handle) in handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!(
                    "Job {} still running after {:?} grace period, leaving it to finish",
                    tag,
                    self.options.shutdown_grace
                );
            }
        }

        self.inner.view.table.write().unwrap().clear();
        tracing::info!("👋 Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    /// Evaluate the job table once at `now`. The tick loop calls this every tick.
    pub fn run_pending(&self, now: DateTime<Utc>) -> Vec<String> {
        self.inner.run_pending(now)
    }

    /// (hours, minutes) until `tag` fires next
    pub fn time_until_next(&self, tag: &str) -> (u32, u32) {
        self.inner.view.time_until_next(tag).as_tuple()
    }

    pub fn view(&self) -> &ScheduleView {
        &self.inner.view
    }
}

async fn tick_loop(inner: Arc<Inner>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = inner.view.now();
                inner.run_pending(now);
            }
            _ = shutdown.changed() => {
                tracing::debug!("Scheduler loop received shutdown");
                break;
            }
        }
    }
}
