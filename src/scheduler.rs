//! Bounded, cancellable poll sweeps.
//!
//! [`Scheduler::poll_all`] runs at most `concurrency` polls at a time, each
//! on its own task. A sweep can be aborted through its [`SweepHandle`]:
//! polls already in flight finish, the rest are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::{FreshetError, Result};
use crate::config::DEFAULT_CONCURRENCY;
use crate::domain::Resource;
use crate::events::{EventSink, PollEvent};
use crate::ingest::Ingestor;
use crate::poller::{PollOptions, PollOutcome, Poller};

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub concurrency: usize,
    /// Overrides every resource's own `max_age`
    pub max_age: Option<Duration>,
    /// Ingest the body after each successful poll
    pub ingest: bool,
    pub events: EventSink,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_age: None,
            ingest: true,
            events: EventSink::silent(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Resources actually fetched
    pub polled: usize,
    pub fresh: usize,
    pub disabled: usize,
    /// Never started because the sweep was aborted
    pub skipped: usize,
    pub failed: usize,
    pub items_new: usize,
    pub aborted: bool,
}

enum TaskOutcome {
    Skipped,
    Polled { outcome: PollOutcome, items_new: usize },
    Failed,
}

impl SweepReport {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Polled { outcome, items_new } => {
                match outcome {
                    PollOutcome::Fetched(_) => self.polled += 1,
                    PollOutcome::Fresh => self.fresh += 1,
                    PollOutcome::Disabled => self.disabled += 1,
                }
                self.items_new += items_new;
            }
        }
    }
}

/// Cancels a running sweep. Cheap to clone, e.g. into a signal handler.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
    /// Set by the first abort and once the sweep has drained
    closed: Arc<AtomicBool>,
    /// Held while cancelling and while a task checks the token and emits
    /// `poll:start`, so no start can follow `poll:abort`
    gate: Arc<Mutex<()>>,
    events: EventSink,
}

impl AbortHandle {
    fn new(events: EventSink) -> Self {
        Self {
            token: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Mutex::new(())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop starting new polls. Emits `poll:abort` on the first call only;
    /// once the sweep is over this does nothing.
    pub fn abort(&self) {
        let _gate = self.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
        self.events.emit(PollEvent::Abort);
    }

    /// Emit `poll:start` for `resource_id` unless the sweep was aborted.
    fn start(&self, resource_id: &str) -> bool {
        let _gate = self.lock();
        if self.token.is_cancelled() {
            return false;
        }
        self.events.emit(PollEvent::Start {
            resource_id: resource_id.to_string(),
        });
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct SweepHandle {
    abort: AbortHandle,
    driver: JoinHandle<SweepReport>,
}

impl SweepHandle {
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Wait for every task of the sweep to finish.
    pub async fn wait(self) -> Result<SweepReport> {
        self.driver
            .await
            .map_err(|e| FreshetError::Other(format!("sweep driver failed: {}", e)))
    }
}

/// Clears the running flag when the sweep driver goes away.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    poller: Arc<Poller>,
    ingestor: Arc<Ingestor>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(poller: Arc<Poller>, ingestor: Arc<Ingestor>) -> Self {
        Self {
            poller,
            ingestor,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a sweep over `resources`. Must be called within a Tokio
    /// runtime. Fails with [`FreshetError::PollInProgress`] while a previous
    /// sweep of this scheduler is still draining.
    pub fn poll_all(&self, resources: Vec<Resource>, options: SweepOptions) -> Result<SweepHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FreshetError::PollInProgress);
        }
        let running = RunningGuard(self.running.clone());

        let events = options.events.clone();
        events.emit(PollEvent::AllStart);
        for resource in &resources {
            events.emit(PollEvent::Enqueue {
                resource_id: resource.id.clone(),
            });
        }

        let concurrency = options.concurrency.max(1);
        let abort = AbortHandle::new(events.clone());

        tracing::info!(
            "Polling {} resources, {} at a time",
            resources.len(),
            concurrency
        );

        let driver = tokio::spawn(drive(
            self.poller.clone(),
            self.ingestor.clone(),
            resources,
            options,
            concurrency,
            abort.clone(),
            running,
        ));

        Ok(SweepHandle { abort, driver })
    }
}

async fn drive(
    poller: Arc<Poller>,
    ingestor: Arc<Ingestor>,
    resources: Vec<Resource>,
    options: SweepOptions,
    concurrency: usize,
    abort: AbortHandle,
    _running: RunningGuard,
) -> SweepReport {
    let slots = Arc::new(Semaphore::new(concurrency));
    let poll_options = PollOptions {
        max_age: options.max_age,
        pool: Some(Arc::new(Semaphore::new(concurrency))),
    };

    let mut handles = Vec::with_capacity(resources.len());
    for resource in resources {
        let poller = poller.clone();
        let ingestor = ingestor.clone();
        let slots = slots.clone();
        let abort = abort.clone();
        let poll_options = poll_options.clone();
        let events = options.events.clone();
        let ingest = options.ingest;

        let handle = tokio::spawn(async move {
            let Ok(_slot) = slots.acquire().await else {
                return TaskOutcome::Skipped;
            };
            if !abort.start(&resource.id) {
                return TaskOutcome::Skipped;
            }

            poll_one(&poller, &ingestor, resource, &poll_options, &events, ingest).await
        });

        handles.push(handle);
    }

    let mut report = SweepReport::default();
    for handle in handles {
        match handle.await {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                tracing::error!("Task join error: {}", e);
                report.failed += 1;
            }
        }
    }

    // No abort event after the sweep is over
    {
        let _gate = abort.lock();
        abort.closed.store(true, Ordering::SeqCst);
    }
    report.aborted = abort.is_aborted();
    options.events.emit(PollEvent::AllEnd);

    tracing::info!(
        "Sweep done: {} polled, {} fresh, {} disabled, {} skipped, {} failed, {} new items",
        report.polled,
        report.fresh,
        report.disabled,
        report.skipped,
        report.failed,
        report.items_new
    );
    report
}

async fn poll_one(
    poller: &Poller,
    ingestor: &Ingestor,
    mut resource: Resource,
    options: &PollOptions,
    events: &EventSink,
    ingest: bool,
) -> TaskOutcome {
    let outcome = match poller.poll_started(&mut resource, options, events).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Failed to poll {}: {}", resource.url, e);
            return TaskOutcome::Failed;
        }
    };

    let mut items_new = 0;
    if ingest && outcome != PollOutcome::Disabled {
        match ingestor.ingest(&mut resource) {
            Ok(report) => items_new = report.new,
            Err(e) => tracing::error!("Failed to ingest {}: {}", resource.url, e),
        }
    }

    TaskOutcome::Polled { outcome, items_new }
}
