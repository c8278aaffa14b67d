//! Concurrent probing of many hosts with a bounded worker pool.
//!
//! Jobs go into a FIFO work queue; up to `max_concurrency` workers pull from
//! it, probe, and record results keyed by correlation key. The scheduler
//! waits until every queued job is accounted for, then sends one shutdown
//! sentinel per worker and joins them all before returning.

use crate::cancel::CancellationSignal;
use crate::probe::{ProbeParams, ProbeResult, Prober};
use anyhow::{ensure, Result};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

static KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A host to probe, optionally with a caller-chosen correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTarget {
    pub host: String,
    pub key: Option<String>,
}

impl BatchTarget {
    pub fn keyed(host: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            key: Some(key.into()),
        }
    }
}

impl From<&str> for BatchTarget {
    fn from(host: &str) -> Self {
        Self {
            host: host.to_string(),
            key: None,
        }
    }
}

impl From<String> for BatchTarget {
    fn from(host: String) -> Self {
        Self { host, key: None }
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub host: String,
    pub params: ProbeParams,
    pub correlation_key: String,
}

/// Builds a key that stays unique for repeated hosts within one process:
/// host, wall-clock nanos, submitting thread and a global sequence number.
pub fn synthesize_key(host: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let thread: String = format!("{:?}", thread::current().id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let seq = KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{host}_{nanos}_{thread}_{seq}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submitted {
    pub key: String,
    pub host: String,
}

/// Results of one batch. Keys whose job never ran (cancellation, shutdown)
/// are absent from the map but still listed in submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResultSet {
    submitted: Vec<Submitted>,
    results: BTreeMap<String, ProbeResult>,
    cancelled: bool,
}

impl BatchResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ProbeResult> {
        self.results.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn submitted(&self) -> &[Submitted] {
        &self.submitted
    }

    /// Every submitted job in submission order with its result, if any.
    pub fn entries(&self) -> impl Iterator<Item = (&Submitted, Option<&ProbeResult>)> {
        self.submitted
            .iter()
            .map(|s| (s, self.results.get(&s.key)))
    }

    pub fn unprocessed(&self) -> impl Iterator<Item = &Submitted> {
        self.submitted
            .iter()
            .filter(|s| !self.results.contains_key(&s.key))
    }

    /// True when the cancellation signal was observed set at the end of the run.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Reported once per finished job, from the worker that ran it.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    pub host: &'a str,
    pub key: &'a str,
    pub result: &'a ProbeResult,
    pub completed: usize,
    pub total: usize,
}

pub struct BatchScheduler<P> {
    prober: P,
    cancel: Option<CancellationSignal>,
    poll_interval: Duration,
}

impl<P: Prober> BatchScheduler<P> {
    pub fn new(prober: P) -> Self {
        Self {
            prober,
            cancel: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Workers check `signal` before each probe and skip remaining jobs once
    /// it is set.
    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// How long an idle worker waits on an empty queue before exiting.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Probes every target with at most `max_concurrency` probes in flight and
    /// blocks until all queued jobs are accounted for. All state is local to
    /// the call.
    pub fn probe_all(
        &self,
        targets: &[BatchTarget],
        params: &ProbeParams,
        max_concurrency: usize,
    ) -> Result<BatchResultSet> {
        self.probe_all_with_progress(targets, params, max_concurrency, |_| {})
    }

    /// Like [`probe_all`](Self::probe_all), calling `on_done` after each
    /// result is recorded. Skipped jobs are not reported.
    pub fn probe_all_with_progress<F>(
        &self,
        targets: &[BatchTarget],
        params: &ProbeParams,
        max_concurrency: usize,
        on_done: F,
    ) -> Result<BatchResultSet>
    where
        F: Fn(&BatchProgress<'_>) + Sync,
    {
        ensure!(max_concurrency >= 1, "max_concurrency must be at least 1");

        let jobs = materialize(targets, params)?;
        let submitted: Vec<Submitted> = jobs
            .iter()
            .map(|j| Submitted {
                key: j.correlation_key.clone(),
                host: j.host.clone(),
            })
            .collect();
        if jobs.is_empty() {
            return Ok(BatchResultSet {
                submitted,
                results: BTreeMap::new(),
                cancelled: self.is_cancelled(),
            });
        }

        let queue = WorkQueue::new();
        let results = Mutex::new(BTreeMap::new());
        let progress = Progress {
            completed: AtomicUsize::new(0),
            total: jobs.len(),
            on_done: &on_done,
        };
        let worker_count = max_concurrency.min(jobs.len());
        info!(jobs = jobs.len(), workers = worker_count, "starting probe batch");

        for job in jobs {
            queue.put(Message::Job(job));
        }

        thread::scope(|s| {
            let mut spawned = 0;
            for i in 0..worker_count {
                let spawn = thread::Builder::new()
                    .name(format!("probe-worker-{i}"))
                    .spawn_scoped(s, || self.work(&queue, &results, &progress));
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!("failed to spawn probe worker {i}: {e}"),
                }
            }
            if spawned == 0 {
                warn!("no probe workers could be spawned; probing on the calling thread");
                self.work(&queue, &results, &progress);
            }

            queue.join();
            for _ in 0..spawned {
                queue.put(Message::Shutdown);
            }
            // Leaving the scope joins every worker.
        });

        let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        let cancelled = self.is_cancelled();
        info!(
            completed = results.len(),
            submitted = submitted.len(),
            cancelled,
            "probe batch finished"
        );
        Ok(BatchResultSet {
            submitted,
            results,
            cancelled,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationSignal::is_set)
    }

    fn work(
        &self,
        queue: &WorkQueue,
        results: &Mutex<BTreeMap<String, ProbeResult>>,
        progress: &Progress<'_>,
    ) {
        while let Some(message) = queue.get(self.poll_interval) {
            let job = match message {
                Message::Shutdown => return,
                Message::Job(job) => job,
            };
            let _done = TaskDone(queue);

            if self.is_cancelled() {
                debug!(host = %job.host, key = %job.correlation_key, "cancelled; skipping job");
                continue;
            }

            let probed = panic::catch_unwind(AssertUnwindSafe(|| {
                self.prober.probe(&job.host, &job.params)
            }));
            let result = probed.unwrap_or_else(|payload| {
                let msg = panic_message(payload.as_ref());
                warn!(host = %job.host, key = %job.correlation_key, "probe worker fault: {msg}");
                ProbeResult::failed(&job.host, format!("internal worker error: {msg}"))
            });

            progress.report(&job, &result);
            lock(results).insert(job.correlation_key, result);
        }
        debug!("probe worker idle; exiting");
    }
}

fn materialize(targets: &[BatchTarget], params: &ProbeParams) -> Result<Vec<BatchJob>> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(targets.len());
    for target in targets {
        let key = match &target.key {
            Some(key) => key.clone(),
            None => synthesize_key(&target.host),
        };
        ensure!(
            seen.insert(key.clone()),
            "duplicate correlation key in batch: {key}"
        );
        jobs.push(BatchJob {
            host: target.host.clone(),
            params: *params,
            correlation_key: key,
        });
    }
    Ok(jobs)
}

struct Progress<'a> {
    completed: AtomicUsize,
    total: usize,
    on_done: &'a (dyn Fn(&BatchProgress<'_>) + Sync),
}

impl Progress<'_> {
    fn report(&self, job: &BatchJob, result: &ProbeResult) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let update = BatchProgress {
            host: &job.host,
            key: &job.correlation_key,
            result,
            completed,
            total: self.total,
        };
        // A faulty callback must not take the worker down with its job.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.on_done)(&update))) {
            let msg = panic_message(payload.as_ref());
            warn!(host = %job.host, "progress callback panicked: {msg}");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Message {
    Job(BatchJob),
    Shutdown,
}

/// FIFO queue with "all jobs done" tracking. Only jobs count towards the
/// unfinished total; shutdown sentinels don't.
struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    drained: Condvar,
}

struct QueueState {
    items: VecDeque<Message>,
    unfinished: usize,
}

impl WorkQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    fn put(&self, message: Message) {
        let mut state = lock(&self.state);
        if matches!(message, Message::Job(_)) {
            state.unfinished += 1;
        }
        state.items.push_back(message);
        self.available.notify_one();
    }

    /// Next message, or `None` if the queue stayed empty for `timeout`.
    fn get(&self, timeout: Duration) -> Option<Message> {
        let state = lock(&self.state);
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    fn task_done(&self) {
        let mut state = lock(&self.state);
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.drained.notify_all();
        }
    }

    /// Blocks until every queued job has been marked done.
    fn join(&self) {
        let state = lock(&self.state);
        let _state = self
            .drained
            .wait_while(state, |s| s.unfinished > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Marks a dequeued job done when dropped, so a job is accounted for even if
/// recording its result unwinds.
struct TaskDone<'a>(&'a WorkQueue);

impl Drop for TaskDone<'_> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}
