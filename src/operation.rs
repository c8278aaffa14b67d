//! Operator actions: circuit view, link check, VM check and ad-hoc pings.
//!
//! Each action runs on its own operation thread. It never touches the
//! foreground directly; status lines and prompt requests travel as [`Event`]s
//! over a channel, and the foreground answers prompts through a reply
//! channel while the operation thread blocks on it.

use crate::batch::{BatchResultSet, BatchScheduler, BatchTarget};
use crate::cancel::{CancellationSignal, OperationGuard};
use crate::config::Config;
use crate::directory::Site;
use crate::monitor::MonitorSession;
use crate::probe::{ProbeParams, Prober};
use crate::report::{status_line, OperationReport, ProbeRow, ReportBody};
use crate::util::now_rfc3339;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub enum Event {
    Status(String),
    /// Ask the operator for a value. An empty reply means "declined".
    Prompt {
        message: String,
        reply: Sender<String>,
    },
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(OperationReport),
    Cancelled(String),
    Failed(String),
}

impl Outcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }
}

/// Operation-side handle for reporting to the foreground.
pub struct Reporter {
    events: Sender<Event>,
}

impl Reporter {
    pub fn status(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{msg}");
        // A vanished foreground is not the operation's problem.
        let _ = self.events.send(Event::Status(msg));
    }

    /// Blocks until the foreground answers. Returns an empty string if the
    /// foreground went away.
    pub fn prompt(&self, message: impl Into<String>) -> String {
        let (reply, answer) = mpsc::channel();
        let sent = self.events.send(Event::Prompt {
            message: message.into(),
            reply,
        });
        if sent.is_err() {
            return String::new();
        }
        answer.recv().unwrap_or_default()
    }
}

/// The operations proper, shared with operation threads.
pub struct Console<P, M> {
    cfg: Config,
    params: ProbeParams,
    scheduler: BatchScheduler<P>,
    monitor: Option<M>,
    cancel: CancellationSignal,
}

impl<P: Prober, M: MonitorSession> Console<P, M> {
    pub fn new(
        cfg: &Config,
        prober: P,
        monitor: Option<M>,
        cancel: CancellationSignal,
    ) -> Result<Self> {
        let params = ProbeParams::from_config(&cfg.probe)?;
        let scheduler = BatchScheduler::new(prober)
            .with_cancellation(cancel.clone())
            .with_poll_interval(Duration::from_millis(cfg.batch.poll_interval_ms.max(1)));
        Ok(Self {
            cfg: cfg.clone(),
            params,
            scheduler,
            monitor,
            cancel,
        })
    }

    pub fn cancel_signal(&self) -> &CancellationSignal {
        &self.cancel
    }

    fn site_label(&self, site: &Site) -> String {
        site.monitor_label(
            &self.cfg.monitor.site_label_prefix,
            self.cfg.monitor.site_label_digits,
        )
    }

    fn monitor(&self) -> Result<&M, String> {
        self.monitor
            .as_ref()
            .ok_or_else(|| "monitoring server is not configured".to_string())
    }

    pub fn view_circuits(&self, site: &Site, reporter: &Reporter) -> Outcome {
        let started = now_rfc3339();
        let monitor = match self.monitor() {
            Ok(m) => m,
            Err(e) => return Outcome::Failed(e),
        };
        let label = self.site_label(site);
        if self.cancel.is_set() {
            return Outcome::Cancelled("circuit query cancelled".into());
        }
        reporter.status(format!(
            "Fetching circuits for {label} in core {}...",
            site.core
        ));
        let info = monitor.fetch_circuit_info(&label, &site.core);
        if self.cancel.is_set() {
            return Outcome::Cancelled("circuit query cancelled".into());
        }
        reporter.status(format!("Circuits for {label} loaded."));
        Outcome::Completed(OperationReport {
            operation: "circuits".into(),
            title: format!("Monitoring circuits for {label} (core: {})", site.core),
            started,
            finished: now_rfc3339(),
            body: ReportBody::Circuits { info },
        })
    }

    /// Pings the site's links. Hosts come from the monitoring server; when it
    /// has none the operator is asked for one.
    pub fn check_links(&self, site: &Site, reporter: &Reporter) -> Outcome {
        let started = now_rfc3339();
        let monitor = match self.monitor() {
            Ok(m) => m,
            Err(e) => return Outcome::Failed(e),
        };
        let label = self.site_label(site);

        if self.cancel.is_set() {
            return Outcome::Cancelled("link check cancelled".into());
        }
        reporter.status(format!("Looking up link addresses for {label}..."));
        let info = monitor.fetch_circuit_info(&label, &site.core);
        if self.cancel.is_set() {
            return Outcome::Cancelled("link check cancelled".into());
        }

        let mut hosts = info.link_hosts();
        if hosts.is_empty() {
            if !info.success {
                warn!("no link hosts from monitoring server: {}", info.message);
            }
            let answer = reporter.prompt(format!(
                "Link addresses for {label} were not found on the monitoring server.\n\
                 Enter an address to ping (leave empty to cancel):"
            ));
            if self.cancel.is_set() {
                return Outcome::Cancelled("link check cancelled".into());
            }
            let answer = answer.trim();
            if answer.is_empty() {
                return Outcome::Cancelled("link ping cancelled by the operator".into());
            }
            hosts.push(answer.to_string());
        }

        let targets: Vec<BatchTarget> = hosts.into_iter().map(BatchTarget::from).collect();
        reporter.status(format!("Pinging {} link(s) of {label}...", targets.len()));
        let set = match self.run_batch(&targets, reporter) {
            Ok(set) => set,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };
        if set.was_cancelled() {
            return Outcome::Cancelled("link check cancelled".into());
        }

        reporter.status(format!("Link ping for {label} finished."));
        Outcome::Completed(OperationReport {
            operation: "links".into(),
            title: format!("Link ping for {label}"),
            started,
            finished: now_rfc3339(),
            body: ReportBody::Probes {
                rows: ProbeRow::from_batch(&set, |_| None),
            },
        })
    }

    /// Pings the site's local hosts, addressed by store number.
    pub fn check_vms(&self, site: &Site, reporter: &Reporter) -> Outcome {
        let started = now_rfc3339();
        let Some(number) = site.store_number() else {
            return Outcome::Failed(format!(
                "could not determine the store number of '{}' to build VM addresses; check the site directory",
                site.name
            ));
        };
        if self.cancel.is_set() {
            return Outcome::Cancelled("VM check cancelled".into());
        }

        let labels: HashMap<String, String> = self
            .cfg
            .vms
            .hosts
            .iter()
            .enumerate()
            .map(|(i, vm)| (format!("vm-{i}-{}", vm.name), vm.name.clone()))
            .collect();
        let targets: Vec<BatchTarget> = self
            .cfg
            .vms
            .hosts
            .iter()
            .enumerate()
            .map(|(i, vm)| BatchTarget::keyed(vm.address(number), format!("vm-{i}-{}", vm.name)))
            .collect();

        reporter.status(format!(
            "Pinging {} host(s) of {} (store {number})...",
            targets.len(),
            site.name
        ));
        let set = match self.run_batch(&targets, reporter) {
            Ok(set) => set,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };
        if set.was_cancelled() {
            return Outcome::Cancelled("VM check cancelled".into());
        }

        reporter.status(format!("VM ping for {} finished.", site.name));
        Outcome::Completed(OperationReport {
            operation: "vms".into(),
            title: format!("Main hosts of {} (store {number})", site.name),
            started,
            finished: now_rfc3339(),
            body: ReportBody::Probes {
                rows: ProbeRow::from_batch(&set, |key| labels.get(key).cloned()),
            },
        })
    }

    /// Pings arbitrary hosts.
    pub fn ping_hosts(&self, hosts: &[String], reporter: &Reporter) -> Outcome {
        let started = now_rfc3339();
        let targets: Vec<BatchTarget> = hosts.iter().cloned().map(BatchTarget::from).collect();
        reporter.status(format!("Pinging {} host(s)...", targets.len()));
        let set = match self.run_batch(&targets, reporter) {
            Ok(set) => set,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };
        if set.was_cancelled() {
            return Outcome::Cancelled("ping cancelled".into());
        }
        Outcome::Completed(OperationReport {
            operation: "ping".into(),
            title: "Ping".into(),
            started,
            finished: now_rfc3339(),
            body: ReportBody::Probes {
                rows: ProbeRow::from_batch(&set, |_| None),
            },
        })
    }

    fn run_batch(&self, targets: &[BatchTarget], reporter: &Reporter) -> Result<BatchResultSet> {
        self.scheduler.probe_all_with_progress(
            targets,
            &self.params,
            self.cfg.batch.max_concurrency,
            |p| {
                reporter.status(format!(
                    "Ping {} ({}/{}): {}",
                    p.host,
                    p.completed,
                    p.total,
                    status_line(Some(p.result))
                ))
            },
        )
    }
}

/// Starts operations on background threads, one at a time.
#[derive(Debug, Clone, Default)]
pub struct OperationRunner {
    guard: OperationGuard,
    cancel: CancellationSignal,
}

pub struct OperationHandle {
    events: Receiver<Event>,
    thread: JoinHandle<Outcome>,
}

impl OperationRunner {
    pub fn new(cancel: CancellationSignal) -> Self {
        Self {
            guard: OperationGuard::new(),
            cancel,
        }
    }

    pub fn cancel_signal(&self) -> &CancellationSignal {
        &self.cancel
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Clears the cancellation signal and runs `op` on a new thread. Fails if
    /// another operation is still running.
    pub fn start<F>(&self, name: &str, op: F) -> Result<OperationHandle>
    where
        F: FnOnce(&Reporter) -> Outcome + Send + 'static,
    {
        let running = self.guard.try_begin().ok_or_else(|| {
            anyhow!("an operation is already running; wait for it to finish or cancel it")
        })?;
        self.cancel.clear();

        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(format!("op-{name}"))
            .spawn(move || {
                let _running = running;
                let reporter = Reporter { events: tx };
                op(&reporter)
            })?;
        Ok(OperationHandle { events: rx, thread })
    }

    /// Convenience for running a console method.
    pub fn start_console<P, M, F>(
        &self,
        name: &str,
        console: &Arc<Console<P, M>>,
        op: F,
    ) -> Result<OperationHandle>
    where
        P: Prober + 'static,
        M: MonitorSession + 'static,
        F: FnOnce(&Console<P, M>, &Reporter) -> Outcome + Send + 'static,
    {
        let console = Arc::clone(console);
        self.start(name, move |reporter| op(&console, reporter))
    }
}

/// The foreground side: shows status lines and answers prompts.
pub trait Foreground {
    fn status(&mut self, msg: &str);
    fn prompt(&mut self, msg: &str) -> String;
}

/// Pumps events from `handle` into `fg` until the operation ends. With
/// `cancel_after`, the cancellation signal is set once that much time has
/// passed.
pub fn drive<F: Foreground>(
    handle: OperationHandle,
    fg: &mut F,
    cancel: &CancellationSignal,
    cancel_after: Option<Duration>,
) -> Outcome {
    const TICK: Duration = Duration::from_millis(100);
    let started = Instant::now();
    loop {
        match handle.events.recv_timeout(TICK) {
            Ok(Event::Status(msg)) => fg.status(&msg),
            Ok(Event::Prompt { message, reply }) => {
                let _ = reply.send(fg.prompt(&message));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Some(limit) = cancel_after {
            if !cancel.is_set() && started.elapsed() >= limit {
                warn!("cancelling operation after {:?}", limit);
                fg.status("Cancelling the running operation...");
                cancel.set();
            }
        }
    }

    handle
        .thread
        .join()
        .unwrap_or_else(|_| Outcome::Failed("operation thread panicked".into()))
}
