use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use storewatch::batch::{BatchScheduler, BatchTarget};
use storewatch::cancel::CancellationSignal;
use storewatch::probe::parse::RoundTrip;
use storewatch::probe::{ProbeParams, ProbeResult, Prober, FULL_LOSS_ERROR};

/// Answers from a fixed script and records how many probes overlap.
#[derive(Default)]
struct FakePing {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    cancel_on_first: Option<CancellationSignal>,
}

impl FakePing {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

impl Prober for FakePing {
    fn probe(&self, host: &str, _params: &ProbeParams) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(signal) = &self.cancel_on_first {
            signal.set();
        }
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match host {
            "boom" => panic!("probe blew up"),
            "10.0.0.2" => ProbeResult::failed(host, FULL_LOSS_ERROR),
            _ => ProbeResult::reachable(
                host,
                0,
                Some(RoundTrip {
                    min_ms: 4.0,
                    avg_ms: 5.0,
                    max_ms: 6.0,
                }),
            ),
        }
    }
}

fn params() -> ProbeParams {
    ProbeParams::new(1, 1.0).unwrap()
}

fn targets(hosts: &[&str]) -> Vec<BatchTarget> {
    hosts.iter().copied().map(BatchTarget::from).collect()
}

#[test]
fn two_hosts_one_down() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let set = scheduler
        .probe_all(&targets(&["10.0.0.1", "10.0.0.2"]), &params(), 5)
        .unwrap();

    assert_eq!(set.len(), 2);
    assert!(!set.was_cancelled());
    let rows: Vec<_> = set.entries().collect();
    let up = rows[0].1.unwrap();
    assert_eq!(up.host(), "10.0.0.1");
    assert!(up.success());
    assert_eq!(up.avg_time_ms(), Some(5.0));
    let down = rows[1].1.unwrap();
    assert_eq!(down.host(), "10.0.0.2");
    assert!(!down.success());
    assert_eq!(down.packet_loss_percent(), 100);
}

#[test]
fn more_jobs_than_workers() {
    let scheduler = BatchScheduler::new(FakePing::slow(Duration::from_millis(30)));
    let hosts: Vec<String> = (1..=12).map(|i| format!("10.0.1.{i}")).collect();
    let targets: Vec<BatchTarget> = hosts.iter().cloned().map(BatchTarget::from).collect();

    let set = scheduler.probe_all(&targets, &params(), 3).unwrap();

    assert_eq!(set.len(), 12);
    assert_eq!(set.unprocessed().count(), 0);
    assert_eq!(scheduler.prober().calls.load(Ordering::SeqCst), 12);
    let peak = scheduler.prober().peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak concurrency {peak}");
}

#[test]
fn repeated_host_gets_distinct_keys() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let set = scheduler
        .probe_all(&targets(&["10.0.0.1"; 4]), &params(), 2)
        .unwrap();

    assert_eq!(set.len(), 4);
    let keys: HashSet<&str> = set.keys().collect();
    assert_eq!(keys.len(), 4);
    assert!(set.keys().all(|k| k.starts_with("10.0.0.1_")));
}

#[test]
fn caller_keys_are_kept() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let targets = vec![
        BatchTarget::keyed("10.0.0.1", "gateway"),
        BatchTarget::keyed("10.0.0.2", "db"),
    ];
    let set = scheduler.probe_all(&targets, &params(), 2).unwrap();

    assert!(set.get("gateway").unwrap().success());
    assert!(!set.get("db").unwrap().success());
}

#[test]
fn duplicate_caller_keys_are_rejected() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let targets = vec![
        BatchTarget::keyed("10.0.0.1", "same"),
        BatchTarget::keyed("10.0.0.2", "same"),
    ];
    let err = scheduler.probe_all(&targets, &params(), 2).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
    assert_eq!(scheduler.prober().calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_concurrency_is_rejected() {
    let scheduler = BatchScheduler::new(FakePing::default());
    assert!(scheduler
        .probe_all(&targets(&["10.0.0.1"]), &params(), 0)
        .is_err());
}

#[test]
fn empty_batch_returns_immediately() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let set = scheduler.probe_all(&[], &params(), 5).unwrap();
    assert!(set.is_empty());
    assert!(set.submitted().is_empty());
}

#[test]
fn panicking_probe_is_attributed_to_its_job() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let set = scheduler
        .probe_all(&targets(&["10.0.0.1", "boom", "10.0.0.3"]), &params(), 2)
        .unwrap();

    assert_eq!(set.len(), 3);
    for (submitted, result) in set.entries() {
        let result = result.unwrap();
        assert_eq!(result.host(), submitted.host);
        if submitted.host == "boom" {
            assert!(!result.success());
            assert_eq!(result.packet_loss_percent(), 100);
            assert!(result.error().unwrap().contains("probe blew up"));
        } else {
            assert!(result.success());
        }
    }
}

#[test]
fn cancelled_before_start_probes_nothing() {
    let signal = CancellationSignal::new();
    signal.set();
    let scheduler = BatchScheduler::new(FakePing::default())
        .with_cancellation(signal.clone())
        .with_poll_interval(Duration::from_millis(50));

    let started = Instant::now();
    let set = scheduler
        .probe_all(&targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]), &params(), 2)
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(set.is_empty());
    assert!(set.was_cancelled());
    assert_eq!(set.unprocessed().count(), 3);
    assert_eq!(scheduler.prober().calls.load(Ordering::SeqCst), 0);
    assert!(signal.is_set());
}

#[test]
fn cancel_mid_batch_skips_remaining_jobs() {
    let signal = CancellationSignal::new();
    let prober = FakePing {
        cancel_on_first: Some(signal.clone()),
        ..FakePing::default()
    };
    let scheduler = BatchScheduler::new(prober)
        .with_cancellation(signal)
        .with_poll_interval(Duration::from_millis(50));

    let hosts: Vec<String> = (1..=5).map(|i| format!("10.0.2.{i}")).collect();
    let targets: Vec<BatchTarget> = hosts.iter().cloned().map(BatchTarget::from).collect();
    let set = scheduler.probe_all(&targets, &params(), 1).unwrap();

    assert!(set.was_cancelled());
    assert_eq!(set.len(), 1);
    assert_eq!(set.unprocessed().count(), 4);
    assert_eq!(set.entries().next().unwrap().0.host, "10.0.2.1");
}

#[test]
fn scheduler_is_reusable() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let first = scheduler
        .probe_all(&targets(&["10.0.0.1"]), &params(), 1)
        .unwrap();
    let second = scheduler
        .probe_all(&targets(&["10.0.0.1", "10.0.0.3"]), &params(), 1)
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);
}

#[test]
fn progress_is_reported_once_per_job() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let seen = Mutex::new(Vec::new());
    let set = scheduler
        .probe_all_with_progress(
            &targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
            &params(),
            2,
            |p| {
                seen.lock().unwrap().push((
                    p.completed,
                    p.total,
                    p.key.to_string(),
                    p.host == p.result.host(),
                ));
            },
        )
        .unwrap();

    let mut seen = seen.into_inner().unwrap();
    seen.sort();
    let counts: Vec<usize> = seen.iter().map(|(n, _, _, _)| *n).collect();
    assert_eq!(counts, [1, 2, 3]);
    for (_, total, key, same_host) in &seen {
        assert_eq!(*total, 3);
        assert!(*same_host);
        assert!(set.get(key).is_some());
    }
}

#[test]
fn panicking_progress_callback_does_not_lose_results() {
    let scheduler = BatchScheduler::new(FakePing::default());
    let set = scheduler
        .probe_all_with_progress(&targets(&["10.0.0.1", "10.0.0.3"]), &params(), 1, |_| {
            panic!("display went away")
        })
        .unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.entries().all(|(_, r)| r.is_some_and(|r| r.success())));
}

#[test]
fn skipped_jobs_are_not_reported_as_progress() {
    let signal = CancellationSignal::new();
    signal.set();
    let scheduler = BatchScheduler::new(FakePing::default())
        .with_cancellation(signal)
        .with_poll_interval(Duration::from_millis(50));
    let calls = AtomicUsize::new(0);
    let set = scheduler
        .probe_all_with_progress(&targets(&["10.0.0.1", "10.0.0.3"]), &params(), 2, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(set.was_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
