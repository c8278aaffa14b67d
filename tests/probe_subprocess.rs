use std::time::{Duration, Instant};
use storewatch::probe::parse::Flavor;
use storewatch::probe::{ProbeParams, Prober, SystemPing, TIME_LIMIT_ERROR, TIME_LIMIT_MARGIN};

#[test]
fn params_reject_bad_values() {
    assert!(ProbeParams::new(0, 1.0).is_err());
    assert!(ProbeParams::new(1, 0.0).is_err());
    assert!(ProbeParams::new(1, -2.0).is_err());
    assert!(ProbeParams::new(1, f64::NAN).is_err());
    assert!(ProbeParams::new(1, f64::INFINITY).is_err());
    assert!(ProbeParams::new(1, 1e20).is_err());
    assert!(ProbeParams::new(1, f64::MAX).is_err());

    let p = ProbeParams::new(4, 2.0).unwrap();
    assert_eq!(p.count(), 4);
    assert_eq!(p.time_limit(), Duration::from_secs(2) + TIME_LIMIT_MARGIN);
}

#[test]
fn command_line_per_platform() {
    let params = ProbeParams::new(3, 1.5).unwrap();
    let win = SystemPing::new(Flavor::Windows).command_args("10.0.0.1", &params);
    assert_eq!(win, ["-n", "3", "-w", "1500", "10.0.0.1"]);
    let unix = SystemPing::new(Flavor::Unix).command_args("10.0.0.1", &params);
    assert_eq!(unix, ["-c", "3", "-W", "2", "10.0.0.1"]);
}

#[test]
fn option_like_host_is_rejected() {
    let prober = SystemPing::new(Flavor::Unix);
    let params = ProbeParams::new(1, 1.0).unwrap();
    let r = prober.probe("-f", &params);
    assert!(!r.success());
    assert_eq!(r.packet_loss_percent(), 100);
    assert!(r.error().unwrap().contains("invalid host"));
}

#[test]
fn missing_program_is_reported() {
    let prober = SystemPing::new(Flavor::Unix)
        .with_command("/nonexistent/storewatch-no-such-ping", Vec::new());
    let params = ProbeParams::new(1, 1.0).unwrap();
    let r = prober.probe("10.0.0.1", &params);
    assert!(!r.success());
    assert_eq!(r.packet_loss_percent(), 100);
    assert!(r.error().unwrap().contains("not found"));
}

#[cfg(unix)]
fn shell(script: &str) -> SystemPing {
    SystemPing::new(Flavor::Unix).with_command(
        "/bin/sh",
        vec!["-c".to_string(), script.to_string(), "sh".to_string()],
    )
}

#[cfg(unix)]
#[test]
fn scripted_transcript_is_parsed() {
    let prober = shell(
        "printf '2 packets transmitted, 2 received, 0%% packet loss, time 1001ms\\n\
         rtt min/avg/max/mdev = 1.000/2.000/3.000/0.500 ms\\n'",
    );
    let params = ProbeParams::new(2, 1.0).unwrap();
    let r = prober.probe("10.0.0.1", &params);
    assert!(r.success(), "{:?}", r.error());
    assert_eq!(r.host(), "10.0.0.1");
    assert_eq!(r.avg_time_ms(), Some(2.0));
}

#[cfg(unix)]
#[test]
fn nonzero_exit_carries_stderr() {
    let prober = shell("echo 'ping: unknown host' >&2; exit 2");
    let params = ProbeParams::new(1, 1.0).unwrap();
    let r = prober.probe("nosuchhost", &params);
    assert!(!r.success());
    let err = r.error().unwrap();
    assert!(err.contains("code 2"), "{err}");
    assert!(err.contains("unknown host"), "{err}");
}

#[cfg(unix)]
#[test]
fn hung_probe_is_killed_at_time_limit() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("ping.pid");
    let prober = shell(&format!("echo $$ > '{}'; exec sleep 30", pid_file.display()));
    let params = ProbeParams::new(1, 0.5).unwrap();
    let limit = params.time_limit();

    let started = Instant::now();
    let r = prober.probe("10.0.0.1", &params);
    let elapsed = started.elapsed();

    assert!(!r.success());
    assert_eq!(r.packet_loss_percent(), 100);
    assert!(r.avg_time_ms().is_none());
    assert!(r.error().unwrap().contains(TIME_LIMIT_ERROR));
    assert!(elapsed >= limit, "returned early: {elapsed:?}");
    assert!(elapsed < limit + Duration::from_secs(3), "took {elapsed:?}");

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let check = format!("kill -0 {}", pid.trim());
    let alive = std::process::Command::new("/bin/sh")
        .args(["-c", check.as_str()])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!alive.success(), "ping process {} still running", pid.trim());
}

#[cfg(unix)]
#[test]
fn lingering_grandchild_does_not_outlast_time_limit() {
    // The shell exits at once but leaves a sleeper holding its stdout open.
    let prober = shell("sleep 8 & echo started");
    let params = ProbeParams::new(1, 0.5).unwrap();
    let limit = params.time_limit();

    let started = Instant::now();
    let r = prober.probe("10.0.0.1", &params);
    let elapsed = started.elapsed();

    assert!(!r.success());
    assert!(elapsed < limit + Duration::from_secs(2), "took {elapsed:?}");
}
