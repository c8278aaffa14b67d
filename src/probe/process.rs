use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
// Minimum wait for pipe readers once the child is gone. A grandchild that
// inherited the pipes can keep them open long after the direct child exits.
const READER_GRACE: Duration = Duration::from_millis(250);

pub(crate) enum RunOutcome {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

/// Spawns `cmd` and waits at most `limit` for it. On expiry the child is
/// killed and reaped before returning. Only spawn/wait failures are errors.
pub(crate) fn run_with_limit(mut cmd: Command, limit: Duration) -> io::Result<RunOutcome> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = cmd.spawn()?;

    // Drain pipes while waiting so a chatty child can't block on a full buffer.
    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            // A grandchild may still hold the pipes; don't outlive the limit for it.
            let wait = limit.saturating_sub(start.elapsed()).max(READER_GRACE);
            let stdout = stdout_rx.recv_timeout(wait).unwrap_or_default();
            let wait = limit.saturating_sub(start.elapsed()).max(READER_GRACE);
            let stderr = stderr_rx.recv_timeout(wait).unwrap_or_default();
            return Ok(RunOutcome::Exited {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > limit {
            warn!(pid = child.id(), "ping process exceeded {:?}; killing", limit);
            kill_and_reap(&mut child)?;
            return Ok(RunOutcome::TimedOut {
                stdout: stdout_rx.recv_timeout(READER_GRACE).unwrap_or_default(),
                stderr: stderr_rx.recv_timeout(READER_GRACE).unwrap_or_default(),
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

fn kill_and_reap(child: &mut Child) -> io::Result<()> {
    // The child may have exited between try_wait and kill; wait() still reaps it.
    let _ = child.kill();
    child.wait().map(|_| ())
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            // Partial output is still useful after a read error.
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}
