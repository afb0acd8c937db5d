//! Subprocess runner: launch an engine, enforce a deadline, capture output.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──spawn──▶ Spawned ──pipes attached──▶ Running ──┬─▶ Exited
//!                                                          └─▶ Killed  (deadline, wait error, drop)
//! ```
//!
//! The engine is started as the leader of a new process group. LibreOffice's
//! launcher forks `soffice.bin`, so killing only the direct child would leave
//! the real worker running; every kill here targets the whole group.
//!
//! The deadline is a `tokio::time::sleep_until` raced against `child.wait()`
//! in a `select!`, so it does not depend on the engine reacting to signals or
//! on any engine-side timeout. Waiting suspends the task rather than blocking
//! a runtime worker.
//!
//! If the future returned by [`EngineInvocation::run`] is dropped (client went
//! away), the [`ProcessGroup`] guard kills the group and `kill_on_drop` takes
//! care of the leader.
//!
//! On Linux the group is killed after a normal exit too, but before the
//! leader is reaped: its zombie keeps the group id allocated, so the signal
//! cannot reach an unrelated group that reused the id. Other platforms kill
//! the group right after reaping.

use crate::error::EngineError;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Bytes of stdout kept; the rest is read and discarded.
pub const STDOUT_LIMIT: usize = 1024 * 1024;

/// Bytes kept from the end of stderr.
pub const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// How long to wait for pipes to close once the leader is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Fallback re-check interval while waiting for the leader to exit.
#[cfg(target_os = "linux")]
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    Spawned,
    Running,
    Exited,
    Killed,
}

/// Captured result of a successful (exit 0) run.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub stdout: Vec<u8>,
    pub stderr_tail: String,
    pub elapsed: Duration,
}

/// One engine call: what to run, where, and for how long.
///
/// The record also keeps what happened (state, exit code, stderr tail) for
/// logging after [`run`](Self::run) returns.
#[derive(Debug)]
pub struct EngineInvocation {
    program: String,
    args: Vec<OsString>,
    workdir: PathBuf,
    deadline: Duration,
    env: Vec<(OsString, OsString)>,
    state: InvocationState,
    exit_code: Option<i32>,
    stderr_tail: String,
    elapsed: Duration,
}

impl EngineInvocation {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            deadline,
            env: Vec::new(),
            state: InvocationState::Pending,
            exit_code: None,
            stderr_tail: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stderr_tail(&self) -> &str {
        &self.stderr_tail
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Run the engine to completion or until the deadline.
    pub async fn run(&mut self) -> Result<EngineOutput, EngineError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.deadline;

        let executable = engine_probe::locate(&self.program).map_err(|e| {
            debug!("Engine lookup failed: {}", e);
            EngineError::NotFound {
                program: self.program.clone(),
            }
        })?;

        let mut cmd = Command::new(&executable);
        cmd.args(&self.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!("Spawning {}", self);
        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        self.state = InvocationState::Spawned;
        let mut group = ProcessGroup::new(child.id());

        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), STDOUT_LIMIT, Keep::Head));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), STDERR_TAIL_BYTES, Keep::Tail));
        let (stdout_abort, stderr_abort) = (stdout_task.abort_handle(), stderr_task.abort_handle());
        self.state = InvocationState::Running;

        let waited = tokio::select! {
            status = wait_for_exit(&mut child, &mut group) => Some(status),
            _ = tokio::time::sleep_until(deadline) => None,
        };

        let status = match waited {
            Some(Ok(status)) => status,
            Some(Err(source)) => {
                self.kill(&mut group, &mut child).await;
                stdout_abort.abort();
                stderr_abort.abort();
                self.elapsed = started.elapsed();
                return Err(EngineError::Wait {
                    program: self.program.clone(),
                    source,
                });
            }
            None => {
                self.kill(&mut group, &mut child).await;
                stdout_abort.abort();
                stderr_abort.abort();
                self.elapsed = started.elapsed();
                warn!(
                    "{} exceeded its {}s deadline; process group killed",
                    self.program,
                    self.deadline.as_secs_f32()
                );
                return Err(EngineError::TimedOut {
                    program: self.program.clone(),
                    after: self.deadline,
                });
            }
        };

        self.state = InvocationState::Exited;
        self.exit_code = status.code();
        // No-op when `wait_for_exit` already killed the group.
        group.kill();

        let drained = tokio::time::timeout(PIPE_DRAIN_GRACE, async {
            (stdout_task.await.unwrap_or_default(), stderr_task.await.unwrap_or_default())
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok(pair) => pair,
            Err(_) => {
                warn!("{} exited but its output pipes stayed open; discarding", self.program);
                stdout_abort.abort();
                stderr_abort.abort();
                (Vec::new(), Vec::new())
            }
        };

        self.stderr_tail = String::from_utf8_lossy(&stderr).trim().to_string();
        self.elapsed = started.elapsed();

        if !status.success() {
            warn!(
                "{} failed with exit {:?} after {}ms",
                self.program,
                self.exit_code,
                self.elapsed.as_millis()
            );
            return Err(EngineError::Failed {
                program: self.program.clone(),
                exit_code: self.exit_code,
                stderr_tail: self.stderr_tail.clone(),
            });
        }

        info!("{} finished in {}ms", self.program, self.elapsed.as_millis());
        Ok(EngineOutput {
            stdout,
            stderr_tail: self.stderr_tail.clone(),
            elapsed: self.elapsed,
        })
    }

    async fn kill(&mut self, group: &mut ProcessGroup, child: &mut tokio::process::Child) {
        group.kill();
        // Child::kill also waits, so the leader is reaped here.
        if let Err(e) = child.kill().await {
            if e.kind() != io::ErrorKind::InvalidInput {
                warn!("Failed to kill {}: {}", self.program, e);
            }
        }
        self.state = InvocationState::Killed;
    }
}

impl fmt::Display for EngineInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Wait for the leader to exit and reap it.
///
/// Helpers left in the group would otherwise keep the pipes open, so the
/// group is killed once the leader is gone.
async fn wait_for_exit(child: &mut Child, group: &mut ProcessGroup) -> io::Result<ExitStatus> {
    #[cfg(target_os = "linux")]
    if let Some(pid) = child.id() {
        match leader_exited(pid).await {
            Ok(()) => group.kill(),
            Err(e) => debug!("waitid({}) failed, killing the group after reaping: {}", pid, e),
        }
    }
    let status = child.wait().await?;
    group.kill();
    Ok(status)
}

/// Resolve once `pid` has exited, leaving it unreaped.
#[cfg(target_os = "linux")]
async fn leader_exited(pid: u32) -> io::Result<()> {
    use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;
    use tokio::signal::unix::{signal, SignalKind};

    let raw = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // Registered before the first check so an exit in between still wakes us.
    let mut sigchld = signal(SignalKind::child())?;
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(Pid::from_raw(raw)), flags) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => return Ok(()),
            Err(errno) => return Err(io::Error::from(errno)),
        }
        tokio::select! {
            _ = sigchld.recv() => {}
            _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
        }
    }
}

// ── Process group guard ──────────────────────────────────────────────────

/// Kills the engine's process group once, on demand or on drop.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else { return };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("killpg({}) failed: {}", raw, e),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

// ── Pipe capture ─────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Keep {
    Head,
    Tail,
}

/// Read a pipe to EOF keeping at most `limit` bytes from the head or tail.
async fn read_capped<R>(reader: Option<R>, limit: usize, keep: Keep) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if matches!(keep, Keep::Head) && buf.len() >= limit {
                    continue;
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > limit {
                    match keep {
                        Keep::Head => buf.truncate(limit),
                        Keep::Tail => {
                            let excess = buf.len() - limit;
                            buf.drain(..excess);
                        }
                    }
                }
            }
        }
    }
    buf
}
