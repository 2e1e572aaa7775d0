use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

mod cancel;
mod obj_dir;

pub use cancel::{install_signal_handlers, CancelReason, CancelToken};
pub use obj_dir::{CleanupPolicy, ObjDir};

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment; entries here win.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Per-stream capture cap. Bytes past it are drained and dropped.
    pub max_output_bytes: usize,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(300),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn argv(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 1);
        out.push(self.program.display().to_string());
        out.extend(self.args.iter().cloned());
        out
    }

    /// Shell-pasteable rendering, used when reporting how to reproduce a step by hand.
    pub fn command_line(&self) -> String {
        let mut line = format!("cd {} &&", shell_quote(&self.cwd.display().to_string()));
        for (k, v) in &self.env {
            line.push(' ');
            line.push_str(&format!("{k}={}", shell_quote(v)));
        }
        for arg in self.argv() {
            line.push(' ');
            line.push_str(&shell_quote(&arg));
        }
        line
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `128 + signal` when the child was killed by a signal.
    pub exit_status: i32,
    pub exit_signal: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0 && !self.timed_out && !self.cancelled
    }
}

/// Launch `spec` and block until it exits, times out, or `cancel` trips.
///
/// Timeout and cancellation kill the child's whole process group; the returned output
/// has `timed_out` / `cancelled` set and whatever was captured up to that point.
pub fn run_process(spec: &ProcessSpec, cancel: &CancelToken) -> Result<ProcessOutput> {
    std::fs::create_dir_all(&spec.cwd)
        .with_context(|| format!("create working directory: {}", spec.cwd.display()))?;

    tracing::debug!(cmd = %spec.command_line(), timeout_ms = spec.timeout.as_millis() as u64, "spawn");
    let start = Instant::now();

    let mut child = {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.envs(&spec.env);
        cmd.current_dir(&spec.cwd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }

        spawn_retrying_busy(&mut cmd)
            .with_context(|| format!("spawn: {}", spec.program.display()))?
    };

    let stdout = child.stdout.take().context("take stdout")?;
    let stderr = child.stderr.take().context("take stderr")?;

    let cap = spec.max_output_bytes;
    let stdout_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stdout, cap)
    });
    let stderr_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stderr, cap)
    });

    let (status, ended) = wait_child(&mut child, spec.timeout, cancel)?;
    let (stdout_bytes, stdout_truncated) = stdout_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))
        .context("read child stdout")?;
    let (stderr_bytes, stderr_truncated) = stderr_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))
        .context("read child stderr")?;
    let duration = start.elapsed();

    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let exit_status = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };

    match ended {
        Ended::TimedOut => tracing::warn!(
            program = %spec.program.display(),
            timeout_ms = spec.timeout.as_millis() as u64,
            "child timed out and was killed"
        ),
        Ended::Cancelled => tracing::warn!(
            program = %spec.program.display(),
            "child killed by suite cancellation"
        ),
        Ended::Exited => tracing::debug!(
            program = %spec.program.display(),
            exit_status,
            duration_ms = duration.as_millis() as u64,
            "child exited"
        ),
    }

    Ok(ProcessOutput {
        exit_status,
        exit_signal,
        timed_out: ended == Ended::TimedOut,
        cancelled: ended == Ended::Cancelled,
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        stdout_truncated,
        stderr_truncated,
        duration,
    })
}

/// A freshly written executable can briefly read as busy while another thread's
/// fork still holds its write descriptor.
fn spawn_retrying_busy(cmd: &mut Command) -> std::io::Result<std::process::Child> {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            #[cfg(unix)]
            Err(err) if err.raw_os_error() == Some(libc::ETXTBSY) && attempts < 10 => {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(10 * attempts));
            }
            other => return other,
        }
    }
}

/// True when `err` came from a program that could not be launched at all (missing or
/// not executable), as opposed to a harness fault.
pub fn is_launch_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            )
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    Exited,
    TimedOut,
    Cancelled,
}

fn wait_child(
    child: &mut std::process::Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(std::process::ExitStatus, Ended)> {
    let start = Instant::now();
    let deadline = start.checked_add(timeout);

    loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            // Leftover group members (backgrounded build jobs) would otherwise outlive the
            // step and keep the capture pipes open.
            kill_group(child.id());
            return Ok((status, Ended::Exited));
        }
        let ended = if deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Ended::TimedOut)
        } else if cancel.is_cancelled() {
            Some(Ended::Cancelled)
        } else {
            None
        };
        if let Some(ended) = ended {
            hard_kill_group(child);
            let status = child.wait().context("wait child after kill")?;
            return Ok((status, ended));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn hard_kill_group(child: &mut std::process::Child) {
    kill_group(child.id());
    let _ = child.kill();
}

fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            return;
        };
        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp) {
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=+:,@%".contains(&b))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
