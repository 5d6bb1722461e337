//! Spawns the real host binaries (blkid, nvme, cryptsetup, zpool, zfs,
//! dialog) with timeouts and captured output. This is the only place that
//! touches `std::process`.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use vaultboot_core::error::{VaultbootError, VaultbootResult};

#[derive(Debug, Clone)]
/// Wraps a concrete binary path and the timeout applied to every run.
pub struct ToolRunner {
    path: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
/// Captured stdout, stderr, and exit status from a finished tool.
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl ToolOutput {
    /// The most useful diagnostic text: stderr when present, else stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            stderr
        } else {
            self.stdout.trim()
        }
    }
}

impl ToolRunner {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// The binary path this runner executes.
    pub fn binary(&self) -> &std::path::Path {
        &self.path
    }

    /// Execute with arguments and an optional stdin payload, inheriting
    /// nothing; stdout and stderr are always captured.
    pub fn run(&self, args: &[&str], input: Option<&[u8]>) -> VaultbootResult<ToolOutput> {
        let mut command = Command::new(&self.path);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        if input.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn()?;

        if let Some(bytes) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(bytes)?;
                stdin.flush().ok();
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    /// Execute with the tool's terminal attached (stdin/stdout inherited)
    /// and only stderr captured. Needed for interactive tools like
    /// `dialog` that draw on the console; the selection arrives on stderr.
    pub fn run_interactive(&self, args: &[&str]) -> VaultbootResult<ToolOutput> {
        let mut command = Command::new(&self.path);
        command.args(args);
        command.stdin(Stdio::inherit());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let stderr_pipe = child.stderr.take();
        let stderr_handle = Self::spawn_output_reader(stderr_pipe);

        // No timeout here: the operator decision gate blocks indefinitely.
        let status = child.wait()?;
        let stderr = stderr_handle
            .join()
            .map_err(|_| VaultbootError::Tool("stderr reader thread panicked".into()))??;

        Ok(ToolOutput {
            stdout: String::new(),
            stderr,
            status: status.code().unwrap_or(-1),
        })
    }

    /// Wait until the child finishes or the timeout expires, draining the
    /// pipes on helper threads so a chatty tool cannot deadlock us.
    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> VaultbootResult<ToolOutput> {
        let start = Instant::now();
        let stdout_handle = Self::spawn_output_reader(stdout_pipe);
        let stderr_handle = Self::spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        if exit_status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VaultbootError::Tool(format!(
                "{} timed out after {:?}",
                self.path.display(),
                self.timeout
            )));
        }

        let stdout = stdout_handle
            .join()
            .map_err(|_| VaultbootError::Tool("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| VaultbootError::Tool("stderr reader thread panicked".into()))??;

        let status = exit_status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);

        Ok(ToolOutput {
            stdout,
            stderr,
            status,
        })
    }

    fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<VaultbootResult<String>>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || -> VaultbootResult<String> {
            if let Some(mut reader) = pipe {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(String::from_utf8_lossy(&buf).to_string())
            } else {
                Ok(String::new())
            }
        })
    }
}

/// Resolve a tool binary: explicit config path first, then the well-known
/// locations, then `PATH`.
pub(crate) fn resolve_binary(
    configured: Option<PathBuf>,
    defaults: &[&str],
    name: &str,
) -> VaultbootResult<PathBuf> {
    if let Some(path) = configured {
        if !path.exists() {
            return Err(VaultbootError::InvalidConfig(format!(
                "{} binary not found at {}",
                name,
                path.display()
            )));
        }
        return Ok(path);
    }

    for candidate in defaults {
        let p = std::path::Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }

    find_in_path(name).ok_or_else(|| {
        VaultbootError::InvalidConfig(format!(
            "unable to locate {} binary; tried {:?} and PATH",
            name, defaults
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}
