use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// Returned (inside `anyhow::Error`) when a command outlives its timeout.
/// The child has been killed by the time this is observed.
#[derive(Debug, thiserror::Error)]
#[error("Command timed out after {}s: {command}", .timeout.as_secs())]
pub struct TimedOut {
    pub command: String,
    pub timeout: Duration,
}

/// A builder for executing shell commands with unified error handling
pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
    timeout: Option<Duration>,
}

impl<'a> Cmd<'a> {
    /// Create a new command builder
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: &'a str) -> Self {
        self.args.push(arg);
        self
    }

    /// Add multiple arguments
    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    /// Kill the command if it has not exited after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn display(&self) -> String {
        format!("{} {}", self.command, self.args.join(" "))
    }

    /// Execute the command and return its output whatever the exit status.
    /// Only spawn failures and timeouts are errors.
    pub fn output(self) -> Result<Output> {
        trace!(command = self.command, args = ?self.args, timeout = ?self.timeout, "cmd:output start");

        let mut child = Command::new(self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute command: {}", self.display()))?;

        // Drain both pipes concurrently so a chatty child can't block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status: ExitStatus = match self.timeout {
            Some(timeout) => match child
                .wait_timeout(timeout)
                .with_context(|| format!("Failed to wait for command: {}", self.display()))?
            {
                Some(status) => status,
                None => {
                    warn!(command = %self.display(), timeout_secs = timeout.as_secs(), "cmd:timeout, killing child");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(TimedOut {
                        command: self.display(),
                        timeout,
                    }
                    .into());
                }
            },
            None => child
                .wait()
                .with_context(|| format!("Failed to wait for command: {}", self.display()))?,
        };

        let output = Output {
            status,
            stdout: stdout.join().map_err(|_| anyhow!("stdout reader panicked"))?,
            stderr: stderr.join().map_err(|_| anyhow!("stderr reader panicked"))?,
        };
        trace!(command = self.command, status = ?output.status.code(), "cmd:output done");
        Ok(output)
    }

    /// Execute the command and return the output
    /// Returns an error if the command fails (non-zero exit code)
    pub fn run(self) -> Result<Output> {
        let command = self.command;
        let display = self.display();
        let output = self.output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!("Command failed: {}\n{}", display, stderr.trim()));
        }
        trace!(command, "cmd:run success");
        Ok(output)
    }

    /// Execute the command and return stdout as a trimmed string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Execute the command, returning Ok(true) if it succeeds, Ok(false) if it fails
    /// This is useful for commands that are used as checks (e.g., docker cp)
    pub fn run_as_check(self) -> Result<bool> {
        let command = self.command;
        let output = self.output()?;
        let success = output.status.success();
        trace!(command, success, "cmd:check result");
        Ok(success)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// True if `err` (or anything in its chain) is a [`TimedOut`].
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<TimedOut>())
}
