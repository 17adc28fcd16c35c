// src/command.rs

//! External command execution
//!
//! Resource handlers and the scanner backend shell out to `helm`, `kubectl`
//! and `trivy`. They do so through [`CommandRunner`] so tests can substitute
//! a scripted runner and never need the real binaries.
//!
//! The system runner closes stdin unless input is supplied, drains stdout
//! and stderr on helper threads (a chatty child cannot fill the pipe and
//! stall) and kills the child once the timeout elapses.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, then stdin is closed
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for log messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, None when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external commands
///
/// A missing program must be reported as [`Error::NotFoundError`] and an
/// elapsed timeout as [`Error::TimeoutError`]. A program that runs and
/// exits non-zero is not an error at this level: the caller inspects
/// [`CommandOutput::code`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the local system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {}", spec.display());

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    Error::NotFoundError(format!("Command not found: {}", spec.program))
                }
                _ => Error::IoError(format!("Failed to spawn {}: {}", spec.program, e)),
            })?;

        if let (Some(input), Some(mut pipe)) = (&spec.stdin, child.stdin.take()) {
            // Dropping the pipe closes the child's stdin
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                warn!("Failed to write stdin of {}: {}", spec.program, e);
            }
        }

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(spec.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::TimeoutError(format!(
                    "{} timed out after {} seconds",
                    spec.program,
                    spec.timeout.as_secs()
                )));
            }
        };

        let collect = |handle: Option<thread::JoinHandle<String>>| {
            handle
                .and_then(|h| h.join().ok())
                .unwrap_or_default()
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = CommandSpec::new("helm", Duration::from_secs(5))
            .arg("upgrade")
            .args(["--install", "web"])
            .stdin("data");

        assert_eq!(spec.display(), "helm upgrade --install web");
        assert_eq!(spec.stdin.as_deref(), Some("data"));
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let spec = CommandSpec::new("debvisor-no-such-binary-xyz", Duration::from_secs(5));
        let err = SystemCommandRunner.run(&spec).unwrap_err();
        assert!(matches!(err, Error::NotFoundError(_)));
    }

    #[test]
    fn test_output_helpers() {
        assert!(CommandOutput::ok("done").success());
        assert!(!CommandOutput::failed(2, "boom").success());
        assert!(!CommandOutput::default().success());
    }
}
