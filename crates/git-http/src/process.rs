//! Process bridge around [`tokio::process::Command`].
//!
//! This is the only place that decides which environment variables an external
//! tool sees and how its standard streams are wired. Everything else either runs an
//! [`Invocation`] to completion and inspects two text buffers, or spawns it for
//! streaming and gets back a [`ServiceProcess`].
//!
//! Commands are created with `kill_on_drop`, so dropping the owning future (for
//! example when an HTTP client disconnects) terminates the subprocess.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, error};

use crate::errors::RepositoryError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Diagnostic switches that turn into git trace variables on the child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub trace_packet: bool,
    pub trace: bool,
    pub curl_verbose: bool,
}

impl DebugFlags {
    pub fn all(enabled: bool) -> Self {
        DebugFlags {
            trace_packet: enabled,
            trace: enabled,
            curl_verbose: enabled,
        }
    }

    pub fn env_vars(self) -> Vec<(&'static str, &'static str)> {
        let mut vars = Vec::with_capacity(3);
        if self.trace_packet {
            vars.push(("GIT_TRACE_PACKET", "1"));
        }
        if self.trace {
            vars.push(("GIT_TRACE", "1"));
        }
        if self.curl_verbose {
            vars.push(("GIT_CURL_VERBOSE", "1"));
        }
        vars
    }
}

/// Buffered result of a successful [`Invocation::output`].
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A spawned transport process whose streams are wired by the caller.
pub struct ServiceProcess {
    /// Present only when the process was spawned with piped stdin.
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
    /// Resolves once the process exited and its stderr was drained. A non-zero
    /// exit becomes [`RepositoryError::Process`] carrying the stderr text.
    /// Dropping it before completion kills the process.
    pub exit: BoxFuture<'static, Result<(), RepositoryError>>,
}

pub struct Invocation {
    command: Command,
    operation: String,
    has_subcommand: bool,
}

impl Invocation {
    pub fn new(program: &str, debug: DebugFlags) -> Self {
        let mut command = Command::new(program);
        command.env("GIT_TERMINAL_PROMPT", "0");
        for (key, value) in debug.env_vars() {
            command.env(key, value);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        Invocation {
            command,
            operation: program.to_string(),
            has_subcommand: false,
        }
    }

    pub fn git(debug: DebugFlags) -> Self {
        Invocation::new("git", debug)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        if !self.has_subcommand {
            self.operation.push(' ');
            self.operation.push_str(&arg.as_ref().to_string_lossy());
            self.has_subcommand = true;
        }
        self.command.arg(arg);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env(key, value);
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.command.current_dir(dir);
        self
    }

    /// Run to completion with stdout and stderr buffered in memory.
    pub async fn output(mut self) -> Result<CapturedOutput, RepositoryError> {
        let operation = self.operation;
        debug!(%operation, "running");
        let output = self
            .command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| RepositoryError::Spawn {
                program: operation.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!(%operation, %stdout, "stdout");

        if !output.status.success() {
            error!(%operation, status = %output.status, %stderr, "process failed");
            return Err(RepositoryError::Process {
                operation,
                status: output.status.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(CapturedOutput { stdout, stderr })
    }

    /// Spawn with piped stdout and stderr (and stdin when `with_stdin`), leaving the
    /// stdout pump to the caller. Stderr is drained on its own task so a verbose
    /// child can never block on a full pipe.
    pub fn spawn_streaming(mut self, with_stdin: bool) -> Result<ServiceProcess, RepositoryError> {
        self.command.stdout(Stdio::piped()).stderr(Stdio::piped());
        if with_stdin {
            self.command.stdin(Stdio::piped());
        }

        let operation = self.operation;
        debug!(%operation, with_stdin, "spawning");
        let mut child = self.command.spawn().map_err(|source| RepositoryError::Spawn {
            program: operation.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as BoxedWriter);
        let stdout = child.stdout.take().ok_or_else(|| {
            RepositoryError::io(
                format!("{operation} stdout"),
                io::Error::other("stdout not captured"),
            )
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            RepositoryError::io(
                format!("{operation} stderr"),
                io::Error::other("stderr not captured"),
            )
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        });

        let exit = async move {
            let status = child
                .wait()
                .await
                .map_err(|source| RepositoryError::io(format!("waiting for {operation}"), source))?;
            let stderr = match stderr_task.await {
                Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
                Ok(Err(err)) => format!("<stderr unavailable: {err}>"),
                Err(err) => format!("<stderr unavailable: {err}>"),
            };

            if status.success() {
                if !stderr.is_empty() {
                    debug!(%operation, %stderr, "stderr");
                }
                return Ok(());
            }

            error!(%operation, %status, %stderr, "process failed");
            Err(RepositoryError::Process {
                operation,
                status: status.to_string(),
                code: status.code(),
                stderr,
            })
        };

        Ok(ServiceProcess {
            stdin,
            stdout: Box::new(stdout),
            exit: Box::pin(exit),
        })
    }
}
