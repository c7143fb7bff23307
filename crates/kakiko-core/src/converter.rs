//! Subprocess-based MML converter.
//!
//! [`ProcessConverter`] runs the external converter as
//! `<interpreter> <script> <mml>` and normalizes whatever happens into a
//! [`ConversionOutcome`]. The MML text is always passed as a single entry of
//! the argument vector, so shell metacharacters in it are never interpreted.
//!
//! The converter's contract is:
//!
//! - exit status `0` and the produced file's path on stdout (optionally
//!   terminated by one `\n`) means success;
//! - anything else means failure.
//!
//! Failures are tagged so the reason can be logged and counted, but callers
//! facing users collapse them with [`ConversionOutcome::into_path`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default per-conversion timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the converter subprocess.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Interpreter executable, e.g. `python3` or a virtualenv's python.
    pub interpreter: PathBuf,
    /// Converter script passed as the interpreter's first argument.
    pub script: PathBuf,
    /// Hard limit on how long a single conversion may run.
    pub timeout: Duration,
    /// Working directory for the subprocess. Inherited when `None`.
    pub working_dir: Option<PathBuf>,
}

impl ConverterConfig {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A file the converter reported as produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedFile {
    /// Path printed by the converter, minus one trailing newline.
    pub path: String,
    /// Wall time the subprocess took.
    pub duration: Duration,
}

/// Result of a single conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// The converter exited successfully and reported a file.
    Produced(ConvertedFile),
    /// The converter exited with a non-zero status, or was killed by a signal
    /// (`status` is `None` then).
    Rejected { status: Option<i32>, stderr: String },
    /// The converter could not be spawned or awaited.
    LaunchFailed { reason: String },
    /// The converter ran past the configured timeout and was killed.
    TimedOut { after: Duration },
    /// The converter exited successfully but its stdout was unusable.
    InvalidOutput { reason: String },
    /// The conversion was cancelled because the service is shutting down.
    Cancelled,
}

impl ConversionOutcome {
    /// Collapses the outcome to the produced path, or `None` on any failure.
    pub fn into_path(self) -> Option<String> {
        match self {
            ConversionOutcome::Produced(file) => Some(file.path),
            _ => None,
        }
    }

    pub fn is_produced(&self) -> bool {
        matches!(self, ConversionOutcome::Produced(_))
    }

    /// Short label used in logs and metric attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversionOutcome::Produced(_) => "produced",
            ConversionOutcome::Rejected { .. } => "rejected",
            ConversionOutcome::LaunchFailed { .. } => "launch_failed",
            ConversionOutcome::TimedOut { .. } => "timed_out",
            ConversionOutcome::InvalidOutput { .. } => "invalid_output",
            ConversionOutcome::Cancelled => "cancelled",
        }
    }
}

/// Anything able to turn MML text into a produced file.
///
/// Implemented by [`ProcessConverter`] for direct invocation and by the
/// server's worker pool, which forwards to a pool of process converters.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, mml: &str) -> ConversionOutcome;
}

/// Runs the external converter as a child process.
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    config: ConverterConfig,
}

impl ProcessConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Runs one conversion, killing the child if `cancel` fires or the
    /// timeout elapses first.
    #[tracing::instrument(skip_all, fields(mml_len = mml.len()))]
    pub async fn run(&self, mml: &str, cancel: &CancellationToken) -> ConversionOutcome {
        let outcome = self.spawn_and_wait(mml, cancel).await;
        log_outcome(&outcome);
        outcome
    }

    async fn spawn_and_wait(&self, mml: &str, cancel: &CancellationToken) -> ConversionOutcome {
        if cancel.is_cancelled() {
            return ConversionOutcome::Cancelled;
        }

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&self.config.script)
            .arg(mml)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future (timeout or cancel) must not leave an
            // orphaned converter behind.
            .kill_on_drop(true);

        if let Some(ref cwd) = self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let start = Instant::now();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ConversionOutcome::LaunchFailed {
                    reason: format!(
                        "failed to spawn '{}': {e}",
                        self.config.interpreter.display()
                    ),
                };
            }
        };

        let waited = tokio::select! {
            biased;
            () = cancel.cancelled() => return ConversionOutcome::Cancelled,
            waited = tokio::time::timeout(self.config.timeout, child.wait_with_output()) => waited,
        };

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ConversionOutcome::LaunchFailed {
                    reason: format!("failed to wait for converter: {e}"),
                };
            }
            Err(_) => {
                return ConversionOutcome::TimedOut {
                    after: self.config.timeout,
                };
            }
        };
        let duration = start.elapsed();

        if !output.status.success() {
            return ConversionOutcome::Rejected {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
        }

        let stdout = match String::from_utf8(output.stdout) {
            Ok(stdout) => stdout,
            Err(_) => {
                return ConversionOutcome::InvalidOutput {
                    reason: "stdout is not valid UTF-8".to_string(),
                };
            }
        };

        let path = strip_trailing_newline(&stdout);
        if path.is_empty() {
            return ConversionOutcome::InvalidOutput {
                reason: "converter printed no path".to_string(),
            };
        }

        ConversionOutcome::Produced(ConvertedFile {
            path: path.to_string(),
            duration,
        })
    }
}

#[async_trait]
impl Converter for ProcessConverter {
    async fn convert(&self, mml: &str) -> ConversionOutcome {
        self.run(mml, &CancellationToken::new()).await
    }
}

/// Removes exactly one trailing `\n`, leaving everything else untouched.
pub fn strip_trailing_newline(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}

fn log_outcome(outcome: &ConversionOutcome) {
    match outcome {
        ConversionOutcome::Produced(file) => {
            tracing::info!(
                path = %file.path,
                duration_ms = file.duration.as_millis() as u64,
                "converter produced file"
            );
        }
        ConversionOutcome::Rejected { status, stderr } => {
            tracing::warn!(
                kind = outcome.kind(),
                status = ?status,
                stderr = %stderr.trim_end(),
                "converter rejected input"
            );
        }
        ConversionOutcome::LaunchFailed { reason } => {
            tracing::warn!(kind = outcome.kind(), %reason, "converter could not be launched");
        }
        ConversionOutcome::TimedOut { after } => {
            tracing::warn!(kind = outcome.kind(), after_ms = after.as_millis() as u64, "converter timed out");
        }
        ConversionOutcome::InvalidOutput { reason } => {
            tracing::warn!(kind = outcome.kind(), %reason, "converter output unusable");
        }
        ConversionOutcome::Cancelled => {
            tracing::debug!(kind = outcome.kind(), "conversion cancelled");
        }
    }
}
