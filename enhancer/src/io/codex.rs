//! Code agent invocation (`codex exec`) with persisted per-run logs.
//!
//! Every invocation that gets past its preconditions owns a fresh log
//! directory under `logs_root`, named `<UTC timestamp>-<run id>`. The
//! directory is created before the agent is spawned and is filled with
//! `prompt.txt`, `command.txt`, `stdout.log`, `stderr.log` and
//! `metadata.json` before the caller sees success or failure.

use std::env;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::types::CodexOptions;
use crate::io::config::BridgeConfig;
use crate::io::process::{GroupOutput, Termination, run_in_process_group};

/// Failure category of a code agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessErrorKind {
    RepoMissing,
    RepoNotDirectory,
    BinaryNotFound,
    EmptyFeedback,
    LogDirectory,
    FailedToStart,
    TimedOut,
    Interrupted,
    NonZeroExit,
    SupervisionFailed,
    PersistLogs,
}

/// Agent invocation failure, with whatever diagnostics were available.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ProcessError {
    pub kind: ProcessErrorKind,
    pub message: String,
    pub run_id: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub log_path: Option<PathBuf>,
}

impl ProcessError {
    fn new(kind: ProcessErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            run_id: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            log_path: None,
        }
    }

    fn with_log(mut self, run_id: &str, log_dir: &Path) -> Self {
        self.run_id = Some(run_id.to_string());
        self.log_path = Some(log_dir.to_path_buf());
        self
    }
}

/// Successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodexRun {
    pub run_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub log_path: PathBuf,
}

/// Terminal state recorded in `metadata.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum TerminalState {
    Completed,
    TimedOut,
    Interrupted,
    FailedToStart,
    /// Spawned, but waiting on it or collecting its output failed; the group was killed.
    SupervisionFailed,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminalState::Completed => "completed",
            TerminalState::TimedOut => "timed out",
            TerminalState::Interrupted => "interrupted",
            TerminalState::FailedToStart => "failed to start",
            TerminalState::SupervisionFailed => "supervision failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize)]
struct InvocationMeta<'a> {
    run_id: &'a str,
    created_at: String,
    exit_code: Option<i32>,
    command: &'a [String],
    termination: TerminalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    codex_options: Option<&'a CodexOptions>,
}

/// Runs the code agent against the configured repository.
pub struct CodexRunner {
    config: BridgeConfig,
    interrupt: CancellationToken,
}

impl CodexRunner {
    /// Prepare the logs root. `interrupt` is observed while the agent runs.
    pub fn new(config: BridgeConfig, interrupt: CancellationToken) -> Result<Self, ProcessError> {
        fs::create_dir_all(&config.logs_root).map_err(|err| {
            ProcessError::new(
                ProcessErrorKind::LogDirectory,
                format!(
                    "unable to prepare codex log directory {}: {err}",
                    config.logs_root.display()
                ),
            )
        })?;
        Ok(Self { config, interrupt })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn ensure_repo(&self) -> Result<&Path, ProcessError> {
        let repo = self.config.target_repo.as_path();
        if !repo.exists() {
            return Err(ProcessError::new(
                ProcessErrorKind::RepoMissing,
                format!("target repository {} does not exist", repo.display()),
            ));
        }
        if !repo.is_dir() {
            return Err(ProcessError::new(
                ProcessErrorKind::RepoNotDirectory,
                format!("target repository {} is not a directory", repo.display()),
            ));
        }
        Ok(repo)
    }

    /// Resolve the agent binary: paths are checked directly, bare names are
    /// looked up on `PATH`.
    pub fn resolve_binary(&self) -> Result<PathBuf, ProcessError> {
        let name = self.config.codex_bin.trim();
        let not_found = || {
            ProcessError::new(
                ProcessErrorKind::BinaryNotFound,
                format!("codex binary '{name}' not found on PATH"),
            )
        };
        if name.contains('/') {
            let candidate = PathBuf::from(name);
            return if is_executable(&candidate) {
                Ok(candidate)
            } else {
                Err(not_found())
            };
        }
        let path = env::var_os("PATH").ok_or_else(not_found)?;
        env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(not_found)
    }

    pub fn build_prompt(&self, feedback: &str) -> Result<String, ProcessError> {
        let body = feedback.trim();
        if body.is_empty() {
            return Err(ProcessError::new(
                ProcessErrorKind::EmptyFeedback,
                "feedback is empty",
            ));
        }
        Ok(format!(
            "{}\n\nFeedback:\n{body}",
            self.config.prompt_prefix.trim()
        ))
    }

    /// Apply `feedback` to the repository. Blocks until the agent finishes,
    /// times out, or is interrupted.
    #[instrument(skip_all, fields(repo = %self.config.target_repo.display()))]
    pub fn run(
        &self,
        feedback: &str,
        options: Option<&CodexOptions>,
    ) -> Result<CodexRun, ProcessError> {
        let repo = self.ensure_repo()?;
        let binary = self.resolve_binary()?;
        let prompt = self.build_prompt(feedback)?;

        let run_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let log_dir = self.prepare_log_dir(&run_id, created_at)?;

        let mut argv = vec![
            binary.display().to_string(),
            "exec".to_string(),
            "--skip-git-repo-check".to_string(),
            "--cd".to_string(),
            repo.display().to_string(),
        ];
        if let Some(options) = options {
            argv.extend(options.as_command_args());
        }
        argv.push(prompt.clone());

        let mut cmd = Command::new(&binary);
        cmd.args(&argv[1..]);

        let record = LogRecord {
            log_dir: &log_dir,
            run_id: &run_id,
            created_at,
            prompt: &prompt,
            argv: &argv,
            options,
        };

        info!(run_id = %run_id, log_dir = %log_dir.display(), "starting codex exec");
        let outcome = match run_in_process_group(
            cmd,
            self.config.timeout(),
            self.config.output_limit_bytes,
            &self.interrupt,
        ) {
            Ok(outcome) => outcome,
            Err(err) => return Err(record.supervision_failed(&err)),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(spawn_err) => {
                record.persist(TerminalState::FailedToStart, None, "", &spawn_err.to_string())?;
                return Err(ProcessError::new(
                    ProcessErrorKind::FailedToStart,
                    format!("codex executable could not be started: {}", spawn_err.source),
                )
                .with_log(&run_id, &log_dir));
            }
        };

        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        let state = terminal_state(&output);
        record.persist(state, output.exit_code(), &stdout, &stderr)?;

        let failure = |kind: ProcessErrorKind, message: String| {
            let mut err = ProcessError::new(kind, message).with_log(&run_id, &log_dir);
            err.exit_code = output.exit_code();
            err.stdout = Some(stdout.clone());
            err.stderr = Some(stderr.clone());
            err
        };

        match output.termination {
            Termination::TimedOut => {
                warn!(run_id = %run_id, "codex exec timed out");
                Err(failure(
                    ProcessErrorKind::TimedOut,
                    format!("codex process timed out after {:?}", self.config.timeout()),
                ))
            }
            Termination::Interrupted => {
                warn!(run_id = %run_id, "codex exec interrupted");
                Err(failure(
                    ProcessErrorKind::Interrupted,
                    "codex process interrupted".to_string(),
                ))
            }
            Termination::Exited(status) => match status.code() {
                Some(0) => {
                    debug!(run_id = %run_id, "codex exec completed successfully");
                    Ok(CodexRun {
                        run_id: run_id.clone(),
                        stdout: stdout.clone(),
                        stderr: stderr.clone(),
                        exit_code: 0,
                        log_path: log_dir.clone(),
                    })
                }
                code => {
                    warn!(run_id = %run_id, exit_code = ?code, "codex exec failed");
                    Err(failure(
                        ProcessErrorKind::NonZeroExit,
                        format!("codex run failed with exit code {code:?}"),
                    ))
                }
            },
        }
    }

    fn prepare_log_dir(
        &self,
        run_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PathBuf, ProcessError> {
        let stamp = created_at.format("%Y%m%d-%H%M%S-%6f");
        let path = self.config.logs_root.join(format!("{stamp}-{run_id}"));
        // `create_dir` (not `create_dir_all`) so a collision fails instead of reusing.
        fs::create_dir_all(&self.config.logs_root)
            .and_then(|()| fs::create_dir(&path))
            .map_err(|err| {
                let mut e = ProcessError::new(
                    ProcessErrorKind::LogDirectory,
                    format!("unable to create codex log directory: {err}"),
                );
                e.log_path = Some(path.clone());
                e
            })?;
        Ok(path)
    }
}

fn terminal_state(output: &GroupOutput) -> TerminalState {
    match output.termination {
        Termination::Exited(_) => TerminalState::Completed,
        Termination::TimedOut => TerminalState::TimedOut,
        Termination::Interrupted => TerminalState::Interrupted,
    }
}

struct LogRecord<'a> {
    log_dir: &'a Path,
    run_id: &'a str,
    created_at: DateTime<Utc>,
    prompt: &'a str,
    argv: &'a [String],
    options: Option<&'a CodexOptions>,
}

impl LogRecord<'_> {
    fn persist(
        &self,
        state: TerminalState,
        exit_code: Option<i32>,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), ProcessError> {
        debug!(log_dir = %self.log_dir.display(), termination = %state, "persisting codex logs");
        let meta = InvocationMeta {
            run_id: self.run_id,
            created_at: self.created_at.to_rfc3339(),
            exit_code,
            command: self.argv,
            termination: state,
            codex_options: self.options,
        };
        let write = || -> std::io::Result<()> {
            fs::write(self.log_dir.join("prompt.txt"), self.prompt)?;
            fs::write(self.log_dir.join("command.txt"), shell_join(self.argv))?;
            fs::write(self.log_dir.join("stdout.log"), stdout)?;
            fs::write(self.log_dir.join("stderr.log"), stderr)?;
            let mut buf = serde_json::to_string_pretty(&meta)?;
            buf.push('\n');
            fs::write(self.log_dir.join("metadata.json"), buf)
        };
        write().map_err(|err| {
            ProcessError::new(
                ProcessErrorKind::PersistLogs,
                format!("unable to persist codex logs: {err}"),
            )
            .with_log(self.run_id, self.log_dir)
        })
    }

    /// Record a run whose supervision broke down after spawn. The error
    /// goes to `stderr.log` since no output was collected.
    fn supervision_failed(&self, err: &anyhow::Error) -> ProcessError {
        let message = format!("codex process could not be supervised: {err:#}");
        warn!(run_id = %self.run_id, error = %message, "codex exec abandoned");
        if let Err(persist_err) =
            self.persist(TerminalState::SupervisionFailed, None, "", &message)
        {
            return persist_err;
        }
        ProcessError::new(ProcessErrorKind::SupervisionFailed, message)
            .with_log(self.run_id, self.log_dir)
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Join argv into a single shell-safe line.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_escape(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_escape(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '+' | ','))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}
