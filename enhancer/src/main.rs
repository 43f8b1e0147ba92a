//! `enhancer`: run the frontend enhancement pipeline and edit its settings.
//!
//! Run defaults come from `enhancer.toml`, then the pipeline overrides
//! document, then command-line flags (highest precedence).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use enhancer::core::types::{CodexOptions, FeedbackPayload, ReasoningEffort};
use enhancer::error::ValidationError;
use enhancer::exit_codes;
use enhancer::io::codex::{CodexRunner, ProcessError, ProcessErrorKind};
use enhancer::io::config::{DEFAULT_CONFIG_PATH, EnhancerConfig, load_config, write_config};
use enhancer::io::env_store::EnvStore;
use enhancer::io::overrides_store::OverridesStore;
use enhancer::io::steps::{HttpSteps, PipelineSteps};
use enhancer::io::store::StoreError;
use enhancer::logging::{self, LogFormat};
use enhancer::pipeline::{Pipeline, PipelineError, PipelineSettings, RunOutcome, RunRequest, TokioBackoff};

#[derive(Parser)]
#[command(
    name = "enhancer",
    version,
    about = "Screenshot, critique and apply UI feedback to a frontend repository"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run or poke the capture → feedback → apply pipeline.
    #[command(subcommand)]
    Pipeline(PipelineCommand),
    /// Invoke the code agent directly against the configured repository.
    #[command(subcommand)]
    Codex(CodexCommand),
    /// Show or edit the pipeline overrides document.
    #[command(subcommand)]
    Overrides(OverridesCommand),
    /// Show or edit the env file.
    #[command(subcommand)]
    Env(EnvCommand),
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Run the pipeline, optionally several times in a row.
    Run(RunArgs),
    /// Post the configured sample feedback to the router.
    SampleFeedback,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Suffix the run directory with `-demo`.
    #[arg(long, conflicts_with = "no_demo")]
    demo: bool,
    #[arg(long)]
    no_demo: bool,
    /// Root directory for run artifacts.
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,
    /// Number of sequential runs.
    #[arg(short, long)]
    iterations: Option<u32>,
    #[command(flatten)]
    codex: CodexArgs,
}

impl RunArgs {
    fn demo_flag(&self) -> Option<bool> {
        match (self.demo, self.no_demo) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Args, Debug, Default)]
struct CodexArgs {
    /// Model passed to the code agent.
    #[arg(long)]
    model: Option<String>,
    /// Reasoning effort passed to the code agent (low, medium, high).
    #[arg(long)]
    model_reasoning_effort: Option<ReasoningEffort>,
}

#[derive(Subcommand)]
enum CodexCommand {
    /// Apply one piece of feedback with `codex exec`.
    Exec {
        feedback: String,
        #[command(flatten)]
        codex: CodexArgs,
    },
}

#[derive(Subcommand)]
enum OverridesCommand {
    Show,
    /// Update keys; values are JSON (bare words are taken as strings).
    Set {
        #[arg(required = true, value_name = "KEY=JSON")]
        assignments: Vec<String>,
        #[arg(long)]
        expected_digest: Option<String>,
    },
}

#[derive(Subcommand)]
enum EnvCommand {
    Show,
    /// Update or append `KEY=VALUE` lines.
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        assignments: Vec<String>,
        #[arg(long)]
        expected_digest: Option<String>,
    },
    /// Replace the whole file with the contents of `source`.
    Overwrite {
        source: PathBuf,
        #[arg(long)]
        expected_digest: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format, "enhancer=info,warn");
    let code = match run(cli).await {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::InitConfig { force } = cli.command {
        return cmd_init_config(&cli.config, force);
    }
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Pipeline(PipelineCommand::Run(args)) => cmd_pipeline_run(&config, args).await,
        Command::Pipeline(PipelineCommand::SampleFeedback) => cmd_sample_feedback(&config).await,
        Command::Codex(CodexCommand::Exec { feedback, codex }) => {
            cmd_codex_exec(&config, feedback, codex).await
        }
        Command::Overrides(command) => cmd_overrides(&config, command),
        Command::Env(command) => cmd_env(&config, command),
        Command::InitConfig { .. } => Ok(()),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    write_config(path, &EnhancerConfig::default())?;
    println!("{}", path.display());
    Ok(())
}

async fn cmd_pipeline_run(config: &EnhancerConfig, args: RunArgs) -> Result<()> {
    let overrides = OverridesStore::new(&config.pipeline.overrides_path)
        .load()?
        .overrides;
    let iterations = args.iterations.unwrap_or(overrides.iterations);
    let model = args.codex.model.clone().or(overrides.model);
    let effort = args
        .codex
        .model_reasoning_effort
        .or(overrides.model_reasoning_effort);
    let request = RunRequest {
        demo: args.demo_flag().unwrap_or(overrides.demo),
        artifacts_dir: args.artifacts_dir.or(overrides.artifacts_dir),
        codex_options: CodexOptions::from_parts(model.as_deref(), effort)?,
    };

    let pipeline = Pipeline::new(
        HttpSteps::new(&config.pipeline)?,
        TokioBackoff,
        PipelineSettings::from_config(&config.pipeline),
    );
    let cancel = cancel_on_ctrl_c();

    if iterations == 1 {
        let outcome = pipeline.run(&request, &cancel).await?;
        echo_agent_stdout(&outcome);
        return print_json(&outcome);
    }
    let outcomes = pipeline.run_iterations(iterations, &request, &cancel).await?;
    for outcome in &outcomes {
        echo_agent_stdout(&outcome.run);
    }
    print_json(&json!({
        "iteration_count": outcomes.len(),
        "iterations": outcomes,
    }))
}

async fn cmd_sample_feedback(config: &EnhancerConfig) -> Result<()> {
    let steps = HttpSteps::new(&config.pipeline)?;
    let feedback = FeedbackPayload {
        feedback: config.pipeline.sample_feedback.clone(),
        metadata: Map::new(),
    };
    let response = steps.apply(&feedback, None).await?;
    print_json(&response)
}

async fn cmd_codex_exec(config: &EnhancerConfig, feedback: String, args: CodexArgs) -> Result<()> {
    let options = CodexOptions::from_parts(args.model.as_deref(), args.model_reasoning_effort)?;
    let runner = CodexRunner::new(config.bridge.clone(), cancel_on_ctrl_c())?;
    let result = tokio::task::spawn_blocking(move || runner.run(&feedback, options.as_ref()))
        .await
        .context("join codex run")?;
    match result {
        Ok(run) => print_json(&run),
        Err(err) => {
            print_json(&err)?;
            Err(err.into())
        }
    }
}

fn cmd_overrides(config: &EnhancerConfig, command: OverridesCommand) -> Result<()> {
    let store = OverridesStore::new(&config.pipeline.overrides_path);
    let snapshot = match command {
        OverridesCommand::Show => store.load()?,
        OverridesCommand::Set {
            assignments,
            expected_digest,
        } => {
            let mut updates = Map::new();
            for assignment in &assignments {
                let (key, raw) = split_assignment(assignment)?;
                let value = serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
                updates.insert(key.to_string(), value);
            }
            store.save(updates, expected_digest.as_deref())?
        }
    };
    print_json(&snapshot)
}

fn cmd_env(config: &EnhancerConfig, command: EnvCommand) -> Result<()> {
    let store = EnvStore::new(&config.pipeline.env_path);
    let snapshot = match command {
        EnvCommand::Show => store.load()?,
        EnvCommand::Set {
            assignments,
            expected_digest,
        } => {
            let updates = assignments
                .iter()
                .map(|assignment| {
                    split_assignment(assignment).map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            store.save(&updates, expected_digest.as_deref())?
        }
        EnvCommand::Overwrite {
            source,
            expected_digest,
        } => {
            let content = fs::read_to_string(&source)
                .with_context(|| format!("read {}", source.display()))?;
            store.overwrite(&content, expected_digest.as_deref())?
        }
    };
    print_json(&snapshot)
}

fn split_assignment(assignment: &str) -> Result<(&str, &str), ValidationError> {
    match assignment.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(ValidationError::new(format!(
            "expected KEY=VALUE, got '{assignment}'"
        ))),
    }
}

fn echo_agent_stdout(outcome: &RunOutcome) {
    if let Some(stdout) = outcome.agent_stdout() {
        eprintln!("{}", stdout.trim_end());
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<PipelineError>() {
        return match err {
            PipelineError::Validation(_) => exit_codes::INVALID,
            PipelineError::Cancelled => exit_codes::INTERRUPTED,
            _ => exit_codes::FAILED,
        };
    }
    if let Some(err) = err.downcast_ref::<StoreError>() {
        return match err {
            StoreError::VersionConflict { .. } => exit_codes::CONFLICT,
            StoreError::Invalid { .. } => exit_codes::INVALID,
            StoreError::Io { .. } => exit_codes::FAILED,
        };
    }
    if let Some(err) = err.downcast_ref::<ProcessError>() {
        return match err.kind {
            ProcessErrorKind::Interrupted => exit_codes::INTERRUPTED,
            ProcessErrorKind::EmptyFeedback => exit_codes::INVALID,
            _ => exit_codes::FAILED,
        };
    }
    if err.downcast_ref::<ValidationError>().is_some() {
        return exit_codes::INVALID;
    }
    exit_codes::FAILED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pipeline_run_flags() {
        let cli = Cli::parse_from([
            "enhancer",
            "pipeline",
            "run",
            "--no-demo",
            "-i",
            "3",
            "--model-reasoning-effort",
            "high",
        ]);
        let Command::Pipeline(PipelineCommand::Run(args)) = cli.command else {
            panic!("expected pipeline run");
        };
        assert_eq!(args.demo_flag(), Some(false));
        assert_eq!(args.iterations, Some(3));
        assert_eq!(
            args.codex.model_reasoning_effort,
            Some(ReasoningEffort::High)
        );
    }

    #[test]
    fn demo_and_no_demo_conflict() {
        assert!(Cli::try_parse_from(["enhancer", "pipeline", "run", "--demo", "--no-demo"]).is_err());
    }

    #[test]
    fn rejects_unknown_reasoning_effort() {
        assert!(
            Cli::try_parse_from([
                "enhancer",
                "codex",
                "exec",
                "fix it",
                "--model-reasoning-effort",
                "extreme"
            ])
            .is_err()
        );
    }

    #[test]
    fn unset_demo_defers_to_overrides() {
        assert_eq!(RunArgs::default().demo_flag(), None);
    }

    #[test]
    fn split_assignment_requires_key() {
        assert_eq!(split_assignment("A=b=c").expect("split"), ("A", "b=c"));
        assert!(split_assignment("=value").is_err());
        assert!(split_assignment("novalue").is_err());
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let conflict = anyhow::Error::new(StoreError::VersionConflict { store: "env file" });
        assert_eq!(exit_code_for(&conflict), exit_codes::CONFLICT);
        let invalid: anyhow::Error = PipelineError::from(ValidationError::new("bad")).into();
        assert_eq!(exit_code_for(&invalid), exit_codes::INVALID);
        let cancelled = anyhow::Error::new(PipelineError::Cancelled).context("pipeline run");
        assert_eq!(exit_code_for(&cancelled), exit_codes::INTERRUPTED);
    }
}
