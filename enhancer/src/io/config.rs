//! Enhancer configuration stored in `enhancer.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::io::atomic::write_atomic;

pub const DEFAULT_CONFIG_PATH: &str = "enhancer.toml";

/// Enhancer configuration (TOML).
///
/// Missing fields default to the values the services ship with, so an empty
/// file (or no file) is a valid local setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnhancerConfig {
    pub pipeline: PipelineConfig,
    pub router: RouterConfig,
    pub bridge: BridgeConfig,
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub screenshot_endpoint: String,
    pub feedback_endpoint: String,
    /// Router `apply-feedback` endpoint used by the apply step.
    pub router_endpoint: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub artifacts_root: PathBuf,
    pub sample_feedback: String,
    /// Structured overrides document (iterations, model, demo, ...).
    pub overrides_path: PathBuf,
    /// Line-oriented secrets file editable through `enhancer env`.
    pub env_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            screenshot_endpoint: "http://localhost:8101/capture".to_string(),
            feedback_endpoint: "http://localhost:8102/feedback".to_string(),
            router_endpoint: "http://localhost:8103/apply-feedback".to_string(),
            request_timeout_secs: 240,
            max_attempts: 3,
            retry_backoff_ms: 2_000,
            artifacts_root: PathBuf::from("run_logs/pipeline_runs"),
            sample_feedback:
                "Tighten hero spacing, raise CTA prominence, and simplify testimonial layout."
                    .to_string(),
            overrides_path: PathBuf::from("config/pipeline_overrides.json"),
            env_path: PathBuf::from(".env"),
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Router service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    pub bind: String,
    pub bridge_url: String,
    pub request_timeout_secs: u64,
    /// Ceiling on concurrent in-flight calls to the bridge per batch.
    pub max_concurrency: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8103".to_string(),
            bridge_url: "http://127.0.0.1:5600".to_string(),
            request_timeout_secs: 240,
            max_concurrency: 4,
        }
    }
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Apply bridge settings (code agent invocation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub bind: String,
    /// Repository the agent mutates.
    pub target_repo: PathBuf,
    pub prompt_prefix: String,
    pub codex_bin: String,
    pub logs_root: PathBuf,
    pub timeout_secs: u64,
    /// Per-stream cap on retained agent stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5600".to_string(),
            target_repo: PathBuf::from("."),
            prompt_prefix:
                "You are the worlds top frontend engineer. Apply the feedback to the target repository."
                    .to_string(),
            codex_bin: "codex".to_string(),
            logs_root: PathBuf::from("run_logs/codex_runs"),
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EnhancerConfig {
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        validate_url(&pipeline.screenshot_endpoint, "pipeline.screenshot_endpoint")?;
        validate_url(&pipeline.feedback_endpoint, "pipeline.feedback_endpoint")?;
        validate_url(&pipeline.router_endpoint, "pipeline.router_endpoint")?;
        if pipeline.request_timeout_secs == 0 {
            return Err(anyhow!("pipeline.request_timeout_secs must be > 0"));
        }
        if pipeline.max_attempts == 0 {
            return Err(anyhow!("pipeline.max_attempts must be >= 1"));
        }
        if pipeline.retry_backoff_ms < 500 {
            return Err(anyhow!("pipeline.retry_backoff_ms must be >= 500"));
        }

        validate_url(&self.router.bridge_url, "router.bridge_url")?;
        if self.router.request_timeout_secs == 0 {
            return Err(anyhow!("router.request_timeout_secs must be > 0"));
        }
        if self.router.max_concurrency == 0 {
            return Err(anyhow!("router.max_concurrency must be >= 1"));
        }

        if self.bridge.codex_bin.trim().is_empty() {
            return Err(anyhow!("bridge.codex_bin must not be empty"));
        }
        if self.bridge.timeout_secs == 0 {
            return Err(anyhow!("bridge.timeout_secs must be > 0"));
        }
        if self.bridge.output_limit_bytes == 0 {
            return Err(anyhow!("bridge.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

fn validate_url(value: &str, field: &str) -> Result<()> {
    let parsed = Url::parse(value.trim())
        .map_err(|err| anyhow!("{field} must be an absolute http(s) URL: {err}"))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(anyhow!("{field} must be an absolute http(s) URL"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EnhancerConfig::default()`.
pub fn load_config(path: &Path) -> Result<EnhancerConfig> {
    if !path.exists() {
        let cfg = EnhancerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EnhancerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EnhancerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
        .with_context(|| format!("replace config {}", path.display()))
}
