//! Per-service context built once at startup and shared by every handler.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use enhancer::io::bridge::{ApplyClient, BridgeClient};
use enhancer::io::codex::CodexRunner;
use enhancer::io::config::{BridgeConfig, RouterConfig};

/// Router service context.
#[derive(Clone)]
pub struct RouterState {
    pub client: Arc<dyn ApplyClient>,
    pub max_concurrency: usize,
    /// Reported by `/health`.
    pub bridge_url: String,
}

impl RouterState {
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        let client = BridgeClient::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            config.max_concurrency,
            config.bridge_url.clone(),
        ))
    }

    pub fn new(client: Arc<dyn ApplyClient>, max_concurrency: usize, bridge_url: String) -> Self {
        Self {
            client,
            max_concurrency,
            bridge_url,
        }
    }
}

/// Apply bridge context. The runner observes `shutdown`, so stopping the
/// service terminates an in-flight agent run.
#[derive(Clone)]
pub struct BridgeState {
    pub runner: Arc<CodexRunner>,
}

impl BridgeState {
    pub fn from_config(config: &BridgeConfig, shutdown: CancellationToken) -> Result<Self> {
        let runner = CodexRunner::new(config.clone(), shutdown)?;
        runner.ensure_repo()?;
        Ok(Self {
            runner: Arc::new(runner),
        })
    }
}
