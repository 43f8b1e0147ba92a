//! Client for the apply bridge's `POST /apply-feedback`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::batch::ItemError;
use crate::core::types::ApplyRequest;
use crate::io::config::RouterConfig;
use crate::io::steps::build_client;

/// Failure of one apply call, classified for per-item reporting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("codex bridge error ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("unable to reach codex bridge: {0}")]
    Unreachable(String),
    #[error("invalid bridge response")]
    InvalidResponse,
}

impl ApplyError {
    /// Detail embedded in the router's per-item error result.
    pub fn to_item_error(&self) -> ItemError {
        match self {
            ApplyError::Status { status, body } => ItemError {
                message: "codex bridge error".to_string(),
                status_code: Some(*status),
                body: Some(body.clone()),
                detail: None,
            },
            ApplyError::Unreachable(detail) => ItemError {
                message: "unable to reach codex bridge".to_string(),
                status_code: None,
                body: None,
                detail: Some(detail.clone()),
            },
            ApplyError::InvalidResponse => ItemError {
                message: "invalid bridge response".to_string(),
                status_code: None,
                body: None,
                detail: None,
            },
        }
    }
}

/// Downstream apply endpoint used by the router.
#[async_trait]
pub trait ApplyClient: Send + Sync {
    async fn apply(&self, request: &ApplyRequest) -> Result<Value, ApplyError>;
}

/// [`ApplyClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    client: reqwest::Client,
    url: String,
}

impl BridgeClient {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            url: format!("{}/apply-feedback", config.bridge_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ApplyClient for BridgeClient {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn apply(&self, request: &ApplyRequest) -> Result<Value, ApplyError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| ApplyError::Unreachable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "bridge rejected request");
            return Err(ApplyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|_| ApplyError::InvalidResponse)
    }
}
