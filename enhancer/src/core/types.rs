//! Shared payload types for the enhancement loop.
//!
//! These types are the stable contracts exchanged between the orchestrator,
//! the router and the apply bridge. They hold no I/O handles so they can be
//! built, validated and compared freely in tests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Number of base64 characters kept when a screenshot payload is summarized.
pub const SANITIZED_IMAGE_PREFIX_CHARS: usize = 50;

/// Reasoning effort accepted by the code agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            "" => Err(ValidationError::new("reasoning_effort cannot be empty")),
            _ => Err(ValidationError::new(
                "reasoning_effort must be one of: high, low, medium",
            )),
        }
    }
}

/// Model tuning passed through to the code agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodexOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl CodexOptions {
    /// Build options from loosely-typed inputs, returning `None` when nothing is set.
    pub fn from_parts(
        model: Option<&str>,
        reasoning_effort: Option<ReasoningEffort>,
    ) -> Result<Option<Self>, ValidationError> {
        let model = match model {
            Some(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::new("model cannot be empty"));
                }
                Some(trimmed.to_string())
            }
            None => None,
        };
        if model.is_none() && reasoning_effort.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            model,
            reasoning_effort,
        }))
    }

    /// Normalize a deserialized value (trims the model, rejects blanks).
    pub fn validated(self) -> Result<Self, ValidationError> {
        let model = match self.model {
            Some(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::new("model cannot be empty"));
                }
                Some(trimmed.to_string())
            }
            None => None,
        };
        Ok(Self {
            model,
            reasoning_effort: self.reasoning_effort,
        })
    }

    /// Extra agent arguments, in a stable order.
    pub fn as_command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(effort) = self.reasoning_effort {
            args.push("-c".to_string());
            args.push(format!("model_reasoning_effort={effort}"));
        }
        args
    }
}

/// Output of the capture step: base64 image plus whatever metadata the service adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotPayload {
    pub image_b64: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ScreenshotPayload {
    /// Copy with the image truncated to a short marker, for summaries and JSON artifacts.
    pub fn sanitized(&self) -> Self {
        let prefix: String = self
            .image_b64
            .chars()
            .take(SANITIZED_IMAGE_PREFIX_CHARS)
            .collect();
        Self {
            image_b64: format!("{prefix}..."),
            metadata: self.metadata.clone(),
        }
    }
}

/// Output of the feedback step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub feedback: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Body sent to an apply endpoint (router or bridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_options: Option<CodexOptions>,
}

/// Trim feedback text and reject blanks.
pub fn normalize_feedback(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("feedback cannot be empty"));
    }
    Ok(trimmed.to_string())
}
