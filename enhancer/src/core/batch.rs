//! Router batch shapes.
//!
//! Callers may send a bare item, an enveloped item (`{output: {feedback}}`), a
//! list of either, or any of those wrapped in `{payload: ...}`. Everything is
//! resolved once, here, into an ordered `Vec<BatchItem>` so dispatch never
//! inspects request shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{ApplyRequest, CodexOptions, normalize_feedback};
use crate::error::ValidationError;

/// Item with feedback nested under `output`, as emitted by the feedback service.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopedFeedback {
    pub output: FeedbackOutput,
    #[serde(default)]
    pub codex_options: Option<CodexOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackOutput {
    pub feedback: String,
}

/// Item with feedback at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectFeedback {
    pub feedback: String,
    #[serde(default)]
    pub codex_options: Option<CodexOptions>,
}

/// One incoming feedback item, in either accepted shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedbackEntry {
    Enveloped(EnvelopedFeedback),
    Direct(DirectFeedback),
}

/// A single item or a list of items.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchInput {
    Many(Vec<FeedbackEntry>),
    One(FeedbackEntry),
}

/// Router request body, optionally wrapped in `{payload: ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RouterRequest {
    Wrapped { payload: BatchInput },
    Bare(BatchInput),
}

impl RouterRequest {
    pub fn into_input(self) -> BatchInput {
        match self {
            RouterRequest::Wrapped { payload } => payload,
            RouterRequest::Bare(input) => input,
        }
    }
}

impl BatchInput {
    /// Resolve into uniform, validated items indexed in input order.
    ///
    /// An empty list resolves to an empty vector; rejecting it is the router's call.
    pub fn into_items(self) -> Result<Vec<BatchItem>, ValidationError> {
        let entries = match self {
            BatchInput::Many(entries) => entries,
            BatchInput::One(entry) => vec![entry],
        };
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| BatchItem::from_entry(index, entry))
            .collect()
    }
}

/// Uniform internal representation of one dispatch unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub index: usize,
    pub feedback: String,
    pub codex_options: Option<CodexOptions>,
}

impl BatchItem {
    fn from_entry(index: usize, entry: FeedbackEntry) -> Result<Self, ValidationError> {
        let (raw, options) = match entry {
            FeedbackEntry::Enveloped(item) => (item.output.feedback, item.codex_options),
            FeedbackEntry::Direct(item) => (item.feedback, item.codex_options),
        };
        let feedback = normalize_feedback(&raw)
            .map_err(|err| ValidationError::new(format!("item {index}: {}", err.message())))?;
        let codex_options = options
            .map(CodexOptions::validated)
            .transpose()
            .map_err(|err| ValidationError::new(format!("item {index}: {}", err.message())))?;
        Ok(Self {
            index,
            feedback,
            codex_options,
        })
    }

    pub fn to_request(&self) -> ApplyRequest {
        ApplyRequest {
            feedback: self.feedback.clone(),
            codex_options: self.codex_options.clone(),
        }
    }
}

/// Diagnostic detail for a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    Ok { result: Value },
    Error { error: ItemError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl ItemResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    Submitted,
    PartialError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub status: BatchStatus,
    pub results: Vec<ItemResult>,
}

impl BatchResponse {
    /// Order results by input index and derive the batch status.
    pub fn assemble(mut results: Vec<ItemResult>) -> Self {
        results.sort_by_key(|result| result.index);
        let status = if results.iter().any(ItemResult::is_error) {
            BatchStatus::PartialError
        } else {
            BatchStatus::Submitted
        };
        Self { status, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ReasoningEffort;
    use serde_json::json;

    fn parse(body: Value) -> Vec<BatchItem> {
        let request: RouterRequest = serde_json::from_value(body).expect("parse request");
        request.into_input().into_items().expect("items")
    }

    #[test]
    fn bare_item_becomes_single_element_batch() {
        let items = parse(json!({"feedback": "  Tighten copy  "}));
        assert_eq!(
            items,
            vec![BatchItem {
                index: 0,
                feedback: "Tighten copy".to_string(),
                codex_options: None,
            }]
        );
    }

    #[test]
    fn wrapped_mixed_list_preserves_order_and_options() {
        let items = parse(json!({
            "payload": [
                {"output": {"feedback": "First"}},
                {"feedback": "Second", "codex_options": {"reasoning_effort": "medium"}},
            ]
        }));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].feedback, "First");
        assert_eq!(items[1].index, 1);
        assert_eq!(
            items[1].codex_options,
            Some(CodexOptions {
                model: None,
                reasoning_effort: Some(ReasoningEffort::Medium),
            })
        );
    }

    #[test]
    fn blank_feedback_is_rejected_with_index() {
        let request: RouterRequest =
            serde_json::from_value(json!([{"feedback": "ok"}, {"feedback": "   "}]))
                .expect("parse");
        let err = request.into_input().into_items().unwrap_err();
        assert_eq!(err.to_string(), "item 1: feedback cannot be empty");
    }

    #[test]
    fn empty_list_resolves_to_no_items() {
        assert!(parse(json!({"payload": []})).is_empty());
    }

    #[test]
    fn assemble_sorts_by_index_and_flags_partial_errors() {
        let response = BatchResponse::assemble(vec![
            ItemResult {
                index: 1,
                outcome: ItemOutcome::Error {
                    error: ItemError {
                        message: "codex bridge error".to_string(),
                        status_code: Some(502),
                        body: Some("bad".to_string()),
                        detail: None,
                    },
                },
            },
            ItemResult {
                index: 0,
                outcome: ItemOutcome::Ok {
                    result: json!({"exit_code": 0}),
                },
            },
        ]);

        assert_eq!(response.status, BatchStatus::PartialError);
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(
            value,
            json!({
                "status": "partial-error",
                "results": [
                    {"index": 0, "status": "ok", "result": {"exit_code": 0}},
                    {"index": 1, "status": "error", "error": {
                        "message": "codex bridge error",
                        "status_code": 502,
                        "body": "bad",
                    }},
                ]
            })
        );
    }
}
