//! HTTP handlers for the router and apply bridge services.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use enhancer::core::batch::{BatchResponse, RouterRequest};
use enhancer::core::types::{ApplyRequest, CodexOptions, normalize_feedback};
use enhancer::io::codex::{CodexRun, ProcessError};
use enhancer::router::{RouterError, dispatch};

use crate::state::{BridgeState, RouterState};

/// Error response: a status plus a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn detail(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "message": message.into() }),
        }
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self::detail(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    fn bad_gateway(err: &ProcessError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            body: json!({
                "message": err.message,
                "kind": err.kind,
                "run_id": err.run_id,
                "exit_code": err.exit_code,
                "stderr": err.stderr,
                "log_path": err.log_path,
            }),
        }
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::BadRequest(message) => Self::detail(StatusCode::BAD_REQUEST, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Router service: fans batches out to the bridge.
pub fn router_app(state: RouterState) -> Router {
    with_observability(
        Router::new()
            .route("/health", get(router_health))
            .route("/apply-feedback", post(route_feedback))
            .with_state(state),
    )
}

/// Apply bridge: runs the code agent for one feedback item.
pub fn bridge_app(state: BridgeState) -> Router {
    with_observability(
        Router::new()
            .route("/health", get(bridge_health))
            .route("/apply-feedback", post(apply_feedback))
            .with_state(state),
    )
}

/// Request ids (`x-request-id`, generated when absent) and request tracing.
fn with_observability(router: Router) -> Router {
    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn router_health(State(state): State<RouterState>) -> Json<Value> {
    Json(json!({ "status": "ok", "bridge": state.bridge_url }))
}

async fn bridge_health(State(state): State<BridgeState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "repo": state.runner.config().target_repo.display().to_string(),
    }))
}

/// POST /apply-feedback (router): one item, a list, or either under `payload`.
async fn route_feedback(
    State(state): State<RouterState>,
    Json(body): Json<Value>,
) -> Result<Json<BatchResponse>, ApiError> {
    let request: RouterRequest = serde_json::from_value(body)
        .map_err(|_| ApiError::unprocessable("payload must be a feedback item or a list of items"))?;
    let items = request
        .into_input()
        .into_items()
        .map_err(|err| ApiError::unprocessable(err.message()))?;
    info!(count = items.len(), "dispatching feedback batch");
    let response = dispatch(state.client.as_ref(), items, state.max_concurrency).await?;
    Ok(Json(response))
}

/// POST /apply-feedback (bridge): run `codex exec` off the async workers.
async fn apply_feedback(
    State(state): State<BridgeState>,
    Json(body): Json<Value>,
) -> Result<Json<CodexRun>, ApiError> {
    let request: ApplyRequest = serde_json::from_value(body)
        .map_err(|err| ApiError::unprocessable(format!("invalid payload: {err}")))?;
    let feedback =
        normalize_feedback(&request.feedback).map_err(|err| ApiError::unprocessable(err.message()))?;
    let options = request
        .codex_options
        .map(CodexOptions::validated)
        .transpose()
        .map_err(|err| ApiError::unprocessable(err.message()))?;

    let runner = Arc::clone(&state.runner);
    let result = tokio::task::spawn_blocking(move || runner.run(&feedback, options.as_ref()))
        .await
        .map_err(|err| {
            error!(error = %err, "codex worker panicked");
            ApiError::detail(StatusCode::INTERNAL_SERVER_ERROR, "codex worker failed")
        })?;

    match result {
        Ok(run) => {
            info!(run_id = %run.run_id, "feedback applied");
            Ok(Json(run))
        }
        Err(err) => {
            error!(kind = ?err.kind, error = %err, "codex run failed");
            Err(ApiError::bad_gateway(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use enhancer::io::bridge::{ApplyClient, ApplyError};
    use enhancer::test_support::{ScriptedApplyClient, bridge_fixture};
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn post_json(app: Router, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/apply-feedback")
            .header("content-type", "application/json")
            .header("x-request-id", "req-1")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        assert_eq!(
            response
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok()),
            Some("req-1")
        );
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn router_with(client: ScriptedApplyClient) -> Router {
        let client: Arc<dyn ApplyClient> = Arc::new(client);
        router_app(RouterState::new(client, 2, "http://bridge".to_string()))
    }

    #[tokio::test]
    async fn router_accepts_enveloped_list_and_reports_partial_error() {
        let client = ScriptedApplyClient::default().with_failure(
            "second",
            ApplyError::Unreachable("connection refused".to_string()),
        );
        let (status, body) = post_json(
            router_with(client),
            json!({"payload": [
                {"output": {"feedback": " first "}},
                {"feedback": "second", "codex_options": {"model": "gpt-5.1"}}
            ]}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "partial-error");
        assert_eq!(body["results"][0]["status"], "ok");
        assert_eq!(body["results"][0]["result"]["feedback"], "first");
        assert_eq!(body["results"][1]["status"], "error");
        assert_eq!(
            body["results"][1]["error"]["message"],
            "unable to reach codex bridge"
        );
        assert_eq!(body["results"][1]["error"]["detail"], "connection refused");
    }

    #[tokio::test]
    async fn router_treats_single_item_as_batch_of_one() {
        let (status, body) = post_json(
            router_with(ScriptedApplyClient::default()),
            json!({"feedback": "Tighten copy"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "submitted");
        assert_eq!(body["results"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn router_rejects_empty_and_blank_payloads() {
        let (status, body) = post_json(router_with(ScriptedApplyClient::default()), json!([])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "payload cannot be empty");

        let (status, body) = post_json(
            router_with(ScriptedApplyClient::default()),
            json!([{"feedback": "ok"}, {"feedback": "   "}]),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "item 1: feedback cannot be empty");
    }

    fn bridge_with(body: &str) -> (tempfile::TempDir, Router) {
        let (temp, config) = bridge_fixture(body);
        let state = BridgeState::from_config(&config, CancellationToken::new()).expect("state");
        (temp, bridge_app(state))
    }

    #[tokio::test]
    async fn bridge_returns_run_result() {
        let (_temp, app) = bridge_with("echo applied");
        let (status, body) = post_json(app, json!({"feedback": "Tighten copy"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exit_code"], 0);
        assert_eq!(body["stdout"], "applied\n");
        let log_path = body["log_path"].as_str().expect("log path");
        assert!(std::path::Path::new(log_path).join("metadata.json").is_file());
    }

    #[tokio::test]
    async fn bridge_maps_failed_run_to_bad_gateway() {
        let (_temp, app) = bridge_with("echo nope >&2; exit 4");
        let (status, body) = post_json(app, json!({"feedback": "Tighten copy"})).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "non_zero_exit");
        assert_eq!(body["exit_code"], 4);
        assert_eq!(body["stderr"], "nope\n");
        assert!(body["run_id"].is_string());
        assert!(body["log_path"].is_string());
    }

    #[tokio::test]
    async fn bridge_rejects_blank_feedback() {
        let (_temp, app) = bridge_with("exit 0");
        let (status, body) = post_json(app, json!({"feedback": "  "})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "feedback cannot be empty");
    }
}
