//! JSON-over-HTTP protocol.
//!
//! Route names follow the UM-Bridge convention used by UQ drivers
//! (`/Info`, `/InputSizes`, `/Evaluate`, ...), with flat input and output
//! vectors.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fb_core::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ServiceError, ServiceResult};
use crate::eval_service::{EvalConfig, EvalRequest, ModelServer};

pub const PROTOCOL_VERSION: f64 = 1.0;

/// Seconds an overloaded client is told to back off.
const RETRY_AFTER_S: &str = "1";

type AppState = Arc<ModelServer>;

#[derive(Debug, Deserialize)]
struct ModelQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EvaluateBody {
    #[serde(alias = "name")]
    model_name: String,
    input_vector: Vec<f64>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct EvaluateReply {
    output_vector: Vec<f64>,
    eval_id: String,
}

/// Error body: `{"error": {"kind", "message", "log"?}}`.
struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(ServiceError::InvalidRequest(rejection.body_text()))
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::SchemaMismatch | ErrorKind::UnknownModel => StatusCode::BAD_REQUEST,
        ErrorKind::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let mut error = json!({
            "kind": kind,
            "message": self.0.to_string(),
        });
        if let Some(log) = self.0.log() {
            error["log"] = json!(log);
        }
        let mut response = (status_for(kind), Json(json!({ "error": error }))).into_response();
        if kind.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_S));
        }
        response
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the protocol router over a shared server.
pub fn router(server: Arc<ModelServer>) -> Router {
    Router::new()
        .route("/Info", get(info))
        .route("/InputSizes", post(input_sizes))
        .route("/OutputSizes", post(output_sizes))
        .route("/ModelInfo", post(model_info))
        .route("/Describe", post(describe))
        .route("/Evaluate", post(evaluate))
        .with_state(server)
}

async fn info(State(server): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "models": server.model_names(),
    }))
}

async fn input_sizes(
    State(server): State<AppState>,
    query: Result<Json<ModelQuery>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(query) = query?;
    let model = server.model(&query.name)?;
    Ok(Json(json!({ "inputSizes": model.input_sizes() })))
}

async fn output_sizes(
    State(server): State<AppState>,
    query: Result<Json<ModelQuery>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(query) = query?;
    let model = server.model(&query.name)?;
    Ok(Json(json!({ "outputSizes": model.output_sizes() })))
}

async fn model_info(
    State(server): State<AppState>,
    query: Result<Json<ModelQuery>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(query) = query?;
    server.model(&query.name)?;
    Ok(Json(json!({
        "support": {
            "Evaluate": true,
            "Gradient": false,
            "ApplyJacobian": false,
            "ApplyHessian": false,
        }
    })))
}

async fn describe(
    State(server): State<AppState>,
    query: Result<Json<ModelQuery>, JsonRejection>,
) -> ApiResult<crate::eval_service::ModelDescription> {
    let Json(query) = query?;
    Ok(Json(server.describe(&query.name)?))
}

async fn evaluate(
    State(server): State<AppState>,
    body: Result<Json<EvaluateBody>, JsonRejection>,
) -> ApiResult<EvaluateReply> {
    let Json(body) = body?;
    let request = EvalRequest {
        model: body.model_name,
        inputs: body.input_vector,
        config: EvalConfig::from_value(body.config)?,
    };
    let response = server.evaluate(request).await?;
    Ok(Json(EvaluateReply {
        output_vector: response.outputs,
        eval_id: response.eval_id.to_string(),
    }))
}

/// Serve until Ctrl-C, then cancel in-flight evaluations and drain.
pub async fn serve(server: Arc<ModelServer>, bind: &str) -> ServiceResult<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    serve_with_shutdown(server, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Serve on `listener` until `signal` resolves.
pub async fn serve_with_shutdown(
    server: Arc<ModelServer>,
    listener: tokio::net::TcpListener,
    signal: impl Future<Output = ()> + Send + 'static,
) -> ServiceResult<()> {
    tracing::info!(addr = %listener.local_addr()?, "listening");
    let token = server.shutdown_token();
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move {
            signal.await;
            tracing::info!("shutdown requested, cancelling in-flight evaluations");
            token.cancel();
        })
        .await?;
    Ok(())
}
