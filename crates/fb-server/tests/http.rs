#![cfg(unix)]

mod support;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use fb_server::router;
use serde_json::{Value, json};
use support::{DOUBLING, FAILING, Fixture};
use tower::ServiceExt;

fn app(fx: &Fixture) -> Router {
    let mut slow = fx.model("slow", "sleep 30");
    slow.solver.timeout_s = 0.3;
    let server = fx.server(
        vec![fx.model("forward", DOUBLING), fx.model("broken", FAILING), slow],
        2,
        None,
    );
    router(Arc::new(server))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(text) => {
            request = request.header("content-type", "application/json");
            Body::from(text.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, "POST", uri, Some(&body.to_string())).await
}

#[tokio::test]
async fn info_lists_models() {
    let fx = Fixture::new("http_info");
    let app = app(&fx);

    let (status, body) = call(&app, "GET", "/Info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["protocolVersion"], json!(1.0));
    assert_eq!(body["models"], json!(["broken", "forward", "slow"]));
}

#[tokio::test]
async fn sizes_and_model_info() {
    let fx = Fixture::new("http_sizes");
    let app = app(&fx);

    let (status, body) = post(&app, "/InputSizes", json!({"name": "forward"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inputSizes"], json!([1]));

    let (_, body) = post(&app, "/OutputSizes", json!({"name": "forward"})).await;
    assert_eq!(body["outputSizes"], json!([1]));

    let (_, body) = post(&app, "/ModelInfo", json!({"name": "forward"})).await;
    assert_eq!(body["support"]["Evaluate"], json!(true));
    assert_eq!(body["support"]["Gradient"], json!(false));

    let (_, body) = post(&app, "/Describe", json!({"name": "forward"})).await;
    assert_eq!(body["input_size"], json!(1));
    assert_eq!(body["inputs"][0]["name"], json!("inflow_velocity"));
    assert_eq!(body["outputs"][0]["name"], json!("doubled"));

    let (status, body) = post(&app, "/InputSizes", json!({"name": "backward"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], json!("UnknownModel"));
}

#[tokio::test]
async fn evaluate_returns_output_vector() {
    let fx = Fixture::new("http_eval");
    let app = app(&fx);

    let (status, body) = post(
        &app,
        "/Evaluate",
        json!({"model_name": "forward", "input_vector": [34.6]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let out = body["output_vector"][0].as_f64().unwrap();
    assert!((out - 69.2).abs() < 1e-9);
    assert!(body["eval_id"].as_str().is_some_and(|id| !id.is_empty()));

    let (status, _) = post(&app, "/Evaluate", json!({"name": "forward", "input_vector": [1.0]})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn request_errors_are_schema_mismatches() {
    let fx = Fixture::new("http_schema");
    let app = app(&fx);

    let (status, body) = call(&app, "POST", "/Evaluate", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], json!("SchemaMismatch"));

    let (status, body) = post(&app, "/Evaluate", json!({"model_name": "forward", "input_vector": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], json!("SchemaMismatch"));

    let (status, body) = post(
        &app,
        "/Evaluate",
        json!({"model_name": "forward", "input_vector": [1.0], "config": {"mesh": "fine"}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], json!("SchemaMismatch"));

    let (status, body) = post(&app, "/Evaluate", json!({"model_name": "nope", "input_vector": [1.0]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], json!("UnknownModel"));
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test]
async fn solver_failures_carry_their_log() {
    let fx = Fixture::new("http_fail");
    let app = app(&fx);

    let (status, body) = post(&app, "/Evaluate", json!({"model_name": "broken", "input_vector": [1.0]})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["kind"], json!("NonZeroExit"));
    assert!(body["error"]["log"].as_str().unwrap().contains("FOAM FATAL ERROR"));
}

#[tokio::test]
async fn timeouts_map_to_gateway_timeout() {
    let fx = Fixture::new("http_timeout");
    let app = app(&fx);

    let (status, body) = post(&app, "/Evaluate", json!({"model_name": "slow", "input_vector": [1.0]})).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["kind"], json!("TimedOut"));
}
