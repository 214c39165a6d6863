//! End-to-end pipeline tests against a real echo backend on a loopback
//! TCP port.
use std::sync::Arc;

use axum::{Router, body::Body, extract::Request, response::Response};
use http_body_util::BodyExt;
use hyper::{StatusCode, header};
use serde_json::Value;

use gantry::{Backend, BackendRegistry, HttpClient, HttpClientAdapter, Pipeline};

/// Spawn a backend that echoes method, path, query, one probe header and
/// the request body as JSON, tagged with `marker`.
async fn spawn_echo_backend(marker: &'static str) -> u16 {
    let app = Router::new().fallback(move |req: Request| async move {
        let (parts, body) = req.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();

        let payload = serde_json::json!({
            "marker": marker,
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "x_probe": parts
                .headers
                .get("x-probe")
                .and_then(|value| value.to_str().ok()),
            "body": String::from_utf8_lossy(&bytes),
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn pipeline_for(backends: Vec<Backend>) -> Pipeline {
    let registry = Arc::new(BackendRegistry::from_backends(backends));
    let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new().unwrap());
    Pipeline::assemble(registry, client, Vec::new())
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn get_through_gateway_reaches_backend_with_tail_path() {
    let port = spawn_echo_backend("echo").await;
    let pipeline = pipeline_for(vec![Backend::new("echo", "127.0.0.1", port).unwrap()]);

    let req = Request::builder()
        .method("GET")
        .uri("/gw/backend/echo/hi")
        .header("x-probe", "carried")
        .body(Body::empty())
        .unwrap();
    let response = pipeline.dispatch(req).await;

    assert_eq!(response.status(), StatusCode::OK);
    let echoed = json_body(response).await;
    assert_eq!(echoed["method"], "GET");
    // The gateway prefix is stripped; the backend sees only the tail.
    assert_eq!(echoed["path"], "/hi");
    assert_eq!(echoed["x_probe"], "carried");
}

#[tokio::test]
async fn post_body_and_query_stream_through() {
    let port = spawn_echo_backend("echo").await;
    let pipeline = pipeline_for(vec![Backend::new("echo", "127.0.0.1", port).unwrap()]);

    let req = Request::builder()
        .method("POST")
        .uri("/gw/backend/echo/v1/items?page=2")
        .body(Body::from("hello backend"))
        .unwrap();
    let response = pipeline.dispatch(req).await;

    assert_eq!(response.status(), StatusCode::OK);
    let echoed = json_body(response).await;
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/v1/items");
    assert_eq!(echoed["query"], "page=2");
    assert_eq!(echoed["body"], "hello backend");
}

#[tokio::test]
async fn unknown_backend_yields_404_with_json_error() {
    let port = spawn_echo_backend("echo").await;
    let pipeline = pipeline_for(vec![Backend::new("echo", "127.0.0.1", port).unwrap()]);

    let req = Request::builder()
        .method("POST")
        .uri("/gw/backend/idontexist/x")
        .body(Body::empty())
        .unwrap();
    let response = pipeline.dispatch(req).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let error = json_body(response).await;
    assert!(!error["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_path_yields_400() {
    let pipeline = pipeline_for(vec![]);

    let req = Request::builder()
        .method("POST")
        .uri("/gw/back")
        .body(Body::empty())
        .unwrap();
    let response = pipeline.dispatch(req).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = json_body(response).await;
    assert!(!error["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_backend_yields_500_generic_error() {
    // Port 1 on loopback refuses connections.
    let pipeline = pipeline_for(vec![Backend::new("dead", "127.0.0.1", 1).unwrap()]);

    let req = Request::builder()
        .uri("/gw/backend/dead/hi")
        .body(Body::empty())
        .unwrap();
    let response = pipeline.dispatch(req).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = json_body(response).await;
    let message = error["error"].as_str().unwrap();
    assert!(!message.is_empty());
    assert!(!message.contains("127.0.0.1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_to_different_backends_do_not_cross() {
    let port_a = spawn_echo_backend("alpha").await;
    let port_b = spawn_echo_backend("beta").await;
    let pipeline = Arc::new(pipeline_for(vec![
        Backend::new("alpha", "127.0.0.1", port_a).unwrap(),
        Backend::new("beta", "127.0.0.1", port_b).unwrap(),
    ]));

    let mut handles = Vec::new();
    for round in 0..8 {
        for (name, marker) in [("alpha", "alpha"), ("beta", "beta")] {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                let req = Request::builder()
                    .uri(format!("/gw/backend/{name}/round/{round}"))
                    .body(Body::empty())
                    .unwrap();
                let response = pipeline.dispatch(req).await;
                assert_eq!(response.status(), StatusCode::OK);
                let echoed = json_body(response).await;
                // The response always comes from the backend this request
                // addressed, never the one running concurrently.
                assert_eq!(echoed["marker"], marker);
                assert_eq!(echoed["path"], format!("/round/{round}"));
            }));
        }
    }

    for handle in handles {
        handle.await.unwrap();
    }
}
