//! Tests for the one-shot `POST /api/execute` endpoint and `/health`

use playground_common::{ExecuteRequest, ExecuteResponse};
use playground_tests::common::*;
use serde_json::{json, Value};
use std::time::Duration;

async fn shell_server(timeout: Duration) -> (TestServer, tempfile::TempDir) {
    setup_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&shell_config(dir.path(), timeout))
        .await
        .unwrap();
    (server, dir)
}

async fn execute(server: &TestServer, request: &ExecuteRequest) -> ExecuteResponse {
    let response = reqwest::Client::new()
        .post(server.http_url("/api/execute"))
        .json(request)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_execute_requires_code() {
    let (server, _dir) = shell_server(Duration::from_secs(10)).await;
    let client = reqwest::Client::new();

    for body in [json!({ "code": "" }), json!({})] {
        let response = client
            .post(server.http_url("/api/execute"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "error": "Code is required" }));
    }
}

#[tokio::test]
async fn test_execute_success() {
    let (server, dir) = shell_server(Duration::from_secs(10)).await;

    let response = execute(&server, &ExecuteRequest::new("echo hi")).await;
    assert_eq!(
        response,
        ExecuteResponse {
            output: "hi\n".into(),
            error: None,
        }
    );
    assert_eq!(server.service.registry().len().await, 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_execute_with_input() {
    let (server, _dir) = shell_server(Duration::from_secs(10)).await;

    let request = ExecuteRequest::new("read a\nread b\necho $((a + b))").with_input("2\n3");
    let response = execute(&server, &request).await;
    assert_eq!(response.output, "5\n");
    assert!(response.success());
}

#[tokio::test]
async fn test_execute_missing_input_sees_eof() {
    let (server, _dir) = shell_server(Duration::from_secs(10)).await;

    let response = execute(&server, &ExecuteRequest::new("read x || echo eof")).await;
    assert_eq!(response.output, "eof\n");
}

#[tokio::test]
async fn test_execute_failure_reports_stderr() {
    let (server, _dir) = shell_server(Duration::from_secs(10)).await;

    let response = execute(&server, &ExecuteRequest::new("echo partial\necho bad >&2\nexit 2")).await;
    assert_eq!(response.output, "partial\n");
    assert_eq!(response.error.as_deref(), Some("bad\n"));

    let response = execute(&server, &ExecuteRequest::new("exit 4")).await;
    assert_eq!(response.error.as_deref(), Some("Process exited with code 4"));
}

#[tokio::test]
async fn test_execute_timeout() {
    let (server, _dir) = shell_server(Duration::from_millis(500)).await;

    let response = execute(&server, &ExecuteRequest::new("echo start\nwhile true; do :; done")).await;
    assert_eq!(response.output, "start\n");
    assert!(response.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_health() {
    let (server, _dir) = shell_server(Duration::from_secs(10)).await;

    let body: Value = reqwest::get(server.http_url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["runtime"], "interpreter");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_execute_python() {
    if !python_available() {
        eprintln!("python3 not installed, skipping");
        return;
    }
    setup_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&python_config(dir.path(), Duration::from_secs(10)))
        .await
        .unwrap();

    let request = ExecuteRequest::new("name = input()\nprint(f'Hello, {name}!')").with_input("Ada");
    let response = execute(&server, &request).await;
    assert_eq!(response.output, "Hello, Ada!\n");
    assert!(response.success());
}
