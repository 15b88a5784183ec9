//! End-to-end HTTP tests against a live server on an ephemeral port.

use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tickd::config::AppConfig;
use tickd::server::create_app;

const SCHEDULE: &str = r#"
jobs:
  hello:
    command: [echo, world]
    env:
      API_TOKEN: hunter2
  fail:
    command: [sh, -c, "exit 2"]
  nightly:
    cron: "0 3 * * *"
    command: [echo, night]
"#;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    cancel: CancellationToken,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let schedule_path = dir.path().join("schedule.yaml");
    std::fs::write(&schedule_path, SCHEDULE).unwrap();

    let config = AppConfig {
        schedule_path,
        db_path: dir.path().join("tickd.db"),
        host: "127.0.0.1".to_string(),
        port: 0,
        suppress_logs: true,
    };

    let cancel = CancellationToken::new();
    let (app, scheduler) = create_app(config, cancel.clone()).await.unwrap();
    tokio::spawn(async move { scheduler.run().await });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let server = TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        cancel,
        _dir: dir,
    };

    // Wait until the listener answers.
    for _ in 0..50 {
        if let Ok(resp) = server
            .client
            .get(format!("{}/health", server.base_url))
            .send()
            .await
        {
            if resp.status().is_success() {
                return server;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("API did not become healthy in time");
}

#[tokio::test]
async fn test_health() {
    let server = start_server().await;
    let body: Value = server
        .client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_schedule_lists_jobs_and_masks_secrets() {
    let server = start_server().await;
    let resp = server
        .client
        .get(format!("{}/schedule", server.base_url))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let text = resp.text().await.unwrap();
    assert!(text.contains("hello"));
    assert!(text.contains("nightly"));
    assert!(text.contains("***"));
    assert!(!text.contains("hunter2"));

    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["jobs"]["hello"]["command"][0], "echo");
    // Cron jobs expose their next firing.
    assert!(body["jobs"]["nightly"]["next_tick"].is_string());
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let server = start_server().await;
    let resp = server
        .client
        .get(format!("{}/jobs/ghost", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_manual_trigger_returns_completed_run() {
    let server = start_server().await;
    let run: Value = server
        .client
        .post(format!("{}/jobs/hello/trigger", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(run["status"], 0);
    assert_eq!(run["triggered_by"], "manual");
    assert!(run["log"].as_str().unwrap().contains("world"));

    // The run is visible in the job detail afterwards.
    let detail: Value = server
        .client
        .get(format!("{}/jobs/hello", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["runs"].as_array().unwrap().len(), 1);
    assert!(detail["yaml"].as_str().unwrap().contains("command"));
}

#[tokio::test]
async fn test_get_run_by_id_and_latest() {
    let server = start_server().await;
    let run: Value = server
        .client
        .post(format!("{}/jobs/fail/trigger", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["status"], 2);
    let id = run["id"].as_i64().unwrap();

    let by_id: Value = server
        .client
        .get(format!("{}/jobs/fail/runs/{id}", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_id["status"], 2);
    assert!(by_id["log"].as_str().unwrap().contains("Exit code: 2"));

    let latest: Value = server
        .client
        .get(format!("{}/jobs/fail/runs/latest", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["id"], id);

    // Malformed id is a 400, unknown id a 404.
    let bad = server
        .client
        .get(format!("{}/jobs/fail/runs/abc", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let missing = server
        .client
        .get(format!("{}/jobs/fail/runs/99999", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_log_tailing_with_cursor() {
    let server = start_server().await;
    server
        .client
        .post(format!("{}/jobs/hello/trigger", server.base_url))
        .send()
        .await
        .unwrap();

    let body: Value = server
        .client
        .get(format!(
            "{}/jobs/hello/runs/latest/logs?after=0",
            server.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let lines = body["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["line_number"], 1);
    assert_eq!(lines[0]["content"], "world");
    assert_eq!(lines[0]["stream"], "stdout");

    // Cursor past the end yields nothing new.
    let tail: Value = server
        .client
        .get(format!(
            "{}/jobs/hello/runs/latest/logs?after=1",
            server.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(tail["lines"].as_array().unwrap().is_empty());

    // Malformed cursor is a 400.
    let bad = server
        .client
        .get(format!(
            "{}/jobs/hello/runs/latest/logs?after=abc",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn test_ui_is_served_at_root() {
    let server = start_server().await;
    let resp = server
        .client
        .get(format!("{}/", server.base_url))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let text = resp.text().await.unwrap();
    assert!(text.contains("<!doctype html>"));
    assert!(text.contains("tickd"));
}
