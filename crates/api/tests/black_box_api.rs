use std::sync::Arc;
use std::time::Duration;

use docket_api::app::services::{embedded_runtime, AppServices};
use docket_infra::blob::InMemoryBlobStore;
use docket_infra::jobs::{InMemoryJobStore, WorkerConfig, WorkerHandle};
use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _worker: Option<WorkerHandle>,
}

impl TestServer {
    /// Server without a worker: jobs stay where the test puts them.
    async fn spawn() -> Self {
        let services = Arc::new(AppServices::new(InMemoryJobStore::arc()));
        Self::serve(services, None).await
    }

    /// Server with an embedded worker polling every few milliseconds.
    async fn spawn_with_worker() -> Self {
        let runtime = embedded_runtime(
            InMemoryJobStore::arc(),
            InMemoryBlobStore::arc(),
            WorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
        );
        Self::serve(runtime.services, runtime.worker).await
    }

    async fn serve(services: Arc<AppServices>, worker: Option<WorkerHandle>) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = docket_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _worker: worker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn enqueue(client: &reqwest::Client, srv: &TestServer, body: JsonValue) -> i64 {
    let res = client.post(srv.url("/jobs")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: JsonValue = res.json().await.unwrap();
    assert_eq!(created["status"], "queued");
    created["id"].as_i64().unwrap()
}

async fn get_job(client: &reqwest::Client, srv: &TestServer, id: i64) -> JsonValue {
    let res = client.get(srv.url(&format!("/jobs/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn wait_for_status(
    client: &reqwest::Client,
    srv: &TestServer,
    id: i64,
    status: &str,
) -> JsonValue {
    // Execution is asynchronous; poll briefly until the worker catches up.
    for _ in 0..200 {
        let job = get_job(client, srv, id).await;
        if job["status"] == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach {status} within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let minted = res.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(minted).is_ok());

    let second = reqwest::get(srv.url("/health")).await.unwrap();
    assert_ne!(second.headers()["x-request-id"].to_str().unwrap(), minted);

    let echoed = reqwest::Client::new()
        .get(srv.url("/health"))
        .header("x-request-id", "trace-42")
        .send()
        .await
        .unwrap();
    assert_eq!(echoed.headers()["x-request-id"], "trace-42");
}

#[tokio::test]
async fn enqueued_job_is_executed_by_embedded_worker() {
    let srv = TestServer::spawn_with_worker().await;
    let client = reqwest::Client::new();

    let id = enqueue(&client, &srv, json!({"type": "totally-unknown"})).await;
    let job = wait_for_status(&client, &srv, id, "succeeded").await;

    assert_eq!(job["attempts"], 1);
    assert_eq!(job["result"], json!({"message": "unknown job type"}));
    assert_eq!(job["error"], JsonValue::Null);
}

#[tokio::test]
async fn invalid_payload_is_retried_then_failed() {
    let srv = TestServer::spawn_with_worker().await;
    let client = reqwest::Client::new();

    let id = enqueue(
        &client,
        &srv,
        json!({"type": "validate-conflicts", "payload": {"rows": 7}, "maxAttempts": 2}),
    )
    .await;
    let job = wait_for_status(&client, &srv, id, "failed").await;

    assert_eq!(job["attempts"], 2);
    assert!(job["error"].as_str().unwrap().contains("validate-conflicts"));
}

#[tokio::test]
async fn create_validation_errors_use_the_envelope() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for body in [
        json!({}),
        json!({"type": "   "}),
        json!({"type": "publish", "maxAttempts": 0}),
    ] {
        let res = client.post(srv.url("/jobs")).json(&body).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {body}");
        let err: JsonValue = res.json().await.unwrap();
        assert_eq!(err["error"], "validation_error");
        assert!(!err["message"].as_str().unwrap().is_empty());
    }

    let res = client
        .post(srv.url("/jobs"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_filters_pages_and_truncates() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let big = "A".repeat(4_096);
    let first = enqueue(&client, &srv, json!({"type": "upload-file", "payload": {"fileBase64": big}})).await;
    for _ in 0..3 {
        enqueue(&client, &srv, json!({"type": "publish"})).await;
    }

    let page: JsonValue = client
        .get(srv.url("/jobs?type=publish&limit=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["offset"], 0);
    assert_eq!(page["jobs"].as_array().unwrap().len(), 2);

    let page: JsonValue = client
        .get(srv.url("/jobs?status=queued&offset=3"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // Newest first, so the oldest job is last.
    let jobs = page["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], first);
    assert_eq!(jobs[0]["payload"]["truncated"], true);

    // The full record is never truncated.
    let full = get_job(&client, &srv, first).await;
    assert_eq!(full["payload"]["fileBase64"].as_str().unwrap().len(), 4_096);

    let res = client.get(srv.url("/jobs?status=paused")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_and_retry_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let id = enqueue(&client, &srv, json!({"type": "publish"})).await;

    let res = client
        .post(srv.url(&format!("/jobs/{id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: JsonValue = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "failed");
    assert_eq!(cancelled["error"], "cancelled");

    let res = client
        .post(srv.url(&format!("/jobs/{id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let err: JsonValue = res.json().await.unwrap();
    assert_eq!(err["error"], "already_terminal");

    let res = client
        .post(srv.url(&format!("/jobs/{id}/retry")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let retried: JsonValue = res.json().await.unwrap();
    assert_eq!(retried["status"], "queued");
    assert_eq!(retried["error"], JsonValue::Null);
    assert_eq!(retried["attempts"], 0);

    let stats: JsonValue = client
        .get(srv.url("/jobs/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["queued"], 1);
    assert_eq!(stats["total"], 1);
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/jobs/999", "/jobs/999/retry", "/jobs/999/cancel"] {
        let req = if path.ends_with("999") {
            client.get(srv.url(path))
        } else {
            client.post(srv.url(path))
        };
        let res = req.send().await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
        let err: JsonValue = res.json().await.unwrap();
        assert_eq!(err["error"], "not_found");
    }

    let res = client.get(srv.url("/jobs/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
