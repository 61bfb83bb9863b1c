//! Integration tests for the job HTTP API.
//!
//! Each test spins up an Axum server on a random port with a stub processor
//! and drives it over real HTTP with reqwest.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use media_jobs::api::job_routes;
use media_jobs::config::{RateLimitConfig, SchedulerConfig, ServiceConfig};
use media_jobs::error::ProcessError;
use media_jobs::jobs::Job;
use media_jobs::service::JobService;
use media_jobs::sweeper::Sweeper;
use media_jobs::worker::{Processor, ProgressReporter};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes `out-<suffix>.bin` once the test hands it a permit.
struct StubProcessor {
    dir: PathBuf,
    permits: Semaphore,
}

#[async_trait]
impl Processor for StubProcessor {
    async fn process(&self, job: &Job, progress: ProgressReporter) -> Result<PathBuf, ProcessError> {
        progress.report(10, Some("waiting"));
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?;
        permit.forget();

        progress.report(50, Some("converting"));
        let suffix = job.source.rsplit('-').next().unwrap_or("x");
        let path = self.dir.join(format!("out-{suffix}.bin"));
        tokio::fs::write(&path, format!("audio for {}", job.source)).await?;
        Ok(path)
    }
}

struct TestServer {
    base: String,
    processor: Arc<StubProcessor>,
    _dir: tempfile::TempDir,
}

/// Start an Axum server on a random port with one worker.
async fn start_server(max_requests: usize) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let processor = Arc::new(StubProcessor {
        dir: dir.path().to_path_buf(),
        permits: Semaphore::new(0),
    });
    let config = ServiceConfig {
        data_dir: dir.path().to_path_buf(),
        scheduler: SchedulerConfig {
            concurrency: 1,
            job_timeout: None,
        },
        rate_limit: RateLimitConfig {
            window: Duration::from_secs(600),
            max_requests,
        },
        ..ServiceConfig::default()
    };
    let service = Arc::new(JobService::start(&config, processor.clone()));
    let app = job_routes(service, &config.cors_origins);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        processor,
        _dir: dir,
    }
}

async fn submit(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{base}/api/jobs"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn status(client: &reqwest::Client, base: &str, job_id: &str) -> Value {
    client
        .get(format!("{base}/api/jobs/{job_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn wait_terminal(client: &reqwest::Client, base: &str, job_id: &str) -> Value {
    loop {
        let body = status(client, base, job_id).await;
        if matches!(body["status"].as_str(), Some("done" | "error")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn job_moves_from_queued_to_done_and_downloads() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(5).await;
        let client = reqwest::Client::new();

        // The single worker is busy with the first job, so the second waits.
        let first = submit(&client, &server.base, json!({"url": "https://example.com/ref-A"})).await;
        assert_eq!(first.status(), 200);
        let first_id = first.json::<Value>().await.unwrap()["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let second = submit(
            &client,
            &server.base,
            json!({"url": "https://example.com/ref-B", "bitrate": 320, "title": "B"}),
        )
        .await;
        let second_id = second.json::<Value>().await.unwrap()["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let queued = status(&client, &server.base, &second_id).await;
        assert_eq!(queued["status"], "queued");
        assert_eq!(queued["progress"], 0);
        assert!(queued["download_url"].is_null());

        server.processor.permits.add_permits(2);

        let done = wait_terminal(&client, &server.base, &first_id).await;
        assert_eq!(done["status"], "done");
        assert_eq!(done["progress"], 100);
        assert_eq!(done["message"], "completed");
        let download_url = done["download_url"].as_str().unwrap().to_string();
        assert_eq!(download_url, format!("/api/download/{first_id}"));

        let response = client
            .get(format!("{}{download_url}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "audio/mpeg");
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"out-A.bin\""
        );
        let expected = "audio for https://example.com/ref-A";
        assert_eq!(
            response.headers()["content-length"],
            expected.len().to_string().as_str()
        );
        assert_eq!(response.text().await.unwrap(), expected);

        let done = wait_terminal(&client, &server.base, &second_id).await;
        assert_eq!(done["status"], "done");

        let health: Value = client
            .get(format!("{}/api/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["ok"], true);
        assert_eq!(health["jobs"]["total"], 2);
        assert_eq!(health["jobs"]["done"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn swept_artifact_is_no_longer_served() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(5).await;
        let client = reqwest::Client::new();
        server.processor.permits.add_permits(1);

        let response = submit(&client, &server.base, json!({"url": "https://example.com/ref-C"})).await;
        let job_id = response.json::<Value>().await.unwrap()["job_id"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(wait_terminal(&client, &server.base, &job_id).await["status"], "done");

        let sweeper = Sweeper::new(server.processor.dir.clone(), Duration::from_secs(3600));
        let report = sweeper
            .sweep_at(SystemTime::now() + Duration::from_secs(2 * 3600))
            .await;
        assert_eq!(report.removed, 1);

        // The job still reports done; only the file is gone.
        assert_eq!(status(&client, &server.base, &job_id).await["status"], "done");
        let response = client
            .get(format!("{}/api/download/{job_id}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "NOT_READY");
    })
    .await
    .expect("test timed out");
}

// ── Admission ────────────────────────────────────────────────────────

#[tokio::test]
async fn client_over_the_limit_gets_429() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(2).await;
        let client = reqwest::Client::new();

        for n in 0..2 {
            let response = submit(
                &client,
                &server.base,
                json!({"url": format!("https://example.com/ref-{n}")}),
            )
            .await;
            assert_eq!(response.status(), 200);
        }

        let response = submit(&client, &server.base, json!({"url": "https://example.com/ref-9"})).await;
        assert_eq!(response.status(), 429);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "RATE_LIMITED");

        let health: Value = client
            .get(format!("{}/api/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["jobs"]["total"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(10).await;
        let client = reqwest::Client::new();

        let response = submit(&client, &server.base, json!({"url": "https://www.spotify.com/track/1"})).await;
        assert_eq!(response.status(), 400);
        assert_eq!(response.json::<Value>().await.unwrap()["error"]["code"], "INVALID_URL");

        let response = submit(
            &client,
            &server.base,
            json!({"url": "https://example.com/v", "bitrate": 100}),
        )
        .await;
        assert_eq!(response.status(), 400);
        assert_eq!(response.json::<Value>().await.unwrap()["error"]["code"], "INVALID_BITRATE");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_ids_are_404() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(5).await;
        let client = reqwest::Client::new();
        let id = uuid::Uuid::new_v4();

        let response = client
            .get(format!("{}/api/jobs/{id}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(response.json::<Value>().await.unwrap()["error"]["code"], "NOT_FOUND");

        let response = client
            .get(format!("{}/api/download/{id}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(response.json::<Value>().await.unwrap()["error"]["code"], "NOT_READY");
    })
    .await
    .expect("test timed out");
}
