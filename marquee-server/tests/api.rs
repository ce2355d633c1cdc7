//! Route adapter tests: handlers build payloads, call the pool/spawner, and
//! map settled outcomes onto HTTP statuses. Runners here are scripted fakes;
//! no network is involved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};
use tower::ServiceExt;

use marquee_core::{JobKind, JobRegistry, JobRunner, PoolConfig, Spawner, WorkerPool};
use marquee_server::{ledger::SeenLedger, routes::router, state::AppState};

#[derive(Clone, Copy)]
enum Mode {
    Echo,
    Hang,
    Panic,
}

struct BehaviorRunner {
    mode: Mode,
    delay: Duration,
}

#[async_trait]
impl JobRunner for BehaviorRunner {
    async fn run(&self, payload: Value) -> anyhow::Result<Value> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.mode {
            Mode::Echo => Ok(payload),
            Mode::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }
            Mode::Panic => panic!("scripted panic"),
        }
    }
}

fn test_state(pool_mode: Mode, pool_deadline_ms: u64, spawn_delay: Duration) -> AppState {
    let pool_runner = Arc::new(BehaviorRunner {
        mode: pool_mode,
        delay: Duration::ZERO,
    });
    let spawn_runner = Arc::new(BehaviorRunner {
        mode: Mode::Echo,
        delay: spawn_delay,
    });
    let registry = JobRegistry::builder()
        .register(JobKind::StreamSources, spawn_runner.clone())
        .register(JobKind::SourceProbe, spawn_runner)
        .build()
        .expect("complete registry");

    AppState {
        pool: Arc::new(WorkerPool::new(
            PoolConfig {
                size: 1,
                task_deadline_ms: pool_deadline_ms,
                max_queue_wait_ms: None,
            },
            pool_runner,
        )),
        spawner: Arc::new(Spawner::new(registry, Duration::from_secs(5))),
        ledger: SeenLedger::default(),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn stream_sources_settle_as_json() {
    let app = router(test_state(Mode::Echo, 5_000, Duration::ZERO));

    let response = app
        .oneshot(get("/watch/42/sources"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["tmdb_id"], 42);
}

#[tokio::test]
async fn task_timeout_maps_to_gateway_timeout() {
    let app = router(test_state(Mode::Hang, 80, Duration::ZERO));

    let response = app
        .oneshot(get("/watch/42/sources"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], 504);
}

#[tokio::test]
async fn worker_crash_maps_to_bad_gateway() {
    let app = router(test_state(Mode::Panic, 5_000, Duration::ZERO));

    let response = app
        .oneshot(get("/watch/42/sources"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn one_off_jobs_run_on_an_ephemeral_worker() {
    let app = router(test_state(Mode::Echo, 5_000, Duration::ZERO));

    let response = app
        .oneshot(post_json(
            "/admin/jobs",
            json!({"kind": "source_probe", "data": {"url": "http://upstream.example/"}}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["kind"], "source_probe");
    assert_eq!(body["result"]["url"], "http://upstream.example/");
}

#[tokio::test]
async fn duplicate_one_off_jobs_are_rejected_while_in_flight() {
    let app = router(test_state(Mode::Echo, 5_000, Duration::from_millis(150)));
    let request = json!({"kind": "source_probe", "data": {"url": "http://upstream.example/"}});

    let (first, second) = tokio::join!(
        app.clone().oneshot(post_json("/admin/jobs", request.clone())),
        app.clone().oneshot(post_json("/admin/jobs", request.clone())),
    );
    let mut statuses = [
        first.expect("response").status(),
        second.expect("response").status(),
    ];
    statuses.sort();

    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn health_reports_the_pool_snapshot() {
    let app = router(test_state(Mode::Echo, 5_000, Duration::ZERO));

    let response = app.oneshot(get("/health")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pool"]["size"], 1);
    assert_eq!(body["pool"]["queued"], 0);
}
