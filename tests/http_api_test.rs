use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    middleware,
    routing::any,
    Router,
};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use window_counter::http::middleware::admission_middleware;
use window_counter::{AdmissionLimiter, CounterServer, ManualClock, ServerConfig, SlidingWindowCounter};

/// 创建测试用的服务器配置（状态文件放在临时目录）
fn test_config(max_concurrent: usize, timeout: Duration) -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        state_file: std::env::temp_dir()
            .join(format!("window-counter-http-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned(),
        max_concurrent_requests: max_concurrent,
        admission_timeout: timeout,
        ..ServerConfig::default()
    }
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn body_to_count(body: &[u8]) -> usize {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_count_increments_per_request() {
    let server = CounterServer::with_zero_state(test_config(5, Duration::from_millis(300)));
    let router = server.router();

    for expected in 1..=3 {
        let (status, body) = send(&router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_to_count(&body), expected);
    }
}

#[tokio::test]
async fn test_any_method_and_path_is_counted() {
    let server = CounterServer::with_zero_state(test_config(5, Duration::from_millis(300)));
    let router = server.router();

    let (status, body) = send(&router, Method::POST, "/").await;
    assert_eq!((status, body_to_count(&body)), (StatusCode::OK, 1));

    let (status, body) = send(&router, Method::DELETE, "/some/other/path").await;
    assert_eq!((status, body_to_count(&body)), (StatusCode::OK, 2));
}

#[tokio::test]
async fn test_response_is_json() {
    let server = CounterServer::with_zero_state(test_config(5, Duration::from_millis(300)));
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = server.router().oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn test_window_eviction_through_http() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let counter = SlidingWindowCounter::with_clock(Duration::from_secs(60), clock.clone());
    let server = CounterServer::with_counter(test_config(5, Duration::from_millis(300)), counter);
    let router = server.router();

    send(&router, Method::GET, "/").await;
    let (_, body) = send(&router, Method::GET, "/").await;
    assert_eq!(body_to_count(&body), 2);

    clock.advance(Duration::from_secs(61));
    let (_, body) = send(&router, Method::GET, "/").await;
    assert_eq!(body_to_count(&body), 1);
}

#[tokio::test]
async fn test_clear_resets_count() {
    let server = CounterServer::with_zero_state(test_config(5, Duration::from_millis(300)));
    let router = server.router();

    send(&router, Method::GET, "/").await;
    send(&router, Method::GET, "/").await;
    server.clear();

    let (_, body) = send(&router, Method::GET, "/").await;
    assert_eq!(body_to_count(&body), 1);
}

/// 处理器阻塞直到 gate 放行，用于制造并发占用
fn blocking_router(limiter: AdmissionLimiter, gate: Arc<Semaphore>) -> Router {
    Router::new()
        .route(
            "/",
            any(move || {
                let gate = gate.clone();
                async move {
                    let _pass = gate.acquire().await;
                    "done"
                }
            }),
        )
        .layer(middleware::from_fn_with_state(limiter, admission_middleware))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_requests_over_capacity_get_503() {
    let limiter = AdmissionLimiter::new(5, Duration::from_millis(300));
    let gate = Arc::new(Semaphore::new(0));
    let router = blocking_router(limiter.clone(), gate.clone());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { send(&router, Method::GET, "/").await.0 })
        })
        .collect();

    // 超出容量的 5 个请求在 300ms 后被拒绝，之后再放行被接纳的请求
    tokio::time::sleep(Duration::from_millis(700)).await;
    gate.add_permits(10);

    let mut ok = 0;
    let mut unavailable = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::SERVICE_UNAVAILABLE => unavailable += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 5);
    assert_eq!(unavailable, 5);
    assert_eq!(limiter.available_permits(), 5);
    assert_eq!(limiter.rejected_total(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_response_has_empty_body() {
    let limiter = AdmissionLimiter::new(1, Duration::from_millis(50));
    let gate = Arc::new(Semaphore::new(0));
    let router = blocking_router(limiter.clone(), gate.clone());

    let holder = {
        let router = router.clone();
        tokio::spawn(async move { send(&router, Method::GET, "/").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, body) = send(&router, Method::GET, "/").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.is_empty());

    gate.add_permits(1);
    assert_eq!(holder.await.unwrap().0, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_set_timeout_changes_rejection_latency() {
    let limiter = AdmissionLimiter::new(1, Duration::from_secs(30));
    let gate = Arc::new(Semaphore::new(0));
    let router = blocking_router(limiter.clone(), gate.clone());

    let holder = {
        let router = router.clone();
        tokio::spawn(async move { send(&router, Method::GET, "/").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    limiter.set_timeout(Duration::from_millis(30));
    let started = std::time::Instant::now();
    let (status, _) = send(&router, Method::GET, "/").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() < Duration::from_secs(5));

    gate.add_permits(1);
    holder.await.unwrap();
}
