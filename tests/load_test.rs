//! Load testing for the timeout layer.
//!
//! Fast and slow requests are interleaved so commits and fallbacks race on
//! the same pooled buffers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::Path, routing::get, Router};
use handler_timeout::timeout::{BufferPool, TimeoutLayer, TimeoutOptions};

mod common;

const FALLBACK: &str = "deadline";

fn app(pool: Arc<BufferPool>) -> Router {
    let options = TimeoutOptions::builder()
        .timeout(Duration::from_millis(300))
        .default_msg(FALLBACK)
        .build();

    Router::new()
        .route(
            "/fast/{id}",
            get(|Path(id): Path<u32>| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                format!("fast-{}", id)
            }),
        )
        .route(
            "/slow/{id}",
            get(|Path(id): Path<u32>| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                format!("slow-{}", id)
            }),
        )
        .layer(TimeoutLayer::with_pool(options, pool))
}

#[tokio::test]
async fn test_mixed_load_never_mixes_responses() {
    let pool = Arc::new(BufferPool::new());
    let server = common::serve_router(app(pool.clone())).await;

    let concurrency = 20;
    let requests_per_task = 10;
    let total_requests = concurrency * requests_per_task;

    let client = common::client();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task in 0..concurrency {
        let client = client.clone();
        let base = server.url("");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for n in 0..requests_per_task {
                let id = task * requests_per_task + n;
                let slow = id % 4 == 0;
                let url = if slow {
                    format!("{}/slow/{}", base, id)
                } else {
                    format!("{}/fast/{}", base, id)
                };

                let req_start = Instant::now();
                let res = client.get(&url).send().await.unwrap();
                let status = res.status();
                let body = res.text().await.unwrap();
                latencies.push(req_start.elapsed());

                if slow {
                    assert_eq!(status, 503, "request {}", id);
                    assert_eq!(body, FALLBACK, "request {}", id);
                } else {
                    assert_eq!(status, 200, "request {}", id);
                    assert_eq!(body, format!("fast-{}", id));
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    all_latencies.sort();
    assert_eq!(all_latencies.len(), total_requests as usize);
    let p50 = all_latencies[all_latencies.len() / 2];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P99 Latency:    {:?}", p99);
    println!("Idle buffers:   {}", pool.idle_count());
    println!("-------------------------\n");

    // Slow handlers never outlive the deadline from the client's view.
    assert!(all_latencies[all_latencies.len() - 1] < Duration::from_millis(900));
    // Committed requests hand their buffers back.
    assert!(pool.idle_count() > 0);
    assert!(pool.idle_count() <= concurrency as usize);
}
