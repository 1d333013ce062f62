//! Integration tests for the engine and its HTTP surface.
//!
//! The external services are deliberately unreachable (port 1), so these
//! tests exercise the degraded paths end to end: collector-offline cycles
//! must still complete with fallback summaries, and reads must never block.

use cadence_engine::{server, CategoryStore, Config, Engine, EngineHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn offline_config(test_name: &str) -> Config {
    let mut config = Config::default();
    config.tracker_port = 1; // nothing listens here
    config.model_port = 1;
    config.min_model_gap_secs = 0;
    config.data_path = std::env::temp_dir().join("cadence-it").join(test_name);
    config
}

async fn spawn_engine(
    test_name: &str,
) -> (SocketAddr, EngineHandle, tokio::sync::oneshot::Sender<()>) {
    let store = Arc::new(CategoryStore::with_defaults());
    let (engine, handle) = Engine::new(offline_config(test_name), store);
    tokio::spawn(engine.run());

    let (addr, shutdown_tx) = server::run(handle.clone(), 0)
        .await
        .expect("Failed to start server");

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, handle, shutdown_tx)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _handle, shutdown_tx) = spawn_engine("health").await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
    assert!(body["instance_id"]
        .as_str()
        .unwrap_or("")
        .starts_with("cadence-"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_state_empty_then_cycle_publishes_fallback() {
    let (addr, _handle, shutdown_tx) = spawn_engine("state-cycle").await;
    let client = reqwest::Client::new();

    // No cycle has completed yet: the cache read returns null.
    let body: serde_json::Value = client
        .get(format!("http://{}/state", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body.is_null());

    // Force a cycle. Both external services are down, so the cycle must
    // still complete: afk classification plus a fallback-tagged summary.
    let summary: serde_json::Value = client
        .post(format!("http://{}/cycle", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["source"], "fallback");
    assert_eq!(summary["state"], "afk");
    assert_eq!(summary["focus_score"], 0.0);
    assert!(summary["text"].as_str().unwrap().contains("away"));

    // The completed cycle is now readable.
    let cached: serde_json::Value = client
        .get(format!("http://{}/state", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cached["text"], summary["text"]);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_cycle_with_explicit_mode() {
    let (addr, _handle, shutdown_tx) = spawn_engine("cycle-mode").await;
    let client = reqwest::Client::new();

    let summary: serde_json::Value = client
        .post(format!("http://{}/cycle", addr))
        .json(&serde_json::json!({ "mode": "ghost" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["mode"], "ghost");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_mode_switch_roundtrip() {
    let (addr, handle, shutdown_tx) = spawn_engine("mode-roundtrip").await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/mode", addr))
        .json(&serde_json::json!({ "mode": "study" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    // The switch lands on the actor's next turn.
    let mut mode = String::new();
    for _ in 0..100 {
        let body: serde_json::Value = client
            .get(format!("http://{}/mode", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        mode = body["mode"].as_str().unwrap_or("").to_string();
        if mode == "study" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(mode, "study");

    // Study is an immediate mode: the forced cycle publishes a summary.
    let mut published = None;
    for _ in 0..100 {
        published = handle.latest_summary().await;
        if published.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let summary = published.expect("immediate mode should publish a summary");
    assert_eq!(summary.mode.as_str(), "study");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_unknown_mode_is_rejected() {
    let (addr, _handle, shutdown_tx) = spawn_engine("mode-invalid").await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/mode", addr))
        .json(&serde_json::json!({ "mode": "hyperdrive" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_bulk_category_update_is_atomic() {
    let (addr, handle, shutdown_tx) = spawn_engine("bulk-atomic").await;
    let client = reqwest::Client::new();
    let before = handle.categories().len().await;

    // One record in the batch is invalid (score 150): nothing may apply.
    let response = client
        .post(format!("http://{}/categories/bulk", addr))
        .json(&serde_json::json!([
            { "app_name": "alpha", "category": "work", "productivity_score": 80 },
            { "app_name": "beta", "category": "entertainment", "productivity_score": 150 }
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION");

    assert_eq!(handle.categories().len().await, before);
    assert_eq!(
        handle.categories().lookup("alpha").await.category,
        "uncategorized"
    );

    // A fully valid batch applies in one shot.
    let response = client
        .post(format!("http://{}/categories/bulk", addr))
        .json(&serde_json::json!([
            { "app_name": "alpha", "category": "work", "productivity_score": 80 },
            { "app_name": "beta", "category": "entertainment", "productivity_score": 15 }
        ]))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["applied"], 2);
    assert_eq!(handle.categories().len().await, before + 2);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_single_category_update_and_listing() {
    let (addr, _handle, shutdown_tx) = spawn_engine("category-single").await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/categories", addr))
        .json(&serde_json::json!({
            "app_name": "krita",
            "category": "work",
            "subcategory": "design",
            "productivity_score": 85
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let records: serde_json::Value = client
        .get(format!("http://{}/categories", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let found = records
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["app_name"] == "krita")
        .expect("krita should be listed");
    assert_eq!(found["category"], "work");
    assert_eq!(found["productivity_score"], 85);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_daily_cycle_falls_back_offline() {
    let (addr, _handle, shutdown_tx) = spawn_engine("daily").await;
    let client = reqwest::Client::new();

    let summary: serde_json::Value = client
        .post(format!("http://{}/cycle/daily", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["source"], "fallback");
    assert_eq!(summary["text"], "No recorded activity today.");

    let cached: serde_json::Value = client
        .get(format!("http://{}/state/daily", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cached["text"], summary["text"]);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_status_reports_offline_services() {
    let (addr, _handle, shutdown_tx) = spawn_engine("status").await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("http://{}/status", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["tracker"], false);
    assert_eq!(body["model"], false);

    let _ = shutdown_tx.send(());
}
