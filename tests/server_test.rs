//! Integration tests for the dashboard HTTP API

#[cfg(feature = "server")]
mod server_tests {
    use stampede_shield::config::EngineConfig;
    use stampede_shield::engine::Engine;
    use stampede_shield::runtime::{EngineHandle, RuntimeOptions};
    use stampede_shield::server::{run, ServerConfig};
    use stampede_shield::stats::create_shared_stats;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn spawn_engine() -> EngineHandle {
        let config = EngineConfig {
            tick_interval: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        EngineHandle::spawn(
            Engine::new(config).expect("Invalid engine config"),
            RuntimeOptions {
                queue_capacity: 64,
                stats: create_shared_stats(),
                broadcaster: None,
                baseline_path: None,
            },
        )
        .expect("Failed to spawn engine")
    }

    async fn start(handle: &EngineHandle) -> (SocketAddr, oneshot::Sender<()>) {
        let (addr, shutdown_tx) = run(ServerConfig::localhost(0), handle.client())
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

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

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_snapshot_endpoint() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

        let client = reqwest::Client::new();
        let body: serde_json::Value = client
            .get(format!("http://{}/api/snapshot", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["alert"]["level"], "SAFE");
        assert_eq!(body["producer"]["name"], "stampede-shield");
        assert_eq!(body["zones"]["CENTER"]["status"], "OFFLINE");
        assert!(body["timeline"]["30s"].is_string());
        assert!(body["sequence"].as_u64().unwrap_or(0) >= 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ingest_reading_reaches_snapshot() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/api/ingest", addr))
            .header("Content-Type", "application/json")
            .body(r#"{"id":"NODE_B","dist":250.0,"pir":0}"#)
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        // wait for a few ticks
        tokio::time::sleep(Duration::from_millis(200)).await;

        let body: serde_json::Value = client
            .get(format!("http://{}/api/snapshot", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["nodes"]["NODE_B"]["online"], true);
        assert_eq!(body["zones"]["EXIT"]["online"], true);

        let stats: serde_json::Value = client
            .get(format!("http://{}/api/stats", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(stats["readings_accepted"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_malformed_ingest_rejected() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/api/ingest", addr))
            .body("{not json")
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "MALFORMED_MESSAGE");
        assert_eq!(handle.client().stats().stats().malformed, 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_calibrate_without_samples_fails() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/api/calibrate", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "CALIBRATION_FAILED");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_calibrate_with_quiet_samples() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

        let client = reqwest::Client::new();
        for _ in 0..5 {
            let response = client
                .post(format!("http://{}/api/ingest", addr))
                .body(r#"{"id":"NODE_C","dist":380.0,"pir":0,"mic":120.0}"#)
                .send()
                .await
                .expect("Failed to send request");
            assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let response = client
            .post(format!("http://{}/api/calibrate", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "success");
        let baseline = body["baseline"]["audio_baseline"].as_f64().unwrap_or(-1.0);
        assert!((baseline - 120.0).abs() < 1e-9);
        assert_eq!(body["baseline"]["sample_count"], 5);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let handle = spawn_engine();
        let (addr, shutdown_tx) = start(&handle).await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/api/snapshot", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
