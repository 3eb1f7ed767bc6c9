mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::ScriptedDevice;
use home_exporter::api::{create_router, AppState};
use home_exporter::overview::Overview;
use home_exporter::{Category, DeviceRegistry, Scheduler, SharedSnapshot, Snapshot};
use std::sync::Arc;

const OVERVIEW: &str = r#"
tables:
  - title: Climate & Power
    metrics:
      - name: home_temperature
        header: Temperature
      - name: home_power
        header: Power
    group:
      - name: room
        header: Room
"#;

fn registry() -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    registry.add(Arc::new(
        ScriptedDevice::new("sensor", "home_temperature", Category::Temperature, 10)
            .then_always(Some(21.5)),
    ));
    registry.add(Arc::new(
        ScriptedDevice::new("plug", "home_power", Category::Power, 10).then_always(Some(80.0)),
    ));
    registry
}

fn server(registry: DeviceRegistry, snapshot: SharedSnapshot) -> TestServer {
    let overview: Overview = serde_yaml::from_str(OVERVIEW).unwrap();
    let app = create_router(AppState::new(snapshot, Arc::new(registry), overview));
    TestServer::new(app).unwrap()
}

/// Poll every device once.
async fn poll_all(registry: &DeviceRegistry, snapshot: &SharedSnapshot) {
    let mut scheduler = Scheduler::new(registry, Arc::clone(snapshot));
    for _ in 0..registry.len() {
        scheduler.poll_next().await.unwrap();
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = server(DeviceRegistry::new(), Snapshot::shared(0));

    let response = server.get("/health").await;
    response.assert_status(StatusCode::OK);
    response.assert_text("OK");
}

#[tokio::test]
async fn test_metrics_empty_before_first_poll() {
    let registry = registry();
    let snapshot = Snapshot::shared(registry.len());
    let server = server(registry, snapshot);

    let response = server.get("/metrics").await;
    response.assert_status(StatusCode::OK);
    assert!(!response.text().contains("home_temperature"));
}

#[tokio::test(start_paused = true)]
async fn test_metrics_after_poll() {
    let registry = registry();
    let snapshot = Snapshot::shared(registry.len());
    poll_all(&registry, &snapshot).await;
    let server = server(registry, snapshot);

    let response = server.get("/metrics").await;
    response.assert_status(StatusCode::OK);
    let text = response.text();
    assert!(text.contains("# TYPE home_temperature gauge"));
    assert!(text.contains("# TYPE home_power gauge"));
    let line = text
        .lines()
        .find(|l| l.starts_with("home_power{"))
        .unwrap();
    assert!(line.contains("name=\"plug-name\""));
    assert!(line.ends_with(" 80"));
}

#[tokio::test]
async fn test_overview_before_first_poll_has_empty_cells() {
    let registry = registry();
    let snapshot = Snapshot::shared(registry.len());
    let server = server(registry, snapshot);

    let response = server.get("/").await;
    response.assert_status(StatusCode::OK);
    let html = response.text();
    assert!(html.contains("<h2>Climate &amp; Power</h2>"));
    assert!(!html.contains("°C"));

    server.get("/index.html").await.assert_status(StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_overview_and_details_after_poll() {
    let registry = registry();
    let snapshot = Snapshot::shared(registry.len());
    poll_all(&registry, &snapshot).await;
    let server = server(registry, snapshot);

    let html = server.get("/index.html").await.text();
    assert!(html.contains("21.50 °C"));
    assert!(html.contains("80.00 W"));
    assert!(!html.contains("<th>Device"));

    let details = server.get("/details.html").await.text();
    assert!(details.contains("<th>Device"));
    assert!(details.contains("sensor"));
}
