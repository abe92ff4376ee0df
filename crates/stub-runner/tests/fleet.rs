//! End to end tests: stubs resolved from disk and served over real sockets.

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stub_runner::{
    FleetState, HttpStubTransport, LocalRepositoryResolver, MappingBundle, ServerContext,
    StubConfigurer, StubCoordinate, StubResolver, StubRunner, StubRunnerError, StubRunnerOptions,
};

fn write_mapping(dir: &Path, relative: &str, mapping: serde_json::Value) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(&mapping).unwrap()).unwrap();
}

/// A repository with one producer that has shared and consumer scoped mappings.
fn producer_repository(root: &Path) {
    let stubs = root.join("com.example/orders/1.2.0/stubs");
    write_mapping(
        &stubs,
        "health.json",
        json!({
            "request": {"method": "GET", "url": "/health"},
            "response": {"status": 200, "body": "UP"}
        }),
    );
    write_mapping(
        &stubs,
        "baz-service/orders.json",
        json!({
            "request": {"method": "GET", "urlPath": "/orders"},
            "response": {"status": 200, "jsonBody": {"orders": ["baz"]}}
        }),
    );
    write_mapping(
        &stubs,
        "bar-service/orders.json",
        json!({
            "request": {"method": "GET", "urlPath": "/orders"},
            "response": {"status": 200, "jsonBody": {"orders": ["bar"]}}
        }),
    );

    let billing = root.join("com.example/billing/0.9.0/stubs");
    write_mapping(
        &billing,
        "invoice.json",
        json!({
            "request": {"method": "POST", "urlPath": "/invoices", "body": {"amount": 10}},
            "response": {"status": 201, "headers": {"Location": "/invoices/1"}}
        }),
    );
}

fn options(min_port: u16, max_port: u16) -> StubRunnerOptions {
    StubRunnerOptions {
        min_port,
        max_port,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fleet_serves_consumer_scoped_stubs_and_cleans_up() {
    let repo = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    producer_repository(repo.path());

    let options = StubRunnerOptions {
        stubs_per_consumer: true,
        consumer_name: Some("baz-service".to_string()),
        ..options(41000, 41999)
    };
    let coordinates = vec![
        "com.example:orders".parse::<StubCoordinate>().unwrap(),
        StubCoordinate::new("", "billing").with_version("0.9.0"),
    ];
    let work_dir = work.path().join("run");
    let resolution = LocalRepositoryResolver::new(repo.path())
        .with_work_dir(&work_dir)
        .resolve(&coordinates)
        .unwrap();
    assert_eq!(resolution.stubs.len(), 2);

    let runner = StubRunner::new(options, Arc::new(HttpStubTransport::new()))
        .unwrap()
        .with_storage(resolution.storage.clone().unwrap());
    let registry = runner.start(resolution.stubs).await.unwrap();
    assert_eq!(runner.state(), FleetState::Running);
    assert_eq!(registry.len(), 2);

    let orders = registry.url_of("orders").unwrap();
    let health = reqwest::get(format!("{orders}/health")).await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "UP");

    let scoped: serde_json::Value = reqwest::get(format!("{orders}/orders?page=2"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scoped, json!({"orders": ["baz"]}));

    let billing = registry.url_of("com.example:billing").unwrap();
    let created = reqwest::Client::new()
        .post(format!("{billing}/invoices"))
        .json(&json!({"amount": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    assert_eq!(created.headers()["location"], "/invoices/1");

    let missing = reqwest::get(format!("{billing}/invoices")).await.unwrap();
    assert_eq!(missing.status(), 404);

    let report = runner.stop().await;
    assert!(report.is_clean());
    assert_eq!(report.stopped, 2);
    assert!(registry.is_empty());
    assert!(reqwest::get(format!("{orders}/health")).await.is_err());
    assert!(!work_dir.exists());
    assert_eq!(runner.allocator().allocated_count(), 0);
}

#[tokio::test]
async fn test_occupied_pinned_port_fails_fleet_and_releases_everything() {
    let repo = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    producer_repository(repo.path());

    let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = blocker.local_addr().unwrap().port();

    let coordinates = vec![
        "com.example:orders".parse::<StubCoordinate>().unwrap(),
        format!("com.example:billing:0.9.0:stubs:{taken}")
            .parse::<StubCoordinate>()
            .unwrap(),
    ];
    let resolution = LocalRepositoryResolver::new(repo.path())
        .with_work_dir(work.path())
        .resolve(&coordinates)
        .unwrap();

    let runner =
        StubRunner::new(options(42000, 42999), Arc::new(HttpStubTransport::new())).unwrap();
    let err = runner.start(resolution.stubs).await.unwrap_err();
    match err {
        StubRunnerError::FleetStart { failures, rollback } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].coordinate().contains("billing"));
            assert!(rollback.is_empty());
        }
        other => panic!("expected a fleet start failure, got {other}"),
    }
    assert_eq!(runner.state(), FleetState::Failed);
    assert!(runner.registry().is_empty());
    assert_eq!(runner.allocator().allocated_count(), 0);

    // Stopping a failed fleet is a no-op
    assert_eq!(runner.stop().await.stopped, 0);
}

#[tokio::test]
async fn test_rolled_back_group_frees_its_socket() {
    let repo = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    producer_repository(repo.path());

    let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = blocker.local_addr().unwrap().port();

    // orders can only land on 44000 and is stopped again once billing fails
    let coordinates = vec![
        "com.example:orders".parse::<StubCoordinate>().unwrap(),
        format!("com.example:billing:0.9.0:stubs:{taken}")
            .parse::<StubCoordinate>()
            .unwrap(),
    ];
    let resolution = LocalRepositoryResolver::new(repo.path())
        .with_work_dir(work.path())
        .resolve(&coordinates)
        .unwrap();

    let transport = HttpStubTransport::new().with_stop_timeout(Duration::from_secs(2));
    let runner = StubRunner::new(options(44000, 44000), Arc::new(transport)).unwrap();
    let err = runner.start(resolution.stubs).await.unwrap_err();
    match err {
        StubRunnerError::FleetStart { rollback, .. } => assert!(rollback.is_empty()),
        other => panic!("expected a fleet start failure, got {other}"),
    }
    assert_eq!(runner.state(), FleetState::Failed);
    assert_eq!(runner.allocator().allocated_count(), 0);
    assert!(TcpListener::bind(("127.0.0.1", 44000)).is_ok());
}

#[tokio::test]
async fn test_configurer_headers_and_mappings_output() {
    let repo = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    producer_repository(repo.path());

    let resolution = LocalRepositoryResolver::new(repo.path())
        .with_work_dir(work.path())
        .resolve(&["com.example:orders:1.2.0".parse::<StubCoordinate>().unwrap()])
        .unwrap();

    let configurer: StubConfigurer =
        Arc::new(|bundle: &MappingBundle, mut context: ServerContext| {
            context
                .response_headers
                .insert("X-Stub-Mappings".to_string(), bundle.len().to_string());
            context
        });
    let options = StubRunnerOptions {
        mappings_output_folder: Some(output.path().to_path_buf()),
        delete_stubs_after_test: false,
        ..options(43000, 43999)
    };
    let runner = StubRunner::new(options, Arc::new(HttpStubTransport::new()))
        .unwrap()
        .with_configurer(configurer)
        .with_storage(resolution.storage.clone().unwrap());
    let registry = runner.start(resolution.stubs).await.unwrap();

    let stub = registry.find("orders").unwrap();
    let response = reqwest::get(format!("{}/health", stub.url())).await.unwrap();
    assert_eq!(response.headers()["x-stub-mappings"], "3");

    let written = output.path().join(format!("orders_{}", stub.port()));
    assert_eq!(std::fs::read_dir(&written).unwrap().count(), 3);

    runner.stop().await;
    runner.stop().await;
    assert_eq!(runner.state(), FleetState::Stopped);
    // deleteStubsAfterTest is off, so the materialized copy survives
    assert!(work.path().join("com.example").exists());
}
