//! End-to-end tests for the `Lume` facade against the stub backend.

mod common;

use std::sync::Arc;

use common::{client_for, stub_config};
use lumekit::{
    ClientConfig, ErrorKind, Lume, LumeError, NoopLogSink, Response, SupervisorState,
};
use serde_json::{Value, json};

fn lume() -> Lume {
    Lume::with_options(stub_config(), ClientConfig::default(), Arc::new(NoopLogSink)).unwrap()
}

#[tokio::test]
async fn test_first_call_starts_server() {
    let lume = lume();
    assert_eq!(lume.state(), SupervisorState::Stopped);

    let vms = lume.list_vms().await.unwrap();

    assert_eq!(vms, json!([]));
    assert_eq!(lume.state(), SupervisorState::Running);
    assert_eq!(lume.supervisor().launch_count(), 1);

    lume.list_vms().await.unwrap();
    assert_eq!(lume.supervisor().launch_count(), 1);

    lume.close().await.unwrap();
}

#[tokio::test]
async fn test_vm_lifecycle() {
    let lume = lume();

    lume.create_vm(json!({ "name": "dev", "cpuCount": 4 }))
        .await
        .unwrap();
    let vm = lume.get_vm("dev").await.unwrap();
    assert_eq!(vm["cpuCount"], 4);
    assert_eq!(vm["status"], "stopped");

    lume.update_vm("dev", json!({ "memorySize": 8_u64 << 30 }))
        .await
        .unwrap();
    assert_eq!(lume.get_vm("dev").await.unwrap()["memorySize"], 8_u64 << 30);

    lume.run_vm("dev", None).await.unwrap();
    assert_eq!(lume.get_vm("dev").await.unwrap()["status"], "running");
    lume.stop_vm("dev").await.unwrap();
    assert_eq!(lume.get_vm("dev").await.unwrap()["status"], "stopped");

    lume.clone_vm("dev", "dev-copy").await.unwrap();
    let names: Vec<String> = lume
        .list_vms()
        .await
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|vm| vm["name"].as_str().map(str::to_string))
        .collect();
    assert_eq!(names, ["dev", "dev-copy"]);

    lume.delete_vm("dev").await.unwrap();
    let err = lume.get_vm("dev").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.status(), Some(404));

    lume.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_vm_is_not_found() {
    let lume = lume();
    let err = lume.get_vm("ghost").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("GET /vms/ghost"));

    lume.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_request_carries_body() {
    let lume = lume();
    let err = lume.create_vm(json!({ "cpuCount": 2 })).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.body(), Some("missing VM name"));

    lume.create_vm(json!({ "name": "dup" })).await.unwrap();
    let err = lume.create_vm(json!({ "name": "dup" })).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.status(), Some(409));

    lume.close().await.unwrap();
}

#[tokio::test]
async fn test_pull_image_normalizes_reference() {
    let lume = lume();

    let Response::Json(body) = lume
        .pull_image("macos-sequoia-vanilla", Some("sequoia"))
        .await
        .unwrap()
    else {
        panic!("expected a JSON body");
    };

    let pulled = &body["pulled"];
    assert_eq!(pulled["image"], "macos-sequoia-vanilla:latest");
    assert_eq!(pulled["name"], "sequoia");
    assert_eq!(pulled["registry"], "ghcr.io");
    assert_eq!(pulled["organization"], "trycua");

    let Response::Json(body) = lume.pull_image("ubuntu:24.04", None).await.unwrap() else {
        panic!("expected a JSON body");
    };
    assert_eq!(body["pulled"]["image"], "ubuntu:24.04");
    assert_eq!(body["pulled"]["name"], Value::Null);

    lume.close().await.unwrap();
}

#[tokio::test]
async fn test_images_and_ipsw() {
    let lume = lume();

    let images = lume.get_images(Some("acme")).await.unwrap();
    assert_eq!(images["organization"], "acme");
    assert_eq!(
        lume.get_images(None).await.unwrap()["organization"],
        "trycua"
    );

    let url = lume.latest_ipsw_url().await.unwrap();
    assert!(url.ends_with(".ipsw"));

    lume.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let lume = lume();
    lume.close().await.unwrap();

    let binding = lume.start().await.unwrap();
    lume.close().await.unwrap();
    lume.close().await.unwrap();

    assert_eq!(lume.state(), SupervisorState::Stopped);
    let err = client_for(&binding).get("/vms").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_scope_stops_server() {
    let (binding, vms) = Lume::scope(stub_config(), |lume| async move {
        lume.create_vm(json!({ "name": "scoped" })).await?;
        let binding = lume.supervisor().binding().unwrap();
        Ok::<_, LumeError>((binding, lume.list_vms().await?))
    })
    .await
    .unwrap();

    assert_eq!(vms.as_array().map(Vec::len), Some(1));
    let err = client_for(&binding).get("/vms").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_scope_stops_server_on_error() {
    let mut seen = None;
    let err = Lume::scope(stub_config(), |lume| {
        seen = lume.supervisor().binding();
        async move {
            let binding = lume.supervisor().binding();
            lume.get_vm("ghost").await.map(|_| binding)
        }
    })
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    let binding = seen.unwrap();
    let err = client_for(&binding).get("/vms").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_scope_reports_start_failure() {
    let config = stub_config().with_env("LUME_STUB_EXIT_CODE", "2");
    let err = Lume::scope(config, |_lume| async { Ok::<_, LumeError>(()) })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Launch);
    assert_eq!(err.diagnostics().and_then(|d| d.exit_code()), Some(2));
}
