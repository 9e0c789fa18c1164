//! Stand-in for the `lume` backend.
//!
//! Speaks enough of the VM API for integration tests and can be told to
//! misbehave at startup through environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lume", about = "Stub lume server for tests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the VM API
    Serve {
        #[arg(long)]
        port: u16,

        /// Exit with this code instead of serving
        #[arg(long, env = "LUME_STUB_EXIT_CODE")]
        exit_code: Option<i32>,

        /// Wait this long before binding
        #[arg(long, env = "LUME_STUB_READY_DELAY_MS", default_value_t = 0)]
        ready_delay_ms: u64,

        /// Keep running without ever binding the port
        #[arg(long, env = "LUME_STUB_NEVER_READY")]
        never_ready: bool,
    },
}

type Vms = Arc<Mutex<BTreeMap<String, Value>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        command:
            Command::Serve {
                port,
                exit_code,
                ready_delay_ms,
                never_ready,
            },
    } = Cli::parse();

    println!("lume stub starting on port {port}");

    if let Some(code) = exit_code {
        eprintln!("fatal: refusing to start (exit code {code})");
        std::process::exit(code);
    }

    if never_ready {
        println!("waiting forever");
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    tokio::time::sleep(Duration::from_millis(ready_delay_ms)).await;

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!("Server started on port {port}");
    info!(port = %port, "Serving stub lume API");

    axum::serve(listener, app()).await?;
    Ok(())
}

fn app() -> Router {
    let vms: Vms = Arc::default();
    let api = Router::new()
        .route("/vms", get(list_vms).post(create_vm))
        .route("/vms/clone", post(clone_vm))
        .route(
            "/vms/:name",
            get(get_vm).patch(update_vm).delete(delete_vm),
        )
        .route("/vms/:name/run", post(run_vm))
        .route("/vms/:name/stop", post(stop_vm))
        .route("/pull", post(pull))
        .route("/images", get(images))
        .route("/ipsw", get(ipsw))
        .route("/debug/exit", post(crash))
        .with_state(vms);

    Router::new().nest("/lume", api)
}

fn not_found(name: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("VM {name} not found")).into_response()
}

async fn list_vms(State(vms): State<Vms>) -> Json<Value> {
    let vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    Json(Value::Array(vms.values().cloned().collect()))
}

async fn get_vm(State(vms): State<Vms>, Path(name): Path<String>) -> Response {
    let vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    match vms.get(&name) {
        Some(vm) => Json(vm.clone()).into_response(),
        None => not_found(&name),
    }
}

async fn create_vm(State(vms): State<Vms>, Json(spec): Json<Value>) -> Response {
    let Some(name) = spec.get("name").and_then(Value::as_str).map(str::to_string) else {
        return (StatusCode::BAD_REQUEST, "missing VM name").into_response();
    };
    let mut vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if vms.contains_key(&name) {
        return (StatusCode::CONFLICT, format!("VM {name} already exists")).into_response();
    }

    let mut vm = json!({
        "name": name,
        "status": "stopped",
        "os": "macOS",
        "cpuCount": 2,
        "memorySize": 4_u64 << 30,
        "diskSize": { "total": 64_u64 << 30, "allocated": 0 },
    });
    merge(&mut vm, &spec);
    vms.insert(name, vm);
    StatusCode::CREATED.into_response()
}

async fn update_vm(
    State(vms): State<Vms>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Response {
    let mut vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    match vms.get_mut(&name) {
        Some(vm) => {
            merge(vm, &params);
            StatusCode::OK.into_response()
        }
        None => not_found(&name),
    }
}

async fn delete_vm(State(vms): State<Vms>, Path(name): Path<String>) -> Response {
    let mut vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    match vms.remove(&name) {
        Some(_) => StatusCode::OK.into_response(),
        None => not_found(&name),
    }
}

async fn run_vm(State(vms): State<Vms>, Path(name): Path<String>) -> Response {
    set_status(&vms, &name, "running")
}

async fn stop_vm(State(vms): State<Vms>, Path(name): Path<String>) -> Response {
    set_status(&vms, &name, "stopped")
}

fn set_status(vms: &Vms, name: &str, status: &str) -> Response {
    let mut vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    match vms.get_mut(name) {
        Some(vm) => {
            vm["status"] = json!(status);
            StatusCode::ACCEPTED.into_response()
        }
        None => not_found(name),
    }
}

async fn clone_vm(State(vms): State<Vms>, Json(spec): Json<Value>) -> Response {
    let (Some(name), Some(new_name)) = (
        spec.get("name").and_then(Value::as_str),
        spec.get("newName").and_then(Value::as_str),
    ) else {
        return (StatusCode::BAD_REQUEST, "clone needs name and newName").into_response();
    };

    let mut vms = vms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let Some(source) = vms.get(name).cloned() else {
        return not_found(name);
    };
    let mut copy = source;
    copy["name"] = json!(new_name);
    copy["status"] = json!("stopped");
    vms.insert(new_name.to_string(), copy);
    StatusCode::CREATED.into_response()
}

/// Echoes the pull request so callers can check what was sent.
async fn pull(Json(payload): Json<Value>) -> Json<Value> {
    Json(json!({ "pulled": payload }))
}

async fn images(Query(query): Query<BTreeMap<String, String>>) -> Json<Value> {
    let organization = query.get("organization").map_or("trycua", String::as_str);
    Json(json!({
        "organization": organization,
        "local": ["macos-sequoia-vanilla:latest", "ubuntu-noble-vanilla:latest"],
    }))
}

async fn ipsw() -> Json<Value> {
    Json(json!({ "url": "https://updates.cdn-apple.com/UniversalMac_Restore.ipsw" }))
}

/// Exit shortly after answering, to simulate a crash.
async fn crash() -> StatusCode {
    warn!("Exiting on request");
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::process::exit(3);
    });
    StatusCode::ACCEPTED
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}
