//! The HTTP trigger surface.
//!
//! JSON over HTTP: `/healthz` (no auth), `POST /trigger`, `GET /runs`,
//! `GET /runs/{id}`. Bodies are capped at 1 MiB; every validation failure is
//! a stable error code. Accepted triggers are acknowledged with 202 before
//! any work happens; execution is scheduled asynchronously and the record
//! settles to completed or failed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use hydra_core::cache::ScanCache;
use hydra_core::config::HydraConfig;
use hydra_core::domain::target::ScanMode;
use hydra_core::orchestrator::{DiffOptions, HydraOrchestrator, ScanOptions};
use hydra_core::reasoner::{HttpReasoner, Reasoner};
use hydra_scanners::build_task_set;

use crate::auth;
use crate::config::DaemonConfig;
use crate::runs::{RunRecord, RunStore};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared daemon state.
pub struct DaemonState {
    pub config: DaemonConfig,
    pub store: RunStore,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl DaemonState {
    pub fn new(config: DaemonConfig) -> Arc<Self> {
        let store = RunStore::new(config.max_stored_runs);
        Arc::new(Self {
            config,
            store,
            in_flight: Mutex::new(Vec::new()),
        })
    }
}

pub type AppState = Arc<DaemonState>;

fn error_response(status: StatusCode, code: &str, detail: Option<String>) -> Response {
    let mut body = json!({ "error": code });
    if let Some(detail) = detail {
        body["detail"] = Value::String(detail);
    }
    (status, Json(body)).into_response()
}

async fn require_auth(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if let Some(token) = &state.config.token {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if !auth::bearer_matches(header, token) {
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized", None);
        }
    }
    next.run(request).await
}

/// Build the daemon router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/trigger", post(trigger))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    run_id: Uuid,
    status: &'static str,
    target_path: String,
    mode: ScanMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    head_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed_files: Option<Vec<String>>,
}

async fn trigger(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request_too_large", None);
        }
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_json",
                Some(rejection.body_text()),
            );
        }
    };

    let Some(target_path) = body.get("target_path").and_then(Value::as_str) else {
        return error_response(StatusCode::BAD_REQUEST, "missing_target_path", None);
    };

    let mode = match body.get("mode") {
        None => ScanMode::Full,
        Some(Value::String(raw)) => match raw.parse::<ScanMode>() {
            Ok(mode) => mode,
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_mode",
                    Some(format!("unknown mode: {raw}")),
                )
            }
        },
        Some(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_mode", None),
    };

    let base_ref = body
        .get("base_ref")
        .and_then(Value::as_str)
        .map(str::to_string);
    let head_ref = body
        .get("head_ref")
        .and_then(Value::as_str)
        .map(str::to_string);
    if head_ref.is_some() && base_ref.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "head_ref_requires_base_ref", None);
    }

    let changed_files = match body.get("changed_files") {
        None => None,
        Some(Value::Array(entries)) => {
            let mut files = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.as_str() {
                    Some(s) => files.push(s.to_string()),
                    None => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            "changed_files_must_be_array",
                            Some("entries must be strings".to_string()),
                        )
                    }
                }
            }
            Some(files)
        }
        Some(_) => {
            return error_response(StatusCode::BAD_REQUEST, "changed_files_must_be_array", None)
        }
    };

    // Canonicalize before the allow-list check so symlink escapes resolve.
    let canonical = match std::fs::canonicalize(target_path) {
        Ok(path) if path.is_dir() => path,
        Ok(path) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_target_path",
                Some(format!("{}: not a directory", path.display())),
            )
        }
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_target_path",
                Some(format!("{target_path}: {e}")),
            )
        }
    };

    if !state.config.is_path_allowed(&canonical) {
        return error_response(StatusCode::FORBIDDEN, "path_not_allowed", None);
    }

    let trigger_name = body
        .get("trigger")
        .and_then(Value::as_str)
        .unwrap_or("api")
        .to_string();

    let record = RunRecord::queued(
        trigger_name,
        canonical.clone(),
        mode,
        base_ref.clone(),
        head_ref.clone(),
        changed_files.clone(),
    );
    let run_id = record.id;
    state.store.insert(record);

    let handle = tokio::spawn(execute_run(state.clone(), run_id));
    state
        .in_flight
        .lock()
        .expect("in-flight mutex poisoned")
        .push(handle);

    info!(run_id = %run_id, target = %canonical.display(), mode = %mode, "run queued");

    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            run_id,
            status: "queued",
            target_path: canonical.to_string_lossy().into_owned(),
            mode,
            base_ref,
            head_ref,
            changed_files,
        }),
    )
        .into_response()
}

async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunRecord>> {
    Json(state.store.list())
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::NOT_FOUND, "run_not_found", None);
    };
    match state.store.get(&id) {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "run_not_found", None),
    }
}

/// Drive one queued run to a terminal state. Never panics the daemon; any
/// failure is recorded on the run.
async fn execute_run(state: AppState, run_id: Uuid) {
    let Some(record) = state.store.get(&run_id) else {
        return;
    };
    state.store.mark_running(&run_id);

    let outcome = run_scan(&record).await;
    match outcome {
        Ok(report) => state.store.mark_completed(&run_id, report),
        Err(e) => {
            error!(run_id = %run_id, error = %e, "run failed");
            state.store.mark_failed(&run_id, e.to_string());
        }
    }
}

async fn run_scan(
    record: &RunRecord,
) -> Result<hydra_core::domain::report::ScanReport, hydra_core::domain::error::HydraError> {
    let config = HydraConfig::load(&record.target_path)?;
    let cache = Arc::new(
        ScanCache::with_capacity(&record.target_path, config.cache_max_entries)
            .with_default_ttl(config.cache_ttl_ms),
    );
    let reasoner: Option<Arc<dyn Reasoner>> =
        HttpReasoner::from_env().map(|r| Arc::new(r) as Arc<dyn Reasoner>);

    let tasks = build_task_set(&config, reasoner.clone(), Some(Arc::clone(&cache)));
    let orchestrator = HydraOrchestrator::new(config, tasks)
        .with_reasoner(reasoner)
        .with_cache(cache);

    match record.mode {
        ScanMode::Full => {
            orchestrator
                .run_full_scan(&record.target_path, ScanOptions::default())
                .await
        }
        ScanMode::Diff => {
            orchestrator
                .run_diff_scan(
                    &record.target_path,
                    DiffOptions {
                        base_ref: record.base_ref.clone(),
                        head_ref: record.head_ref.clone(),
                        changed_files: record
                            .changed_files
                            .clone()
                            .unwrap_or_default()
                            .into_iter()
                            .map(PathBuf::from)
                            .collect(),
                    },
                    ScanOptions::default(),
                )
                .await
        }
    }
}

/// Bind and serve until shutdown, then let in-flight runs settle.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "hydrad listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let handles: Vec<JoinHandle<()>> = std::mem::take(
        &mut *state.in_flight.lock().expect("in-flight mutex poisoned"),
    );
    if !handles.is_empty() {
        info!(count = handles.len(), "waiting for in-flight runs to settle");
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
