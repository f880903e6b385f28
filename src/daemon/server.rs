//! The daemon's HTTP surface.
//!
//! Bound to loopback only. `GET /health` is the cheap liveness probe the
//! thin client races against its 50 ms budget; `GET /status` carries the
//! detailed picture; `POST /rpc` speaks JSON-RPC 2.0, single or batch.

use super::methods::MethodRegistry;
use super::pid;
use super::rpc::{self, RpcRequest, RpcResponse};
use super::sessions::SessionManager;
use crate::config::Settings;
use crate::error::{CerberusError, Result};
use crate::semantic::EmbeddingEngine;
use crate::storage::IndexStore;
use crate::watcher::FileWatcher;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub struct DaemonState {
    registry: MethodRegistry,
    sessions: Arc<SessionManager>,
    store: Arc<IndexStore>,
    watcher: parking_lot::Mutex<Option<FileWatcher>>,
    started_at: Instant,
    project_root: PathBuf,
}

pub struct DaemonServer {
    settings: Arc<Settings>,
    store: Arc<IndexStore>,
    embedder: Option<Arc<dyn EmbeddingEngine>>,
    project_root: PathBuf,
}

impl DaemonServer {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<IndexStore>,
        embedder: Option<Arc<dyn EmbeddingEngine>>,
        project_root: &Path,
    ) -> Self {
        Self {
            settings,
            store,
            embedder,
            project_root: project_root.to_path_buf(),
        }
    }

    /// Serve until SIGTERM/ctrl-c. Cleans up the PID file, watcher, and
    /// session reaper on the way out.
    pub async fn run(self) -> Result<()> {
        let sessions = SessionManager::new(
            Some(self.store.clone()),
            self.settings.daemon.session_max_idle_seconds,
            self.settings.daemon.session_cleanup_interval,
        );

        let watcher = if self.settings.daemon.enable_watcher {
            match FileWatcher::spawn(
                self.settings.clone(),
                self.store.clone(),
                &self.project_root,
            ) {
                Ok(watcher) => {
                    tracing::info!("filesystem watcher enabled");
                    Some(watcher)
                }
                Err(e) => {
                    tracing::warn!("watcher failed to start, continuing without it: {e}");
                    None
                }
            }
        } else {
            None
        };

        // RPC traffic feeds the watcher's hot-file tracker so blueprint
        // regeneration knows what is actually being read.
        let access = watcher
            .as_ref()
            .map(|w| w.access.clone())
            .unwrap_or_default();

        let registry = MethodRegistry::new(
            self.settings.clone(),
            self.store.clone(),
            self.embedder.clone(),
            self.project_root.clone(),
            sessions.clone(),
            access,
        );

        let state = Arc::new(DaemonState {
            registry,
            sessions: sessions.clone(),
            store: self.store.clone(),
            watcher: parking_lot::Mutex::new(watcher),
            started_at: Instant::now(),
            project_root: self.project_root.clone(),
        });

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/rpc", post(handle_rpc))
            .with_state(state.clone());

        let address = format!(
            "{}:{}",
            self.settings.daemon.host, self.settings.daemon.port
        );
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| CerberusError::Daemon {
                reason: format!("cannot bind {address}: {e}"),
            })?;

        let pid_file = pid::pid_file_path(&self.project_root);
        pid::write_pid_file(&pid_file, std::process::id())?;
        tracing::info!("daemon listening on {address} (pid {})", std::process::id());

        let serve_result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        // Shutdown order: reaper, watcher, pid file.
        sessions.shutdown();
        if let Some(watcher) = state.watcher.lock().take() {
            watcher.stop();
        }
        pid::remove_pid_file(&pid_file);
        tracing::info!("daemon stopped");

        serve_result.map_err(|e| CerberusError::Daemon {
            reason: e.to_string(),
        })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

async fn handle_health(State(state): State<Arc<DaemonState>>) -> Json<Value> {
    let index_loaded = state.store.sqlite.get_stats().is_ok();
    Json(json!({
        "healthy": true,
        "status": "running",
        "index_loaded": index_loaded,
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "timestamp": now_seconds(),
    }))
}

async fn handle_status(State(state): State<Arc<DaemonState>>) -> Json<Value> {
    let session_stats = state.sessions.stats();
    let watcher_stats = state
        .watcher
        .lock()
        .as_ref()
        .map(|w| serde_json::to_value(w.stats()).unwrap_or(Value::Null));
    let stats = state.store.sqlite.get_stats().ok();

    Json(json!({
        "running": true,
        "pid": std::process::id(),
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "index_loaded": stats.is_some(),
        "project_root": state.project_root.to_string_lossy(),
        "index": stats,
        "active_sessions": session_stats.active_sessions,
        "sessions": session_stats,
        "watcher": watcher_stats,
    }))
}

async fn handle_rpc(
    State(state): State<Arc<DaemonState>>,
    body: axum::body::Bytes,
) -> Json<Value> {
    let parsed: std::result::Result<Value, _> = serde_json::from_slice(&body);
    let payload = match parsed {
        Ok(value) => value,
        Err(e) => {
            let response = RpcResponse::error(rpc::PARSE_ERROR, format!("Parse error: {e}"), None);
            return Json(serde_json::to_value(response).unwrap_or(Value::Null));
        }
    };

    match payload {
        Value::Array(batch) => {
            if batch.is_empty() {
                let response =
                    RpcResponse::error(rpc::INVALID_REQUEST, "Empty batch", None);
                return Json(serde_json::to_value(response).unwrap_or(Value::Null));
            }
            let responses: Vec<Value> = batch
                .into_iter()
                .map(|entry| {
                    let response = dispatch_value(&state, entry);
                    serde_json::to_value(response).unwrap_or(Value::Null)
                })
                .collect();
            Json(Value::Array(responses))
        }
        single => {
            let response = dispatch_value(&state, single);
            Json(serde_json::to_value(response).unwrap_or(Value::Null))
        }
    }
}

fn dispatch_value(state: &DaemonState, value: Value) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return RpcResponse::error(rpc::INVALID_REQUEST, format!("Invalid request: {e}"), None);
        }
    };
    if let Err(response) = request.validate() {
        return response;
    }

    match state.registry.dispatch(&request.method, request.params.as_ref()) {
        Ok(result) => RpcResponse::success(result, request.id),
        Err((code, message)) => RpcResponse::error_with_data(
            code,
            message,
            json!({"method": request.method}),
            request.id,
        ),
    }
}

fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
