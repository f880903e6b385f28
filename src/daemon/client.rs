//! Thin client with transparent fallback.
//!
//! Commands first probe the daemon's `/health` endpoint on a tight
//! budget; when the daemon answers, the call routes over RPC, otherwise
//! the supplied fallback runs the same operation in-process. Callers
//! never see which path executed.

use super::pid;
use super::rpc;
use crate::config::Settings;
use crate::error::{CerberusError, Result};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub const HEALTH_PROBE_TIMEOUT_MS: u64 = 50;

pub struct ThinClient {
    base_url: String,
    rpc_timeout: Duration,
    health_timeout: Duration,
}

impl ThinClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: format!("http://{}:{}", settings.daemon.host, settings.daemon.port),
            rpc_timeout: Duration::from_millis(settings.daemon.rpc_timeout_ms),
            health_timeout: Duration::from_millis(settings.daemon.health_timeout_ms),
        }
    }

    /// Fast availability check: PID file first (no network), then the
    /// health endpoint with a 50 ms budget.
    pub async fn is_daemon_available(&self, project_root: &Path) -> bool {
        if pid::daemon_pid_if_running(project_root).is_none() {
            return false;
        }
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(HEALTH_PROBE_TIMEOUT_MS))
            .build()
        {
            Ok(client) => client,
            Err(_) => return false,
        };
        match client.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("healthy").and_then(Value::as_bool))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// One JSON-RPC call; unwraps the result or surfaces the error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let client = reqwest::Client::builder()
            .timeout(self.rpc_timeout)
            .build()
            .map_err(|e| CerberusError::Daemon {
                reason: e.to_string(),
            })?;

        let payload = serde_json::json!({
            "jsonrpc": rpc::JSONRPC_VERSION,
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = client
            .post(format!("{}/rpc", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| CerberusError::Daemon {
                reason: format!("failed to reach daemon: {e}"),
            })?;

        let body: Value = response.json().await.map_err(|e| CerberusError::Daemon {
            reason: format!("invalid daemon response: {e}"),
        })?;

        if let Some(error) = body.get("error") {
            return Err(CerberusError::Daemon {
                reason: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown RPC error")
                    .to_string(),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Route through the daemon when it answers; otherwise run `fallback`
    /// in-process. The result shape is identical either way.
    pub async fn auto_route<F>(
        &self,
        project_root: &Path,
        method: &str,
        params: Value,
        fallback: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        if self.is_daemon_available(project_root).await {
            match self.call(method, params).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::debug!("daemon call failed, falling back in-process: {e}");
                }
            }
        } else {
            tracing::debug!("daemon unavailable, executing '{method}' in-process");
        }
        fallback()
    }

    /// Fetch `/status`, surfacing transport problems.
    pub async fn status(&self) -> Result<Value> {
        let client = reqwest::Client::builder()
            .timeout(self.health_timeout)
            .build()
            .map_err(|e| CerberusError::Daemon {
                reason: e.to_string(),
            })?;
        let response = client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| CerberusError::Daemon {
                reason: format!("daemon not reachable: {e}"),
            })?;
        response.json().await.map_err(|e| CerberusError::Daemon {
            reason: e.to_string(),
        })
    }
}
