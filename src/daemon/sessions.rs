//! Agent session tracking with idle reaping.
//!
//! Sessions are in-memory with best-effort persistence to the store's
//! sessions table. A background thread reaps sessions idle longer than the
//! configured maximum.

use crate::storage::IndexStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: f64,
    pub last_activity: f64,
    pub query_count: u64,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    fn new(session_id: String) -> Self {
        let now = now_seconds();
        Self {
            session_id,
            created_at: now,
            last_activity: now,
            query_count: 0,
            context: serde_json::Map::new(),
        }
    }

    pub fn idle_seconds(&self) -> f64 {
        now_seconds() - self.last_activity
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_queries: u64,
    pub max_idle_seconds: u64,
}

pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    store: Option<Arc<IndexStore>>,
    max_idle_seconds: u64,
    running: Arc<AtomicBool>,
    reaper: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager and start its reaper thread.
    pub fn new(
        store: Option<Arc<IndexStore>>,
        max_idle_seconds: u64,
        cleanup_interval: u64,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            store,
            max_idle_seconds,
            running: Arc::new(AtomicBool::new(true)),
            reaper: Mutex::new(None),
        });

        let sessions = manager.sessions.clone();
        let running = manager.running.clone();
        let max_idle = max_idle_seconds as f64;
        let handle = std::thread::Builder::new()
            .name("session-reaper".into())
            .spawn(move || {
                let tick = Duration::from_millis(200);
                let mut since_cleanup = Duration::ZERO;
                let interval = Duration::from_secs(cleanup_interval.max(1));
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    since_cleanup += tick;
                    if since_cleanup < interval {
                        continue;
                    }
                    since_cleanup = Duration::ZERO;
                    let mut guard = sessions.lock();
                    let before = guard.len();
                    guard.retain(|_, session| session.idle_seconds() <= max_idle);
                    let reaped = before - guard.len();
                    if reaped > 0 {
                        tracing::info!("reaped {reaped} idle session(s)");
                    }
                }
            })
            .ok();
        *manager.reaper.lock() = handle;
        manager
    }

    pub fn create(&self, session_id: &str) -> Session {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string()))
            .clone();
        drop(sessions);
        self.persist(&session);
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Bump activity and query count; records an activity row when an
    /// RPC method name is supplied.
    pub fn touch(&self, session_id: &str, method: Option<&str>) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity = now_seconds();
            session.query_count += 1;
            let snapshot = session.clone();
            drop(sessions);
            self.persist(&snapshot);
            if let (Some(store), Some(method)) = (&self.store, method) {
                let _ = store
                    .sqlite
                    .record_session_activity(session_id, now_seconds(), method);
            }
        }
    }

    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().remove(session_id).is_some();
        if removed {
            if let Some(store) = &self.store {
                let _ = store.sqlite.delete_session(session_id);
            }
        }
        removed
    }

    pub fn stats(&self) -> SessionStats {
        let sessions = self.sessions.lock();
        SessionStats {
            active_sessions: sessions.len(),
            total_queries: sessions.values().map(|s| s.query_count).sum(),
            max_idle_seconds: self.max_idle_seconds,
        }
    }

    /// Stop the reaper thread. Called on daemon shutdown.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reaper.lock().take() {
            let _ = handle.join();
        }
    }

    fn persist(&self, session: &Session) {
        if let Some(store) = &self.store {
            let context = serde_json::to_string(&session.context).unwrap_or_default();
            let _ = store.sqlite.upsert_session(
                &session.session_id,
                session.created_at,
                session.last_activity,
                session.query_count,
                &context,
            );
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent() {
        let manager = SessionManager::new(None, 3600, 300);
        let first = manager.create("agent-1");
        let second = manager.create("agent-1");
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(manager.stats().active_sessions, 1);
        manager.shutdown();
    }

    #[test]
    fn touch_counts_queries() {
        let manager = SessionManager::new(None, 3600, 300);
        manager.create("agent-1");
        manager.touch("agent-1", Some("search"));
        manager.touch("agent-1", Some("get_symbol"));
        assert_eq!(manager.get("agent-1").unwrap().query_count, 2);
        assert_eq!(manager.stats().total_queries, 2);
        manager.shutdown();
    }

    #[test]
    fn close_removes_session() {
        let manager = SessionManager::new(None, 3600, 300);
        manager.create("agent-1");
        assert!(manager.close("agent-1"));
        assert!(!manager.close("agent-1"));
        assert!(manager.get("agent-1").is_none());
        manager.shutdown();
    }
}
