//! Long-lived daemon and its clients.
//!
//! A loopback HTTP server exposing health/status endpoints and a JSON-RPC
//! 2.0 method registry, plus session management, PID bookkeeping, and the
//! thin client that routes CLI commands through a running daemon with
//! transparent in-process fallback.

mod client;
mod methods;
mod pid;
mod rpc;
mod server;
mod sessions;

pub use client::{HEALTH_PROBE_TIMEOUT_MS, ThinClient};
pub use methods::{METHOD_NAMES, MethodRegistry};
pub use pid::{daemon_pid_if_running, pid_file_path, process_alive, read_pid_file, remove_pid_file, write_pid_file};
pub use rpc::{RpcErrorObject, RpcRequest, RpcResponse};
pub use server::{DaemonServer, DaemonState};
pub use sessions::{Session, SessionManager, SessionStats};
