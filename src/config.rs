//! Layered configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the workspace
//! `.cerberus/config.toml`, environment variables prefixed `CERBERUS_`
//! (double underscore separates nesting levels), CLI overrides applied by
//! the caller.
//!
//! # Environment Variables
//!
//! - `CERBERUS_SCANNER__MAX_FILE_BYTES=1048576` sets `scanner.max_file_bytes`
//! - `CERBERUS_DAEMON__PORT=9876` sets `daemon.port`
//! - `CERBERUS_MACHINE_OUTPUT=1` suppresses console logging

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const WORKSPACE_DIR: &str = ".cerberus";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Configuration schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding cerberus.db, vectors.bin and vector_id_map.bin.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Base directory for backups, undo history, and runtime files.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Suppress console logging so stdout stays machine-parseable.
    #[serde(default)]
    pub machine_output: bool,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub mutation: MutationConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Extra gitignore-style patterns applied on top of .gitignore.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Skip files larger than this many bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Files per write transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Generate embeddings during scan.
    #[serde(default)]
    pub enabled: bool,

    /// Embedding model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector dimension; must match the model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Context lines read around a symbol when building snippet text.
    #[serde(default = "default_snippet_padding")]
    pub snippet_padding: u32,

    /// Snippets embedded per model invocation.
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// keyword | semantic | balanced | auto
    #[serde(default = "default_mode")]
    pub default_mode: String,

    #[serde(default = "default_half")]
    pub keyword_weight: f32,

    #[serde(default = "default_half")]
    pub semantic_weight: f32,

    /// Candidates pulled from each method before fusion.
    #[serde(default = "default_top_k_per_method")]
    pub top_k_per_method: usize,

    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    /// Minimum cosine similarity for vector hits.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MutationConfig {
    #[serde(default = "default_true")]
    pub backup_enabled: bool,

    /// Relative to `runtime_dir` unless absolute.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    #[serde(default = "default_true")]
    pub auto_format: bool,

    /// Inject missing imports for symbols the new code references.
    #[serde(default = "default_true")]
    pub auto_imports: bool,

    /// Diff lines kept before truncation.
    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: usize,

    /// External formatter commands by language name.
    #[serde(default = "default_formatters")]
    pub formatters: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// General RPC timeout, milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Health probe timeout, milliseconds.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Sessions idle longer than this are reaped.
    #[serde(default = "default_max_idle_seconds")]
    pub session_max_idle_seconds: u64,

    /// Reaper wake interval, seconds.
    #[serde(default = "default_cleanup_interval")]
    pub session_cleanup_interval: u64,

    #[serde(default = "default_true")]
    pub enable_watcher: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Quiet period after the last event before an update runs, ms.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Glob patterns of files worth watching.
    #[serde(default = "default_watch_patterns")]
    pub watch_patterns: Vec<String>,

    /// Glob patterns never worth watching.
    #[serde(default = "default_watch_ignore")]
    pub ignore_patterns: Vec<String>,

    /// Regenerate blueprints for files accessed at least this many times.
    #[serde(default = "default_hot_threshold")]
    pub hot_blueprint_threshold: u32,

    /// Enable the background blueprint regeneration thread.
    #[serde(default)]
    pub auto_blueprints: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default tracing filter, e.g. "warn" or "info".
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `watcher = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".cerberus/index")
}
fn default_runtime_dir() -> PathBuf {
    PathBuf::from(".cerberus")
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git/**".to_string(),
        "__pycache__/**".to_string(),
        ".pytest_cache/**".to_string(),
        "build/**".to_string(),
        "dist/**".to_string(),
        "*.egg-info/**".to_string(),
        ".venv/**".to_string(),
        "venv/**".to_string(),
        "node_modules/**".to_string(),
        "target/**".to_string(),
        "*.pyc".to_string(),
    ]
}
fn default_max_file_bytes() -> u64 {
    1_048_576
}
fn default_batch_size() -> usize {
    100
}
fn default_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_snippet_padding() -> u32 {
    5
}
fn default_embed_batch() -> usize {
    32
}
fn default_mode() -> String {
    "auto".to_string()
}
fn default_half() -> f32 {
    0.5
}
fn default_top_k_per_method() -> usize {
    20
}
fn default_final_top_k() -> usize {
    10
}
fn default_min_similarity() -> f32 {
    0.2
}
fn default_true() -> bool {
    true
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}
fn default_history_dir() -> PathBuf {
    PathBuf::from("history")
}
fn default_max_diff_lines() -> usize {
    100
}
fn default_formatters() -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        "python".to_string(),
        vec!["black".to_string(), "--quiet".to_string()],
    );
    map.insert(
        "javascript".to_string(),
        vec!["prettier".to_string(), "--write".to_string()],
    );
    map.insert(
        "typescript".to_string(),
        vec!["prettier".to_string(), "--write".to_string()],
    );
    map
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9876
}
fn default_rpc_timeout_ms() -> u64 {
    10_000
}
fn default_health_timeout_ms() -> u64 {
    5_000
}
fn default_max_idle_seconds() -> u64 {
    3600
}
fn default_cleanup_interval() -> u64 {
    300
}
fn default_debounce_ms() -> u64 {
    2_000
}
fn default_watch_patterns() -> Vec<String> {
    vec![
        "*.py".to_string(),
        "*.js".to_string(),
        "*.jsx".to_string(),
        "*.ts".to_string(),
        "*.tsx".to_string(),
    ]
}
fn default_watch_ignore() -> Vec<String> {
    vec![
        "*/.git/*".to_string(),
        "*/__pycache__/*".to_string(),
        "*/node_modules/*".to_string(),
        "*/.cerberus/*".to_string(),
        "*.swp".to_string(),
        "*~".to_string(),
    ]
}
fn default_hot_threshold() -> u32 {
    5
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            runtime_dir: default_runtime_dir(),
            machine_output: false,
            scanner: ScannerConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            mutation: MutationConfig::default(),
            daemon: DaemonConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            max_file_bytes: default_max_file_bytes(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_model(),
            dimension: default_dimension(),
            snippet_padding: default_snippet_padding(),
            batch_size: default_embed_batch(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            keyword_weight: default_half(),
            semantic_weight: default_half(),
            top_k_per_method: default_top_k_per_method(),
            final_top_k: default_final_top_k(),
            min_similarity: default_min_similarity(),
        }
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            backup_dir: default_backup_dir(),
            history_dir: default_history_dir(),
            auto_format: true,
            auto_imports: true,
            max_diff_lines: default_max_diff_lines(),
            formatters: default_formatters(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            session_max_idle_seconds: default_max_idle_seconds(),
            session_cleanup_interval: default_cleanup_interval(),
            enable_watcher: true,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            watch_patterns: default_watch_patterns(),
            ignore_patterns: default_watch_ignore(),
            hot_blueprint_threshold: default_hot_threshold(),
            auto_blueprints: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(WORKSPACE_DIR).join("config.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file plus env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CERBERUS_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
    }

    /// Resolve `runtime_dir`-relative paths against the workspace root.
    pub fn backup_dir(&self) -> PathBuf {
        self.resolve_runtime(&self.mutation.backup_dir.clone())
    }

    pub fn history_dir(&self) -> PathBuf {
        self.resolve_runtime(&self.mutation.history_dir.clone())
    }

    fn resolve_runtime(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.runtime_dir.join(path)
        }
    }

    /// Walk ancestors looking for a `.cerberus` directory.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(WORKSPACE_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("config.toml"));
            }
        }
        None
    }

    /// Workspace root, i.e. the directory containing `.cerberus`.
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            if ancestor.join(WORKSPACE_DIR).is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }
        None
    }

    /// Save current configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default config file, failing if one exists unless forced.
    pub fn init_config_file(force: bool) -> anyhow::Result<PathBuf> {
        let config_path = PathBuf::from(WORKSPACE_DIR).join("config.toml");
        if !force && config_path.exists() {
            anyhow::bail!("Configuration file already exists. Use --force to overwrite");
        }
        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.scanner.batch_size, 100);
        assert_eq!(settings.embedding.dimension, 384);
        assert_eq!(settings.daemon.port, 9876);
        assert_eq!(settings.watcher.debounce_ms, 2_000);
        assert!((settings.retrieval.keyword_weight - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
version = 2

[scanner]
batch_size = 25
max_file_bytes = 2048

[daemon]
port = 7001

[retrieval]
default_mode = "keyword"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.scanner.batch_size, 25);
        assert_eq!(settings.scanner.max_file_bytes, 2048);
        assert_eq!(settings.daemon.port, 7001);
        assert_eq!(settings.retrieval.default_mode, "keyword");
        // Untouched sections keep their defaults.
        assert_eq!(settings.watcher.debounce_ms, 2_000);
    }

    #[test]
    fn save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.daemon.port = 7777;
        settings.embedding.enabled = true;
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.daemon.port, 7777);
        assert!(loaded.embedding.enabled);
    }

    #[test]
    fn backup_dir_resolves_relative_to_runtime() {
        let mut settings = Settings::default();
        settings.runtime_dir = PathBuf::from("/tmp/project/.cerberus");
        assert_eq!(
            settings.backup_dir(),
            PathBuf::from("/tmp/project/.cerberus/backups")
        );

        settings.mutation.backup_dir = PathBuf::from("/var/backups");
        assert_eq!(settings.backup_dir(), PathBuf::from("/var/backups"));
    }
}
