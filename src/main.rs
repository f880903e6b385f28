use cerberus::blueprint::{BlueprintEngine, BlueprintFlags};
use cerberus::config::Settings;
use cerberus::daemon::{DaemonServer, ThinClient};
use cerberus::error::{CerberusError, ExitCode};
use cerberus::incremental::{self, IncrementalUpdater};
use cerberus::indexing::IndexBuilder;
use cerberus::mutation::{EditOperation, MutationEngine, InsertPosition};
use cerberus::retrieval::{HybridRetriever, SearchMode};
use cerberus::scanner::ScanOptions;
use cerberus::semantic::{EmbeddingEngine, FastEmbedEngine};
use cerberus::storage::IndexStore;
use cerberus::types::SymbolKind;
use cerberus::watcher::FileWatcher;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cerberus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persistent code intelligence: index, search, and surgically edit a repository")]
struct Cli {
    /// Index directory (overrides config)
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Emit machine-readable JSON only
    #[arg(long, global = true, env = "CERBERUS_MACHINE_OUTPUT")]
    machine: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .cerberus workspace configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },

    /// Scan a repository and build (or refresh) the index
    Scan {
        /// Repository root
        root: PathBuf,

        /// Skip files whose mtime is unchanged
        #[arg(long)]
        incremental: bool,

        /// Generate embeddings for semantic search
        #[arg(long)]
        embeddings: bool,

        /// Skip files larger than this many bytes
        #[arg(long)]
        max_bytes: Option<u64>,
    },

    /// Apply a git-diff-driven incremental update
    Update {
        /// Repository root (defaults to the indexed project root)
        root: Option<PathBuf>,
    },

    /// Hybrid search over the index
    Search {
        query: String,

        /// keyword | semantic | balanced | auto
        #[arg(long, default_value = "auto")]
        mode: String,

        #[arg(long, default_value = "10")]
        top_k: usize,
    },

    /// Look up a symbol by name
    Symbol {
        name: String,

        /// Restrict to a file path substring
        #[arg(long)]
        file: Option<String>,
    },

    /// Generate a blueprint for one file (or aggregate a directory)
    Blueprint {
        path: String,

        #[arg(long)]
        deps: bool,

        /// Complexity metrics
        #[arg(long)]
        meta: bool,

        #[arg(long)]
        churn: bool,

        /// Path to a coverage JSON report
        #[arg(long)]
        coverage: Option<PathBuf>,

        #[arg(long)]
        stability: bool,

        #[arg(long)]
        cycles: bool,

        #[arg(long)]
        hydrate: bool,

        /// Annotate against a git ref
        #[arg(long)]
        diff: Option<String>,

        /// Treat the path as a directory and aggregate
        #[arg(long)]
        aggregate: bool,
    },

    /// Replace a symbol's code
    Edit {
        file: String,
        symbol: String,

        /// Replacement code (inline)
        #[arg(long, conflicts_with = "code_file")]
        code: Option<String>,

        /// Replacement code from a file
        #[arg(long)]
        code_file: Option<PathBuf>,

        #[arg(long = "type")]
        symbol_type: Option<String>,

        #[arg(long = "class")]
        parent_class: Option<String>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Insert new code relative to an existing symbol
    Insert {
        file: String,
        name: String,

        #[arg(long, conflicts_with = "code_file")]
        code: Option<String>,

        #[arg(long)]
        code_file: Option<PathBuf>,

        #[arg(long, conflicts_with = "before")]
        after: Option<String>,

        #[arg(long)]
        before: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Delete a symbol
    Delete {
        file: String,
        symbol: String,

        #[arg(long = "type")]
        symbol_type: Option<String>,

        #[arg(long = "class")]
        parent_class: Option<String>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Run a batch of operations from a JSON file, atomically
    Batch {
        operations: PathBuf,

        /// Shell command that must succeed or the batch rolls back
        #[arg(long)]
        verify: Option<String>,
    },

    /// Revert a recorded mutation transaction
    Undo {
        transaction_id: String,
    },

    /// List recent mutation transactions
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Write-efficiency report over the mutation ledger
    Ledger {
        #[arg(long, default_value = "500")]
        limit: usize,
    },

    /// Forward or reverse call graph for a symbol
    Callgraph {
        symbol: String,

        /// forward | reverse
        #[arg(long, default_value = "forward")]
        direction: String,

        #[arg(long, default_value = "10")]
        depth: usize,

        #[arg(long, default_value = "200")]
        max_nodes: usize,

        #[arg(long, default_value = "500")]
        max_edges: usize,
    },

    /// Method resolution order (and overridden methods) for a class
    Mro {
        class: String,

        #[arg(long)]
        file: Option<String>,
    },

    /// Infer the type of a variable at a position
    Infer {
        variable: String,

        #[arg(long)]
        file: String,

        #[arg(long)]
        line: u32,
    },

    /// Index statistics
    Stats,

    /// Show the effective configuration
    Config,

    /// Daemon lifecycle and RPC access
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Watch the project and keep the index fresh
    Watch {
        /// Repository root (defaults to the indexed project root)
        root: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Run the daemon in the foreground
    Start {
        root: Option<PathBuf>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Signal a running daemon to stop
    Stop,
    /// Detailed daemon status
    Status,
    /// Liveness probe
    Health,
    /// Send one JSON-RPC call
    Rpc {
        method: String,

        /// Params as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });
    if let Some(index) = &cli.index {
        settings.index_path = index.clone();
    }
    if cli.machine {
        settings.machine_output = true;
    }
    cerberus::logging::init_with_config(&settings.logging, settings.machine_output);
    let settings = Arc::new(settings);

    match run(cli, settings.clone()).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
        Err(e) => {
            if settings.machine_output {
                println!("{}", serde_json::to_string_pretty(&e.to_json()).unwrap_or_default());
            } else {
                eprintln!("Error: {e}");
                for hint in e.recovery_suggestions() {
                    eprintln!("  hint: {hint}");
                }
            }
            std::process::exit(e.exit_code().code());
        }
    }
}

async fn run(cli: Cli, settings: Arc<Settings>) -> cerberus::Result<serde_json::Value> {
    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| CerberusError::Config { reason: e.to_string() })?;
            Ok(serde_json::json!({"created": path}))
        }

        Commands::Config => Ok(serde_json::to_value(settings.as_ref())?),

        Commands::Scan {
            root,
            incremental,
            embeddings,
            max_bytes,
        } => {
            let store = Arc::new(IndexStore::open(
                &settings.index_path,
                settings.embedding.dimension,
            )?);
            let embedder = if embeddings || settings.embedding.enabled {
                Some(make_embedder()?)
            } else {
                None
            };
            let builder = IndexBuilder::new(settings.clone(), store.clone(), embedder);
            let report = builder.build(
                &root,
                ScanOptions {
                    incremental,
                    max_bytes,
                    ..Default::default()
                },
            )?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::Update { root } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, root)?;
            let changes = incremental::detect_changes(&store, &root)?;
            let updater = IncrementalUpdater::new(settings.clone(), store.clone());
            let result = updater.apply(&root, &changes)?;
            Ok(serde_json::to_value(result)?)
        }

        Commands::Search { query, mode, top_k } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let mode = SearchMode::parse(&mode).ok_or_else(|| CerberusError::Config {
                reason: format!("unknown search mode '{mode}'"),
            })?;

            // Route through a live daemon when one answers the probe.
            let client = ThinClient::new(&settings);
            let params = serde_json::json!({
                "query": query.clone(),
                "mode": mode,
                "top_k": top_k,
            });
            let settings_inner = settings.clone();
            client
                .auto_route(&root, "search", params, move || {
                    let embedder = embedder_if_available(&settings_inner, &store);
                    let retriever = HybridRetriever::new(settings_inner, store, embedder);
                    let results = retriever.search(&query, mode, top_k)?;
                    Ok(serde_json::to_value(results)?)
                })
                .await
        }

        Commands::Symbol { name, file } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let client = ThinClient::new(&settings);
            let params = serde_json::json!({"name": name.clone(), "file": file.clone()});
            client
                .auto_route(&root, "get_symbol", params, move || {
                    let mut matches = store.sqlite.query_symbols(&cerberus::storage::SymbolFilter {
                        name: Some(&name),
                        ..Default::default()
                    })?;
                    if let Some(filter) = &file {
                        matches.retain(|s| s.file_path.contains(filter.as_str()));
                    }
                    let count = matches.len();
                    Ok(serde_json::json!({
                        "found": count > 0,
                        "symbol": name,
                        "matches": matches,
                        "count": count,
                    }))
                })
                .await
        }

        Commands::Blueprint {
            path,
            deps,
            meta,
            churn,
            coverage,
            stability,
            cycles,
            hydrate,
            diff,
            aggregate,
        } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let engine = BlueprintEngine::new(store, &root);
            let flags = BlueprintFlags {
                deps,
                complexity: meta,
                churn,
                coverage,
                stability,
                cycles,
                hydrate,
                diff_ref: diff,
            };
            if aggregate {
                Ok(serde_json::to_value(engine.aggregate(&path, &flags)?)?)
            } else {
                Ok(serde_json::to_value(engine.generate(&path, &flags)?)?)
            }
        }

        Commands::Edit {
            file,
            symbol,
            code,
            code_file,
            symbol_type,
            parent_class,
            force,
            dry_run,
        } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let new_code = load_code(code, code_file)?;
            let engine = MutationEngine::new(settings.clone(), store, &root)?;
            let result = engine.edit(
                &file,
                &symbol,
                &new_code,
                parse_kind(symbol_type)?,
                parent_class.as_deref(),
                force,
                dry_run,
            )?;
            Ok(serde_json::to_value(result)?)
        }

        Commands::Insert {
            file,
            name,
            code,
            code_file,
            after,
            before,
            dry_run,
        } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let new_code = load_code(code, code_file)?;
            let engine = MutationEngine::new(settings.clone(), store, &root)?;
            let result = engine.insert(
                &file,
                &name,
                &new_code,
                &InsertPosition {
                    after_symbol: after,
                    before_symbol: before,
                },
                dry_run,
            )?;
            Ok(serde_json::to_value(result)?)
        }

        Commands::Delete {
            file,
            symbol,
            symbol_type,
            parent_class,
            force,
            dry_run,
        } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let engine = MutationEngine::new(settings.clone(), store, &root)?;
            let result = engine.delete(
                &file,
                &symbol,
                parse_kind(symbol_type)?,
                parent_class.as_deref(),
                force,
                dry_run,
            )?;
            Ok(serde_json::to_value(result)?)
        }

        Commands::Batch { operations, verify } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let raw = std::fs::read_to_string(&operations)?;
            let operations: Vec<EditOperation> = serde_json::from_str(&raw)?;
            let engine = MutationEngine::new(settings.clone(), store, &root)?;
            let result = engine.batch(&operations, verify.as_deref())?;
            if !result.success {
                // Batch failures are guard/validation territory.
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::to_value(&result)?)?
                );
                std::process::exit(ExitCode::Blocked.code());
            }
            Ok(serde_json::to_value(result)?)
        }

        Commands::Undo { transaction_id } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let engine = MutationEngine::new(settings.clone(), store, &root)?;
            let restored = engine.undo(&transaction_id)?;
            Ok(serde_json::json!({"restored": restored}))
        }

        Commands::History { limit } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let engine = MutationEngine::new(settings.clone(), store, &root)?;
            let history = engine.undo_stack().history(limit)?;
            let entries: Vec<serde_json::Value> = history
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "transaction_id": t.transaction_id,
                        "timestamp": t.timestamp,
                        "operation_type": t.operation_type,
                        "files": t.files,
                    })
                })
                .collect();
            Ok(serde_json::json!({"transactions": entries}))
        }

        Commands::Ledger { limit } => {
            let store = open_existing(&settings)?;
            let ledger = cerberus::mutation::DiffLedger::new(&store.sqlite);
            Ok(serde_json::to_value(ledger.report(limit)?)?)
        }

        Commands::Callgraph {
            symbol,
            direction,
            depth,
            max_nodes,
            max_edges,
        } => {
            let store = open_existing(&settings)?;
            let direction = match direction.as_str() {
                "forward" => cerberus::resolution::Direction::Forward,
                "reverse" => cerberus::resolution::Direction::Reverse,
                other => {
                    return Err(CerberusError::Config {
                        reason: format!("unknown direction '{other}'"),
                    });
                }
            };
            let builder = cerberus::resolution::CallGraphBuilder::new(&store.sqlite)?;
            let graph = builder.build(
                &symbol,
                direction,
                cerberus::resolution::CallGraphLimits {
                    max_depth: depth,
                    max_nodes,
                    max_edges,
                },
            )?;
            Ok(serde_json::to_value(graph)?)
        }

        Commands::Mro { class, file } => {
            let store = open_existing(&settings)?;
            let calculator = cerberus::resolution::MroCalculator::new(&store.sqlite);
            let mro = calculator.compute_mro(&class, file.as_deref())?;
            let overrides = calculator.overridden_methods(&class, file.as_deref())?;
            let descendants = calculator.descendants(&class)?;
            Ok(serde_json::json!({
                "class": class,
                "mro": mro,
                "overridden_methods": overrides,
                "descendants": descendants,
            }))
        }

        Commands::Infer {
            variable,
            file,
            line,
        } => {
            let store = open_existing(&settings)?;
            let inferred =
                cerberus::resolution::infer_type(&store.sqlite, &variable, &file, line)?;
            Ok(serde_json::json!({
                "variable": variable,
                "file": file,
                "line": line,
                "inferred": inferred,
            }))
        }

        Commands::Stats => {
            let store = open_existing(&settings)?;
            store.verify_integrity()?;
            Ok(serde_json::to_value(store.sqlite.get_stats()?)?)
        }

        Commands::Daemon { action } => run_daemon_action(action, settings).await,

        Commands::Watch { root } => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, root)?;
            let watcher = FileWatcher::spawn(settings.clone(), store, &root)?;
            eprintln!("Watching {} (ctrl-c to stop)", root.display());
            tokio::signal::ctrl_c().await.ok();
            let stats = watcher.stats();
            watcher.stop();
            Ok(serde_json::to_value(stats)?)
        }
    }
}

async fn run_daemon_action(
    action: DaemonAction,
    settings: Arc<Settings>,
) -> cerberus::Result<serde_json::Value> {
    match action {
        DaemonAction::Start { root, port } => {
            let mut settings = (*settings).clone();
            if let Some(port) = port {
                settings.daemon.port = port;
            }
            let settings = Arc::new(settings);
            let store = Arc::new(IndexStore::open_existing(
                &settings.index_path,
                settings.embedding.dimension,
            )?);
            let root = resolve_root(&store, root)?;
            let embedder = embedder_if_available(&settings, &store);
            DaemonServer::new(settings, store, embedder, &root)
                .run()
                .await?;
            Ok(serde_json::json!({"stopped": true}))
        }

        DaemonAction::Stop => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            match cerberus::daemon::daemon_pid_if_running(&root) {
                Some(pid) => {
                    #[cfg(unix)]
                    {
                        let status = std::process::Command::new("kill")
                            .args(["-TERM", &pid.to_string()])
                            .status();
                        match status {
                            Ok(s) if s.success() => {
                                Ok(serde_json::json!({"stopped": true, "pid": pid}))
                            }
                            _ => Err(CerberusError::Daemon {
                                reason: format!("failed to signal pid {pid}"),
                            }),
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        Err(CerberusError::Daemon {
                            reason: format!("stop not supported on this platform (pid {pid})"),
                        })
                    }
                }
                None => Ok(serde_json::json!({"stopped": false, "reason": "not running"})),
            }
        }

        DaemonAction::Status => {
            let client = ThinClient::new(&settings);
            client.status().await
        }

        DaemonAction::Health => {
            let store = open_existing(&settings)?;
            let root = resolve_root(&store, None)?;
            let client = ThinClient::new(&settings);
            let available = client.is_daemon_available(&root).await;
            Ok(serde_json::json!({"healthy": available}))
        }

        DaemonAction::Rpc { method, params } => {
            let params = match params {
                Some(raw) => serde_json::from_str(&raw)?,
                None => serde_json::json!({}),
            };
            let client = ThinClient::new(&settings);
            client.call(&method, params).await
        }
    }
}

fn open_existing(settings: &Settings) -> cerberus::Result<Arc<IndexStore>> {
    Ok(Arc::new(IndexStore::open_existing(
        &settings.index_path,
        settings.embedding.dimension,
    )?))
}

/// The project root is recorded in the index at scan time.
fn resolve_root(store: &IndexStore, explicit: Option<PathBuf>) -> cerberus::Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    store
        .sqlite
        .get_metadata("project_root")?
        .map(PathBuf::from)
        .ok_or_else(|| CerberusError::IndexCorrupted {
            reason: "index has no recorded project_root".into(),
        })
}

fn make_embedder() -> cerberus::Result<Arc<dyn EmbeddingEngine>> {
    let engine = FastEmbedEngine::new()
        .map_err(|e| CerberusError::General(format!("embedding engine unavailable: {e}")))?;
    Ok(Arc::new(engine))
}

/// For read paths, a missing embedding model degrades to keyword-only.
fn embedder_if_available(
    settings: &Arc<Settings>,
    store: &Arc<IndexStore>,
) -> Option<Arc<dyn EmbeddingEngine>> {
    if !settings.embedding.enabled && store.vectors.lock().is_empty() {
        return None;
    }
    match FastEmbedEngine::new() {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            tracing::warn!("semantic search disabled: {e}");
            None
        }
    }
}

fn load_code(code: Option<String>, code_file: Option<PathBuf>) -> cerberus::Result<String> {
    match (code, code_file) {
        (Some(inline), _) => Ok(inline),
        (None, Some(path)) => Ok(std::fs::read_to_string(&path).map_err(|e| {
            CerberusError::FileRead { path, source: e }
        })?),
        (None, None) => Err(CerberusError::Config {
            reason: "either --code or --code-file is required".into(),
        }),
    }
}

fn parse_kind(raw: Option<String>) -> cerberus::Result<Option<SymbolKind>> {
    match raw {
        None => Ok(None),
        Some(raw) => SymbolKind::parse(&raw)
            .map(Some)
            .ok_or_else(|| CerberusError::Config {
                reason: format!("unknown symbol type '{raw}'"),
            }),
    }
}
