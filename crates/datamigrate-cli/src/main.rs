//! datamigrate CLI - migrate tables between record stores.

use clap::{ArgAction, Parser};
use datamigrate::state::DEFAULT_SNAPSHOT_DIR;
use datamigrate::{
    open_store, Config, MigrateError, MigrationConfig, MigrationEngine, MigrationMode,
    MigrationResult, RollbackManager, SnapshotStore, StoreClient, Validator,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Config file read when `--config` is not given.
const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "datamigrate")]
#[command(about = "Migrate tables between record stores with validation and rollback")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file [default: config.yaml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source store identifier
    #[arg(long)]
    source: Option<String>,

    /// Target store identifier
    #[arg(long)]
    target: Option<String>,

    /// Migration mode: full, incremental, scheduled
    #[arg(long)]
    mode: Option<MigrationMode>,

    /// Comma-separated tables to migrate (default: config, then all source tables)
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Override number of workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override records per import batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Fetch tables concurrently
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true", action = ArgAction::Set)]
    concurrent: Option<bool>,

    /// Validate source and target before and after transfer
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true", action = ArgAction::Set)]
    validate: Option<bool>,

    /// Capture a rollback snapshot before writing
    #[arg(long)]
    backup: bool,

    /// Validate and show plan without transferring data
    #[arg(long)]
    dry_run: bool,

    /// Roll back the migration recorded in a snapshot
    #[arg(long, value_name = "SNAPSHOT_ID")]
    rollback: Option<String>,

    /// List rollback snapshots
    #[arg(long)]
    list_snapshots: bool,

    /// Delete completed snapshots older than AGE (e.g. 30d, 12h, 1h30m)
    #[arg(long, value_name = "AGE", value_parser = parse_duration)]
    cleanup_snapshots: Option<Duration>,

    /// Snapshot directory [default: migration_snapshots]
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    let snapshot_dir = cli
        .snapshot_dir
        .clone()
        .or_else(|| config.migration.snapshot_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR));

    if let Some(id) = &cli.rollback {
        return rollback(&config, &cli, &snapshot_dir, id).await;
    }
    if cli.list_snapshots {
        return list_snapshots(&snapshot_dir, cli.output_json);
    }
    if let Some(max_age) = cli.cleanup_snapshots {
        let removed = SnapshotStore::new(&snapshot_dir).cleanup_older_than(max_age)?;
        println!("Removed {} snapshot(s) from {}", removed, snapshot_dir.display());
        return Ok(());
    }

    migrate(config, &cli, snapshot_dir).await
}

fn load_config(path: Option<&Path>) -> Result<Config, MigrateError> {
    let config = match path {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            let config = Config::load(DEFAULT_CONFIG)?;
            info!("Loaded configuration from {}", DEFAULT_CONFIG);
            config
        }
        None => Config::default(),
    };
    Ok(config.with_auto_tuning())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    let settings = &mut config.migration;
    if let Some(mode) = cli.mode {
        settings.mode = mode;
    }
    if let Some(source) = &cli.source {
        settings.source = Some(source.clone());
    }
    if let Some(target) = &cli.target {
        settings.target = Some(target.clone());
    }
    if !cli.tables.is_empty() {
        settings.tables = cli.tables.clone();
    }
    if let Some(w) = cli.workers {
        settings.workers = Some(w);
    }
    if let Some(size) = cli.batch_size {
        settings.batch_size = Some(size);
    }
    if let Some(concurrent) = cli.concurrent {
        settings.concurrent = concurrent;
    }
    if let Some(validate) = cli.validate {
        settings.validate = validate;
    }
    if cli.backup {
        settings.backup = true;
    }
}

async fn connect_store(config: &Config, id: &str) -> Result<Arc<dyn StoreClient>, MigrateError> {
    let client = open_store(id, config.store(id)?)?;
    client.connect().await?;
    info!("Connected to store {}", id);
    Ok(client)
}

async fn close_store(client: &Arc<dyn StoreClient>) {
    if let Err(e) = client.close().await {
        warn!("Failed to close store {}: {}", client.name(), e);
    }
}

async fn migrate(config: Config, cli: &Cli, snapshot_dir: PathBuf) -> Result<(), MigrateError> {
    let settings = &config.migration;
    let source_id = settings
        .source
        .clone()
        .ok_or_else(|| MigrateError::Config("--source is required".to_string()))?;
    let target_id = settings
        .target
        .clone()
        .ok_or_else(|| MigrateError::Config("--target is required".to_string()))?;

    let source = connect_store(&config, &source_id).await?;
    let target = connect_store(&config, &target_id).await?;

    let tables = if settings.tables.is_empty() {
        let discovered = source.list_tables().await?;
        info!("Discovered {} tables in {}", discovered.len(), source_id);
        discovered
    } else {
        settings.tables.clone()
    };
    if tables.is_empty() {
        return Err(MigrateError::Config(format!(
            "no tables to migrate in store {}",
            source_id
        )));
    }

    let migration = settings.to_migration_config(&source_id, &target_id, tables);

    if cli.dry_run {
        let outcome = dry_run(&migration, &source, &target, cli.output_json).await;
        close_store(&source).await;
        close_store(&target).await;
        return outcome;
    }

    let cancel_token = setup_signal_handler();
    let engine = MigrationEngine::new(migration, Arc::clone(&source), Arc::clone(&target))?
        .with_snapshot_dir(snapshot_dir)
        .with_cancellation(cancel_token);

    let outcome = engine.execute().await;
    close_store(&source).await;
    close_store(&target).await;

    match outcome {
        Ok(result) => {
            print_result(&result, cli.output_json)?;
            Ok(())
        }
        Err(failure) => {
            print_result(&failure.result, cli.output_json)?;
            if let Some(id) = &failure.result.snapshot_id {
                eprintln!("To undo partial writes run: datamigrate --rollback {}", id);
            }
            Err(failure.error)
        }
    }
}

async fn dry_run(
    migration: &MigrationConfig,
    source: &Arc<dyn StoreClient>,
    target: &Arc<dyn StoreClient>,
    output_json: bool,
) -> Result<(), MigrateError> {
    migration.validate()?;

    let pre = if migration.validate_data {
        Validator::new(Arc::clone(source), Arc::clone(target))
            .with_sample_size(migration.sample_size)
            .with_primary_keys(migration.primary_keys.clone())
            .pre_migration_validation(&migration.tables)
            .await?
    } else {
        Vec::new()
    };

    if output_json {
        let plan = serde_json::json!({
            "dry_run": true,
            "config": migration,
            "pre_validation": pre,
        });
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("\nDry run: {} -> {}", migration.source_db, migration.target_db);
        println!("  Mode: {}", migration.mode);
        println!("  Tables: {}", migration.tables.join(", "));
        println!("  Workers: {}", migration.workers);
        println!("  Batch size: {}", migration.batch_size);
        println!("  Concurrent: {}", migration.concurrent);
        println!("  Backup: {}", migration.create_backup);
        for result in &pre {
            match &result.error {
                None => println!("  ✓ {} ({} rows)", result.table_name, result.row_count),
                Some(err) => println!("  ✗ {}: {}", result.table_name, err),
            }
        }
    }

    if pre.iter().any(|r| !r.is_valid) {
        return Err(MigrateError::Validation(
            "dry run: pre-migration validation failed".to_string(),
        ));
    }
    Ok(())
}

fn print_result(result: &MigrationResult, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    let status_msg = if result.success {
        "Migration completed!"
    } else {
        "Migration failed!"
    };
    println!("\n{}", status_msg);
    println!("  Mode: {}", result.mode);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}", result.tables_processed);
    println!("  Rows: {}", result.rows_migrated);
    println!("  Throughput: {:.0} rows/sec", result.rows_per_second);
    if let Some(id) = &result.snapshot_id {
        println!("  Snapshot: {}", id);
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
    Ok(())
}

async fn rollback(
    config: &Config,
    cli: &Cli,
    snapshot_dir: &Path,
    id: &str,
) -> Result<(), MigrateError> {
    let store = SnapshotStore::new(snapshot_dir);
    let snapshot = store.load(id)?;

    let target_id = cli.target.clone().unwrap_or_else(|| snapshot.target_db.clone());
    let target = connect_store(config, &target_id).await?;

    let outcome = RollbackManager::new(Arc::clone(&target), store)
        .roll_back_migration(id)
        .await;
    close_store(&target).await;
    outcome?;

    println!("Rolled back migration {} on {}", id, target_id);
    Ok(())
}

fn list_snapshots(snapshot_dir: &Path, output_json: bool) -> Result<(), MigrateError> {
    let snapshots = SnapshotStore::new(snapshot_dir).list()?;

    if output_json {
        let entries: Vec<_> = snapshots
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "timestamp": s.timestamp,
                    "source_db": s.source_db,
                    "target_db": s.target_db,
                    "status": s.status,
                    "tables": s.tables,
                    "migrated_rows": s.migrated_rows(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No snapshots found in {}", snapshot_dir.display());
        return Ok(());
    }

    println!("Snapshots in {}:", snapshot_dir.display());
    for s in &snapshots {
        println!(
            "  {}  {}  {} -> {}  {} tables, {} rows  [{}]",
            s.id,
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            s.source_db,
            s.target_db,
            s.tables.len(),
            s.migrated_rows(),
            s.status
        );
    }
    Ok(())
}

/// Parse an age like `30s`, `15m`, `12h`, `30d` or `1h30m`.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration is empty".to_string());
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(format!("unknown unit '{}' in '{}'", c, input)),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}' in '{}'", c, input))?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("duration '{}' is too large", input))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("missing unit after '{}' in '{}'", digits, input));
    }

    Ok(Duration::from_secs(total))
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Returns a token cancelled on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install signal handlers: {}", e);
                    return;
                }
            };
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping after the current batch...", name);
        token.cancel();
    });

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
