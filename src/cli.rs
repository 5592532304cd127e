//! Command-line parsing and subcommand handlers

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::Confirm;
use tracing::{error, info, warn};

use common::error::Error;
use common::utils::{format_bytes, parse_key_value};
use model_artifact_store::{ArtifactStore, StorageClass};
use model_manager::{CatalogEntry, CatalogFilter, Framework, ModelVersion, Precision, Task};
use resource_manager::{CleanupResult, NoUsageData, StaticUsage, UsageSource};
use store_config::StoreConfig;

/// Model artifact store
#[derive(Parser, Debug)]
#[command(name = "model-store", about = "Catalog, version and clean up model artifacts", version)]
pub struct Cli {
    /// Configuration file
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage catalog entries
    Catalog {
        #[command(subcommand)]
        action: CatalogCommand,
    },
    /// Manage artifact versions
    Versions {
        #[command(subcommand)]
        action: VersionsCommand,
    },
    /// Inspect and maintain storage classes
    Storage {
        #[command(subcommand)]
        action: StorageCommand,
    },
    /// Apply retention policies
    Cleanup {
        #[command(subcommand)]
        action: CleanupCommand,
    },
    /// Manage document backups
    Backups {
        #[command(subcommand)]
        action: BackupsCommand,
    },
}

/// Catalog subcommands
#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// List entries, optionally filtered
    List {
        #[arg(long)]
        framework: Option<Framework>,
        #[arg(long)]
        task: Option<Task>,
        #[arg(long)]
        precision: Option<Precision>,
        /// Required tags, comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Show one entry as JSON
    Show { name: String, version: String },
    /// Search names, descriptions and tags
    Search { query: String },
    /// Show tag usage counts
    Tags,
    /// Delete an entry and its artifacts
    Delete {
        name: String,
        version: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Add an entry from a JSON file
    Add { file: PathBuf },
}

/// Version subcommands
#[derive(Subcommand, Debug)]
pub enum VersionsCommand {
    /// Store a directory or file as the next version
    Add {
        model: String,
        source: PathBuf,
        /// Metric as key=value, repeatable
        #[arg(long = "metric", value_parser = parse_metric)]
        metrics: Vec<(String, f64)>,
        /// Annotation as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// List versions of a model
    List { model: String },
    /// Make a version active
    Activate { model: String, version: u32 },
    /// Activate the previous version, or `--to` a given one
    Rollback {
        model: String,
        #[arg(long)]
        to: Option<u32>,
    },
    /// Print the directory of a version, the active one by default
    Path {
        model: String,
        #[arg(long)]
        version: Option<u32>,
    },
}

/// Storage subcommands
#[derive(Subcommand, Debug)]
pub enum StorageCommand {
    /// Show usage per storage class
    Info,
    /// Move a model directory between storage classes
    Move {
        model: String,
        #[arg(long)]
        from: StorageClass,
        #[arg(long)]
        to: StorageClass,
    },
    /// Copy the whole storage tree into a timestamped backup
    Backup {
        /// Directory receiving the backup, outside the storage tree
        dir: PathBuf,
    },
}

/// Cleanup subcommands
#[derive(Subcommand, Debug)]
pub enum CleanupCommand {
    /// Run the configured policies
    Run {
        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
        /// JSON object of request counts per model
        #[arg(long)]
        usage_file: Option<PathBuf>,
        /// Repeat every N seconds until interrupted
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        every: Option<u64>,
    },
}

/// Backup subcommands
#[derive(Subcommand, Debug)]
pub enum BackupsCommand {
    /// Delete all but the newest backups of each document
    Prune {
        /// Backups to keep, defaults to the configured limit
        #[arg(long)]
        max: Option<usize>,
    },
}

impl Command {
    /// Opens the store and dispatches the subcommand
    pub async fn run(self, config: &StoreConfig) -> Result<()> {
        match self {
            Self::Catalog { action } => action.run(&open(config)?),
            Self::Versions { action } => action.run(&open(config)?),
            Self::Storage { action } => action.run(&open(config)?),
            Self::Cleanup { action } => action.run(config).await,
            Self::Backups { action } => action.run(&open(config)?),
        }
    }
}

fn open(config: &StoreConfig) -> Result<ArtifactStore> {
    ArtifactStore::open(config).context("failed to open artifact store")
}

impl CatalogCommand {
    fn run(self, store: &ArtifactStore) -> Result<()> {
        let catalog = store.catalog();

        match self {
            Self::List {
                framework,
                task,
                precision,
                tags,
            } => {
                let filter = CatalogFilter {
                    framework,
                    task,
                    precision,
                    tags: if tags.is_empty() {
                        None
                    } else {
                        Some(tags.iter().map(|t| t.trim()).collect())
                    },
                };
                print_entries(&catalog.list(&filter));
            }
            Self::Show { name, version } => match catalog.get(&name, &version) {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => bail!("model {}:{} not found", name, version),
            },
            Self::Search { query } => print_entries(&catalog.search(&query)),
            Self::Tags => {
                let frequencies = catalog.tag_frequencies();
                if frequencies.is_empty() {
                    println!("No tags.");
                }
                for (tag, count) in frequencies {
                    println!("  {:<24} {}", style(tag).cyan(), count);
                }
            }
            Self::Delete {
                name,
                version,
                force,
            } => {
                if !force {
                    let confirmed = Confirm::new()
                        .with_prompt(format!("Delete {}:{} and its artifacts?", name, version))
                        .default(false)
                        .interact()?;
                    if !confirmed {
                        println!("Aborted.");
                        return Ok(());
                    }
                }
                store.delete_model(&name, &version)?;
                println!("{} {}:{}", style("Deleted").green(), name, version);
            }
            Self::Add { file } => {
                let contents = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let entry: CatalogEntry = serde_json::from_str(&contents)
                    .with_context(|| format!("{} is not a catalog entry", file.display()))?;
                let added = catalog.add(entry)?;
                println!("{} {}", style("Added").green(), added.key());
            }
        }

        Ok(())
    }
}

impl VersionsCommand {
    fn run(self, store: &ArtifactStore) -> Result<()> {
        let versions = store.versions();

        match self {
            Self::Add {
                model,
                source,
                metrics,
                meta,
            } => {
                let metrics: BTreeMap<String, f64> = metrics.into_iter().collect();
                let meta: BTreeMap<String, String> = meta.into_iter().collect();
                let added = versions.add_version(
                    &model,
                    &source,
                    (!metrics.is_empty()).then_some(metrics),
                    (!meta.is_empty()).then_some(meta),
                )?;
                println!("{} version {} of {}", style("Added").green(), added.version, model);
            }
            Self::List { model } => {
                let list = versions.list_versions(&model);
                if list.is_empty() {
                    println!("No versions of {}.", model);
                }
                for version in &list {
                    print_version(version);
                }
            }
            Self::Activate { model, version } => {
                versions.activate_version(&model, version)?;
                println!("{} version {} of {}", style("Activated").green(), version, model);
            }
            Self::Rollback { model, to } => {
                let active = versions.rollback(&model, to)?;
                println!("{} {} to version {}", style("Rolled back").green(), model, active.version);
            }
            Self::Path { model, version } => {
                println!("{}", versions.get_version_path(&model, version)?.display());
            }
        }

        Ok(())
    }
}

impl StorageCommand {
    fn run(self, store: &ArtifactStore) -> Result<()> {
        match self {
            Self::Info => {
                let info = store.storage_info()?;
                for class in &info.classes {
                    println!(
                        "{:<11} {:>12} {:>8} files {:>6} models  {}",
                        style(class.class).bold(),
                        format_bytes(class.usage_bytes),
                        class.file_count,
                        class.model_count,
                        style(class.path.display()).dim()
                    );
                }
                println!("{:<11} {:>12}", style("total").bold(), format_bytes(info.total_bytes()));
            }
            Self::Move { model, from, to } => {
                let target = store.move_model(&model, from, to)?;
                println!("{} {} -> {}", style("Moved").green(), model, target.display());
            }
            Self::Backup { dir } => {
                let target = store.backup_storage(&dir)?;
                println!("{} {}", style("Backup created at").green(), target.display());
            }
        }

        Ok(())
    }
}

impl CleanupCommand {
    async fn run(self, config: &StoreConfig) -> Result<()> {
        match self {
            Self::Run {
                dry_run,
                usage_file,
                every,
            } => {
                let usage: Arc<dyn UsageSource> = match &usage_file {
                    Some(path) => Arc::new(StaticUsage::from_file(path)?),
                    None => Arc::new(NoUsageData),
                };
                let store = Arc::new(
                    ArtifactStore::open_with_usage(config, usage)
                        .context("failed to open artifact store")?,
                );

                match every {
                    Some(seconds) => run_periodic(store, dry_run, seconds).await,
                    None => {
                        let result = tokio::task::spawn_blocking(move || store.cleanup().run_cleanup(dry_run))
                            .await??;
                        print_cleanup(&result);
                        Ok(())
                    }
                }
            }
        }
    }
}

async fn run_periodic(store: Arc<ArtifactStore>, dry_run: bool, seconds: u64) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!("Running cleanup every {}s, press Ctrl+C to stop", seconds);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.cleanup().run_cleanup(dry_run)).await? {
                    Ok(result) => print_cleanup(&result),
                    Err(Error::Busy(reason)) => warn!("Skipping cleanup tick: {}", reason),
                    Err(e) => error!("Cleanup run failed: {}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Stopping periodic cleanup");
                return Ok(());
            }
        }
    }
}

impl BackupsCommand {
    fn run(self, store: &ArtifactStore) -> Result<()> {
        match self {
            Self::Prune { max } => {
                let max = max.unwrap_or(store.config().storage.max_backups);
                let removed = store.prune_backups(max)?;
                println!("Removed {} backup(s), keeping at most {} per document", removed, max);
            }
        }

        Ok(())
    }
}

fn print_entries(entries: &[CatalogEntry]) {
    if entries.is_empty() {
        println!("No models.");
        return;
    }

    for entry in entries {
        let metadata = &entry.metadata;
        println!(
            "  {:<32} {:<10} {:<14} {:<5} {}",
            style(entry.key()).cyan(),
            metadata.framework,
            metadata.task,
            metadata.precision,
            style(metadata.tags.joined()).dim()
        );
    }
}

fn print_version(version: &ModelVersion) {
    let marker = if version.is_active {
        style("*").green().to_string()
    } else {
        " ".to_string()
    };
    let metrics = version
        .metrics
        .as_ref()
        .map(|m| {
            m.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    println!(
        "{} {:>4}  {}  {}",
        marker,
        version.version,
        version.created_at.format("%Y-%m-%d %H:%M:%S"),
        style(metrics).dim()
    );
}

fn print_cleanup(result: &CleanupResult) {
    let heading = if result.dry_run {
        style("Cleanup dry run").yellow()
    } else {
        style("Cleanup").green()
    };
    println!(
        "{}: {} cleaned, {} failed, {} would be removed, {} freed",
        heading,
        result.cleaned_models.len(),
        result.failed_models.len(),
        result.skipped_models.len(),
        format_bytes(result.total_space_freed)
    );

    for path in &result.cleaned_models {
        println!("  {} {}", style("removed").green(), path.display());
    }
    for path in &result.skipped_models {
        println!("  {} {}", style("candidate").yellow(), path.display());
    }
    for path in &result.failed_models {
        println!("  {} {}", style("failed").red(), path.display());
    }
}

fn parse_metric(s: &str) -> std::result::Result<(String, f64), String> {
    let (key, value) = parse_key_value(s).map_err(|e| e.to_string())?;
    let value = value
        .parse::<f64>()
        .map_err(|e| format!("metric {} is not a number: {}", key, e))?;
    Ok((key, value))
}

fn parse_meta(s: &str) -> std::result::Result<(String, String), String> {
    parse_key_value(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_versions_add() {
        let cli = Cli::parse_from([
            "model-store",
            "versions",
            "add",
            "bert",
            "./out",
            "--metric",
            "accuracy=0.9",
            "--meta",
            "commit=abc",
        ]);

        match cli.command {
            Command::Versions {
                action: VersionsCommand::Add { model, metrics, meta, .. },
            } => {
                assert_eq!(model, "bert");
                assert_eq!(metrics, vec![("accuracy".to_string(), 0.9)]);
                assert_eq!(meta, vec![("commit".to_string(), "abc".to_string())]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_catalog_list_filters() {
        let cli = Cli::parse_from([
            "model-store",
            "--config",
            "store.toml",
            "catalog",
            "list",
            "--framework",
            "onnx",
            "--tags",
            "nlp,transformer",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("store.toml")));
        match cli.command {
            Command::Catalog {
                action: CatalogCommand::List { framework, tags, .. },
            } => {
                assert_eq!(framework, Some(Framework::Onnx));
                assert_eq!(tags, vec!["nlp", "transformer"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_interval() {
        assert!(Cli::try_parse_from(["model-store", "cleanup", "run", "--every", "0"]).is_err());
    }

    #[test]
    fn test_parse_metric_errors() {
        assert!(parse_metric("accuracy").is_err());
        assert!(parse_metric("accuracy=high").is_err());
    }

    #[test]
    fn test_storage_move_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.storage.base_path = dir.path().join("store");
        let store = ArtifactStore::open(&config).unwrap();

        let raw = config.storage.class_path(StorageClass::Raw).join("bert");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("model.bin"), b"weights").unwrap();

        let cli = Cli::parse_from(["model-store", "storage", "move", "bert", "--from", "raw", "--to", "quantized"]);
        match cli.command {
            Command::Storage { action } => action.run(&store).unwrap(),
            other => panic!("unexpected command: {:?}", other),
        }
        let moved = config.storage.class_path(StorageClass::Quantized).join("bert");
        assert_eq!(std::fs::read(moved.join("model.bin")).unwrap(), b"weights");
        assert!(!raw.exists());

        let again = StorageCommand::Move {
            model: "bert".to_string(),
            from: StorageClass::Raw,
            to: StorageClass::Quantized,
        };
        assert!(again.run(&store).is_err());

        let backups = dir.path().join("backups");
        StorageCommand::Backup { dir: backups.clone() }.run(&store).unwrap();
        let created: Vec<_> = std::fs::read_dir(&backups).unwrap().collect();
        assert_eq!(created.len(), 1);
    }
}
