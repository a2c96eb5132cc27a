//! Graphsmith CLI - build a knowledge graph from text

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use graphsmith_core::KnowledgeEngine;
use graphsmith_core::config::Config;
use graphsmith_core::domain::KnowledgeBase;
use graphsmith_core::domain::merge::MergeStrategy;
use graphsmith_core::domain::task::{Stage, TaskState, TaskStatus};
use graphsmith_core::storage::{FileSnapshotSink, SnapshotSink, decode_snapshot};
use serde_json::json;
use tracing::info;

/// Snapshot file used when neither `--snapshot` nor `storage.snapshot_path` is set
const DEFAULT_SNAPSHOT_FILE: &str = "knowledge.json";

#[derive(Parser)]
#[command(name = "graphsmith")]
#[command(author, version, about = "Build a knowledge graph from text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Snapshot file to read and update
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract knowledge from text and merge it into the snapshot
    Ingest {
        /// Texts to ingest, one task each
        texts: Vec<String>,
        /// Also ingest every non-empty line of this file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Merge strategy for this run (structural or smart)
        #[arg(long)]
        strategy: Option<MergeStrategy>,
    },

    /// Show knowledge base counters
    Stats,

    /// List the schema's classes
    Classes,

    /// Search entities, class nodes, classes and relationships
    Search {
        keyword: String,
        /// Tolerate typos
        #[arg(long)]
        fuzzy: bool,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a node with its neighbors
    Node {
        /// Entity name, `entity:class` or class name
        id: String,
    },

    /// Report entities that violate their class definitions
    Audit,

    /// Export the visualization model as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration
    List,
    /// Reset to defaults
    Reset,
    /// Show the config file path
    Path,
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet { "graphsmith=warn" } else { "graphsmith=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    let snapshot = cli.snapshot;
    match cli.command {
        Commands::Config { action } => cmd_config(action, out),
        Commands::Ingest {
            texts,
            file,
            strategy,
        } => {
            let (config, snapshot) = workspace(snapshot.as_deref())?;
            cmd_ingest(config, &snapshot, texts, file, strategy, out).await
        }
        Commands::Stats => cmd_stats(&workspace(snapshot.as_deref())?.1, out).await,
        Commands::Classes => cmd_classes(&workspace(snapshot.as_deref())?.1, out).await,
        Commands::Search {
            keyword,
            fuzzy,
            limit,
        } => cmd_search(&workspace(snapshot.as_deref())?.1, &keyword, fuzzy, limit, out).await,
        Commands::Node { id } => cmd_node(&workspace(snapshot.as_deref())?.1, &id, out).await,
        Commands::Audit => cmd_audit(&workspace(snapshot.as_deref())?.1, out).await,
        Commands::Export { output } => {
            cmd_export(&workspace(snapshot.as_deref())?.1, output.as_deref(), out).await
        }
    }
}

/// Loaded configuration and the snapshot file it points at
fn workspace(flag: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let config = Config::load()?;
    let snapshot = snapshot_path(flag, &config)?;
    Ok((config, snapshot))
}

fn snapshot_path(flag: Option<&Path>, config: &Config) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = &config.storage.snapshot_path {
        return Ok(path.clone());
    }
    Ok(Config::config_dir()?.join(DEFAULT_SNAPSHOT_FILE))
}

/// The saved knowledge base, or the seed schema when nothing was saved yet
async fn load_knowledge(path: &Path) -> anyhow::Result<KnowledgeBase> {
    if !path.exists() {
        return Ok(KnowledgeBase::seeded()?);
    }
    let bytes = FileSnapshotSink::new(path).read_snapshot().await?;
    let knowledge = decode_snapshot(&bytes)
        .with_context(|| format!("Failed to load snapshot: {}", path.display()))?;
    Ok(knowledge)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn print_status(status: &TaskStatus) {
    let error = status
        .error
        .as_ref()
        .map(|e| format!("  [{}] {}", e.code, e.message))
        .unwrap_or_default();
    println!("{}  {:<9}{}", short_id(&status.id), status.state.as_str(), error);
}

async fn cmd_ingest(
    mut config: Config,
    snapshot: &Path,
    texts: Vec<String>,
    file: Option<PathBuf>,
    strategy: Option<MergeStrategy>,
    out: Output,
) -> anyhow::Result<()> {
    let mut inputs: Vec<String> = texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .collect();
    if let Some(file) = file {
        let contents = tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("Failed to read input file: {}", file.display()))?;
        inputs.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    if inputs.is_empty() {
        bail!("Nothing to ingest. Pass text arguments or --file <path>.");
    }
    if let Some(strategy) = strategy {
        config.merge.strategy = strategy;
    }

    let knowledge = load_knowledge(snapshot).await?;
    let engine = KnowledgeEngine::builder()
        .config(config)
        .knowledge(knowledge)
        .build()?;

    if !out.quiet && !out.json() {
        engine.set_progress_callback(|task_id, stage, update| {
            eprintln!(
                "[{}] {:>3}% {:<13} {}",
                short_id(task_id),
                update.percent,
                stage.as_str(),
                update.message
            );
        });
    }

    engine.start()?;
    let mut ids = Vec::with_capacity(inputs.len());
    for text in &inputs {
        ids.push(engine.submit_task(text).await?);
    }
    let statuses = engine.wait_all().await;
    engine.stop().await?;
    engine.save(snapshot).await?;
    info!(path = %snapshot.display(), tasks = statuses.len(), "Ingest finished");

    let stats = engine.get_statistics().await;
    let failed = statuses
        .iter()
        .filter(|s| s.state == TaskState::Failed)
        .count();

    if out.json() {
        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "status": engine.get_task_status(id).ok(),
                    "merge": engine
                        .get_task_stage_result(id, Stage::Merging)
                        .ok()
                        .flatten()
                        .map(|result| result.payload),
                })
            })
            .collect();
        print_json(&json!({ "tasks": tasks, "statistics": stats }))?;
    } else if !out.quiet {
        for status in &statuses {
            print_status(status);
        }
        println!();
        println!(
            "Classes: {}  Entities: {}  Relationships: {}",
            stats.knowledge.class_count, stats.knowledge.entity_count, stats.knowledge.relationship_count
        );
        println!("Snapshot saved to {}", snapshot.display());
    }

    if failed > 0 {
        bail!("{} of {} tasks failed", failed, statuses.len());
    }
    Ok(())
}

async fn cmd_stats(snapshot: &Path, out: Output) -> anyhow::Result<()> {
    let stats = load_knowledge(snapshot).await?.stats();
    if out.json() {
        return print_json(&serde_json::to_value(stats)?);
    }

    println!("Classes:          {}", stats.class_count);
    println!("Entities:         {}", stats.entity_count);
    println!("Relationships:    {}", stats.relationship_count);
    println!("Class nodes:      {}", stats.class_node_count);
    println!("Predefined:       {}", stats.predefined_entity_count);
    if !out.quiet {
        println!();
        println!("Snapshot: {}", snapshot.display());
    }
    Ok(())
}

async fn cmd_classes(snapshot: &Path, out: Output) -> anyhow::Result<()> {
    let knowledge = load_knowledge(snapshot).await?;
    if out.json() {
        return print_json(&knowledge.system.catalog_json());
    }

    for class in knowledge.system.get_all_classes() {
        println!("{} - {}", class.name, class.description);
        for property in &class.properties {
            let mut flags = Vec::new();
            if property.required {
                flags.push("required");
            }
            if property.value_required {
                flags.push("value required");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            };
            println!("    {}{}: {}", property.name, flags, property.description);
        }
    }
    Ok(())
}

async fn cmd_search(
    snapshot: &Path,
    keyword: &str,
    fuzzy: bool,
    limit: usize,
    out: Output,
) -> anyhow::Result<()> {
    let knowledge = load_knowledge(snapshot).await?;
    let hits = knowledge.query().search(keyword, fuzzy, limit);
    if out.json() {
        return print_json(&serde_json::to_value(&hits)?);
    }

    if hits.is_empty() {
        if !out.quiet {
            println!("No matches for '{}'.", keyword);
        }
        return Ok(());
    }
    for hit in &hits {
        println!(
            "{:<13} {:<30} {:.2}  {}: {}",
            hit.kind.as_str(), hit.node_id, hit.score, hit.context, hit.matched_text
        );
    }
    Ok(())
}

async fn cmd_node(snapshot: &Path, id: &str, out: Output) -> anyhow::Result<()> {
    let knowledge = load_knowledge(snapshot).await?;
    let detail = knowledge.query().node_detail(id)?;
    if out.json() {
        return print_json(&serde_json::to_value(&detail)?);
    }

    let node = &detail.node;
    println!("{} ({})", node.label, node.kind);
    if !node.description.is_empty() {
        println!("  {}", node.description);
    }
    if !node.classes.is_empty() {
        println!("  Classes: {}", node.classes.join(", "));
    }
    for (property, value) in &node.properties {
        println!("  {} = {}", property, value.as_deref().unwrap_or("(no value)"));
    }
    if !detail.edges.is_empty() {
        println!();
        println!("Edges:");
        for edge in &detail.edges {
            let count = edge.count.map(|c| format!(" x{}", c)).unwrap_or_default();
            println!("  {} --{}{}--> {}", edge.source, edge.label, count, edge.target);
        }
    }
    Ok(())
}

async fn cmd_audit(snapshot: &Path, out: Output) -> anyhow::Result<()> {
    let findings = load_knowledge(snapshot).await?.audit();
    if out.json() {
        return print_json(&serde_json::to_value(&findings)?);
    }

    if findings.is_empty() {
        if !out.quiet {
            println!("No issues found.");
        }
        return Ok(());
    }
    for finding in &findings {
        let property = finding
            .property
            .as_deref()
            .map(|p| format!(".{}", p))
            .unwrap_or_default();
        println!("{} [{}{}]: {}", finding.entity, finding.class, property, finding.issue);
    }
    Ok(())
}

async fn cmd_export(snapshot: &Path, output: Option<&Path>, out: Output) -> anyhow::Result<()> {
    let model = load_knowledge(snapshot).await?.to_visualization_model();
    let rendered = serde_json::to_string_pretty(&model)?;

    match output {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            if !out.quiet {
                let summary = model.summary();
                println!(
                    "Exported {} nodes and {} edges to {}",
                    summary.node_count,
                    summary.edge_count,
                    path.display()
                );
            }
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect();
                return print_json(&serde_json::Value::Object(map));
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["graphsmith", "stats", "--format", "json", "--snapshot", "kb.json"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.snapshot.as_deref(), Some(Path::new("kb.json")));
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_ingest_strategy_parses() {
        let cli = Cli::try_parse_from(["graphsmith", "ingest", "hello", "--strategy", "smart"]).unwrap();
        match cli.command {
            Commands::Ingest { texts, strategy, .. } => {
                assert_eq!(texts, vec!["hello".to_string()]);
                assert_eq!(strategy, Some(MergeStrategy::Smart));
            }
            _ => panic!("expected ingest"),
        }
        assert!(Cli::try_parse_from(["graphsmith", "ingest", "--strategy", "eager"]).is_err());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_snapshot_path_prefers_flag_then_config() {
        let mut config = Config::default();
        config.storage.snapshot_path = Some(PathBuf::from("/data/kb.json"));

        assert_eq!(
            snapshot_path(Some(Path::new("local.json")), &config).unwrap(),
            PathBuf::from("local.json")
        );
        assert_eq!(snapshot_path(None, &config).unwrap(), PathBuf::from("/data/kb.json"));
    }
}
