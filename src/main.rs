mod cli;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use colored::*;
use coworker::classify::CommandClassifier;
use coworker::progress::CliReporter;
use coworker::{ClassificationCache, Engine, TransferMode, Workspace};
use dotenv::dotenv;
use std::process;
use tracing::error;

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Cli::parse();
    let workspace = Workspace::new(&args.workspace);

    let _ = std::fs::create_dir_all(&workspace.logs_dir);
    let _guard = coworker::logging::init_logger(&workspace.logs_dir);

    match args.command {
        Some(Commands::Init) => {
            if let Err(err) = workspace.ensure_structure() {
                error!("Error initializing workspace: {}", err);
                process::exit(1);
            }
            println!(
                "Workspace initialized at {}",
                workspace.root.display().to_string().green()
            );
        }
        Some(Commands::Run { safe, dev }) => {
            let mode = if safe {
                TransferMode::Copy
            } else {
                TransferMode::Move
            };
            if let Err(err) = run_pipeline(&workspace, mode, dev) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::Undo { run_id }) => {
            if let Err(err) = run_undo(&workspace, run_id.as_deref()) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::Status) => {
            if let Err(err) = print_status(&workspace) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::PrintConfig) => {
            match coworker::config::load_configuration(&workspace.config_path) {
                Ok(config) => println!("Configuration: {:?}", config),
                Err(err) => {
                    error!("Error loading configuration: {}", err);
                    process::exit(1);
                }
            }
        }
        Some(Commands::CacheStats) => match ClassificationCache::open(&workspace.cache_dir) {
            Ok(cache) => match cache.count_keys() {
                Ok(count) => println!("{} cached classifications", count),
                Err(err) => {
                    error!("Error reading cache: {}", err);
                    process::exit(1);
                }
            },
            Err(err) => {
                error!("Error opening cache: {}", err);
                process::exit(1);
            }
        },
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_pipeline(
    workspace: &Workspace,
    mode: TransferMode,
    dev: bool,
) -> anyhow::Result<()> {
    let config = coworker::config::load_configuration(&workspace.config_path)?;

    let Some(classifier) = CommandClassifier::from_env() else {
        error!("No classifier configured. Set CLASSIFIER_CMD to a command that reads file bytes on stdin and prints a classification as JSON.");
        process::exit(1);
    };

    let cache = ClassificationCache::open(&workspace.cache_dir)?;
    let engine = Engine::new(workspace, &config, &classifier, &cache);
    let reporter = CliReporter::new();
    let summary = engine.run(mode, dev, &reporter)?;

    println!();
    println!(
        "Scan: {}, Classify: {}, Organize: {}, Reports: {}",
        format!("{:.2}s", summary.scan_duration.as_secs_f64()).green(),
        format!("{:.2}s", summary.classify_duration.as_secs_f64()).green(),
        format!("{:.2}s", summary.organize_duration.as_secs_f64()).green(),
        format!("{:.2}s", summary.report_duration.as_secs_f64()).green(),
    );
    println!(
        "{} archived, {} for review, {} failures ({} files seen)",
        format!("{}", summary.ledger.archived).green(),
        format!("{}", summary.ledger.reviewed).yellow(),
        format!("{}", summary.ledger.failures).red(),
        summary.ledger.files_seen,
    );
    println!(
        "{} cache hits, {} classifier calls, {} tokens spent",
        format!("{}", summary.ledger.cache_hits).cyan(),
        format!("{}", summary.ledger.cache_misses).cyan(),
        format!("{}", summary.ledger.token_cost).cyan(),
    );
    println!(
        "Run {} recorded. Undo with: coworker undo {}",
        summary.ledger.run_id, summary.ledger.run_id
    );

    Ok(())
}

fn run_undo(
    workspace: &Workspace,
    run_id: Option<&str>,
) -> anyhow::Result<()> {
    let report = coworker::engine::undo(workspace, run_id)?;

    if report.nothing_to_undo {
        println!("Nothing to undo.");
        return Ok(());
    }

    println!(
        "Run {}: {} restored, {} conflicts",
        report.run_id,
        format!("{}", report.restored).green(),
        format!("{}", report.conflicts.len()).red(),
    );
    for conflict in &report.conflicts {
        println!(
            "  {} {}: {}",
            "skipped".yellow(),
            conflict.record.dest_path.display(),
            conflict.reason
        );
    }

    Ok(())
}

fn print_status(workspace: &Workspace) -> anyhow::Result<()> {
    workspace.require_valid()?;
    let summary = coworker::ledger::status_summary(workspace)?;

    println!(
        "{} runs, {} files seen, {} archived, {} reviewed, {} tokens spent",
        summary.total_runs,
        summary.total_files,
        format!("{}", summary.total_archived).green(),
        format!("{}", summary.total_reviewed).yellow(),
        summary.total_token_cost,
    );
    if let Some(latest) = summary.latest {
        println!(
            "Latest run {} ({} mode): {} archived, {} reviewed, {} failures{}",
            latest.run_id,
            latest.mode,
            latest.archived,
            latest.reviewed,
            latest.failures,
            if latest.undone { " [undone]" } else { "" },
        );
    }

    Ok(())
}
