//! Shardplan CLI - plan a statement against canned access paths
//!
//! Usage:
//!   shardplan explain <request.json> [--format text|json] [--config <path>]
//!   shardplan check <request.json>
//!
//! A request file carries the statement, the partitioning the caller asserts
//! and the candidate access paths keyed by SQL text.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use shardplan::catalog::Catalog;
use shardplan::config::{OutputFormat, Settings};
use shardplan::planner::{
    CompiledPlan, CostBasedSelector, FixedAccessPaths, PlanAssembler, StatementPartitioning,
};
use shardplan::statement::ParsedStatement;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardplan")]
#[command(about = "Shardplan - plan assembly for partitioned SQL statements")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to SHARDPLAN_CONFIG, ./shardplan.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a statement and print the best plan
    Explain {
        /// Path to the request JSON file
        file: PathBuf,

        /// Output format (overrides the settings file)
        #[arg(short, long)]
        format: Option<FormatArg>,
    },

    /// Validate a request file without planning
    Check {
        /// Path to the request JSON file
        file: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum FormatArg {
    /// Indented plan tree
    Text,
    /// Compiled plan as JSON
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Everything needed to plan one statement.
#[derive(Deserialize)]
struct PlanningRequest {
    /// Table statistics for costing; built from the statement when absent.
    #[serde(default)]
    catalog: Option<Catalog>,
    statement: ParsedStatement,
    #[serde(default)]
    partitioning: StatementPartitioning,
    #[serde(default)]
    candidates: FixedAccessPaths,
}

impl PlanningRequest {
    fn catalog(&self) -> Catalog {
        match &self.catalog {
            Some(catalog) => catalog.clone(),
            None => {
                let mut catalog = Catalog::new();
                for table in self.statement.base_tables() {
                    catalog.add_table(table.clone());
                }
                catalog
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Explain { file, format } => {
            let format = format.map(OutputFormat::from).unwrap_or(settings.output.format);
            cmd_explain(&file, format, settings)
        }
        Commands::Check { file } => cmd_check(&file),
    }
}

fn read_request(file: &Path) -> Result<PlanningRequest, String> {
    let source =
        fs::read_to_string(file).map_err(|e| format!("Error reading file '{}': {}", file.display(), e))?;
    serde_json::from_str(&source).map_err(|e| format!("Invalid request '{}': {}", file.display(), e))
}

fn cmd_explain(file: &Path, format: OutputFormat, settings: Settings) -> ExitCode {
    let request = match read_request(file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let selector = CostBasedSelector::new(Arc::new(request.catalog())).with_output(settings.output.clone());
    let mut assembler = PlanAssembler::new(&request.candidates, Box::new(selector), request.partitioning.clone())
        .with_settings(settings.planner);

    let Some(plan) = assembler.best_cost_plan(&request.statement) else {
        let message = assembler
            .error_message()
            .unwrap_or_else(|| "No valid plans generated".to_string());
        eprintln!("Planning error: {}", message);
        return ExitCode::FAILURE;
    };
    if let Err(e) = assembler.finalize_best_cost_plan() {
        eprintln!("Error writing plan: {}", e);
        return ExitCode::FAILURE;
    }

    match print_plan(&plan, format) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error formatting plan: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_plan(plan: &CompiledPlan, format: OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Text => {
            println!("-- {}", plan.sql);
            println!(
                "-- plan {} cost {:.2}{}",
                plan.plan_id,
                plan.cost.unwrap_or_default(),
                if plan.is_content_deterministic() {
                    ""
                } else {
                    " (nondeterministic)"
                }
            );
            print!("{}", plan.tree.explain());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(plan)?),
    }
    Ok(())
}

fn cmd_check(file: &Path) -> ExitCode {
    match read_request(file) {
        Ok(request) => {
            println!(
                "{} statement OK ({} candidates)",
                request.statement.kind(),
                request.candidates.candidate_count(request.statement.sql())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
