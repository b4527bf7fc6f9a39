use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use climate_core::{list_tables, PipelineConfig, RunReport, StageStatus, TableListing};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Climate permit and utility consumption transform", long_about = None)]
struct Cli {
    /// Human-readable log output instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the canonical and aggregate tables from the raw extracts
    Build(BuildArgs),
    /// List every output table with its row count
    Tables(TablesArgs),
}

#[derive(Args, Debug, Default)]
struct BuildArgs {
    /// TOML configuration file (defaults to $CLIMATE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Root data directory, overriding the configuration
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct TablesArgs {
    /// TOML configuration file (defaults to $CLIMATE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Root data directory, overriding the configuration
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let outcome = match cli.command {
        Command::Build(args) => handle_build(args),
        Command::Tables(args) => handle_tables(args),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(pretty: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn resolve_config(config: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut resolved =
        PipelineConfig::load(config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = data_dir {
        resolved = resolved.with_data_dir(dir);
    }
    Ok(resolved)
}

fn handle_build(args: BuildArgs) -> Result<()> {
    let config = resolve_config(args.config, args.data_dir)?;
    let report = climate_core::run(&config).context("pipeline run failed")?;

    println!("{}", render_report(&report));
    println!("Run report: {}", config.report_path().display());
    let failed = report.failed_stages().count();
    if failed > 0 {
        println!("{failed} table(s) failed; previous versions were left in place.");
    }
    Ok(())
}

fn handle_tables(args: TablesArgs) -> Result<()> {
    let config = resolve_config(args.config, args.data_dir)?;
    println!("{}", render_listing(&list_tables(&config)));
    Ok(())
}

fn render_report(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Table", "Status", "Rows", "Detail"]);

    for stage in &report.stages {
        let rows = stage
            .row_count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".to_string());
        let detail = match stage.status {
            StageStatus::Success => String::new(),
            _ => stage.error.clone().unwrap_or_default(),
        };
        table.add_row(vec![
            stage.name.clone(),
            stage.status.as_str().to_string(),
            rows,
            detail,
        ]);
    }
    table
}

fn render_listing(listings: &[TableListing]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Table", "Location", "Present", "Rows", "Path"]);

    for listing in listings {
        let rows = match (&listing.rows, &listing.error) {
            (Some(count), _) => count.to_string(),
            (None, Some(err)) => format!("unreadable: {err}"),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            listing.name.to_string(),
            listing.location.as_str().to_string(),
            if listing.present() { "yes" } else { "no" }.to_string(),
            rows,
            listing.path.display().to_string(),
        ]);
    }
    table
}
