use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use deck_core::DeckConfig;
use deck_data::{ChartKind, Dataset};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::doctor::{DoctorSummary, run_doctor};
use crate::pipeline::Pipeline;

/// Turn a CSV file into a narrated slide deck.
#[derive(Parser, Debug)]
#[command(name = "sheetdeck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug-level logging for the pipeline crates
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write daily-rotated log files into this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a presentation for one column of a CSV file
    Generate(GenerateArgs),

    /// List the columns of a CSV file with their inferred kinds
    Columns {
        /// Input CSV file
        csv: PathBuf,
    },

    /// Check that the inference service, model and converter are usable
    Doctor {
        /// JSON config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Input CSV file
    pub csv: PathBuf,

    /// Column to chart and narrate
    #[arg(short, long)]
    pub column: String,

    /// Chart kind: scatter, hexbin, box or bar
    #[arg(short, long, default_value = "bar")]
    pub kind: ChartKind,

    /// Minimum number of slides
    #[arg(short = 'n', long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub min_slides: u16,

    /// Extra instructions for the narrative (mention "summary" for a summary slide)
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Output file (default: <csv stem>.<format> in the current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format: odp, pdf or pptx (overrides the config file)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Model name (overrides the config file)
    #[arg(short, long)]
    pub model: Option<String>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// The `--config` file of whichever subcommand carries one.
    pub fn config_path(&self) -> Option<&Path> {
        match &self.command {
            Command::Generate(args) => args.config.as_deref(),
            Command::Doctor { config } => config.as_deref(),
            Command::Columns { .. } => None,
        }
    }
}

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::Columns { csv } => columns(&csv),
        Command::Doctor { config } => doctor(config.as_deref()).await,
    }
}

async fn generate(args: GenerateArgs) -> Result<ExitCode> {
    let mut config = DeckConfig::resolve(args.config.as_deref())?;
    if let Some(format) = args.format {
        config.convert_format = format.trim().to_ascii_lowercase();
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    config.validate().context("Invalid options")?;

    let output = args
        .output
        .unwrap_or_else(|| default_output(&args.csv, &config.convert_format));
    let ctx = RunContext::from_path(
        &args.csv,
        args.column,
        args.kind,
        usize::from(args.min_slides),
        output,
    )?
    .with_prompt(args.prompt);
    debug!(run_id = %ctx.run_id, "run context prepared");

    let pipeline = Pipeline::new(config);
    match pipeline.run(&ctx).await {
        Ok(report) => {
            println!(
                "Wrote {} ({} slides, {} bytes)",
                report.output.display(),
                report.slide_count,
                report.bytes
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn columns(csv: &Path) -> Result<ExitCode> {
    let dataset = match Dataset::from_path(csv) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error: {}", e.user_message());
            return Ok(ExitCode::FAILURE);
        }
    };
    println!(
        "{}: {} rows, {} columns",
        csv.display(),
        dataset.row_count(),
        dataset.column_count()
    );
    for column in dataset.columns() {
        println!("  {:<24} {}", column.name(), column.kind());
    }
    Ok(ExitCode::SUCCESS)
}

async fn doctor(config: Option<&Path>) -> Result<ExitCode> {
    let config = DeckConfig::resolve(config)?;
    let pipeline = Pipeline::new(config);
    let checks = run_doctor(
        pipeline.config(),
        pipeline.provider().as_ref(),
        pipeline.converter(),
    )
    .await;

    for check in &checks {
        println!("[{}] {}: {}", check.status, check.name, check.message);
        if let Some(fix) = &check.fix_suggestion {
            println!("       fix: {fix}");
        }
    }
    let summary = DoctorSummary::of(&checks);
    println!(
        "{} passed, {} warnings, {} failed",
        summary.pass, summary.warn, summary.fail
    );
    info!(pass = summary.pass, warn = summary.warn, fail = summary.fail, "doctor finished");

    Ok(if summary.healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn default_output(csv: &Path, format: &str) -> PathBuf {
    let stem = csv
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "deck".into());
    PathBuf::from(format!("{stem}.{format}"))
}
