use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bench_dataset_prep::config::ConfigLoader;
use bench_dataset_prep::error::PrepError;
use bench_dataset_prep::fetch::{HttpFetcher, ensure_input};
use bench_dataset_prep::fs_util::OsFilesystem;
use bench_dataset_prep::output::{ConsoleProgress, JsonOutput, OutputMode, print_run_summary};
use bench_dataset_prep::pipeline::{DatasetPipeline, RunOptions};
use bench_dataset_prep::toolchain::ToolchainLink;

#[derive(Parser)]
#[command(name = "bench-prep")]
#[command(about = "Normalize per-project benchmark dataset archives into a canonical layout")]
#[command(version, author)]
struct Cli {
    /// Dataset archive (.zip) or an already extracted dataset directory
    input: Option<String>,

    /// Directory the dataset archive is extracted into
    #[arg(long)]
    root: Option<String>,

    #[arg(long)]
    config: Option<String>,

    /// Normalize again even if the dataset root is already populated
    #[arg(long)]
    force: bool,

    /// Toolchain installation root linked into every project
    #[arg(long)]
    toolchain_dir: Option<String>,

    #[arg(long)]
    link_name: Option<String>,

    /// Print the run report as JSON instead of narrating progress
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PrepError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PrepError) -> u8 {
    match error {
        PrepError::Usage(_) | PrepError::MissingSource(_) => 2,
        PrepError::InvalidContainer { .. } => 3,
        PrepError::FetchHttp(_) | PrepError::FetchStatus { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let fs = OsFilesystem;

    let input = match cli.input {
        Some(input) => Utf8PathBuf::from(input),
        None => {
            let fetcher = HttpFetcher::new(config.fetch)?;
            ensure_input(
                &fs,
                &config.default_input,
                config.dataset_url.as_deref(),
                &fetcher,
            )?;
            config.default_input.clone()
        }
    };
    let dataset_root = cli
        .root
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| config.dataset_root.clone());

    let toolchain = cli
        .toolchain_dir
        .map(ToolchainLink::new)
        .or(config.toolchain)
        .map(|link| match cli.link_name {
            Some(name) => link.with_link_name(name),
            None => link,
        });

    let pipeline = DatasetPipeline::new(
        fs,
        RunOptions {
            force: cli.force,
            toolchain,
        },
    );

    match output_mode {
        OutputMode::NonInteractive => {
            let report = pipeline.run(&input, &dataset_root, &JsonOutput)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report = pipeline.run(&input, &dataset_root, &ConsoleProgress)?;
            print_run_summary(&report);
        }
    }
    Ok(())
}
