//! plexrun CLI - run tests across multiplexed parameter variants.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use plexrun::config::{self, Config};
use plexrun::executor::{OutputCheck, ProcessExecutor, RecordMode, param_env_value};
use plexrun::job::{ExitStatus, Job, JobConfig};
use plexrun::report::{ConsoleReporter, LogReporter, MultiReporter};
use plexrun::resolver::{ResolutionStatus, ResolverRegistry};
use plexrun::tree::{ParamTreeBuilder, TreeError};

const DEFAULT_CONFIG: &str = "plexrun.toml";

#[derive(Parser)]
#[command(name = "plexrun")]
#[command(about = "Run tests across multiplexed parameter variants", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: plexrun.toml, if present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests under every parameter variant
    Run(RunArgs),

    /// Print the variants of a parameter tree
    Variants {
        #[command(flatten)]
        mux: MuxArgs,

        /// Print one JSON object per variant
        #[arg(long)]
        json: bool,
    },

    /// Print how test references resolve
    Resolve {
        /// Test references
        #[arg(required = true)]
        references: Vec<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Test references: executable files, suite files or aliases
    #[arg(required = true)]
    references: Vec<String>,

    /// Use this 40 hex digit job id instead of a random one
    #[arg(long, value_name = "HEX40")]
    force_job_id: Option<String>,

    /// Parent directory of job result directories
    #[arg(long, value_name = "DIR")]
    job_results_dir: Option<PathBuf>,

    /// Global job timeout, e.g. 90, 30s, 10m, 2h or 1d (0 = unlimited)
    #[arg(long, value_name = "N[s|m|h|d]", allow_hyphen_values = true)]
    job_timeout: Option<String>,

    /// Maximum number of tests running at once
    #[arg(long, value_name = "N")]
    max_parallel: Option<usize>,

    /// Compare test output with recorded references
    #[arg(long, value_enum)]
    output_check: Option<Toggle>,

    /// Record test output as the new reference
    #[arg(long, value_enum)]
    output_check_record: Option<RecordMode>,

    #[command(flatten)]
    mux: MuxArgs,
}

#[derive(Args)]
struct MuxArgs {
    /// YAML parameter files, merged in order
    #[arg(short = 'm', long = "multiplex-files", num_args = 1.., value_name = "FILE")]
    multiplex_files: Vec<PathBuf>,

    /// Only keep these tree paths
    #[arg(long, num_args = 1.., value_name = "PATH")]
    filter_only: Vec<String>,

    /// Remove these tree paths
    #[arg(long, num_args = 1.., value_name = "PATH")]
    filter_out: Vec<String>,

    /// Path priority for keys defined by unrelated nodes, strongest first
    #[arg(long, num_args = 1.., value_name = "PATH")]
    mux_path: Vec<String>,

    /// Inject a value, as [path:]key:value
    #[arg(long, num_args = 1.., value_name = "SPEC")]
    mux_inject: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitStatus::JOB_FAIL.code()
            } else {
                0
            };
            if let Err(print_err) = e.print() {
                eprintln!("Failed to print usage: {}", print_err);
            }
            std::process::exit(code);
        }
    };

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = match cli.command {
        Commands::Run(args) => run_job(cli.config.as_deref(), cli.verbose, args).await,
        Commands::Variants { mux, json } => show_variants(&mux, json),
        Commands::Resolve { references } => show_resolutions(cli.config.as_deref(), &references),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", console::style("Error:").red().bold(), e);
            ExitStatus::JOB_FAIL.code()
        }
    };
    std::process::exit(code);
}

fn load_settings(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => config::load_config_or_default(path, true)?,
        None => config::load_config_or_default(Path::new(DEFAULT_CONFIG), false)?,
    };
    Ok(config)
}

fn tree_builder(mux: &MuxArgs) -> Result<ParamTreeBuilder, TreeError> {
    let mut builder = mux
        .multiplex_files
        .iter()
        .fold(ParamTreeBuilder::new(), |builder, file| builder.source_file(file))
        .filter_only(&mux.filter_only)
        .filter_out(&mux.filter_out)
        .priority(&mux.mux_path);
    for spec in &mux.mux_inject {
        builder = builder.inject(spec)?;
    }
    Ok(builder)
}

async fn run_job(config_path: Option<&Path>, verbose: bool, args: RunArgs) -> Result<i32> {
    let config = load_settings(config_path)?;

    let results_dir = match args.job_results_dir {
        Some(dir) => dir,
        None => config.job.results_dir()?,
    };
    let mut job = Job::new(JobConfig {
        references: args.references,
        job_id: args.force_job_id,
        results_dir,
        timeout: args.job_timeout,
        max_parallel: args.max_parallel.unwrap_or(config.job.max_parallel),
        test_timeout: Some(Duration::from_secs(config.job.test_timeout_secs)),
        stop_grace: Duration::from_secs(config.job.stop_grace_secs),
    })?;

    let tree = tree_builder(&args.mux)?;
    let registry = Arc::new(
        ResolverRegistry::from_config(&config).context("Invalid resolver configuration")?,
    );

    let mut output_check = OutputCheck::from(&config.output_check);
    if let Some(toggle) = args.output_check {
        output_check.enabled = toggle == Toggle::On;
    }
    if let Some(record) = args.output_check_record {
        output_check.record = record;
    }

    let abort = job.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the job");
            abort.cancel();
        }
    });

    info!("Starting job {}", job.id());
    let reporter = MultiReporter::new()
        .with_reporter(ConsoleReporter::new(verbose))
        .with_reporter(LogReporter);
    let summary = job
        .run(registry, tree, &ProcessExecutor::new(output_check), &reporter)
        .await?;

    Ok(summary.exit_code())
}

fn show_variants(mux: &MuxArgs, json: bool) -> Result<i32> {
    let tree = tree_builder(mux)?.build()?;

    if !json {
        println!("Multiplex variants ({}):", tree.variant_count());
    }
    for variant in tree.variants() {
        if json {
            println!("{}", serde_json::to_string(&variant)?);
            continue;
        }
        println!();
        println!("Variant {}:    {}", variant.id(), variant.leaves().join(", "));
        for param in variant.params() {
            println!(
                "    {}:{} => {}",
                param.path,
                param.key,
                param_env_value(&param.value)
            );
        }
    }
    Ok(ExitStatus::ALL_OK.code())
}

fn show_resolutions(config_path: Option<&Path>, references: &[String]) -> Result<i32> {
    let config = load_settings(config_path)?;
    let registry =
        ResolverRegistry::from_config(&config).context("Invalid resolver configuration")?;

    let mut status = ExitStatus::ALL_OK;
    for result in registry.resolve_all(references) {
        let label = match result.status {
            ResolutionStatus::Success => console::style(result.status.to_string()).green(),
            ResolutionStatus::NotFound => console::style(result.status.to_string()).yellow(),
            ResolutionStatus::Error => console::style(result.status.to_string()).red(),
        };
        match (&result.origin, &result.info) {
            (Some(origin), _) if result.is_success() => {
                println!("{}: {} by {}", result.reference, label, origin)
            }
            (_, Some(info)) => println!("{}: {} ({})", result.reference, label, info),
            _ => println!("{}: {}", result.reference, label),
        }
        for resolution in &result.resolutions {
            println!("    {:<10} {}", resolution.kind, resolution.uri);
        }
        if !result.is_success() {
            status |= ExitStatus::JOB_FAIL;
        }
    }
    Ok(status.code())
}
