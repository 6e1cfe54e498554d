mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{cmd_lifecycles, cmd_plan, cmd_run};
use output::{OutputFormat, print_error};

/// lifecycle - plan and run build lifecycles
#[derive(Parser)]
#[command(name = "lifecycle")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the execution plan of each build unit
  Plan {
    /// Path to the build file
    #[arg(default_value = "build.toml")]
    file: PathBuf,

    /// Only show this unit
    #[arg(short, long)]
    unit: Option<String>,

    /// Show the last step that contributes to this phase
    #[arg(short, long)]
    phase: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Run every build unit's plan
  Run {
    /// Path to the build file
    #[arg(default_value = "build.toml")]
    file: PathBuf,

    /// Maximum number of units running steps at once
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Keep running independent units after a failure
    #[arg(long)]
    no_fail_fast: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// List lifecycles and their phases
  Lifecycles {
    /// Build file declaring lifecycles (standard lifecycles if omitted)
    file: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
  },
}

fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose { "info" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Plan {
      file,
      unit,
      phase,
      format,
    } => cmd_plan(&file, unit.as_deref(), phase.as_deref(), format),
    Commands::Run {
      file,
      parallelism,
      no_fail_fast,
      format,
    } => cmd_run(&file, parallelism, !no_fail_fast, format, cli.verbose),
    Commands::Lifecycles { file, format } => cmd_lifecycles(file.as_deref(), format),
  };

  if let Err(err) = result {
    print_error(&format!("{:#}", err));
    std::process::exit(1);
  }
}
