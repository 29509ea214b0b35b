use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use fedret::core::project;
use fedret::export::projection_csv;
use fedret::store::ScenarioStore;

const DEFAULT_PORT: u16 = 8501;
const DEFAULT_SCENARIOS_DIR: &str = "scenarios";

#[derive(Parser, Debug)]
#[command(
    name = "fedret",
    version,
    about = "Federal retirement income projections: FERS annuity, TSP, Social Security",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Used when no subcommand is given.
    #[command(flatten)]
    serve: ServeArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Args, Debug, PartialEq)]
struct ServeArgs {
    #[arg(long, env = "FEDRET_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "FEDRET_SCENARIOS_DIR", default_value = DEFAULT_SCENARIOS_DIR)]
    scenarios_dir: PathBuf,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Serve the dashboard and JSON API on localhost.
    Serve(ServeArgs),
    /// Print the yearly projection of a saved scenario.
    Project {
        #[arg(long)]
        scenario: String,
        #[arg(long, env = "FEDRET_SCENARIOS_DIR", default_value = DEFAULT_SCENARIOS_DIR)]
        scenarios_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match Cli::parse().into_command() {
        Command::Serve(ServeArgs {
            port,
            scenarios_dir,
        }) => {
            info!("fedret {} starting", env!("CARGO_PKG_VERSION"));
            fedret::api::run_http_server(port, ScenarioStore::new(scenarios_dir))
                .await
                .with_context(|| format!("HTTP server on port {port} failed"))
        }
        Command::Project {
            scenario,
            scenarios_dir,
            format,
        } => print_projection(&ScenarioStore::new(scenarios_dir), &scenario, format),
    }
}

fn print_projection(store: &ScenarioStore, name: &str, format: OutputFormat) -> Result<()> {
    let params = store
        .load(name)
        .with_context(|| format!("loading scenario from {}", store.dir().display()))?;
    for warning in params.warnings() {
        tracing::warn!(scenario = name, "{warning}");
    }
    let result = project(&params)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result.years)?),
        OutputFormat::Csv => print!("{}", projection_csv(&result)?),
    }
    Ok(())
}
