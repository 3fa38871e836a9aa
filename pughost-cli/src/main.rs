mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use tracing_subscriber::EnvFilter;

use commands::Commands;

lazy_static! {
    /// Where `install` puts the engine and `start` looks for it.
    pub static ref ENGINE_DIR: PathBuf = ProjectDirs::from("dev", "pughost", "pughost")
        .map(|dirs| dirs.data_dir().join("bin"))
        .unwrap_or_else(|| PathBuf::from("bin"));
}

#[derive(Parser, Debug)]
#[command(name = "pughost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario store (JSON, or TOML by extension)
    #[arg(long, global = true, default_value = "pughost.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Use color_eyre for application error handling
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Parse CLI arguments
    let args = Cli::parse();

    // Pass control to the requested subcommand
    match args.command {
        Commands::Init(cmd) => commands::init::exec(&args.config, cmd)?,
        Commands::List => commands::list::exec(&args.config)?,
        Commands::Install(cmd) => commands::install::exec(cmd).await?,
        Commands::Start(cmd) => return commands::start::exec(&args.config, cmd).await,
    };

    Ok(ExitCode::SUCCESS)
}
