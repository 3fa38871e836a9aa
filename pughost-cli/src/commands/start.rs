use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use tracing::{error, info};

use pughost::control::DEFAULT_API_URL;
use pughost::lifecycle::{forward_signals, Controller, ControllerConfig};
use pughost::probe::ProbePolicy;
use pughost::supervisor::DEFAULT_GRACE;
use pughost::{EngineLocator, ScenarioStore};

use crate::ENGINE_DIR;

#[derive(Debug, Parser)]
pub struct StartCommand {
    /// Scenario to simulate
    scenario: String,

    /// Engine executable [default: $PUGHOST_ENGINE, then the install directory]
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Engine control API
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Readiness probes before giving up on the engine
    #[arg(long, default_value_t = 30)]
    probe_attempts: u32,

    /// Delay between readiness probes
    #[arg(long, default_value_t = 200)]
    probe_interval_ms: u64,
}

pub async fn exec(config: &Path, cmd: StartCommand) -> Result<ExitCode> {
    match run(config, cmd).await {
        Ok(()) => {
            info!("Stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!("{err}");
            Ok(ExitCode::from(err.exit_code()))
        }
    }
}

async fn run(config: &Path, cmd: StartCommand) -> pughost::Result<()> {
    let store = ScenarioStore::load(config)?;
    let locator = EngineLocator::new(ENGINE_DIR.as_path()).with_explicit(cmd.engine);

    let mut controller = Controller::new(ControllerConfig {
        api_url: cmd.api_url,
        probe: ProbePolicy::new(
            cmd.probe_attempts,
            Duration::from_millis(cmd.probe_interval_ms),
        ),
        grace: DEFAULT_GRACE,
    });
    forward_signals(controller.interrupter())?;

    controller.run(&store, &cmd.scenario, &locator).await
}
