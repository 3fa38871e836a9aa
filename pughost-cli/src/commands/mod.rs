pub mod init;
pub mod install;
pub mod list;
pub mod start;

use clap::Subcommand;

use init::InitCommand;
use install::InstallCommand;
use start::StartCommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default scenario store
    Init(InitCommand),

    /// Show the scenarios in the store
    List,

    /// Degrade traffic to the upstream with a scenario until interrupted
    Start(StartCommand),

    /// Download the Toxiproxy engine for this platform
    Install(InstallCommand),
}
