use std::path::Path;

use clap::Parser;
use color_eyre::Result;

use pughost::ScenarioStore;

#[derive(Debug, Parser)]
pub struct InitCommand {
    /// Overwrite an existing store
    #[arg(long)]
    force: bool,
}

pub fn exec(config: &Path, cmd: InitCommand) -> Result<()> {
    let store = ScenarioStore::default();
    store.save(config, cmd.force)?;

    println!("Created {}", config.display());
    if let Some(first) = store.names().next() {
        println!("Next: run `pughost start {first}`");
    }

    Ok(())
}
