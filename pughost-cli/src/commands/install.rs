use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;

use pughost::engine::{self, Platform, ENGINE_VERSION};

use crate::ENGINE_DIR;

#[derive(Debug, Parser)]
pub struct InstallCommand {
    /// Directory to install into [default: the pughost data directory]
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Toxiproxy release tag
    #[arg(long, default_value = ENGINE_VERSION)]
    release: String,
}

pub async fn exec(cmd: InstallCommand) -> Result<()> {
    let platform = Platform::detect()?;
    let dir = cmd.dir.unwrap_or_else(|| ENGINE_DIR.to_path_buf());

    println!("Detected: {}/{}", platform.os, platform.arch);
    let path = engine::install(&dir, &platform, &cmd.release).await?;
    println!("Ready: {}", path.display());
    println!("Run `pughost init`, then `pughost start <scenario>`.");

    Ok(())
}
