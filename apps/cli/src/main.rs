//! assetmirror CLI: mirror a remote asset namespace to local disk.
//!
//! Connection settings come from flags, environment variables
//! (`ENDPOINT_URL`, `USERNAME`, `PASSWORD`, `DOMAIN`, `BASE_NAMESPACE`,
//! `OUTPUT_ROOT`) or `~/.assetmirror/assetmirror.toml`.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
