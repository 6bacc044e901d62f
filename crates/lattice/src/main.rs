//! Gateway binary.

use std::path::PathBuf;

use clap::Parser;

use lattice::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "lattice", about = "Horizontally scalable WebSocket gateway", version)]
struct Args {
    /// Path to the YAML config file.
    #[arg(short = 'f', value_name = "PATH", default_value = "etc/webSocketService.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    LoggingBuilder::new().init();

    let config = load_config_from_file(&args.config)?;
    let runtime = GatewayRuntime::init(config).await?;
    runtime.run().await?;
    Ok(())
}
