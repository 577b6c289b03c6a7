use clap::Parser;
use log::info;
use std::path::PathBuf;

use waspa::config::Config;

/// WASPA compliance dashboard server
#[derive(Parser, Debug)]
#[command(name = "waspa", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    info!("data directory: {}", config.data_dir.display());

    // Start the web application
    waspa::app::run(config).await?;

    Ok(())
}
