mod cli;
mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use config::FlotillaConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => commands::config::handle(action, &cli.config),
        Commands::Run => {
            let config = FlotillaConfig::load(&cli.config)?;
            logging::init(&config.log_level, config.log_format)?;
            commands::run::run(config).await
        }
        Commands::Demo { tasks } => {
            let config = FlotillaConfig::load(&cli.config)?;
            logging::init(&config.log_level, config.log_format)?;
            commands::demo::run(tasks).await
        }
    }
}
