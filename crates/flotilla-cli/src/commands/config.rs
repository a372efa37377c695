use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::ConfigAction;
use crate::config::FlotillaConfig;

/// Handle config subcommands.
pub fn handle(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!("Config already exists at: {}", path.display());
                println!("Use `flotilla config show` to view it, or pass --force to overwrite.");
                return Ok(());
            }

            let config = FlotillaConfig::default();
            config.save(path)?;
            println!("Created default config at: {}", path.display());
            println!();
            print_config(&config)?;
        }

        ConfigAction::Show => {
            let config = FlotillaConfig::load(path)?;
            if !path.exists() {
                println!("# {} not found; showing defaults", path.display());
            }
            print_config(&config)?;
        }
    }
    Ok(())
}

fn print_config(config: &FlotillaConfig) -> Result<()> {
    let coordinator = &config.coordinator;
    println!("# agents:    {}..={}", coordinator.min_agents, coordinator.max_agents);
    println!("# strategy:  {}", coordinator.load_balancing_strategy);
    println!(
        "# scaling:   {}",
        if coordinator.enable_auto_scaling { "enabled" } else { "disabled" }
    );
    println!("# initial:   {} agent(s)", config.initial_agents.len());
    println!();
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    println!("{rendered}");
    Ok(())
}
