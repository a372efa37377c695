use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flotilla", about = "Agent fleet coordinator", version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = "flotilla.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator until Ctrl-C
    Run,
    /// Run an in-process simulated workload and print the final state
    Demo {
        /// Number of tasks to submit
        #[arg(long, default_value_t = 24)]
        tasks: usize,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}
