use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use verse_gateway::cli::{self, Cli, Command, ConfigCommand};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            init_tracing();
            let (config, _path) = cli::load_config()?;
            cli::run::run(Arc::new(config))?;
        }
        Command::Doctor => {
            let (config, path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &path);
            if !passed {
                std::process::exit(1);
            }
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, path) = cli::load_config()?;
            if !cli::config::validate(&config, &path) {
                std::process::exit(1);
            }
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _path) = cli::load_config()?;
            cli::config::show(&config);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
