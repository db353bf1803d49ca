use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "manifestos-cli", version, about = "ManifestOS verification and rewards CLI")]
struct Cli {
    /// Use this config file instead of ~/.config/manifestos/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gold reward calculations
    Reward {
        #[command(subcommand)]
        action: commands::reward::RewardAction,
    },
    /// Countdown display
    Countdown(commands::countdown::CountdownArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Replay a verification run against a simulated clock
    Simulate(commands::simulate::SimulateArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MANIFESTOS_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.config_file.as_deref();
    let result = match cli.command {
        Commands::Reward { action } => commands::reward::run(action, config_file),
        Commands::Countdown(args) => commands::countdown::run(args),
        Commands::Config { action } => commands::config::run(action, config_file),
        Commands::Simulate(args) => commands::simulate::run(args, config_file),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
