use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchbot_cli::cli::{Cli, Commands};
use switchbot_cli::commands::{
    Action, cmd_config, cmd_control, cmd_get_key, cmd_info, cmd_scan,
};
use switchbot_cli::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::path);
    let config = Config::load_from(&config_path);
    let connection = &config.connection;
    let format = cli.format;

    match cli.command {
        Commands::Scan {
            timeout,
            retry,
            all,
        } => cmd_scan(timeout, retry, all, format, &config).await,
        Commands::Info(args) => {
            let entry = config.resolve(&args.device, args.model)?;
            cmd_info(&entry, connection, format).await
        }
        Commands::On(args) => {
            let entry = config.resolve(&args.device, args.model)?;
            cmd_control(&entry, connection, Action::TurnOn, format).await
        }
        Commands::Off(args) => {
            let entry = config.resolve(&args.device, args.model)?;
            cmd_control(&entry, connection, Action::TurnOff, format).await
        }
        Commands::Press(args) => {
            let entry = config.resolve(&args.device, args.model)?;
            cmd_control(&entry, connection, Action::Press, format).await
        }
        Commands::Lock(args) => {
            let entry = config.resolve(&args.device, args.model)?;
            cmd_control(&entry, connection, Action::Lock, format).await
        }
        Commands::Unlock { device, no_unlatch } => {
            let entry = config.resolve(&device.device, device.model)?;
            let action = if no_unlatch {
                Action::UnlockWithoutUnlatch
            } else {
                Action::Unlock
            };
            cmd_control(&entry, connection, action, format).await
        }
        Commands::GetKey {
            mac,
            username,
            password,
        } => cmd_get_key(&mac, &username, &password, format).await,
        Commands::Config { action } => cmd_config(action, &config_path, &config, format),
    }
}
