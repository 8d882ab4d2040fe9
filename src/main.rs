use anyhow::Context;
use clap::Parser;

use sandpit::cli::args::{Cli, Commands};
use sandpit::cli::commands;
use sandpit::config::loader::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    // Load configuration (file + environment overrides)
    let config = load_config(cli.global_opts.config.as_deref())
        .context("Failed to load configuration")?;
    let format = cli.global_opts.format.clone();
    let server = cli.global_opts.server.clone();

    // Dispatch to subcommand handler
    match cli.command {
        Commands::Serve(args) => {
            commands::serve(args, config)
                .await
                .context("Server exited with an error")?;
        }
        Commands::Create => {
            commands::create(config, server, format).await?;
        }
        Commands::Run(args) => {
            commands::run(args, config, server, format).await?;
        }
        Commands::Status => {
            commands::status(config, server, format).await?;
        }
        Commands::DevStatus => {
            commands::dev_status(config, server, format).await?;
        }
        Commands::Terminate => {
            commands::terminate(config, server, format).await?;
        }
        Commands::Backends => {
            commands::backends(config, format).await?;
        }
        Commands::Init(args) => {
            commands::init(args).await?;
        }
        Commands::Config(args) => {
            commands::config(args, config).await?;
        }
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
