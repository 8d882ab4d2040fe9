use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OutputFormat, RunArgs, ServeArgs};
use crate::client::SandpitClient;
use crate::config::loader::get_config_path;
use crate::config::types::SandpitConfig;
use crate::error::{Result, SandpitError};
use crate::executor::{CommandExecutor, ExecutionOutcome};
use crate::sandbox::available_backends;
use crate::server::Server;

// ============================================================================
// Server
// ============================================================================

pub async fn serve(args: ServeArgs, mut config: SandpitConfig) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(backend) = args.backend {
        config.sandbox.backend = backend;
    }
    info!(
        bind = %config.server.bind_addr,
        backend = ?config.sandbox.backend,
        "Starting server"
    );
    Server::new(config).run().await
}

// ============================================================================
// Sandbox Commands
// ============================================================================

fn client(config: &SandpitConfig, server: Option<String>) -> Result<SandpitClient> {
    SandpitClient::new(server.unwrap_or_else(|| config.server.url.clone()))
}

/// Create a sandbox through the server
pub async fn create(config: SandpitConfig, server: Option<String>, format: OutputFormat) -> Result<()> {
    let client = client(&config, server)?;
    info!(server = %client.base_url(), "Creating sandbox");
    let created = client.create_sandbox().await?;

    match format {
        OutputFormat::Text => {
            println!("{}", created.sandbox_id);
            println!("{}", created.url);
            if created.dev_server_ready == Some(false) {
                eprintln!("warning: dev server did not confirm readiness");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&created)?),
    }
    Ok(())
}

/// Execute a command, recreating the sandbox once if it stopped
pub async fn run(
    args: RunArgs,
    config: SandpitConfig,
    server: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let command = args.command_line();
    let executor = CommandExecutor::new(client(&config, server)?);
    let outcome = executor.execute_with_recreation(&command).await;

    output_outcome(&outcome, format);
    Ok(())
}

pub async fn status(config: SandpitConfig, server: Option<String>, format: OutputFormat) -> Result<()> {
    let status = client(&config, server)?.status().await?;

    match format {
        OutputFormat::Text => {
            println!("{}", status.message);
            if let Some(info) = status.sandbox_info {
                println!("{:<14} {}", "ID", info.sandbox_id);
                println!("{:<14} {}", "URL", info.url);
                println!("{:<14} {}", "PROVIDER", info.provider);
                println!(
                    "{:<14} {}",
                    "CREATED",
                    info.created_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M")
                );
                println!("{:<14} {}", "FILES", info.files_tracked.len());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
    }
    Ok(())
}

pub async fn dev_status(config: SandpitConfig, server: Option<String>, format: OutputFormat) -> Result<()> {
    let status = client(&config, server)?.dev_server_status().await?;

    match format {
        OutputFormat::Text => {
            let ready = status["viteReady"].as_bool().unwrap_or(false);
            println!("Dev server: {}", if ready { "ready" } else { "not ready" });
            for (label, key) in [
                ("Processes", "processStatus"),
                ("Port", "portStatus"),
                ("Logs", "logs"),
            ] {
                println!("\n{}:", label);
                println!("{}", status[key].as_str().unwrap_or("-"));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
    }
    Ok(())
}

pub async fn terminate(config: SandpitConfig, server: Option<String>, format: OutputFormat) -> Result<()> {
    let response = client(&config, server)?.terminate().await?;

    match format {
        OutputFormat::Text => println!("{}", response.message),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
    }
    Ok(())
}

/// List backends available on this system
pub async fn backends(config: SandpitConfig, format: OutputFormat) -> Result<()> {
    let backends = available_backends(|key| std::env::var(key).ok());

    match format {
        OutputFormat::Text => {
            println!("{:<10} {:<10} DESCRIPTION", "BACKEND", "STATUS");
            println!("{}", "-".repeat(60));
            for backend in &backends {
                let status = if backend.available { "ok" } else { "missing" };
                let marker = if backend.name == config.sandbox.backend.as_str() {
                    " (configured)"
                } else {
                    ""
                };
                println!(
                    "{:<10} {:<10} {}{}",
                    backend.name, status, backend.description, marker
                );
                if let Some(reason) = backend.unavailable_reason {
                    println!("{:<21} {}", "", reason);
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&backends)?),
    }
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_str = toml::to_string_pretty(&SandpitConfig::default())
        .map_err(|e| SandpitError::Config(e.to_string()))?;
    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Serve the sandbox API (Vercel credentials come from the environment)");
    println!("  sandpit serve");
    println!();
    println!("  # Create a sandbox and run commands in it");
    println!("  sandpit create");
    println!("  sandpit run npm install lodash");
    println!();
    println!("  # Terminate the sandbox when done");
    println!("  sandpit terminate");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: SandpitConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| SandpitError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn output_outcome(outcome: &ExecutionOutcome, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            if let Some(output) = outcome.output.as_deref().filter(|o| !o.is_empty()) {
                print!("{}", output);
            }
            if let Some(error) = outcome.error.as_deref().filter(|e| !e.is_empty()) {
                eprintln!("{}", error.trim_end());
            }
            if !outcome.success {
                std::process::exit(outcome.exit_code.filter(|c| *c != 0).unwrap_or(1));
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(outcome).unwrap_or_else(|_| "{}".to_string())
            );
        }
    }
}
