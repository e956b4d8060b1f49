use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use altpool::{
    AppResult,
    cli::{Cli, Commands},
    config::Config,
    game::{MockConnector, Simulation},
    init_logging,
    server::ObserverServer,
    session::SessionManager,
};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let mut config = Config::load_or_default(&cli.config_file);
    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    // Initialize logging
    let _log_guard = init_logging(
        &cli.effective_log_level(&config.log_level),
        &config.log.file_path,
    )?;

    tracing::info!("AltPool session manager starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    if cli.is_dry_run_mode() {
        println!("{}", "Dry-run mode configuration:".bold());
        println!("Config file: {}", cli.config_file);
        config.display_summary()?;
        return Ok(());
    }

    match cli.command() {
        Commands::Config { action } => {
            Config::handle_command(&cli.config_file, &action)?;
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> AppResult<()> {
    // No protocol client is linked in; alts run against the simulated client
    let connector = Arc::new(MockConnector::simulated(Simulation {
        spawn_delay: Duration::from_millis(config.simulation.spawn_delay_ms),
        health_interval: Duration::from_millis(config.simulation.health_interval_ms),
    }));

    let mut session_manager = SessionManager::new(&config, connector);
    let server = ObserverServer::bind(("0.0.0.0", config.listen_port)).await?;

    println!(
        "{} on port {}",
        "Server running".green().bold(),
        server.local_addr().port()
    );

    let commands = session_manager.command_sender();
    let broadcaster = session_manager.broadcaster();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(commands, broadcaster).await {
            tracing::error!("Observer server error: {}", e);
        }
    });

    let shutdown = session_manager.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received");
            let _ = shutdown.send(()).await;
        }
    });

    session_manager.run().await?;
    server_task.abort();

    Ok(())
}
