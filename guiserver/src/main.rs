//! GUI server - Entry Point
//!
//! Serves bundle deployment requests from the Juju GUI.

use std::collections::HashMap;
use std::env;

use guiserver::app::options::{AppOptions, AuthOptions, ServerOptions};
use guiserver::app::run::run;
use guiserver::bundles::deployer::DeployerOptions;
use guiserver::filesys::file::File;
use guiserver::logs::{init_logging, LogLevel, LogOptions};
use guiserver::storage::settings::{Settings, DEFAULT_SETTINGS_FILE};
use guiserver::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Unable to encode version info: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string());
    let mut settings = match Settings::load(&File::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {settings_path}: {e}");
            return;
        }
    };
    if let Err(e) = apply_overrides(&mut settings, &cli_args) {
        eprintln!("{e}");
        return;
    }

    // Initialize logging, the guard flushes file logs on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = app_options(settings);
    info!("Running GUI server with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the GUI server: {e}");
    }
}

fn apply_overrides(
    settings: &mut Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), String> {
    if let Some(host) = cli_args.get("host") {
        settings.server.host = host.clone();
    }
    if let Some(port) = cli_args.get("port") {
        settings.server.port = port
            .parse()
            .map_err(|e| format!("Invalid port {port}: {e}"))?;
    }
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level.parse::<LogLevel>()?;
    }
    Ok(())
}

fn app_options(settings: Settings) -> AppOptions {
    AppOptions {
        server: ServerOptions {
            host: settings.server.host,
            port: settings.server.port,
        },
        deployer: DeployerOptions {
            api_url: settings.environment.api_url,
            api_version: settings.environment.api_version,
            retain_completed: settings.deployer.retain_completed,
            ..Default::default()
        },
        deployer_command: settings.deployer.command,
        charmworld_url: settings.environment.charmworld_url,
        auth: AuthOptions {
            username: settings.auth.username,
            password: settings.auth.password,
        },
        ..Default::default()
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Unable to listen for signals: {e}, falling back to Ctrl+C");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Unable to listen for Ctrl+C: {e}");
                        std::future::pending::<()>().await;
                    }
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
