//! phoenix - Entry Point
//!
//! Keeps a long-running workload alive on decentralized compute, failing over between
//! providers and healing it on a schedule.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use phoenix::app::commands;
use phoenix::app::options::AppOptions;
use phoenix::app::run::run;
use phoenix::app::state::AppState;
use phoenix::errors::AgentError;
use phoenix::filesys::file::File;
use phoenix::logs::{init_logging, LogOptions};
use phoenix::storage::layout::StorageLayout;
use phoenix::storage::settings::Settings;
use phoenix::utils::version_info;

const USAGE: &str = "\
Usage: phoenix [COMMAND] [OPTIONS]

Commands:
  run                          Deploy if needed and keep the workload alive (default)
  deploy [--provider=NAME] [--dry-run]
  status
  fund --amount=N
  destroy [--wipe-memory] [--force]

Options:
  --config=PATH                Settings file (default <home>/settings.json)
  --home=DIR                   State directory (default $PHOENIX_HOME or /var/lib/phoenix)
  --version";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut positional: Vec<String> = Vec::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else {
            positional.push(arg.clone());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        print_json(&version);
        return;
    }
    if cli_args.contains_key("help") {
        println!("{}", USAGE);
        return;
    }

    let command = positional.first().map(String::as_str).unwrap_or("run");

    let layout = cli_args
        .get("home")
        .map(|home| StorageLayout::new(PathBuf::from(home)))
        .unwrap_or_default();
    let settings_file = cli_args
        .get("config")
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());

    // Retrieve the settings file
    let settings = match settings_file.read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            fail(&format!("Unable to read settings file {:?}: {}", settings_file.path(), e));
        }
    };

    // Initialize logging; only the long-running loop writes log files
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: (command == "run" && settings.log_to_file).then(|| layout.logs_dir()),
        ..Default::default()
    };
    let _log_guard: Option<WorkerGuard> = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);

    // Dry runs never touch providers
    if command == "deploy" && cli_args.contains_key("dry-run") {
        match commands::plan(&options, cli_args.get("provider").map(String::as_str)) {
            Ok(plans) => {
                for plan in plans {
                    println!(
                        "{} {} ({}, priority {})",
                        "==>".cyan(),
                        plan.provider.bold(),
                        plan.kind,
                        plan.priority
                    );
                    if let Some(version) = &plan.version {
                        println!("version: {}", version);
                    }
                    println!("{}\n", plan.preview);
                }
                return;
            }
            Err(e) => fail(&format!("Dry run failed: {}", e)),
        }
    }

    let state = match AppState::init(version.version.clone(), &options).await {
        Ok(state) => Arc::new(state),
        Err(e) => fail(&format!("Failed to initialize: {}", e)),
    };

    let result = match command {
        "run" => {
            info!("Running phoenix with options: {:?}", options);
            run(state, options, await_shutdown_signal())
                .await
                .map(|_| "phoenix stopped".to_string())
        }
        "deploy" => {
            let provider = cli_args.get("provider").map(String::as_str);
            commands::deploy(&state, &options.deployment, provider)
                .await
                .map(|deployment| {
                    print_json(&deployment);
                    format!("Deployed {} on {}", deployment.id, deployment.provider)
                })
        }
        "status" => commands::status(&state).await.map(|report| {
            print_json(&report);
            match report.status {
                Some(status) => format!("{} on {}", status, report.provider),
                None => format!("No active deployment (provider {})", report.provider),
            }
        }),
        "fund" => match parse_amount(&cli_args) {
            Ok(amount) => commands::fund(&state, amount).await.and_then(|result| {
                print_json(&result);
                if result.funded {
                    Ok(result.message)
                } else {
                    Err(AgentError::Unsupported(result.message))
                }
            }),
            Err(e) => Err(e),
        },
        "destroy" => {
            let wipe_memory = cli_args.contains_key("wipe-memory");
            let force = cli_args.contains_key("force");
            commands::destroy(&state, wipe_memory, force).await.map(|report| {
                print_json(&report);
                match report.deployment_id {
                    Some(id) if report.destroyed => format!("Destroyed {}", id),
                    Some(id) => format!("Dropped record of {}", id),
                    None => "Nothing to destroy".to_string(),
                }
            })
        }
        other => {
            eprintln!("{}", USAGE);
            Err(AgentError::ConfigError(format!("unknown command {}", other)))
        }
    };

    match result {
        Ok(message) => println!("{} {}", "[OK]".green().bold(), message),
        Err(e) => {
            error!("{} failed: {}", command, e);
            fail(&e.to_string());
        }
    }
}

fn parse_amount(cli_args: &HashMap<String, String>) -> Result<f64, AgentError> {
    let raw = cli_args
        .get("amount")
        .ok_or_else(|| AgentError::ConfigError("missing --amount=N".to_string()))?;
    raw.parse()
        .map_err(|_| AgentError::ConfigError(format!("invalid amount {}", raw)))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render output: {}", e),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
    std::process::exit(1);
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
