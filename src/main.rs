//! Medical copilot: supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Build the cases subsystem (LLM, transcriber, fact checker, store)
//!   5. Spawn Ctrl-C watcher and the supervisor run-loop
//!   6. Run comms channels until shutdown

use std::io::Write as _;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use medical_copilot::config::{self, Config};
use medical_copilot::error::AppError;
use medical_copilot::logger;
use medical_copilot::subsystems::cases::CasesSubsystem;
use medical_copilot::subsystems::comms;
use medical_copilot::supervisor::{self, bus::SupervisorBus, dispatch::BusHandler};
use medical_copilot::types::UserRole;

struct CliArgs {
    log_level: Option<&'static str>,
    interactive: bool,
    config_path: Option<String>,
    role: Option<UserRole>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args()?;

    let mut config = config::load(args.config_path.as_deref())?;
    // Without -i no stdio channel runs (daemon-safe default).
    if !args.interactive {
        config.comms.pty.enabled = false;
    }
    if let Some(role) = args.role {
        config.workflow.default_role = role;
    }

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        app_name = %config.app_name,
        work_dir = %config.work_dir.display(),
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    std::fs::create_dir_all(&config.work_dir)?;

    let shutdown = CancellationToken::new();

    let cases = CasesSubsystem::from_config(&config, shutdown.clone())?;
    if let Err(e) = cases.ping_store().await {
        warn!("case store unreachable at startup: {e}");
    }

    let bus = SupervisorBus::new(64);
    let bus_handle = bus.handle.clone();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let handlers: Vec<Box<dyn BusHandler>> = vec![Box::new(cases)];
    let sup_token = shutdown.clone();
    let sup_handle = tokio::spawn(supervisor::run(bus, sup_token, handlers));

    print_startup_summary(&config, args.interactive);

    let channels = comms::start(&config, bus_handle, shutdown.clone());
    channels.join().await?;

    // Channels may all exit on EOF; without any, wait for Ctrl-C.
    if !args.interactive {
        shutdown.cancelled().await;
    }
    shutdown.cancel();

    match sup_handle.await {
        Ok(res) => res?,
        Err(e) => warn!("supervisor task failed: {e}"),
    }

    if args.interactive {
        println!("\nBye.");
        let _ = std::io::stdout().flush();
    }
    Ok(())
}

fn print_startup_summary(config: &Config, interactive: bool) {
    let mode = if interactive { "interactive" } else { "daemon" };
    let http = if config.comms.http.enabled { config.comms.http.bind.as_str() } else { "disabled" };
    println!("medical-copilot pid={} mode={mode}", std::process::id());
    println!("  llm        {} ({})", config.llm.provider, config.llm.chat_model);
    println!("  store      {:?}", config.store.backend);
    println!("  http       {http}");
    println!(
        "  features   autonomous={} doctor_validation={} perplexity_check={}",
        config.features.autonomous_mode, config.features.doctor_validation, config.features.perplexity_check
    );
    println!("  role       {}", config.workflow.default_role);
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("Usage: medical-copilot [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -i, --interactive          Run the console channel");
    println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
    println!("      --role <ROLE>          Default requester role: patient or doctor");
    println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
}

fn parse_cli_args() -> Result<CliArgs, AppError> {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;
    let mut role = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| AppError::Config("-f/--config requires a path argument".into()))?;
                config_path = Some(path);
            }
            "--role" => {
                let value = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--role requires patient or doctor".into()))?;
                role = Some(value.parse::<UserRole>().map_err(AppError::Config)?);
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument: {other}"),
        }
    }

    Ok(CliArgs { log_level: logger::level_for_verbosity(verbosity), interactive, config_path, role })
}
