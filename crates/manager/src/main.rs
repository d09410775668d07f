use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use hms_backup_manager::cli::{self, Command};
use hms_backup_manager::commands::{self, EXIT_OK};
use hms_backup_manager::config::{self, Config, Settings};
use hms_backup_manager::prompt::TerminalPrompt;
use hms_backup_manager::schedule::scheduler_loop;
use hms_backup_manager::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = cli::parse_args(&args)?;

    let loaded = match &invocation.config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(path)
        }
        None => Ok(Config::default()),
    };
    let settings = match loaded.and_then(|cfg| Settings::from_env(&cfg)) {
        Ok(settings) => settings,
        Err(e) => match invocation.command {
            // a scheduled run that cannot start must still leave a trace
            Command::Backup(label) => {
                let cfg = invocation
                    .config_path
                    .as_deref()
                    .and_then(|path| config::load_config(path).ok())
                    .unwrap_or_default();
                let log = config::activity_log_path(&cfg, |key| env::var(key).ok());
                return Ok(ExitCode::from(commands::backup_not_started(&log, label, &e)));
            }
            _ => return Err(e),
        },
    };

    let code = match invocation.command {
        Command::Backup(label) => commands::run_backup(&settings, label).await,
        Command::Setup => {
            let program = env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "hms-backup".to_owned());
            print!(
                "{}",
                commands::setup_template(&program, invocation.config_path.as_deref(), &settings)
            );
            EXIT_OK
        }
        Command::Restore => {
            let mut prompt = TerminalPrompt::stdio();
            commands::run_restore(&settings, &mut prompt).await
        }
        Command::Serve => {
            run_service(settings).await?;
            EXIT_OK
        }
    };
    Ok(ExitCode::from(code))
}

async fn run_service(settings: Settings) -> Result<()> {
    let store = commands::connect_store(&settings.data_store).await?;
    let scheduler = Arc::new(commands::build_scheduler(&settings, store)?);

    tokio::spawn(scheduler_loop(scheduler.clone(), settings.schedule_hour));

    let addr: SocketAddr = settings
        .listen
        .parse()
        .with_context(|| format!("invalid listen address: {}", settings.listen))?;
    let app = build_router(AppState::new(scheduler, settings.api_token.clone()));

    info!(%addr, schedule_hour = settings.schedule_hour, "starting backup service");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
