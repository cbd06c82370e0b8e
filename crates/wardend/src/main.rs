//! wardend - per-application daily time budgets
//!
//! `wardend run` wires together:
//! - Configuration loading
//! - The SQLite store
//! - The enforcement and watchdog loops
//! - The sway host adapter, lock screen command and systemd wakes
//!
//! The remaining subcommands operate on the same store and exit; the running
//! daemon picks their effects up on its next poll.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use warden_api::{Command, Response, ResponsePayload, ResponseResult, WakePayload};
use warden_config::{Settings, load_config_or_default};
use warden_core::{
    EnforcementEngine, EnforcementService, EventBus, HostCollaborators, apply_effects,
};
use warden_host_linux::{CommandPresenter, DesktopNotifier, SwayHost, SystemdScheduler};
use warden_store::{SqliteStore, Store};
use warden_util::{AppId, db_path_in, default_config_path, format_duration};

/// wardend - per-application daily time budgets with a self-healing supervisor
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(about = "Per-application daily time budgets", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/wardend/config.toml)
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set WARDEN_DATA_DIR env var)
    #[arg(short, long, global = true, env = "WARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Print command responses as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the enforcement service (default)
    Run,

    /// Entry point for durable deferred wakes
    Wake {
        /// `restart-loop` or `watchdog-check`
        payload: WakePayload,
    },

    /// Manage daily limits
    Limit {
        #[command(subcommand)]
        action: LimitCmd,
    },

    /// Unlock an app until it next enters the foreground
    Unlock { app: String },

    /// Zero every usage counter
    Reset,

    /// Show usage, limit and lock state
    Status { app: Option<String> },

    /// Show today's usage of one app
    Usage { app: String },

    /// Show whether an app is locked
    Locked { app: String },

    /// Enable or disable automatic restart of the enforcement loop
    AutoRestart { state: Toggle },

    /// Show the most recent audit records
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
}

#[derive(Subcommand, Debug)]
enum LimitCmd {
    /// Set a daily limit in minutes (0 means unlimited)
    Set { app: String, minutes: u64 },

    /// Show the daily limit
    Get { app: String },

    /// Remove the daily limit
    Remove { app: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

/// Everything a subcommand needs
struct Wiring {
    settings: Settings,
    store: Arc<dyn Store>,
    collaborators: HostCollaborators,
}

impl Wiring {
    fn load(args: &Args) -> Result<Self> {
        let mut settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        if let Some(data_dir) = &args.data_dir {
            settings = settings.with_data_dir(data_dir.clone());
        }

        let db_path = db_path_in(&settings.service.data_dir);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        debug!(db_path = %db_path.display(), "Store opened");

        let forward_args = vec![
            "--config".to_string(),
            args.config.display().to_string(),
            "--data-dir".to_string(),
            settings.service.data_dir.display().to_string(),
        ];
        let scheduler = SystemdScheduler::for_current_exe(forward_args)
            .context("Failed to locate the wardend executable")?;

        let collaborators = HostCollaborators {
            host: Arc::new(SwayHost::new(
                settings.service.home_command.clone(),
                settings.tracking.lookback,
            )),
            presenter: Arc::new(CommandPresenter::new(settings.service.lock_command.clone())),
            scheduler: Arc::new(scheduler),
            notifier: Arc::new(DesktopNotifier::new()),
        };

        Ok(Self {
            settings,
            store,
            collaborators,
        })
    }

    fn service(self, bus: EventBus) -> Arc<EnforcementService> {
        Arc::new(EnforcementService::new(
            self.settings,
            self.store,
            bus,
            self.collaborators,
        ))
    }
}

async fn run(ctx: Wiring) -> Result<()> {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let service = ctx.service(bus);

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(event = ?event.payload, "Event published");
        }
    });

    service.start().await;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    info!("Service running");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, restarting enforcement loop");
                service.restart_enforcement().await;
            }
        }
    }

    service.shutdown().await;
    info!("Service stopped");
    Ok(())
}

async fn wake(ctx: Wiring, payload: WakePayload) -> Result<()> {
    info!(payload = %payload, "Deferred wake");
    ctx.service(EventBus::new()).handle_wake(payload).await;
    Ok(())
}

async fn dispatch(ctx: Wiring, command: Command, json: bool) -> Result<()> {
    let mut engine = EnforcementEngine::new(&ctx.settings, ctx.store.clone(), EventBus::new());
    let (response, events) = engine.handle_command(command, warden_util::now());

    apply_effects(&ctx.collaborators, events).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", render(&response));
    }

    match response.result {
        ResponseResult::Ok(_) => Ok(()),
        ResponseResult::Err(e) => anyhow::bail!("{}", e.message),
    }
}

fn audit(ctx: Wiring, count: usize, json: bool) -> Result<()> {
    let records = ctx
        .store
        .recent_audits(count)
        .context("Failed to read audit log")?;

    for record in records.iter().rev() {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!(
                "{}  {}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                serde_json::to_string(&record.event)?
            );
        }
    }
    Ok(())
}

/// Human-readable rendering of a command response
fn render(response: &Response) -> String {
    let payload = match &response.result {
        ResponseResult::Ok(payload) => payload,
        ResponseResult::Err(e) => return format!("error: {}", e.message),
    };

    match payload {
        ResponsePayload::LimitSet { app_id, minutes: 0 } => {
            format!("{}: unlimited", app_id)
        }
        ResponsePayload::LimitSet { app_id, minutes } => {
            format!("{}: limit set to {} min/day", app_id, minutes)
        }
        ResponsePayload::LimitRemoved { app_id } => format!("{}: limit removed", app_id),
        ResponsePayload::UsageReset => "usage reset".to_string(),
        ResponsePayload::Unlocked { app_id } => format!("{}: unlocked", app_id),
        ResponsePayload::Usage { app_id, used } => {
            format!("{}: {} used today", app_id, format_duration(*used))
        }
        ResponsePayload::Limit { app_id, limit } if limit.is_zero() => {
            format!("{}: unlimited", app_id)
        }
        ResponsePayload::Limit { app_id, limit } => {
            format!("{}: {} per day", app_id, format_duration(*limit))
        }
        ResponsePayload::Locked { app_id, locked } => {
            format!("{}: {}", app_id, if *locked { "locked" } else { "unlocked" })
        }
        ResponsePayload::Status { apps } if apps.is_empty() => "no apps tracked".to_string(),
        ResponsePayload::Status { apps } => apps
            .iter()
            .map(|app| {
                let limit = app
                    .limit
                    .map(format_duration)
                    .unwrap_or_else(|| "unlimited".to_string());
                format!(
                    "{:<32} {:>12} / {:<12} {}",
                    app.app_id.as_str(),
                    format_duration(app.used),
                    limit,
                    if app.locked { "LOCKED" } else { "" }
                )
                .trim_end()
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ResponsePayload::AutoRestartSet { enabled } => {
            format!("auto-restart {}", if *enabled { "on" } else { "off" })
        }
    }
}

/// Map a configuration subcommand onto the engine's command set
fn to_command(cmd: &Cmd) -> Option<Command> {
    let command = match cmd {
        Cmd::Limit { action } => match action {
            LimitCmd::Set { app, minutes } => Command::SetLimit {
                app_id: AppId::new(app),
                minutes: *minutes,
            },
            LimitCmd::Get { app } => Command::GetLimit {
                app_id: AppId::new(app),
            },
            LimitCmd::Remove { app } => Command::RemoveLimit {
                app_id: AppId::new(app),
            },
        },
        Cmd::Unlock { app } => Command::Unlock {
            app_id: AppId::new(app),
        },
        Cmd::Reset => Command::ResetAllUsage,
        Cmd::Status { app } => Command::Status {
            app_id: app.as_deref().map(AppId::new),
        },
        Cmd::Usage { app } => Command::GetUsage {
            app_id: AppId::new(app),
        },
        Cmd::Locked { app } => Command::IsLocked {
            app_id: AppId::new(app),
        },
        Cmd::AutoRestart { state } => Command::SetAutoRestart {
            enabled: matches!(state, Toggle::On),
        },
        Cmd::Run | Cmd::Wake { .. } | Cmd::Audit { .. } => return None,
    };
    Some(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if warden_util::is_mock_time_active() {
        warn!(now = %warden_util::now(), "Running with mock time");
    }

    let ctx = Wiring::load(&args)?;
    let command = args.command.unwrap_or(Cmd::Run);

    match command {
        Cmd::Run => {
            info!(version = env!("CARGO_PKG_VERSION"), "wardend starting");
            run(ctx).await
        }
        Cmd::Wake { payload } => wake(ctx, payload).await,
        Cmd::Audit { count } => audit(ctx, count, args.json),
        other => {
            let Some(command) = to_command(&other) else {
                anyhow::bail!("{:?} is not a configuration command", other);
            };
            dispatch(ctx, command, args.json).await
        }
    }
}
