use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gatecheck_core::config::Config;
use gatecheck_core::core_device::{
    CaptureError, Connectivity, ConnectivityMonitor, FrameSource, LinesFrameSource, NetworkQuality,
    OfflineQueue, ScanDevice, SessionUpdate, SyncHandle, SyncTrigger,
};
use gatecheck_core::core_ledger::{
    EventId, LedgerSqlStore, LedgerStore, NamespaceId, ParticipantCode, TenantId,
};
use gatecheck_core::core_verify::http::{AppState, StaticTokenAuthenticator, VerificationServer};
use gatecheck_core::core_verify::VerificationService;
use gatecheck_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use gatecheck_core::metrics::init_metrics;
use gatecheck_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{BufReader, Stdin};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gatecheck")]
#[command(author, version, about = "Event attendance verification", long_about = None)]
struct Args {
    /// TOML configuration file; GATECHECK_* variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the verification endpoint
    Serve,

    /// Manage organizations
    #[command(subcommand)]
    Tenant(TenantCommand),

    /// Manage events
    #[command(subcommand)]
    Event(EventCommand),

    /// Manage event rosters
    #[command(subcommand)]
    Attendee(AttendeeCommand),

    /// Scan codes read from stdin, one per line.
    ///
    /// Lines starting with ':' control the device: `:offline`,
    /// `:online [quality]`, `:sync` and `:ack`.
    Scan {
        #[arg(long)]
        event: String,

        /// Organization, defaults to device.org_id
        #[arg(long)]
        org: Option<String>,

        /// Start with the network marked unavailable
        #[arg(long)]
        offline: bool,

        /// Network quality to report when online
        #[arg(long, default_value = "unknown")]
        quality: NetworkQuality,

        /// Dismiss each result as soon as it is printed
        #[arg(long)]
        auto_ack: bool,
    },

    /// Replay the device's offline queue once
    Sync,

    /// Inspect the device's offline queue
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand, Debug)]
enum TenantCommand {
    Register {
        #[arg(long)]
        org: String,

        /// Data namespace, defaults to ns_<org>
        #[arg(long)]
        namespace: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum EventCommand {
    Create {
        #[arg(long)]
        org: String,
        #[arg(long)]
        event: String,
        #[arg(long)]
        name: String,
    },
    Archive {
        #[arg(long)]
        org: String,
        #[arg(long)]
        event: String,
    },
    Reactivate {
        #[arg(long)]
        org: String,
        #[arg(long)]
        event: String,
    },
    /// Print the verification records of an event
    Verifications {
        #[arg(long)]
        org: String,
        #[arg(long)]
        event: String,
    },
}

#[derive(Subcommand, Debug)]
enum AttendeeCommand {
    Add {
        #[arg(long)]
        org: String,
        #[arg(long)]
        event: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    List,
    Clear {
        #[arg(long)]
        event: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.as_deref().map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()));
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = args.log_level {
        log_config.level = level;
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    init_metrics();

    match args.command {
        Command::Serve => serve(config).await,
        Command::Tenant(cmd) => tenant(&config, cmd).await,
        Command::Event(cmd) => event(&config, cmd).await,
        Command::Attendee(cmd) => attendee(&config, cmd).await,
        Command::Scan { event, org, offline, quality, auto_ack } => {
            let mut config = config;
            if let Some(org) = org {
                config.device.org_id = org;
            }
            let initial = if offline { Connectivity::Offline } else { Connectivity::Online(quality) };
            scan(config, EventId::new(event), initial, auto_ack).await
        }
        Command::Sync => sync(config).await,
        Command::Queue(cmd) => queue(&config, cmd).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    if config.server.api_tokens.is_empty() {
        bail!("server.api_tokens is empty; no device could authenticate");
    }

    let store = LedgerSqlStore::open(&config.ledger.db_path, config.ledger.max_connections)?;
    let service = VerificationService::new(Arc::new(store));
    let authenticator = config
        .server
        .api_tokens
        .iter()
        .fold(StaticTokenAuthenticator::default(), |auth, (token, org)| {
            auth.with_token(token.clone(), TenantId::new(org.clone()))
        });

    let shutdown = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
    install_signal_handlers(shutdown.clone());

    let state = AppState::new(service, Arc::new(authenticator));
    VerificationServer::new(state, config.server.bind_address).run(shutdown).await
}

fn open_ledger(config: &Config) -> Result<LedgerSqlStore> {
    Ok(LedgerSqlStore::open(&config.ledger.db_path, config.ledger.max_connections)?)
}

async fn namespace_of(store: &LedgerSqlStore, org: &str) -> Result<NamespaceId> {
    store
        .resolve_namespace(&TenantId::new(org))
        .await?
        .with_context(|| format!("Organization '{}' is not registered", org))
}

async fn tenant(config: &Config, cmd: TenantCommand) -> Result<()> {
    let store = open_ledger(config)?;
    match cmd {
        TenantCommand::Register { org, namespace } => {
            let namespace = NamespaceId::new(namespace.unwrap_or_else(|| format!("ns_{}", org)));
            store.register_tenant(&TenantId::new(org.clone()), &namespace).await?;
            println!("Registered {} in namespace {}", org, namespace);
        }
    }
    Ok(())
}

async fn event(config: &Config, cmd: EventCommand) -> Result<()> {
    let store = open_ledger(config)?;
    let event = match cmd {
        EventCommand::Create { org, event, name } => {
            let namespace = namespace_of(&store, &org).await?;
            store.create_event(&namespace, &EventId::new(event), &name).await?
        }
        EventCommand::Archive { org, event } => {
            let namespace = namespace_of(&store, &org).await?;
            store.archive_event(&namespace, &EventId::new(event)).await?
        }
        EventCommand::Reactivate { org, event } => {
            let namespace = namespace_of(&store, &org).await?;
            store.reactivate_event(&namespace, &EventId::new(event)).await?
        }
        EventCommand::Verifications { org, event } => {
            let namespace = namespace_of(&store, &org).await?;
            let records = store.list_verifications(&namespace, &EventId::new(event)).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}

async fn attendee(config: &Config, cmd: AttendeeCommand) -> Result<()> {
    let store = open_ledger(config)?;
    match cmd {
        AttendeeCommand::Add { org, event, code, name } => {
            let namespace = namespace_of(&store, &org).await?;
            let code = ParticipantCode::parse(&code)?;
            let entry = store.add_attendee(&namespace, &EventId::new(event), &code, &name).await?;
            println!("{}", serde_json::to_string(&entry)?);
        }
    }
    Ok(())
}

/// Stdin as a camera, with ':' lines steering connectivity and sync
struct ConsoleSource {
    lines: LinesFrameSource<BufReader<Stdin>>,
    connectivity: ConnectivityMonitor,
    sync: SyncHandle,
    acks: tokio::sync::mpsc::UnboundedSender<()>,
}

#[async_trait]
impl FrameSource for ConsoleSource {
    async fn next_frame(&mut self) -> Option<Result<Option<String>, CaptureError>> {
        let frame = self.lines.next_frame().await?;
        let control = match &frame {
            Ok(Some(line)) => line.trim().strip_prefix(':').map(str::to_string),
            _ => None,
        };
        let Some(control) = control else { return Some(frame) };

        let mut words = control.split_whitespace();
        match words.next() {
            Some("offline") => {
                self.connectivity.set_offline();
            }
            Some("online") => {
                let quality = words.next().and_then(|q| q.parse().ok()).unwrap_or(NetworkQuality::Unknown);
                self.connectivity.set_online(quality);
            }
            Some("sync") => {
                self.sync.request(SyncTrigger::Manual);
            }
            Some("ack") => {
                let _ = self.acks.send(());
            }
            other => eprintln!("unknown control {:?}", other),
        }
        Some(Ok(None))
    }
}

async fn scan(config: Config, event_id: EventId, initial: Connectivity, auto_ack: bool) -> Result<()> {
    let device = ScanDevice::start(config, initial).await?;
    let mut reports = device.sync().subscribe();
    let (acks_tx, mut acks_rx) = tokio::sync::mpsc::unbounded_channel();

    let source = ConsoleSource {
        lines: LinesFrameSource::new(BufReader::new(tokio::io::stdin())),
        connectivity: device.connectivity().clone(),
        sync: device.sync_handle().clone(),
        acks: acks_tx,
    };
    let (mut session, capture) = device.start_session(source, event_id.clone());

    let shutdown = Arc::new(ShutdownCoordinator::new(std::time::Duration::from_secs(1)));
    install_signal_handlers(shutdown.clone());
    let mut interrupted = shutdown.subscribe();

    info!(event_id = %event_id, "Scanning; one code per line on stdin");
    loop {
        tokio::select! {
            update = session.next_update() => match update {
                None => break,
                Some(SessionUpdate::Result { code, result }) => {
                    println!("{:<10} {:<16} {}", result.status(), code, result.message());
                    if auto_ack {
                        session.acknowledge();
                    }
                }
                Some(SessionUpdate::Failed { code, message }) => {
                    println!("{:<10} {:<16} {}", "error", code, message);
                    if auto_ack {
                        session.acknowledge();
                    }
                }
                Some(SessionUpdate::CaptureError(reason)) => eprintln!("capture error: {}", reason),
                Some(SessionUpdate::Dismissed) => {}
            },
            Some(()) = acks_rx.recv() => session.acknowledge(),
            Ok(report) = reports.recv() => {
                if report.synced > 0 || !report.rejected.is_empty() {
                    println!(
                        "synced {} scan(s), {} rejected, {} pending",
                        report.synced,
                        report.rejected.len(),
                        report.pending
                    );
                }
            }
            _ = interrupted.recv() => break,
        }
    }

    session.close().await;
    capture.stop().await;
    device.dispose().await;
    Ok(())
}

async fn sync(config: Config) -> Result<()> {
    let device = ScanDevice::start(config, Connectivity::Online(NetworkQuality::Unknown)).await?;
    let report = device.sync().sweep(SyncTrigger::Manual).await;
    device.dispose().await;

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

async fn queue(config: &Config, cmd: QueueCommand) -> Result<()> {
    let queue = OfflineQueue::open(&config.device.queue_path)?;
    match cmd {
        QueueCommand::List => {
            for entry in queue.list_all().await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        QueueCommand::Clear { event } => {
            let removed = queue.clear_for_event(&EventId::new(event)).await?;
            println!("Removed {} queued scan(s)", removed);
        }
    }
    queue.close().await;
    Ok(())
}
