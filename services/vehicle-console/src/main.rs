use anyhow::{Context, Result};
use resq_core::{logging, Config, SystemClock};
use resq_dispatch::{
    CoreParts, DispatchError, LogAlertSink, RouteProvider, SessionProvider, SessionStore,
    SqliteSessionStore, StraightLineProvider, VehicleCore, VehicleSnapshot,
};
use resq_domain::Session;
use resq_gateway::{GraphqlDispatchApi, GraphqlOfferFeed, OsrmRouteProvider};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

mod cli;
mod console;

use cli::Invocation;
use console::{ConsoleCommand, ConsolePositions};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = cli::parse(&args)?;

    match cli.invocation {
        Invocation::Version => {
            println!("resq-vehicle-console {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Invocation::Help => {
            println!("{}", cli::USAGE);
            return Ok(());
        }
        _ => {}
    }

    logging::init_from_env();
    let config = load_config(cli.config.as_deref())?;

    match cli.invocation {
        Invocation::SessionShow => session_show(&config),
        Invocation::SessionSet { token, info } => session_set(&config, &token, &info),
        Invocation::SessionClear => session_clear(&config),
        Invocation::Run => run(config).await,
        Invocation::Version | Invocation::Help => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => {
            let mut config = Config::default_config();
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            Ok(config)
        }
    }
}

fn open_store(config: &Config) -> Result<SqliteSessionStore> {
    SqliteSessionStore::open(&config.session.db_path).with_context(|| {
        format!(
            "failed to open session cache {}",
            config.session.db_path.display()
        )
    })
}

fn session_show(config: &Config) -> Result<()> {
    match open_store(config)?.current_session() {
        Some(session) => {
            println!("vehicle id : {}", session.vehicle_id);
            println!("code       : {}", session.code);
            println!("plate      : {}", session.plate_number);
            println!("category   : {}", session.category.as_deref().unwrap_or("-"));
        }
        None => println!("no cached vehicle session"),
    }
    Ok(())
}

fn session_set(config: &Config, token: &str, info: &str) -> Result<()> {
    let session = Session::from_stored(token, info).context("unusable vehicle identity")?;
    open_store(config)?.save(&session)?;
    info!(vehicle_id = session.vehicle_id, code = %session.code, "Vehicle session cached");
    Ok(())
}

fn session_clear(config: &Config) -> Result<()> {
    open_store(config)?.clear()?;
    info!("Vehicle session cleared");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    let session = store
        .current_session()
        .context("no cached vehicle session, log in with `session set` first")?;

    let api = Arc::new(GraphqlDispatchApi::for_session(&config.server, &session)?);
    let feed = Arc::new(GraphqlOfferFeed::for_session(&config, &session)?);
    let routes: Arc<dyn RouteProvider> =
        match OsrmRouteProvider::from_config(&config.routing, config.server.request_timeout())? {
            Some(provider) => Arc::new(provider),
            None => {
                info!("No routing provider configured, routes are straight lines");
                Arc::new(StraightLineProvider)
            }
        };
    let positions = Arc::new(ConsolePositions::new());

    let core = VehicleCore::start(CoreParts {
        session: store,
        api,
        feed,
        positions: positions.clone(),
        routes,
        alerts: Arc::new(LogAlertSink),
        clock: Arc::new(SystemClock),
        config,
    })?;

    let mut snapshots = core.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last: Option<VehicleSnapshot> = None;
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            log_snapshot(last.as_ref(), &snapshot);
            let running = snapshot.running;
            last = Some(snapshot);
            if !running {
                break;
            }
        }
    });

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                if !execute(&core, &positions, command).await {
                    break;
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    core.shutdown().await;
    let _ = reporter.await;
    Ok(())
}

/// Apply one driver command. Returns `false` when the console should exit.
async fn execute(core: &VehicleCore, positions: &ConsolePositions, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Position(point) => positions.push(point),
        ConsoleCommand::Accept => report("accept", core.respond(true).await),
        ConsoleCommand::Decline => report("decline", core.respond(false).await),
        ConsoleCommand::Arrived => report("arrived", core.mark_arrived().await),
        ConsoleCommand::Completed => report("completed", core.mark_completed().await),
        ConsoleCommand::Refresh => core.refresh_assignment(),
        ConsoleCommand::Status => match serde_json::to_string_pretty(&core.snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to render snapshot"),
        },
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => return false,
    }
    true
}

fn report<T: Debug>(action: &'static str, result: std::result::Result<T, DispatchError>) {
    match result {
        Ok(outcome) => info!(action, outcome = ?outcome, "Command finished"),
        Err(e) => warn!(action, error = %e, "Command failed"),
    }
}

/// Log state and action changes at info, countdown-only changes at debug.
fn log_snapshot(previous: Option<&VehicleSnapshot>, snapshot: &VehicleSnapshot) {
    let seconds_left = snapshot.offer.as_ref().map(|o| o.countdown.seconds_left);
    let significant = previous.map_or(true, |prev| {
        prev.state != snapshot.state
            || prev.actions != snapshot.actions
            || prev.assignment != snapshot.assignment
            || prev.route.as_ref().map(|r| r.degraded) != snapshot.route.as_ref().map(|r| r.degraded)
            || prev.location_enabled != snapshot.location_enabled
            || prev.feed_connected != snapshot.feed_connected
    });

    if significant {
        info!(
            vehicle_id = snapshot.vehicle_id,
            state = ?snapshot.state,
            offer_request = ?snapshot.offer.as_ref().map(|o| o.offer.request.id.to_string()),
            seconds_left = ?seconds_left,
            assignment_id = ?snapshot.assignment.as_ref().and_then(|a| a.assignment.value().id),
            route_points = ?snapshot.route.as_ref().map(|r| r.path.len()),
            distance_m = ?snapshot.route.as_ref().and_then(|r| r.distance_m),
            polling = snapshot.polling,
            feed_connected = snapshot.feed_connected,
            actions = ?snapshot.actions,
            "Vehicle state"
        );
    } else {
        debug!(seconds_left = ?seconds_left, "Vehicle state tick");
    }
}
