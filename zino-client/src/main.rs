// Zino live event monitor

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use zino_client::{
    config::{Config, DEFAULT_SECTION},
    manager::EventManager,
    updates::UpdateHandler,
};

/// How long each turn of the main loop waits for a notification.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "zino-monitor")]
#[command(about = "Tail live events from a Zino server", long_about = None)]
struct Args {
    /// Path to a .ritz.tcl or .toml configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Connection section to use from the configuration file
    #[arg(long, default_value = DEFAULT_SECTION)]
    connection: String,

    /// Override the configured username
    #[arg(long)]
    username: Option<String>,

    /// Override the configured password
    #[arg(long)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One table row for an event.
fn event_line(event: &zino_client::event::Event) -> String {
    format!(
        "{:>7}  {:<12} {:<12} {:<24} {:<12} {}",
        event.id,
        event.adm_state.to_string(),
        event.op_state(),
        event.router,
        event.port(),
        event.description()
    )
}

fn main() -> Result<()> {
    // Two worker threads are plenty: the protocol is strictly serial, the
    // second thread only services timers and signals.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("zino-monitor")
        .enable_time()
        .enable_io()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let mut config = Config::load(&args.config, &args.connection)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        config.set_userauth(username, password);
    }
    if config.username.is_none() || config.password.is_none() {
        anyhow::bail!(
            "No credentials for {:?}; set them in the config file or pass \
             --username/--password",
            args.connection
        );
    }

    log::info!("Connecting to {}:{}", config.server, config.port);
    let mut manager = EventManager::configure(config);
    manager
        .connect()
        .await
        .context("Failed to connect to Zino server")?;

    manager
        .get_events()
        .await
        .context("Failed to fetch the event list")?;
    log::info!("Tracking {} open events", manager.events.len());
    for event in manager.events.values() {
        println!("{}", event_line(event));
    }

    let mut handler = UpdateHandler::new(&mut manager)
        .await
        .context("Failed to set up the notification channel")?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Interrupted, disconnecting");
                break;
            }

            update = handler.get_event_update(POLL_TIMEOUT) => {
                match update {
                    Ok(Some(id)) => {
                        let manager = handler.manager();
                        if manager.removed_ids.contains(&id) {
                            println!("{id:>7}  gone");
                        } else if let Some(event) = manager.events.get(&id) {
                            println!("{}", event_line(event));
                        }
                    }
                    Ok(None) => {}
                    Err(err) if err.is_connection_loss() => {
                        return Err(err).context("Connection to the server was lost");
                    }
                    Err(err) => {
                        log::warn!("Update processing failed: {err}");
                    }
                }
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}
