//! CRASHBOT — single-chat crash game bot.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the Telegram gateway to the round engine, and runs the
//! long-poll dispatch loop with graceful shutdown.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info};

use crashbot::config::{self, AppConfig};
use crashbot::engine::round::RoundEngine;
use crashbot::engine::CommandDispatcher;
use crashbot::gateway::telegram::TelegramGateway;
use crashbot::gateway::ChatGateway;

const BANNER: &str = r#"
   ____ ____      _    ____  _   _ ____   ___ _____
  / ___|  _ \    / \  / ___|| | | | __ ) / _ \_   _|
 | |   | |_) |  / _ \ \___ \| |_| |  _ \| | | || |
 | |___|  _ <  / ___ \ ___) |  _  | |_) | |_| || |
  \____|_| \_\/_/   \_\____/|_| |_|____/ \___/ |_|

  Single-chat crash game bot
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging(&cfg);

    // Print startup banner
    println!("{BANNER}");
    info!(
        house_balance = cfg.game.initial_house_balance,
        round_duration_secs = cfg.game.round_duration_secs,
        owner_preset = ?cfg.game.owner_id,
        "CRASHBOT starting up"
    );

    // -- Initialise components -------------------------------------------

    let token = SecretString::new(AppConfig::resolve_env(&cfg.telegram.bot_token_env)?);
    let telegram = Arc::new(TelegramGateway::new(token, cfg.telegram.poll_timeout_secs)?);
    let gateway: Arc<dyn ChatGateway> = telegram.clone();

    let engine = RoundEngine::new(&cfg.game, gateway.clone());
    let dispatcher = CommandDispatcher::new(engine, gateway.clone());

    // -- Main loop -------------------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut offset: i64 = 0;
    info!("Entering dispatch loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            polled = telegram.poll_commands(offset) => {
                match polled {
                    Ok((commands, next_offset)) => {
                        offset = next_offset;
                        for command in &commands {
                            if let Err(e) = dispatcher.dispatch(command).await {
                                // A failed send never rolls back state.
                                error!(command = %command, error = %e, "Reply delivery failed");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Polling failed — retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("CRASHBOT shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crashbot=info"));

    let json_logging = std::env::var("CRASHBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
