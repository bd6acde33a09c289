//! # vex
//!
//! Terminal client for vex chat servers. Connects to one server, keeps the
//! connection alive across drops, and sends each stdin line as chat to the
//! joined channel (`VEX_CHANNEL`).

mod config;
mod display;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vex_net::{
    spawn_session, ConnectorContext, ConnectorEvent, KeyMismatch, SessionEvent, WebSocketDialer,
};
use vex_shared::identity::fingerprint;
use vex_shared::Identity;
use vex_store::database::default_data_dir;
use vex_store::Database;

use crate::config::ClientConfig;

const DEFAULT_LOG_FILTER: &str = "vex_client=info,vex_net=info,vex_store=info,warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they stay out of the chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let data_dir = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let identity = Identity::load_or_generate(&data_dir).context("loading signing key")?;
    info!(
        fingerprint = %fingerprint(&identity.public_key_bytes()),
        "Identity loaded"
    );

    let db = Database::open_at(&data_dir.join("vex.db")).context("opening database")?;

    let ctx = ConnectorContext {
        identity: Arc::new(identity),
        db: Arc::new(Mutex::new(db)),
        config: config.connector_config(),
    };

    println!("-- connecting to {} (Ctrl-D to quit)", config.target);
    let (session, mut events) =
        spawn_session(WebSocketDialer, config.target.clone(), ctx, config.channel);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut prompt: Option<KeyMismatch> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let ended = matches!(event, SessionEvent::Ended(_));
                if let Some(line) = display::render(&event) {
                    println!("{line}");
                }
                if let SessionEvent::Connector(ConnectorEvent::KeyMismatch(mismatch)) = event {
                    prompt = Some(mismatch);
                }
                if ended {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stdin_open = false;
                        session.stop();
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                        session.stop();
                        continue;
                    }
                };

                if let Some(mismatch) = prompt.take() {
                    if matches!(line.trim(), "y" | "Y" | "yes") {
                        println!("-- trusting the new key");
                        mismatch.accept();
                    } else {
                        println!("-- keeping the old key, disconnecting");
                        mismatch.reject();
                    }
                    continue;
                }

                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                match session.connector() {
                    Some(connector) => {
                        if let Err(e) = connector.send_chat(text) {
                            println!("!! {e}");
                        }
                    }
                    None => println!("!! not connected"),
                }
            }
        }
    }

    session.join().await;
    Ok(())
}
