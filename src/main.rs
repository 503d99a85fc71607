mod commands;
mod config;
mod poller;
mod ssh;
mod telegram;
mod tunnel;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Dispatcher;
use crate::config::{Config, SCRIPTS_DIR};
use crate::poller::Poller;
use crate::telegram::TelegramClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tunnelbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; missing credentials abort before any network use.
    let config = Config::load(Path::new(".env"))?;
    info!("Configuration loaded");
    info!("  SSH port: {}", config.ssh_port);
    info!("  Tunnel service: {}", config.tunnel_service);

    if !Path::new(SCRIPTS_DIR).exists() {
        tokio::fs::create_dir_all(SCRIPTS_DIR)
            .await
            .with_context(|| format!("Failed to create scripts directory: {}", SCRIPTS_DIR))?;
        info!("Created scripts directory: {}", SCRIPTS_DIR);
    }

    let client = TelegramClient::new(&config.bot_token, &config.chat_id);

    // Pre-flight: report failures to the chat once, then exit without polling.
    if !ssh::is_listening(config.ssh_port).await {
        let msg = format!(
            "\u{274c} SSH is not listening on port {}",
            config.ssh_port
        );
        error!("{}", msg);
        client.send_message(&msg).await;
        anyhow::bail!("SSH is not listening on port {}", config.ssh_port);
    }

    let endpoint = match tunnel::provision(&config).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            let msg = format!("\u{274c} Tunnel creation failed: {:#}", e);
            error!("{}", msg);
            client.send_message(&msg).await;
            return Err(e);
        }
    };

    let ssh_command = ssh::login_command(&endpoint);
    let announcement = format!(
        "\u{2705} SSH tunnel active!\n\u{1f310} URL: {}\n\u{1f50c} Local port: {}\n\n\u{1f511} SSH command:\n```\n{}\n```\n\n\u{1f4a1} Send !<script> to run a script",
        endpoint.url, config.ssh_port, ssh_command
    );
    info!("Tunnel active: {}", endpoint.url);
    client.send_message(&announcement).await;

    let dispatcher = Dispatcher::new(client.clone(), &config.chat_id, SCRIPTS_DIR);
    let poller = Poller::new(client, dispatcher);

    info!("Tunnel up; listening for Telegram commands");
    tokio::spawn(poller.run())
        .await
        .context("Poller task failed")?;

    Ok(())
}
