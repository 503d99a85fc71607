use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;

const NGROK_API_BASE: &str = "http://127.0.0.1:4040";
/// ngrok needs a moment to dial out before its status API lists the tunnel.
const NGROK_SETTLE: Duration = Duration::from_secs(5);
const LOCALTUNNEL_URL_TIMEOUT: Duration = Duration::from_secs(15);

/// Publicly reachable endpoint of a provisioned tunnel. Only the SSH login
/// command cares about the host/port split.
#[derive(Debug, Clone)]
pub struct TunnelEndpoint {
    pub url: String,
    pub host: String,
    pub port: Option<u16>,
}

impl TunnelEndpoint {
    fn from_url(raw: &str) -> Result<Self> {
        let parsed = Url::parse(raw).with_context(|| format!("Invalid tunnel URL: {}", raw))?;
        let host = parsed
            .host_str()
            .with_context(|| format!("Tunnel URL has no host: {}", raw))?
            .to_string();
        Ok(Self {
            url: raw.to_string(),
            host,
            port: parsed.port(),
        })
    }
}

/// One tunneling service: launch its binary and resolve the public endpoint.
#[async_trait]
pub trait TunnelProvider: Send + Sync + std::fmt::Debug {
    async fn provision(&self) -> Result<TunnelEndpoint>;
}

/// Select the provider implementation for the configured service name.
/// Unsupported names fail here, before anything is launched.
pub fn provider_for(config: &Config) -> Result<Box<dyn TunnelProvider>> {
    match config.tunnel_service.as_str() {
        "ngrok" => Ok(Box::new(Ngrok {
            ssh_port: config.ssh_port,
            authtoken: config.ngrok_authtoken.clone(),
            api_base: NGROK_API_BASE.to_string(),
        })),
        "localtunnel" => Ok(Box::new(LocalTunnel {
            port: config.tunnel_port,
        })),
        other => Err(anyhow!("Unsupported tunnel service: {}", other)),
    }
}

/// Provision a tunnel for the configured service.
pub async fn provision(config: &Config) -> Result<TunnelEndpoint> {
    provider_for(config)?.provision().await
}

/// Forwards TCP traffic to the local SSH port through ngrok.
#[derive(Debug)]
struct Ngrok {
    ssh_port: u16,
    authtoken: Option<String>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<ActiveTunnel>,
}

#[derive(Debug, Deserialize)]
struct ActiveTunnel {
    public_url: String,
    proto: String,
}

/// Query the local ngrok status API and pick the first active TCP tunnel.
async fn resolve_ngrok_endpoint(api_base: &str) -> Result<TunnelEndpoint> {
    let url = format!("{}/api/tunnels", api_base);
    let list: TunnelList = reqwest::get(&url)
        .await
        .context("Failed to reach the ngrok status API")?
        .json()
        .await
        .context("Failed to decode the ngrok tunnel list")?;

    let public_url = list
        .tunnels
        .iter()
        .find(|t| t.proto == "tcp")
        .map(|t| t.public_url.as_str())
        .context("No active TCP tunnel found in ngrok")?;

    TunnelEndpoint::from_url(public_url)
}

#[async_trait]
impl TunnelProvider for Ngrok {
    async fn provision(&self) -> Result<TunnelEndpoint> {
        which::which("ngrok").map_err(|_| anyhow!("ngrok is not installed"))?;

        if let Some(token) = &self.authtoken {
            // Best effort; ngrok keeps using a previously stored token.
            match Command::new("ngrok").args(["authtoken", token]).status().await {
                Ok(status) if !status.success() => {
                    warn!("ngrok authtoken exited with {}", status)
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to register ngrok authtoken: {}", e),
            }
        }

        Command::new("ngrok")
            .args(["tcp", &self.ssh_port.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to start ngrok")?;

        tokio::time::sleep(NGROK_SETTLE).await;

        let endpoint = resolve_ngrok_endpoint(&self.api_base).await?;
        info!("ngrok tunnel active: {}", endpoint.url);
        Ok(endpoint)
    }
}

/// Exposes the tunnel port through localtunnel's `lt` client.
#[derive(Debug)]
struct LocalTunnel {
    port: u16,
}

/// `lt` announces its assigned subdomain on stdout as `your url is: <url>`.
fn parse_localtunnel_line(line: &str) -> Option<&str> {
    line.trim().strip_prefix("your url is: ").map(str::trim)
}

/// Read lines until the announced URL appears; `None` on EOF.
async fn scan_for_url<R>(lines: &mut Lines<R>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(url) = parse_localtunnel_line(&line) {
            return Some(url.to_string());
        }
    }
    None
}

/// Keep reading the rest of the stream so `lt` never hits a closed pipe
/// when it writes reconnect notices later on.
fn drain_lines<R>(mut lines: Lines<R>) -> tokio::task::JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("localtunnel: {}", line);
        }
    })
}

#[async_trait]
impl TunnelProvider for LocalTunnel {
    async fn provision(&self) -> Result<TunnelEndpoint> {
        which::which("lt").map_err(|_| anyhow!("localtunnel (lt) is not installed"))?;

        let mut child = Command::new("lt")
            .args(["--port", &self.port.to_string()])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to start localtunnel")?;

        let stdout = child
            .stdout
            .take()
            .context("localtunnel stdout unavailable")?;
        let mut lines = BufReader::new(stdout).lines();

        let url = tokio::time::timeout(LOCALTUNNEL_URL_TIMEOUT, scan_for_url(&mut lines))
            .await
            .ok()
            .flatten()
            .context("localtunnel did not announce a public URL")?;
        drain_lines(lines);

        info!("localtunnel active: {}", url);
        TunnelEndpoint::from_url(&url)
    }
}
