//! `geofetch fetch` — fetch a URL through the gateway or directly.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use geofetch_client::{ClientOptions, ClientSettings, GatewayClient};
use tracing::debug;

/// `route`: `Some(true)` forces the gateway, `Some(false)` bypasses it,
/// `None` uses the gateway when one is configured.
pub async fn run(url: &str, route: Option<bool>, timeout_secs: u64, retries: u32) -> Result<()> {
    let settings = ClientSettings::load().context("failed to load gateway settings")?;
    debug!(?settings, ?route, "fetching {url}");

    let client = GatewayClient::new(
        settings,
        ClientOptions {
            timeout: Duration::from_secs(timeout_secs),
            max_retries: retries,
            ..ClientOptions::default()
        },
    )?;

    let body = client
        .fetch_url(url, route)
        .await
        .with_context(|| format!("failed to fetch {url}"))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(body.as_bytes())?;
    if !body.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}
