//! `geofetch status` — show gateway settings and, optionally, its health.

use anyhow::{Context, Result};
use geofetch_client::{
    ClientOptions, ClientSettings, GatewayClient, ENV_GATEWAY_API_KEY, ENV_GATEWAY_URL,
};

pub async fn run(probe: bool) -> Result<()> {
    let settings = ClientSettings::load().context("failed to load gateway settings")?;

    let Some(url) = settings.gateway_url.clone() else {
        println!("Gateway:  not configured");
        println!();
        println!("  export {ENV_GATEWAY_URL}='https://your-gateway.example.com'");
        println!("  export {ENV_GATEWAY_API_KEY}='your-api-key'   # if the gateway requires one");
        if let Some(path) = ClientSettings::default_path() {
            println!("  or add a [gateway] section to {}", path.display());
        }
        anyhow::bail!("gateway not configured");
    };

    println!("Gateway:  {url}");
    println!(
        "API key:  {}",
        if settings.api_key.is_some() { "set" } else { "not set" }
    );

    if !probe {
        return Ok(());
    }

    let client = GatewayClient::new(settings, ClientOptions::default())?;
    let health = client.health().await.context("gateway health check failed")?;
    println!("Status:   {} (v{}, up {}s)", health.status, health.version, health.uptime_secs);
    if let Some(egress) = health.egress {
        match (egress.ip, egress.probe_error) {
            (Some(ip), _) => println!("Egress:   {} via {ip}", egress.mode),
            (None, Some(err)) => println!("Egress:   {} (probe failed: {err})", egress.mode),
            (None, None) => println!("Egress:   {}", egress.mode),
        }
    }
    Ok(())
}
