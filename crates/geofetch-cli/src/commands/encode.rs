//! `geofetch encode` — print the gateway token for a URL.

use anyhow::{Context, Result};
use geofetch_client::{ClientOptions, ClientSettings, GatewayClient};
use geofetch_core::{encode_target, TargetUrl};

pub fn run(url: &str, full: bool) -> Result<()> {
    TargetUrl::parse(url).with_context(|| format!("cannot encode {url}"))?;

    if full {
        let settings = ClientSettings::load().context("failed to load gateway settings")?;
        let client = GatewayClient::new(settings, ClientOptions::default())?;
        println!("{}", client.gateway_fetch_url(url)?);
    } else {
        println!("{}", encode_target(url));
    }
    Ok(())
}
