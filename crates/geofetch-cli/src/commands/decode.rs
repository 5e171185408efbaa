//! `geofetch decode` — turn a gateway token back into its URL.
//!
//! Applies the same checks as the gateway, so a token that decodes here
//! is one the gateway will accept as a target.

use anyhow::{Context, Result};
use geofetch_core::TargetUrl;

pub fn run(token: &str) -> Result<()> {
    let target = TargetUrl::from_token(token)
        .with_context(|| format!("gateway would reject token {token:?}"))?;
    println!("{target}");
    Ok(())
}
