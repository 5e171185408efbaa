//! geofetch-client: fetch URLs through a geofetch gateway.
//!
//! Targets are Base64URL-encoded into `/fetch/<token>` so the gateway path
//! never contains a literal URL. Transient gateway failures (5xx, connect
//! errors, timeouts) are retried with linear backoff; authentication and
//! policy refusals are not.
//!
//! # Quick Start
//!
//! ```no_run
//! use geofetch_client::{ClientOptions, ClientSettings, GatewayClient};
//!
//! # async fn example() -> Result<(), geofetch_client::ClientError> {
//! let settings = ClientSettings::load()?;
//! let client = GatewayClient::new(settings, ClientOptions::default())?;
//! let body = client.fetch_url("http://www.law.go.kr/DRF/lawSearch.do", None).await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod settings;

pub use client::{ClientOptions, EgressInfo, GatewayClient, GatewayHealth};
pub use error::{ClientError, ClientResult};
pub use settings::{ClientSettings, ENV_GATEWAY_API_KEY, ENV_GATEWAY_URL};
