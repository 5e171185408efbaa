//! geofetch-core: shared library for the geofetch forwarding gateway.
//!
//! Provides the Base64URL target codec, target URL validation, inbound
//! route classification, and the error taxonomy shared by the gateway
//! server and its client.

pub mod codec;
pub mod error;
pub mod target;

// Re-export commonly used items at crate root.
pub use codec::{decode_target, encode_target};
pub use error::{DecodeError, ErrorBody, GatewayError, GatewayResult};
pub use target::{Route, TargetUrl, API_KEY_HEADER, API_KEY_QUERY_PARAM, FETCH_PREFIX, HEALTH_PATH};
