//! CLI subcommand implementations.

pub mod decode;
pub mod encode;
pub mod fetch;
pub mod status;
