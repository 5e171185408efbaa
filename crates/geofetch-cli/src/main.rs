//! geofetch — fetch URLs through a geofetch gateway.
//!
//! Encodes and decodes gateway tokens, fetches targets through the gateway
//! (or directly), and reports gateway configuration and health.

mod commands;

use clap::{Parser, Subcommand};
use tracing::error;

/// geofetch — gateway fetch client
#[derive(Parser)]
#[command(name = "geofetch", version, about = "Fetch URLs through a geofetch gateway")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the Base64URL gateway token for a URL
    Encode {
        /// Target URL (http:// or https://)
        url: String,

        /// Print the full gateway fetch URL instead of the token
        #[arg(long)]
        full: bool,
    },

    /// Decode a gateway token back into its URL
    Decode {
        /// Base64URL token (padding optional)
        token: String,
    },

    /// Fetch a URL and write the body to stdout
    Fetch {
        /// Target URL (http:// or https://)
        url: String,

        /// Bypass the gateway
        #[arg(long, conflicts_with = "gateway")]
        direct: bool,

        /// Require the gateway even if auto-detection would skip it
        #[arg(long)]
        gateway: bool,

        /// Per-attempt timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Attempts for transient gateway failures
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },

    /// Show gateway settings
    Status {
        /// Also query the gateway's /health endpoint
        #[arg(long)]
        probe: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so fetched bodies on stdout stay clean.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("geofetch=debug,geofetch_client=debug,geofetch_core=debug")
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("geofetch=warn,geofetch_client=warn")
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let result = match cli.command {
        Command::Encode { url, full } => commands::encode::run(&url, full),
        Command::Decode { token } => commands::decode::run(&token),
        Command::Fetch {
            url,
            direct,
            gateway,
            timeout,
            retries,
        } => {
            let route = match (direct, gateway) {
                (true, _) => Some(false),
                (_, true) => Some(true),
                _ => None,
            };
            commands::fetch::run(&url, route, timeout, retries).await
        }
        Command::Status { probe } => commands::status::run(probe).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("geofetch: {e:#}");
        std::process::exit(1);
    }
}
