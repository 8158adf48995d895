use clap::Parser;
use log::info;
use server::config::{MatchConfig, ServerConfig};
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// How often room timers are polled, per second
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum peers per room
    #[arg(long, default_value = "10")]
    max_players: usize,

    /// Maximum peers connected to the relay
    #[arg(long, default_value = "64")]
    max_clients: usize,

    /// Interval between authority health checks
    #[arg(long, default_value = "5000")]
    health_check_ms: u64,

    /// Minimum time between two authority transfers
    #[arg(long, default_value = "60000")]
    min_transfer_interval_ms: u64,

    /// Transfers allowed per match
    #[arg(long, default_value = "3")]
    max_transfer_attempts: u32,

    /// How long a ready check waits for acknowledgments
    #[arg(long, default_value = "30000")]
    ready_timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            poll_interval: Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64),
            max_clients: self.max_clients,
            match_config: MatchConfig {
                max_players: self.max_players,
                health_check_interval_ms: self.health_check_ms,
                min_transfer_interval_ms: self.min_transfer_interval_ms,
                max_transfer_attempts: self.max_transfer_attempts,
                ready_check_timeout_ms: self.ready_timeout_ms,
                ..MatchConfig::default()
            },
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();
    info!("Starting relay on {}", config.bind_addr);
    info!(
        "Rooms hold up to {} players, health checks every {}ms",
        config.match_config.max_players, config.match_config.health_check_interval_ms
    );

    let mut server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
