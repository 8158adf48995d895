use clap::Parser;
use log::info;
use peer::network::Client;
use peer::session::{PeerSession, SessionConfig};
use shared::{RoomId, Team};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Room to join
    #[arg(short = 'r', long, default_value = "1")]
    room: RoomId,

    /// Display name
    #[arg(short = 'n', long, default_value = "peer")]
    name: String,

    /// Team to join: red, blue or spectator
    #[arg(short = 't', long, default_value = "spectator")]
    team: Team,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Declared connection speed reported to the relay
    #[arg(long, default_value = "5.0")]
    speed: f32,

    /// Simulation ticks per second when running as authority
    #[arg(long, default_value_t = shared::TICK_RATE)]
    tick_rate: u32,

    /// Start the match once both teams have players, if this peer leads the room
    #[arg(long)]
    start: bool,

    /// Report lag after this long without game state (0 disables)
    #[arg(long, default_value = "3000")]
    complain_after_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting peer {} for room {}", args.name, args.room);
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let tick_interval = Duration::from_millis(1_000 / args.tick_rate.max(1) as u64);
    let session = PeerSession::new(SessionConfig {
        room_id: args.room,
        name: args.name,
        team: args.team,
        connection_speed: args.speed,
        tick_interval_ms: tick_interval.as_millis() as u64,
        complain_after_ms: (args.complain_after_ms > 0).then_some(args.complain_after_ms),
        auto_start: args.start,
        seed: shared::timestamp_ms(),
    });

    let mut client = Client::new(&args.server, session, args.fake_ping, tick_interval, args.team.is_active()).await?;
    client.run().await?;

    Ok(())
}
