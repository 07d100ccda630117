//! # Relay Player Simulator
//!
//! Connects N simulated players to a running relay. Each one runs around a
//! circle, publishing its position at a fixed rate, and logs how many peers
//! it can see.

use anyhow::{Context, Result};
use clap::Parser;
use relay_client::{LocalPlayer, PeerClient};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const COLORS: [&str; 6] = [
    "#3498db", "#e74c3c", "#2ecc71", "#f1c40f", "#9b59b6", "#1abc9c",
];

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-sim")]
#[command(about = "Simulates players against a position relay")]
struct Args {
    /// Relay WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8765")]
    url: String,

    /// Number of simultaneous players to simulate
    #[arg(short, long, default_value = "5")]
    players: u32,

    /// Position updates per second, per player
    #[arg(short, long, default_value = "10.0")]
    tick_hz: f64,

    /// Simulation duration in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,
}

/// Summary of one simulated player's run.
#[derive(Debug, Default)]
struct SimReport {
    sent: u64,
    received: u64,
    peers_seen: usize,
}

/// Position of player `index` at time `t`. Each player gets its own circle
/// around the origin.
fn circle_position(index: u32, t: f64) -> (f64, f64, f64) {
    let radius = 5.0 + f64::from(index) * 2.0;
    let phase = f64::from(index) * 0.7;
    let angle = phase + t * 0.5;
    (radius * angle.cos(), 1.0, radius * angle.sin())
}

async fn simulate_player(index: u32, args: Args) -> Result<SimReport> {
    let player = LocalPlayer::new(
        format!("Sim-{index}"),
        COLORS[index as usize % COLORS.len()],
    );
    let mut client = PeerClient::connect(&args.url, player)
        .await
        .with_context(|| format!("player {index} could not connect"))?;
    let player_id = client.player().id.clone();

    let tick_period = Duration::from_secs_f64(1.0 / args.tick_hz);
    let started = Instant::now();
    let end = started + Duration::from_secs(args.duration);
    let mut next_tick = started;
    let mut last_status = started;
    let mut report = SimReport::default();

    while Instant::now() < end {
        if Instant::now() >= next_tick {
            let t = started.elapsed().as_secs_f64();
            let (x, y, z) = circle_position(index, t);
            client.send_position(x, y, z).await?;
            report.sent += 1;
            next_tick += tick_period;
        }

        let received = timeout_at(next_tick.min(end), client.next_update()).await;
        match received {
            Ok(Ok(Some(_))) => report.received += 1,
            Ok(Ok(None)) => {
                warn!(%player_id, "Relay closed the connection");
                break;
            }
            Ok(Err(e)) => return Err(e).context("receive failed"),
            // Next tick is due.
            Err(_) => {}
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            info!(
                %player_id,
                peers = client.peers().len(),
                sent = report.sent,
                received = report.received,
                "📊 Player status"
            );
        }
    }

    report.peers_seen = client.peers().len();
    client.close().await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    if !(args.tick_hz.is_finite() && args.tick_hz > 0.0) {
        anyhow::bail!("--tick-hz must be a positive number");
    }

    info!(
        "🚀 Simulating {} player(s) against {} at {} Hz for {}s",
        args.players, args.url, args.tick_hz, args.duration
    );

    let handles: Vec<_> = (0..args.players)
        .map(|index| {
            let args = args.clone();
            tokio::spawn(async move { (index, simulate_player(index, args).await) })
        })
        .collect();

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok((index, Ok(report))) => info!(
                "✅ Player {} finished: sent {}, received {}, saw {} peer(s)",
                index, report.sent, report.received, report.peers_seen
            ),
            Ok((index, Err(e))) => {
                failures += 1;
                error!("❌ Player {} failed: {:?}", index, e);
            }
            Err(e) => {
                failures += 1;
                error!("❌ Player task panicked: {}", e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} simulated player(s) failed");
    }
    info!("🏁 Simulation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_position_stays_on_radius() {
        for index in 0..4 {
            let radius = 5.0 + f64::from(index) * 2.0;
            for t in [0.0, 1.3, 10.0] {
                let (x, y, z) = circle_position(index, t);
                assert!(((x * x + z * z).sqrt() - radius).abs() < 1e-9);
                assert_eq!(y, 1.0);
            }
        }
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "relay-sim", "--url", "ws://localhost:9000", "--players", "3", "--tick-hz", "20",
            "--duration", "5",
        ])
        .unwrap();
        assert_eq!(args.players, 3);
        assert_eq!(args.tick_hz, 20.0);
        assert_eq!(args.duration, 5);
    }
}
