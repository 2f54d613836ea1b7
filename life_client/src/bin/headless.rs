//! Headless client: runs a session against the simulated backend and logs
//! what the reconciliation engine does with every snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use life_client::{
    EngineObserver, GameBackend, GameSession, LifecycleEvent, ObserverSet, SessionEvent, SimulatedBackend,
    SyncDecision,
};
use life_core::{GameConfig, LocalGame};

#[derive(Parser)]
#[command(name = "headless")]
#[command(about = "Run a territorial Life client against a simulated backend", version)]
struct Cli {
    /// JSON game config (defaults to the reference deployment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to run
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// Simulated round trip to the backend
    #[arg(short, long, default_value_t = 400)]
    latency_ms: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Logs one line per second of display generations
struct GenerationLogger {
    every: u64,
}

impl EngineObserver for GenerationLogger {
    fn on_generation_changed(&mut self, generation: u64) {
        if generation % self.every == 0 {
            debug!(generation, "display generation");
        }
    }
}

const GLIDER: [(i32, i32); 5] = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];
const R_PENTOMINO: [(i32, i32); 5] = [(1, 0), (2, 0), (0, 1), (1, 1), (1, 2)];

fn load_config(path: Option<&PathBuf>) -> Result<GameConfig> {
    let Some(path) = path else {
        return Ok(GameConfig::default());
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(GameConfig::from_json_str(&json)?)
}

/// Two players: slot 1 (us) with a glider heading for slot 2's base
fn seed_game(config: &GameConfig) -> Result<LocalGame> {
    let mut game = LocalGame::new(config.clone());
    let offset = |origin: (i32, i32), pattern: &[(i32, i32)]| -> Vec<(i32, i32)> {
        pattern.iter().map(|&(x, y)| (origin.0 + x, origin.1 + y)).collect()
    };

    for slot in [1, 2] {
        game.faucet(slot).map_err(anyhow::Error::msg)?;
    }
    game.join(1, 16, 16).map_err(anyhow::Error::msg)?;
    game.join(2, 40, 40).map_err(anyhow::Error::msg)?;
    game.place(1, &offset((18, 18), &GLIDER)).map_err(anyhow::Error::msg)?;
    game.place(2, &offset((42, 42), &R_PENTOMINO)).map_err(anyhow::Error::msg)?;
    Ok(game)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let config = load_config(cli.config.as_ref())?;
    let game = seed_game(&config)?;
    let backend: Arc<dyn GameBackend> =
        Arc::new(SimulatedBackend::new(game).with_latency(Duration::from_millis(cli.latency_ms)));

    let per_second = (1000 / config.tick_interval_ms).max(1);
    let observers = ObserverSet::new().with(GenerationLogger { every: per_second });
    let (session, mut events) = GameSession::start(backend, config, observers)?;

    for event in [
        LifecycleEvent::Initialized { authenticated: true },
        LifecycleEvent::RegionSelected("local".to_string()),
        LifecycleEvent::ServerSelected("simulated".to_string()),
        LifecycleEvent::JoinRequested { slot: 1 },
        LifecycleEvent::JoinConfirmed { slot: 1, generation: 0 },
    ] {
        session.lifecycle(event).await?;
    }

    let deadline = tokio::time::sleep(Duration::from_secs(cli.seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(SessionEvent::Sync { decision: SyncDecision::Accepted(reason), local_generation }) => {
                    info!(?reason, local_generation, "resynced");
                }
                Some(SessionEvent::Sync { .. }) | Some(SessionEvent::Contact(_)) => {}
                Some(SessionEvent::Phase(phase)) => info!(phase = phase.name(), "phase"),
                Some(SessionEvent::Eliminated(stats)) => info!(?stats, "eliminated"),
                Some(SessionEvent::Diverged { since_ms }) => warn!(since_ms, "diverged"),
                Some(other) => debug!(?other, "session event"),
                None => break,
            },
        }
    }

    let status = session.status().await?;
    info!(
        phase = status.phase.name(),
        display_generation = status.display_generation,
        accepted = status.sync.accepted,
        rejected = status.sync.rejected,
        avg_latency_ms = status.sync.latency.average_ms,
        "final state"
    );
    debug!(sync = %serde_json::to_string(&status.sync)?, "final sync state");

    session.destroy().await?;
    Ok(())
}
