//! HPlayer probe (hplayer) - Main entry point
//!
//! Plays a local audio file through the engine: the symphonia backend
//! demuxes and decodes, a render thread pulls audio through the gateway at
//! real time (samples are discarded), and every `PlayerEvent` is printed to
//! stdout as one JSON line.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use hplayer_common::{MediaKind, PlaybackState, PlayerConfig, PlayerEvent};
use hplayer_core::codec::SymphoniaCodecProvider;
use hplayer_core::demux::SymphoniaDemuxer;
use hplayer_core::{Player, SyncGateway};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sample frames pulled per render period
const RENDER_CHUNK_FRAMES: usize = 1024;

/// Command-line arguments for hplayer
#[derive(Parser, Debug)]
#[command(name = "hplayer")]
#[command(about = "Play a media file through the HPlayer engine and print its events")]
#[command(version)]
struct Args {
    /// Media file to play
    file: PathBuf,

    /// Config file (overrides HPLAYER_CONFIG and the platform config dir)
    #[arg(short, long, env = "HPLAYER_CONFIG")]
    config: Option<PathBuf>,

    /// Loop playback
    #[arg(long = "loop")]
    loop_play: bool,

    /// Seek to this position (seconds) once prepared
    #[arg(long)]
    seek: Option<f64>,

    /// Stop after this many seconds of wall time
    #[arg(long)]
    max_seconds: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PlayerConfig::resolve(args.config.as_deref())
        .context("Failed to load player configuration")?;
    if args.loop_play {
        config.is_loop_play = true;
    }
    config.is_auto_play = true;

    init_tracing(&config).context("Failed to initialize logging")?;

    let config = Arc::new(config);
    let locator = args.file.to_string_lossy().to_string();
    info!("Starting HPlayer on {}", locator);

    let player = Player::new(
        locator,
        Arc::clone(&config),
        Box::new(SymphoniaDemuxer::new()),
        Arc::new(SymphoniaCodecProvider::new()),
    );
    let mut control = player.subscribe();
    let printer = tokio::spawn(print_events(player.subscribe()));

    let stop = Arc::new(AtomicBool::new(false));
    let render = spawn_render(player.gateway(), Arc::clone(&config), Arc::clone(&stop))
        .context("Failed to start render thread")?;

    player.prepare().context("Failed to start playback")?;

    let limit = args.max_seconds.map(Duration::from_secs_f64);
    let outcome = tokio::select! {
        result = wait_for_end(&player, &mut control, args.seek) => result,
        _ = sleep_or_pending(limit) => {
            info!("Time limit reached");
            Ok(())
        }
        _ = signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    stop.store(true, Ordering::Release);
    if render.join().is_err() {
        warn!("Render thread panicked");
    }
    player.shutdown();
    printer.abort();

    info!(
        "Stopped at {:.3}s after {} loop(s)",
        player.current_playback_time(),
        player.loop_count()
    );
    outcome
}

fn init_tracing(config: &PlayerConfig) -> Result<()> {
    let level = &config.logging.level;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("hplayer={0},hplayer_core={0},hplayer_common={0}", level).into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Print every event as one JSON line
async fn print_events(mut rx: broadcast::Receiver<PlayerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event printer lagged, {} events skipped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Drive the session until playback finishes or the source fails
async fn wait_for_end(
    player: &Arc<Player>,
    rx: &mut broadcast::Receiver<PlayerEvent>,
    seek: Option<f64>,
) -> Result<()> {
    loop {
        match rx.recv().await {
            Ok(PlayerEvent::Prepared { duration, .. }) => {
                info!("Duration {:.3}s", duration);
                if let Some(position) = seek {
                    player.seek(position, move |success| {
                        debug!("Initial seek to {:.3}s: {}", position, success);
                    });
                }
            }
            Ok(PlayerEvent::PlaybackStateChanged {
                state: PlaybackState::Finished,
                ..
            }) => return Ok(()),
            Ok(PlayerEvent::Failed { message, .. }) => return Err(anyhow!(message)),
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

async fn sleep_or_pending(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Pull audio (and due video frames) at real time until `stop` is set
fn spawn_render(
    gateway: Arc<SyncGateway>,
    config: Arc<PlayerConfig>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("hplayer-render".to_string())
        .spawn(move || {
            let channels = config.output_channels;
            let period =
                Duration::from_secs_f64(RENDER_CHUNK_FRAMES as f64 / config.output_sample_rate.max(1) as f64);
            let mut buffer = vec![0.0f32; RENDER_CHUNK_FRAMES * usize::from(channels.max(1))];
            let mut rendered = 0usize;
            let mut next = Instant::now();

            debug!("Render thread started ({} ms period)", period.as_millis());
            while !stop.load(Ordering::Acquire) {
                rendered += gateway.fill_audio(&mut buffer, channels);
                while let Some(frame) = gateway.get_next_frame(MediaKind::Video) {
                    gateway.publish_rendered_position(MediaKind::Video, frame.seconds(), frame.serial);
                }

                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
            debug!("Render thread exited ({} sample frames rendered)", rendered);
        })
}
