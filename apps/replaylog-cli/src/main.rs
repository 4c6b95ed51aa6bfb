use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use glam::Vec3;
use replaylog_common::{BodyId, SessionSettings};
use replaylog_kernel::World;
use replaylog_persist::{Player, PlayerConfig, Recorder, RecorderConfig, Shape};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replaylog-cli", about = "Record, replay and inspect replay logs")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and format info
    Info,
    /// Run the demo simulation and record it
    Save {
        /// Log file to write
        #[arg(short, long)]
        log: PathBuf,
        /// Number of frames to record
        #[arg(short, long, default_value = "600")]
        frames: u32,
        /// Frames buffered per physical write
        #[arg(short, long, default_value = "200")]
        batch: u32,
        /// Session settings JSON; defaults are used when omitted
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Override the settings seed
        #[arg(long)]
        seed: Option<u64>,
        /// Override the settings body count
        #[arg(long)]
        bodies: Option<u32>,
        /// Trace every committed frame
        #[arg(long)]
        trace_frames: bool,
    },
    /// Drive a fresh simulation from a log and check it against the recorded state
    Replay {
        #[arg(short, long)]
        log: PathBuf,
        /// Trace every advanced frame
        #[arg(long)]
        trace_frames: bool,
    },
    /// Print a log's header, channels and settings
    Inspect {
        #[arg(short, long)]
        log: PathBuf,
    },
}

const MOCK_ACTION: &str = "mock_action";
const IMPULSE: &str = "agent/impulse";

fn pose_channel(id: BodyId) -> String {
    format!("bodies/{id}/pose")
}

/// Scripted agent input: a forward push every 45 ticks, a sideways nudge every 30.
fn scripted_impulse(tick: u32) -> Vec3 {
    let mut impulse = Vec3::ZERO;
    if tick % 45 == 0 {
        impulse += Vec3::new(0.0, 0.4, 1.5);
    }
    if tick % 30 == 15 {
        impulse += Vec3::new(0.3, 0.0, 0.0);
    }
    impulse
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("replaylog-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("log format: v{}", replaylog_persist::FORMAT_VERSION);
            println!(
                "default batch: {} frames",
                RecorderConfig::default().frames_before_write
            );
            let settings = SessionSettings::default();
            println!(
                "default session: seed={}, bodies={}, timestep={:.5}s",
                settings.seed, settings.body_count, settings.timestep
            );
        }
        Commands::Save {
            log,
            frames,
            batch,
            settings,
            seed,
            bodies,
            trace_frames,
        } => {
            let mut settings = match settings {
                Some(path) => SessionSettings::load(&path)
                    .with_context(|| format!("loading settings from {}", path.display()))?,
                None => SessionSettings::default(),
            };
            if let Some(seed) = seed {
                settings.seed = seed;
            }
            if let Some(bodies) = bodies {
                settings.body_count = bodies;
            }
            save(&log, &settings, frames, batch, trace_frames)?;
        }
        Commands::Replay { log, trace_frames } => {
            if !replay(&log, trace_frames)? {
                bail!("replay of {} diverged from the recording", log.display());
            }
        }
        Commands::Inspect { log } => inspect(&log)?,
    }

    Ok(())
}

fn save(
    log: &Path,
    settings: &SessionSettings,
    frames: u32,
    batch: u32,
    trace_frames: bool,
) -> anyhow::Result<()> {
    println!(
        "Recording: seed={}, bodies={}, frames={frames}, batch={batch}",
        settings.seed, settings.body_count
    );
    let mut world = World::from_settings(settings);
    let mut rec = Recorder::create(
        log,
        RecorderConfig {
            frames_before_write: batch,
            log_status: trace_frames,
            settings: settings.to_blob()?,
        },
    );

    rec.register_action(MOCK_ACTION, Shape::Array(1))?;
    rec.register_action(IMPULSE, Shape::Vector3)?;
    let ids: Vec<BodyId> = world.bodies().keys().copied().collect();
    for &id in &ids {
        rec.register_state(pose_channel(id), Shape::Pose)?;
    }
    rec.finalize_schema()?;

    for tick in 0..frames {
        let impulse = scripted_impulse(tick);
        world.step(impulse);

        rec.set_value(MOCK_ACTION, [1.0])?;
        rec.set_value(IMPULSE, impulse)?;
        for (id, body) in world.bodies() {
            rec.set_value(&pose_channel(*id), body.pose())?;
        }
        rec.commit_frame()?;
    }

    let summary = rec.close()?;
    println!(
        "Saved {}: frames={}, writes={}, bytes={}, hash={:#018x}",
        log.display(),
        summary.frame_count,
        summary.batches_written,
        summary.bytes_written,
        world.state_hash()
    );
    Ok(())
}

/// Returns whether every recorded pose matched the replayed one.
fn replay(log: &Path, trace_frames: bool) -> anyhow::Result<bool> {
    let blob = Player::read_settings(log)
        .with_context(|| format!("reading settings from {}", log.display()))?;
    let settings = SessionSettings::from_blob(&blob).context("decoding session settings")?;
    let mut world = World::from_settings(&settings);
    let mut player = Player::open_with(
        log,
        PlayerConfig {
            log_status: trace_frames,
        },
    )?;
    println!(
        "Replaying {}: seed={}, bodies={}, frames={}",
        log.display(),
        settings.seed,
        settings.body_count,
        player.frame_count()
    );

    let mut mismatches = 0u64;
    while player.has_next_frame() {
        let frame = player.advance_frame()?;
        let impulse = player
            .read_value(IMPULSE)?
            .as_vec3()
            .with_context(|| format!("{IMPULSE} is not a vec3 channel"))?;
        world.step(impulse);

        for (id, body) in world.bodies() {
            let channel = pose_channel(*id);
            let recorded = player
                .read_value(&channel)?
                .as_pose()
                .with_context(|| format!("{channel} is not a pose channel"))?;
            if body.pose() != recorded {
                mismatches += 1;
                tracing::warn!(frame, body = %id, "pose mismatch");
            }
        }
    }

    println!(
        "Replay: tick={}, hash={:#018x}, mismatches={mismatches}",
        world.tick(),
        world.state_hash()
    );
    let ok = mismatches == 0;
    println!("Match: {}", if ok { "OK" } else { "MISMATCH" });
    Ok(ok)
}

fn inspect(log: &Path) -> anyhow::Result<()> {
    let player = Player::open(log)?;
    let header = player.header();
    println!("{}", log.display());
    println!("  format: v{}", header.version);
    println!("  frames_before_write: {}", header.frames_before_write);
    match header.frame_count {
        Some(n) => println!("  frames: {n}"),
        None => println!(
            "  frames: {} (recovered, log was not closed)",
            player.frame_count()
        ),
    }
    println!("  data offset: {}", header.data_offset);

    let schema = player.schema();
    println!(
        "  channels: {} ({} slots per frame)",
        schema.channels().len(),
        schema.frame_width()
    );
    for channel in schema.channels() {
        println!(
            "    {:<6} {:<10} {}",
            channel.kind.to_string(),
            channel.shape.to_string(),
            channel.path
        );
    }

    let blob = player.read_metadata_blob();
    match SessionSettings::from_blob(blob) {
        Ok(settings) => println!("  settings: {settings:?}"),
        Err(_) => println!("  settings: {} opaque bytes", blob.len()),
    }
    Ok(())
}
