use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for replaylog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests and docs, then a CLI roundtrip
    Check,
    Fmt,
    Clippy,
    Test,
    Doc,
    /// Record a demo log with the CLI and replay it
    Roundtrip {
        /// Where to leave the recorded log
        #[arg(long, default_value = "target/xtask/roundtrip.rlog")]
        log: PathBuf,
        #[arg(long, default_value = "900")]
        frames: u32,
        /// Small on purpose so the run crosses many batch boundaries
        #[arg(long, default_value = "64")]
        batch: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            cargo("fmt check", &["fmt", "--all", "--", "--check"])?;
            clippy()?;
            cargo("test", &["test", "--workspace"])?;
            doc()?;
            roundtrip(Path::new("target/xtask/roundtrip.rlog"), 900, 64)?;
        }
        Commands::Fmt => cargo("fmt check", &["fmt", "--all", "--", "--check"])?,
        Commands::Clippy => clippy()?,
        Commands::Test => cargo("test", &["test", "--workspace"])?,
        Commands::Doc => doc()?,
        Commands::Roundtrip { log, frames, batch } => roundtrip(&log, frames, batch)?,
    }

    Ok(())
}

fn cargo(what: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        bail!("{what} failed");
    }
    Ok(())
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn roundtrip(log: &Path, frames: u32, batch: u32) -> Result<()> {
    if let Some(dir) = log.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log = log.to_string_lossy().into_owned();
    let frames = frames.to_string();
    let batch = batch.to_string();
    run_cli(
        "recording",
        &["save", "--log", &log, "--frames", &frames, "--batch", &batch],
    )?;
    run_cli("replay", &["replay", "--log", &log])?;
    run_cli("inspect", &["inspect", "--log", &log])
}

fn run_cli(what: &str, args: &[&str]) -> Result<()> {
    let mut full = vec!["run", "--quiet", "-p", "replaylog-cli", "--"];
    full.extend_from_slice(args);
    cargo(what, &full)
}
