use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use livecheck_core::{artifact, format_mmss, SessionParams, SessionPhase, SessionSeed};
#[cfg(feature = "v4l2")]
use livecheck_hw::V4l2Backend;
use livecheck_hw::{CameraBackend, SyntheticBackend};
use livecheck_session::{
    Config, HttpScorer, NullSink, PreviewSink, SessionHandle, SessionRunner, SessionSnapshot,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod preview;

use preview::FilePreviewSink;

/// Preview frames between file writes (one per second at the default tick).
const PREVIEW_EVERY: u64 = 10;

#[derive(Parser)]
#[command(name = "livecheck", version, about = "Unattended liveness-verification sessions")]
struct Cli {
    /// Use the built-in test-pattern camera instead of real hardware
    #[arg(long, global = true)]
    synthetic: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List capture devices
    Devices,
    /// Run one verification session
    Run(RunArgs),
    /// Inspect the completion artifact codec
    Artifact {
        #[command(subcommand)]
        action: ArtifactAction,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Entry parameters, e.g. "id=..&seed=..&lang=.."
    #[arg(long)]
    query: String,
    /// Capture device id (defaults to the first listed device)
    #[arg(long)]
    device: Option<String>,
    /// Mirror the preview horizontally
    #[arg(long)]
    mirror: bool,
    /// Periodically write the preview to this JPEG file
    #[arg(long)]
    preview: Option<PathBuf>,
    /// Acknowledge the upload as soon as the session is waiting for it
    #[arg(long)]
    auto_finalize: bool,
    /// Print snapshots as JSON lines instead of status text
    #[arg(long)]
    json: bool,
    /// TOML config file (also LIVECHECK_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ArtifactAction {
    /// Derive the completion artifact for a seed
    Encode { seed: String },
    /// Check an artifact for the completion marker and print its seed
    Decode { value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Devices => list_devices(camera_backend(cli.synthetic, &Config::default())?).await,
        Command::Run(args) => run_session(args, cli.synthetic).await,
        Command::Artifact { action } => inspect_artifact(action),
    }
}

fn camera_backend(synthetic: bool, config: &Config) -> Result<Arc<dyn CameraBackend>> {
    if synthetic {
        return Ok(Arc::new(
            SyntheticBackend::new(&[
                ("synthetic-0", "Synthetic front camera"),
                ("synthetic-1", ""),
            ])
            .with_noise(true),
        ));
    }
    hardware_backend(config)
}

#[cfg(feature = "v4l2")]
fn hardware_backend(config: &Config) -> Result<Arc<dyn CameraBackend>> {
    Ok(Arc::new(V4l2Backend::new(
        config.capture_width,
        config.capture_height,
    )))
}

#[cfg(not(feature = "v4l2"))]
fn hardware_backend(_config: &Config) -> Result<Arc<dyn CameraBackend>> {
    bail!("built without camera support (feature `v4l2`); pass --synthetic")
}

async fn list_devices(backend: Arc<dyn CameraBackend>) -> Result<()> {
    let devices = tokio::task::spawn_blocking(move || backend.enumerate())
        .await
        .context("device enumeration task failed")?
        .context("failed to enumerate capture devices")?;
    if devices.is_empty() {
        println!("no capture devices found");
    }
    for device in devices {
        println!("{}\t{}", device.id, device.display_label());
    }
    Ok(())
}

fn inspect_artifact(action: ArtifactAction) -> Result<()> {
    match action {
        ArtifactAction::Encode { seed } => {
            println!("{}", SessionSeed::from_param(&seed).completion_artifact());
        }
        ArtifactAction::Decode { value } => {
            let verified = artifact::verify_artifact(&value).context("invalid artifact")?;
            let Some(seed) = verified else {
                bail!("artifact does not carry the completion marker");
            };
            println!("verified seed: {}", artifact::encode(&seed));
        }
    }
    Ok(())
}

fn config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| std::env::var_os("LIVECHECK_CONFIG").map(PathBuf::from))
}

async fn run_session(args: RunArgs, synthetic: bool) -> Result<()> {
    let Some(params) = SessionParams::from_query(&args.query) else {
        println!("blank session: the query needs both a subject id and a seed");
        return Ok(());
    };

    let path = config_path(args.config);
    let mut config = Config::load(path.as_deref()).context("failed to load configuration")?;
    if args.mirror {
        config.mirrored = true;
    }
    tracing::info!(
        subject = %params.subject_id,
        locale = ?params.locale,
        scoring_url = %config.scoring_url,
        "starting session"
    );

    let scorer = Arc::new(HttpScorer::new(
        config.scoring_url.clone(),
        config.scoring_timeout(),
    ));
    let sink: Box<dyn PreviewSink> = match args.preview {
        Some(path) => Box::new(FilePreviewSink::new(path, PREVIEW_EVERY)),
        None => Box::new(NullSink),
    };
    let backend = camera_backend(synthetic, &config)?;
    let (runner, handle) = SessionRunner::new(params, &config, backend, scorer, sink)?;
    let mut session = tokio::spawn(runner.with_initial_device(args.device).run());
    let printer = tokio::spawn(print_status(handle.clone(), args.json));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut updates = handle.subscribe();

    let finished = loop {
        tokio::select! {
            joined = &mut session => break joined.context("session task failed")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                handle.shutdown();
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_input(&handle, line.trim()).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
            Ok(()) = updates.changed(), if args.auto_finalize => {
                let awaiting = updates.borrow_and_update().phase.awaits_upload();
                if awaiting {
                    finalize(&handle).await;
                }
            }
        }
    };
    printer.abort();

    let outcome = finished.context("session failed")?;
    match outcome.phase {
        SessionPhase::Completed => {
            println!("session completed");
            if let Some(artifact) = outcome.artifact {
                println!("artifact: {artifact}");
            }
        }
        SessionPhase::HardExpired => println!("session expired"),
        phase => println!("session stopped while {phase:?}"),
    }
    Ok(())
}

async fn handle_input(handle: &SessionHandle, line: &str) {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next()) {
        (Some("ack"), None) => {
            finalize(handle).await;
            Ok(())
        }
        (Some("pass"), None) => handle.force_pass().await.map(|_| ()),
        (Some("mirror"), Some(flag)) => handle.set_mirrored(flag == "on").await,
        (Some("device"), id) => handle.select_device(id),
        (Some("quit"), None) => {
            handle.shutdown();
            Ok(())
        }
        (None, _) => Ok(()),
        _ => {
            eprintln!("commands: ack | pass | mirror on|off | device [ID] | quit");
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("{e}");
    }
}

async fn finalize(handle: &SessionHandle) {
    match handle.acknowledge_upload().await {
        Ok(_) => tracing::info!("upload acknowledged"),
        Err(e) => eprintln!("cannot finalize: {e}"),
    }
}

async fn print_status(handle: SessionHandle, json: bool) {
    let mut updates = handle.subscribe();
    let mut last = String::new();
    loop {
        let line = {
            let snapshot = updates.borrow_and_update();
            if json {
                serde_json::to_string(&*snapshot).unwrap_or_default()
            } else {
                status_line(&snapshot)
            }
        };
        // Snapshots change every frame; text only once per second
        if line != last {
            println!("{line}");
            last = line;
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
}

fn status_line(snapshot: &SessionSnapshot) -> String {
    let soft = snapshot
        .soft_remaining_secs
        .map(format_mmss)
        .unwrap_or_else(|| "--:--".to_string());
    let scores = match (snapshot.spoof_score, snapshot.face_match_score) {
        (Some(spoof), Some(face)) => format!(" spoof {spoof:.2} match {face:.2}"),
        _ => String::new(),
    };
    let fault = snapshot
        .fault
        .as_deref()
        .map(|f| format!(" blocked: {f}"))
        .unwrap_or_default();
    format!(
        "[{:?}] {} (soft {}) {}/{} qualifying{}{}",
        snapshot.phase,
        format_mmss(snapshot.hard_remaining_secs),
        soft,
        snapshot.counters.success_count,
        snapshot.success_threshold,
        scores,
        fault,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecheck_core::SessionCounters;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: "s".to_string(),
            started_at: Default::default(),
            phase: SessionPhase::Running,
            counters: SessionCounters {
                frame_tick: 40,
                success_count: 2,
                has_expired: false,
                has_passed: false,
            },
            success_threshold: 5,
            hard_remaining_secs: 896,
            soft_remaining_secs: Some(65),
            spoof_score: Some(0.12),
            face_match_score: Some(0.3),
            face_region: None,
            device: Some("synthetic-0".to_string()),
            mirrored: false,
            artifact: None,
            fault: None,
        }
    }

    #[test]
    fn test_status_line() {
        assert_eq!(
            status_line(&snapshot()),
            "[Running] 14:56 (soft 01:05) 2/5 qualifying spoof 0.12 match 0.30"
        );
    }

    #[test]
    fn test_status_line_blocked_without_soft() {
        let mut s = snapshot();
        s.soft_remaining_secs = None;
        s.spoof_score = None;
        s.fault = Some("device enumeration failed: gone".to_string());
        assert_eq!(
            status_line(&s),
            "[Running] 14:56 (soft --:--) 2/5 qualifying blocked: device enumeration failed: gone"
        );
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "livecheck",
            "run",
            "--query",
            "id=f1&seed=abc123",
            "--device",
            "synthetic-1",
            "--mirror",
            "--auto-finalize",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.device.as_deref(), Some("synthetic-1"));
        assert!(args.mirror);
        assert!(args.auto_finalize);
        assert!(!args.json);
        assert!(!cli.synthetic);
    }

    #[test]
    fn test_synthetic_flag_anywhere() {
        let cli = Cli::try_parse_from(["livecheck", "devices", "--synthetic"]).unwrap();
        assert!(cli.synthetic);
        let cli =
            Cli::try_parse_from(["livecheck", "--synthetic", "run", "--query", "id=a&seed=b"])
                .unwrap();
        assert!(cli.synthetic);
    }

    #[test]
    fn test_synthetic_backend_lists_test_cameras() {
        let backend = camera_backend(true, &Config::default()).unwrap();
        let ids: Vec<String> = backend.enumerate().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["synthetic-0", "synthetic-1"]);
    }

    #[test]
    fn test_run_requires_query() {
        assert!(Cli::try_parse_from(["livecheck", "run"]).is_err());
    }

    #[test]
    fn test_artifact_decode_rejects_unmarked() {
        let unmarked = artifact::encode(b"abc");
        assert!(inspect_artifact(ArtifactAction::Decode { value: unmarked }).is_err());

        let marked = SessionSeed::from_param("abc123").completion_artifact();
        assert!(inspect_artifact(ArtifactAction::Decode { value: marked }).is_ok());
    }

    #[test]
    fn test_config_path_prefers_flag() {
        let flag = PathBuf::from("/etc/livecheck.toml");
        assert_eq!(config_path(Some(flag.clone())), Some(flag));
    }
}
