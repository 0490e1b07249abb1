use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use posture_coach_lib::{
    init_logging,
    models::{PostureSession, SessionHistoryStats},
    sensing::simulated::drive_synthetic,
    ConnectivityState, Database, MotionPipeline, PipelineEvent, PipelineSettings,
    PipelineSnapshot, SettingsStore, SimulatedSensor,
};

/// Run the posture pipeline against a synthetic headset and report sessions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite file for finished sessions (":memory:" keeps nothing)
    #[arg(long, env = "POSTURE_COACH_DB", default_value = "posture-coach.sqlite3")]
    db_path: PathBuf,

    /// JSON settings file; defaults are used when it does not exist
    #[arg(long, env = "POSTURE_COACH_SETTINGS", default_value = "posture-coach-settings.json")]
    settings: PathBuf,

    /// How long to coach before stopping the session
    #[arg(long, default_value = "60")]
    duration_secs: u64,

    /// Only print stored sessions, do not run a session
    #[arg(long)]
    list: bool,

    /// Delete all stored sessions first
    #[arg(long)]
    clear: bool,

    /// Maximum number of sessions to print
    #[arg(long, default_value = "20")]
    limit: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryReport {
    stats: SessionHistoryStats,
    sessions: Vec<PostureSession>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let settings = SettingsStore::new(args.settings.clone())?.pipeline();
    let database = Database::new(args.db_path.clone())?;

    if args.clear {
        let removed = database.clear_posture_sessions().await?;
        info!("Cleared {removed} stored sessions");
    }

    if !args.list {
        run_session(&database, settings, Duration::from_secs(args.duration_secs)).await?;
    }

    let report = HistoryReport {
        stats: database.session_history_stats().await?,
        sessions: database.list_posture_sessions_paginated(args.limit, 0).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn run_session(database: &Database, settings: PipelineSettings, duration: Duration) -> Result<()> {
    let sensor = Arc::new(SimulatedSensor::new(true));
    let pipeline = MotionPipeline::new(sensor.clone(), database.clone(), settings.clone())?;
    let cancel_token = CancellationToken::new();

    let driver = tokio::spawn(drive_synthetic(
        sensor,
        settings.sample_period(),
        cancel_token.clone(),
    ));
    let reporter = tokio::spawn(report_changes(
        pipeline.subscribe_snapshots(),
        pipeline.subscribe_events(),
        cancel_token.clone(),
    ));

    pipeline
        .start()
        .await
        .context("failed to start motion pipeline")?;
    info!("Coaching for {} s (ctrl-c to stop early)", duration.as_secs());

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, closing session"),
    }

    pipeline.stop().await;
    cancel_token.cancel();

    if let Err(err) = driver.await {
        error!("synthetic sensor task failed: {err}");
    }
    if let Err(err) = reporter.await {
        error!("reporter task failed: {err}");
    }
    Ok(())
}

/// Log posture/connectivity transitions and pipeline events.
async fn report_changes(
    mut snapshots: watch::Receiver<PipelineSnapshot>,
    mut events: broadcast::Receiver<PipelineEvent>,
    cancel_token: CancellationToken,
) {
    let mut last_posture = "";
    let mut last_connectivity: Option<ConnectivityState> = None;

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(PipelineEvent::AlertRequested { pitch, duration }) => {
                    warn!("Sit up! Leaning {pitch:.1} deg for {duration:.1} s");
                }
                Ok(PipelineEvent::SessionCompleted(session)) => {
                    info!(
                        "Session {} finished: {:.0} s, {}% poor posture",
                        session.id,
                        session.total_duration(),
                        session.poor_posture_percentage()
                    );
                }
                Ok(PipelineEvent::PersistenceFailed { session_id, message }) => {
                    error!("Session {session_id} not saved: {message}");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Reporter skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let posture = snapshot.posture_state.as_str();
                if posture != last_posture || last_connectivity != Some(snapshot.connectivity) {
                    info!(
                        "[{}] posture {posture}, pitch {:.1} deg, poor {}% ({})",
                        snapshot.connectivity.as_str(),
                        snapshot.pitch,
                        snapshot.poor_posture_percentage,
                        snapshot.status_text
                    );
                    last_posture = posture;
                    last_connectivity = Some(snapshot.connectivity);
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}
