//! ---
//! r8s_section: "11-simulation-test-harness"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Scenario replay feed for offline runs and tests."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use r8_speeder_common::config::SpeederConfig;
use r8_speeder_core::{Channel, RecordingSink, SpeedTracker};
use r8_speeder_sim::{spawn_feed, FeedError, ReplayFeed};
use tempfile::Builder;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

fn scenario_file(suffix: &str, contents: &str) -> Result<tempfile::TempPath> {
    let mut file = Builder::new().suffix(suffix).tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn tracker(sink: Arc<RecordingSink>) -> Arc<SpeedTracker> {
    Arc::new(SpeedTracker::from_config(
        &SpeederConfig::default(),
        sink,
        Handle::current(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_scenario_drives_the_tracker() -> Result<()> {
    let mut rows = Vec::new();
    for second in 0..=6 {
        rows.push(format!(
            r#"{{"simulation_time":"2024-03-01T08:00:{second:02}Z","id":12,"controller_kind":"player","engineer_name":"sam","train_symbol":"Q-LACBAR","speed_mph":37.0,"speed_limit_mph":30.0,"axle_count":64,"block_id":11020,"railroad_initials":"BNSF","loco_number":4721}}"#
        ));
    }
    let path = scenario_file(".json", &format!("[{}]", rows.join(",")))?;
    let feed = ReplayFeed::from_path(path.as_ref())?;
    assert_eq!(feed.len(), 14);
    assert_eq!(feed.skipped(), 0);

    let sink = Arc::new(RecordingSink::new());
    let tracker = tracker(sink.clone());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stats = spawn_feed(feed, tracker.clone(), 1_000.0, shutdown_rx).await?;

    assert_eq!(stats.clock_updates, 7);
    assert_eq!(stats.samples, 7);
    assert_eq!(stats.events, 2, "acquired and speeding began");
    assert!(!stats.interrupted);

    let got = sink.wait_for(2, Duration::from_secs(2)).await;
    let status: Vec<_> = got
        .iter()
        .filter(|(channel, _)| *channel == Channel::Status)
        .collect();
    assert_eq!(status.len(), 2);
    assert!(status
        .iter()
        .any(|(_, text)| text.starts_with("[08:00:05] sam on Q-LACBAR began speeding")));
    path.close()?;
    Ok(())
}

#[tokio::test]
async fn csv_scenario_skips_malformed_rows() -> Result<()> {
    let path = scenario_file(
        ".csv",
        "simulation_time,id,controller_kind,engineer_name,train_symbol,speed_mph,speed_limit_mph,axle_count,block_id,railroad_initials,loco_number\n\
         2024-03-01T08:00:00Z,,,,,,,,,,\n\
         ,3,ai,,,15.0,40.0,20,12000,UP,100\n\
         ,3,player,lee,M-BARWSP,fast,40.0,20,12000,UP,100\n\
         2024-03-01T08:00:01Z,3,player,lee,M-BARWSP,15.0,40.0,20,12000,UP,100\n",
    )?;
    let feed = ReplayFeed::from_path(path.as_ref())?;
    assert_eq!(feed.skipped(), 1);
    assert_eq!(feed.len(), 4);

    let sink = Arc::new(RecordingSink::new());
    let tracker = tracker(sink);
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let stats = feed.run(&tracker, 1_000.0, &mut shutdown_rx).await;
    assert_eq!(stats.samples, 2);
    assert_eq!(stats.events, 1);
    let sessions = tracker.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].active);
    assert_eq!(sessions[0].engineer, "lee");
    path.close()?;
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_a_paced_replay() -> Result<()> {
    let path = scenario_file(
        ".json",
        r#"[{"simulation_time":"2024-03-01T08:00:00Z"},{"simulation_time":"2024-03-01T09:00:00Z"}]"#,
    )?;
    let feed = ReplayFeed::from_path(path.as_ref())?;
    let sink = Arc::new(RecordingSink::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = spawn_feed(feed, tracker(sink), 1.0, shutdown_rx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(())?;
    let stats = handle.await?;
    assert!(stats.interrupted);
    assert_eq!(stats.clock_updates, 1);
    path.close()?;
    Ok(())
}

#[tokio::test]
async fn vanishing_speedup_waits_for_shutdown() -> Result<()> {
    let path = scenario_file(
        ".json",
        r#"[{"simulation_time":"2024-03-01T08:00:00Z"},{"simulation_time":"2024-03-01T08:00:01Z"}]"#,
    )?;
    let feed = ReplayFeed::from_path(path.as_ref())?;
    let sink = Arc::new(RecordingSink::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = spawn_feed(feed, tracker(sink), 1e-300, shutdown_rx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());
    shutdown_tx.send(())?;
    let stats = handle.await?;
    assert!(stats.interrupted);
    assert_eq!(stats.clock_updates, 1);
    path.close()?;
    Ok(())
}

#[test]
fn unknown_extension_is_rejected() {
    let err = ReplayFeed::from_path(std::path::Path::new("scenario.xml"))
        .expect_err("xml is not a scenario format");
    assert!(matches!(err, FeedError::UnsupportedFormat(_)));
}
