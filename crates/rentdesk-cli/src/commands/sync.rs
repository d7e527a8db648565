use std::sync::Arc;
use std::time::Duration;

use rentdesk_core::sync::{scheduler, ChangeEvent, ChangeReason, SyncOutcome, SyncSummary};
use rentdesk_core::util::unix_millis_now;
use rentdesk_core::{DatasetKind, SyncEngine};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::common::{format_relative_time, format_sync_report, format_sync_timestamp};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct DatasetStatus {
    pub dataset: DatasetKind,
    pub entities: usize,
    pub last_updated: Option<i64>,
    pub last_synced_at: Option<i64>,
    pub pending_local: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub remote_configured: bool,
    pub remote_available: bool,
    pub consecutive_failures: u32,
    pub datasets: Vec<DatasetStatus>,
}

pub async fn run_sync(
    engine: &SyncEngine,
    kind: Option<DatasetKind>,
    force: bool,
    remote_configured: bool,
) -> Result<(), CliError> {
    if force {
        if !remote_configured {
            return Err(CliError::RemoteNotConfigured);
        }
        let summary = engine.force_full_resync().await?;
        return report_summary(&summary);
    }

    if let Some(kind) = kind {
        match engine.synchronize(kind).await? {
            SyncOutcome::Skipped => println!("{kind} is already being synchronized"),
            SyncOutcome::Merged(report) => println!("{}", format_sync_report(&report)),
        }
        return Ok(());
    }

    let summary = engine.synchronize_all().await;
    report_summary(&summary)
}

fn report_summary(summary: &SyncSummary) -> Result<(), CliError> {
    for line in format_summary_lines(summary) {
        println!("{line}");
    }
    if summary.is_complete() {
        return Ok(());
    }
    Err(CliError::SyncFailed(
        summary
            .failed
            .iter()
            .copied()
            .map(DatasetKind::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    ))
}

pub fn format_summary_lines(summary: &SyncSummary) -> Vec<String> {
    DatasetKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let state = if summary.succeeded.contains(&kind) {
                "synchronized"
            } else if summary.failed.contains(&kind) {
                "failed"
            } else if summary.skipped.contains(&kind) {
                "already running"
            } else {
                return None;
            };
            Some(format!("{:<15} {state}", kind.as_str()))
        })
        .collect()
}

pub async fn collect_status(
    engine: &SyncEngine,
    remote_configured: bool,
) -> Result<StatusReport, CliError> {
    let remote_available = remote_configured && engine.test_connection().await;
    let connection = engine.connection_state();

    let mut datasets = Vec::with_capacity(DatasetKind::ALL.len());
    for kind in DatasetKind::ALL {
        let snapshot = engine.local_snapshot(kind)?;
        datasets.push(DatasetStatus {
            dataset: kind,
            entities: snapshot.as_ref().map_or(0, |envelope| envelope.payload.len()),
            last_updated: snapshot.as_ref().map(|envelope| envelope.last_updated),
            last_synced_at: engine.last_synced_at(kind)?,
            pending_local: engine.has_pending_changes(kind)?,
        });
    }

    Ok(StatusReport {
        remote_configured,
        remote_available,
        consecutive_failures: connection.consecutive_failures,
        datasets,
    })
}

pub fn format_status_lines(report: &StatusReport, now_ms: i64) -> Vec<String> {
    let remote = match (report.remote_configured, report.remote_available) {
        (false, _) => "not configured (local-only)".to_string(),
        (true, true) => "available".to_string(),
        (true, false) => format!(
            "unavailable ({} consecutive failures)",
            report.consecutive_failures
        ),
    };

    let mut lines = vec![format!("Remote: {remote}")];
    lines.extend(report.datasets.iter().map(|status| {
        let synced = status.last_synced_at.map_or_else(
            || "never synced".to_string(),
            |at| format!("synced {}", format_relative_time(at, now_ms)),
        );
        let pending = if status.pending_local {
            "  pending local changes"
        } else {
            ""
        };
        format!(
            "{:<15} {:>4} entities  {synced}{pending}",
            status.dataset.as_str(),
            status.entities
        )
    }));
    lines
}

pub async fn run_status(
    engine: &SyncEngine,
    remote_configured: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let report = collect_status(engine, remote_configured).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for line in format_status_lines(&report, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_change_event(event: &ChangeEvent) -> String {
    let reason = match event.reason {
        ChangeReason::Saved => "saved",
        ChangeReason::Synchronized => "synchronized",
        ChangeReason::Removed => "removed",
    };
    let at = event
        .last_updated
        .map_or_else(|| "-".to_string(), format_sync_timestamp);
    format!("{at}  {:<15} {reason}", event.dataset.as_str())
}

pub async fn run_watch(engine: Arc<SyncEngine>, interval: Duration) -> Result<(), CliError> {
    let subscriptions = DatasetKind::ALL
        .into_iter()
        .map(|kind| {
            engine.subscribe(kind, |event| println!("{}", format_change_event(event)))
        })
        .collect::<Vec<_>>();
    let handle = scheduler::spawn(engine, interval);
    println!(
        "Resyncing every {}s. Press Enter to resync now, Ctrl-C to stop.",
        interval.as_secs()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => handle.became_active(),
                Ok(None) => stdin_open = false,
                Err(error) => {
                    tracing::warn!(error = %error, "Stopped reading stdin");
                    stdin_open = false;
                }
            },
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    handle.shutdown().await;
    println!("Stopped.");
    Ok(())
}
