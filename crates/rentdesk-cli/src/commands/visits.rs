use rentdesk_core::analytics::{Analytics, VisitStats};
use rentdesk_core::cache::TtlCache;
use rentdesk_core::{SyncConfig, SyncEngine};

use crate::error::CliError;

pub fn analytics_for(engine: &SyncEngine, config: &SyncConfig) -> Analytics {
    Analytics::new(
        engine.gateway(),
        engine.identity().device_id.clone(),
        TtlCache::new(config.cache_capacity, config.cache_ttl()),
    )
}

pub fn normalize_page(page: &str) -> Result<String, CliError> {
    let page = page.trim();
    if page.is_empty() {
        return Err(CliError::EmptyPage);
    }
    if page.starts_with('/') {
        Ok(page.to_string())
    } else {
        Ok(format!("/{page}"))
    }
}

pub async fn run_visits_track(
    engine: &SyncEngine,
    config: &SyncConfig,
    page: &str,
) -> Result<(), CliError> {
    if !config.is_remote_configured() {
        return Err(CliError::RemoteNotConfigured);
    }
    let page = normalize_page(page)?;
    if analytics_for(engine, config).track_visit(&page).await {
        println!("Recorded visit to {page}");
    } else {
        println!("Visit to {page} was not recorded (remote unreachable)");
    }
    Ok(())
}

pub fn format_visit_stats(stats: &VisitStats) -> Vec<String> {
    vec![
        format!("Today:      {}", stats.today),
        format!("This month: {}", stats.this_month),
        format!("This year:  {}", stats.this_year),
    ]
}

pub async fn run_visits_stats(
    engine: &SyncEngine,
    config: &SyncConfig,
    as_json: bool,
) -> Result<(), CliError> {
    if !config.is_remote_configured() {
        return Err(CliError::RemoteNotConfigured);
    }
    let stats = analytics_for(engine, config).visit_stats().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in format_visit_stats(&stats) {
            println!("{line}");
        }
    }
    Ok(())
}
