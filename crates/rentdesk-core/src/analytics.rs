//! Page visit tracking and cached visit counts.
//!
//! Tracking is best-effort: it never fails or blocks the caller for longer
//! than one short attempt. Counts are aggregate reads served from the TTL
//! cache, keyed by UTC day, so a few minutes of staleness is expected.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::cache::TtlCache;
use crate::error::{Error, Result};
use crate::models::Visit;
use crate::remote::RemoteGateway;

/// Visit counts for the current UTC day, month and year
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisitStats {
    pub today: u64,
    pub this_month: u64,
    pub this_year: u64,
}

pub struct Analytics {
    gateway: Arc<RemoteGateway>,
    device_id: String,
    cache: TtlCache<VisitStats>,
}

impl Analytics {
    pub fn new(
        gateway: Arc<RemoteGateway>,
        device_id: impl Into<String>,
        cache: TtlCache<VisitStats>,
    ) -> Self {
        Self {
            gateway,
            device_id: device_id.into(),
            cache,
        }
    }

    /// Record a page view. Returns whether the remote accepted it; never errors.
    pub async fn track_visit(&self, page: &str) -> bool {
        let visit = Visit::now(page.trim(), self.device_id.as_str());
        self.gateway.record_visit(&visit).await
    }

    /// Visit counts, from cache when fresh
    pub async fn visit_stats(&self) -> Result<VisitStats> {
        self.visit_stats_at(Utc::now()).await
    }

    async fn visit_stats_at(&self, now: DateTime<Utc>) -> Result<VisitStats> {
        let key = cache_key(now);
        if let Some(stats) = self.cache.get(&key) {
            tracing::debug!(key = %key, "Visit stats served from cache");
            return Ok(stats);
        }

        let (day, month, year) = period_starts(now)?;
        let (today, this_month, this_year) = futures::try_join!(
            self.gateway.count_visits(day),
            self.gateway.count_visits(month),
            self.gateway.count_visits(year),
        )?;

        let stats = VisitStats {
            today,
            this_month,
            this_year,
        };
        self.cache.set(key, stats);
        Ok(stats)
    }
}

fn cache_key(now: DateTime<Utc>) -> String {
    format!("visits:{}", now.format("%Y-%m-%d"))
}

/// Start of the current day, month and year (UTC)
fn period_starts(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>, DateTime<Utc>)> {
    let date = now.date_naive();
    let start = |date: Option<NaiveDate>| {
        date.and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| Error::InvalidInput(format!("no period start for {now}")))
    };

    Ok((
        start(Some(date))?,
        start(NaiveDate::from_ymd_opt(date.year(), date.month(), 1))?,
        start(NaiveDate::from_ymd_opt(date.year(), 1, 1))?,
    ))
}
