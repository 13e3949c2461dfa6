use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app::App;
use crate::cms::{Cms, NextRunInfo};
use crate::{handlers, store};

/// Action fired by the recurring generation task.
pub const GENERATE_POST_ACTION: &str = "autoinsight_generate_post";

/// How often a post is generated automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
}

impl Cadence {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Some(Cadence::None),
            "hourly" => Some(Cadence::Hourly),
            "daily" => Some(Cadence::Daily),
            "weekly" => Some(Cadence::Weekly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cadence::None => "none",
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
        }
    }

    pub fn interval(self) -> Option<Duration> {
        match self {
            Cadence::None => None,
            Cadence::Hourly => Some(Duration::hours(1)),
            Cadence::Daily => Some(Duration::days(1)),
            Cadence::Weekly => Some(Duration::weeks(1)),
        }
    }

    /// Next run strictly after `now`, keeping the phase of `due_at`.
    /// Missed ticks are skipped rather than replayed.
    pub fn advance(self, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.interval()?;
        let mut next = due_at + interval;
        if next <= now {
            let behind = (now - next).num_seconds() / interval.num_seconds() + 1;
            next += interval * behind as i32;
        }
        Some(next)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace the recurring generation task to match `cadence`.
///
/// The first run is one interval from `now`; `none` only clears the task.
pub async fn apply_cadence(cms: &dyn Cms, cadence: Cadence, now: DateTime<Utc>) -> Result<()> {
    cms.clear_scheduled_task(GENERATE_POST_ACTION).await?;
    if let Some(interval) = cadence.interval() {
        cms.schedule_recurring_task(GENERATE_POST_ACTION, cadence, now + interval)
            .await?;
        info!(cadence = %cadence, "automatic generation scheduled");
    } else {
        info!("automatic generation unscheduled");
    }
    Ok(())
}

pub async fn next_run(cms: &dyn Cms) -> Result<Option<NextRunInfo>> {
    cms.get_next_run_info(GENERATE_POST_ACTION).await
}

/// Human-readable schedule summary in the site's timezone.
pub fn describe(info: Option<&NextRunInfo>, tz: Tz) -> String {
    match info {
        Some(info) => format!(
            "Posts are generated automatically {} and the next run is on {}.",
            info.cadence,
            info.next_run_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
        ),
        None => "There are no scheduled posts.".to_string(),
    }
}

/// Task scheduler loop. Wakes every 30 seconds and fires the handler of
/// every due task.
pub async fn scheduler_loop(pool: SqlitePool, app: Arc<App>, cancel: CancellationToken) {
    info!("scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
        }

        let due = match store::claim_due_tasks(&pool, Utc::now()).await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "failed to load due tasks");
                continue;
            }
        };

        for task in due {
            debug!(task = %task.name, cadence = %task.cadence, "task due");
            let app = app.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return;
                }
                handlers::trigger_handler(&app, &task.name).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::cms::fake::FakeCms;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn advance_keeps_phase_and_skips_missed_ticks() {
        assert_eq!(Cadence::Hourly.advance(at(8, 0), at(8, 0)), Some(at(9, 0)));
        assert_eq!(Cadence::Hourly.advance(at(8, 0), at(11, 30)), Some(at(12, 0)));
        assert_eq!(Cadence::Hourly.advance(at(8, 0), at(12, 0)), Some(at(13, 0)));
        assert_eq!(Cadence::Daily.advance(at(8, 0), at(8, 1)), Some(at(8, 0) + Duration::days(1)));
        assert_eq!(Cadence::None.advance(at(8, 0), at(9, 0)), None);
    }

    #[tokio::test]
    async fn apply_cadence_registers_and_clears() {
        let cms = FakeCms::new();
        apply_cadence(&cms, Cadence::Weekly, at(8, 0)).await.unwrap();
        let info = next_run(&cms).await.unwrap().unwrap();
        assert_eq!(info.cadence, Cadence::Weekly);
        assert_eq!(info.next_run_at, at(8, 0) + Duration::weeks(1));

        apply_cadence(&cms, Cadence::Hourly, at(8, 0)).await.unwrap();
        assert_eq!(next_run(&cms).await.unwrap().unwrap().next_run_at, at(9, 0));

        apply_cadence(&cms, Cadence::None, at(8, 0)).await.unwrap();
        assert!(next_run(&cms).await.unwrap().is_none());
    }

    #[test]
    fn describe_renders_in_site_timezone() {
        let info = NextRunInfo {
            cadence: Cadence::Daily,
            next_run_at: at(12, 0),
        };
        let tz: Tz = "Europe/Lisbon".parse().unwrap();
        assert_eq!(
            describe(Some(&info), tz),
            "Posts are generated automatically daily and the next run is on 2026-03-02 12:00:00 WET."
        );
        assert_eq!(describe(None, tz), "There are no scheduled posts.");
    }
}
