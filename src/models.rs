use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub body_markup: String,
    pub status: String,
    pub author_id: i64,
    pub featured_media_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[derive(Debug, Clone, FromRow)]
pub struct Media {
    pub id: i64,
    pub post_id: i64,
    pub source_url: Option<String>,
    pub file_path: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// A recurring task whose next run has come due.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduledTask {
    pub name: String,
    pub cadence: String,
    pub next_run_at: DateTime<Utc>,
}
