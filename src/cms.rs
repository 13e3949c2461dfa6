//! The content-management host as seen by the generation core.
//!
//! The core only ever talks to the host through [`Cms`]; `store::SqliteCms`
//! is the host shipped with the binary.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::schedule::Cadence;

/// A draft ready to be handed to the host. The host assigns the id and the
/// `draft` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDraftPost {
    pub title: String,
    pub body_markup: String,
    pub category_ids: Vec<i64>,
    pub author_id: i64,
}

/// A generated image that still has to be attached to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Hosted by the provider; the host downloads it.
    Remote { url: String },
    /// Already written to local storage (e.g. decoded from an inline payload).
    Stored { path: PathBuf, url: String },
}

impl ImageSource {
    pub fn url(&self) -> &str {
        match self {
            ImageSource::Remote { url } | ImageSource::Stored { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextRunInfo {
    pub cadence: Cadence,
    pub next_run_at: DateTime<Utc>,
}

#[async_trait]
pub trait Cms: Send + Sync {
    async fn get_option(&self, key: &str) -> Result<Option<String>>;
    async fn store_option(&self, key: &str, value: &str) -> Result<()>;

    /// Names of the given categories, in id order. Unknown ids are skipped.
    async fn category_names(&self, ids: &[i64]) -> Result<Vec<String>>;

    async fn insert_draft_post(&self, post: &NewDraftPost) -> Result<i64>;
    async fn attach_media(&self, source: &ImageSource, post_id: i64) -> Result<i64>;
    async fn set_featured_image(&self, post_id: i64, media_id: i64) -> Result<()>;

    async fn schedule_recurring_task(&self, name: &str, cadence: Cadence, first_run: DateTime<Utc>) -> Result<()>;
    async fn clear_scheduled_task(&self, name: &str) -> Result<()>;
    async fn get_next_run_info(&self, name: &str) -> Result<Option<NextRunInfo>>;

    /// Returns whether the host accepted the message for delivery.
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> bool;
}
