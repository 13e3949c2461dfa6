use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::cms::{Cms, ImageSource, NewDraftPost, NextRunInfo};
use crate::mail::Mailer;
use crate::media::MediaStorage;
use crate::models::{Category, ScheduledTask};
#[cfg(test)]
use crate::models::{Media, Post};
use crate::schedule::Cadence;

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Largest remote image accepted for attachment.
const MAX_DOWNLOAD_BYTES: usize = 20 * 1024 * 1024;

fn ts(at: DateTime<Utc>) -> String {
    at.format(TS_FORMAT).to_string()
}

pub async fn get_option(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM options WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("reading option '{key}'"))?;
    Ok(row.map(|(v,)| v))
}

pub async fn set_option(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO options (key, value, updated_at) VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("storing option '{key}'"))?;
    Ok(())
}

/// Insert a category, returning the id of the existing one if the name is taken.
pub async fn add_category(pool: &SqlitePool, name: &str) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        bail!("category name must not be empty");
    }
    sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .context("inserting category")?;
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .context("looking up category id")?;
    Ok(id)
}

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<Category>> {
    sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY id")
        .fetch_all(pool)
        .await
        .context("listing categories")
}

#[cfg(test)]
pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    sqlx::query_as::<_, Post>(
        "SELECT id, title, body_markup, status, author_id, featured_media_id, created_at FROM posts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("loading post")
}

#[cfg(test)]
pub async fn get_post_category_ids(pool: &SqlitePool, post_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT category_id FROM post_categories WHERE post_id = ? ORDER BY category_id")
            .bind(post_id)
            .fetch_all(pool)
            .await
            .context("loading post categories")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[cfg(test)]
pub async fn get_post_media(pool: &SqlitePool, post_id: i64) -> Result<Vec<Media>> {
    sqlx::query_as::<_, Media>(
        "SELECT id, post_id, source_url, file_path, url, created_at FROM media WHERE post_id = ? ORDER BY id",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
    .context("loading post media")
}

/// Return every task due at `now` and move its next run past `now`.
///
/// Tasks whose cadence no longer recurs are removed.
pub async fn claim_due_tasks(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
    let mut tx = pool.begin().await.context("starting task claim")?;

    let due = sqlx::query_as::<_, ScheduledTask>(
        "SELECT name, cadence, next_run_at FROM scheduled_tasks WHERE next_run_at <= ? ORDER BY next_run_at",
    )
    .bind(ts(now))
    .fetch_all(&mut *tx)
    .await
    .context("loading due tasks")?;

    for task in &due {
        match Cadence::parse(&task.cadence).and_then(|c| c.advance(task.next_run_at, now)) {
            Some(next) => {
                sqlx::query("UPDATE scheduled_tasks SET next_run_at = ? WHERE name = ?")
                    .bind(ts(next))
                    .bind(&task.name)
                    .execute(&mut *tx)
                    .await
                    .context("advancing task")?;
                debug!(task = %task.name, next = %ts(next), "task advanced");
            }
            None => {
                warn!(task = %task.name, cadence = %task.cadence, "task has no recurring cadence, removing");
                sqlx::query("DELETE FROM scheduled_tasks WHERE name = ?")
                    .bind(&task.name)
                    .execute(&mut *tx)
                    .await
                    .context("removing task")?;
            }
        }
    }

    tx.commit().await.context("committing task claim")?;
    Ok(due)
}

/// The SQLite-backed content host.
pub struct SqliteCms {
    pool: SqlitePool,
    http: reqwest::Client,
    media: MediaStorage,
    mailer: Option<Mailer>,
    max_download: usize,
}

impl SqliteCms {
    pub fn new(pool: SqlitePool, http: reqwest::Client, media: MediaStorage, mailer: Option<Mailer>) -> Self {
        Self {
            pool,
            http,
            media,
            mailer,
            max_download: MAX_DOWNLOAD_BYTES,
        }
    }

    #[cfg(test)]
    pub fn with_download_limit(mut self, bytes: usize) -> Self {
        self.max_download = bytes;
        self
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Download a remote image into media storage.
    async fn download(&self, url: &str) -> Result<(std::path::PathBuf, String)> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("downloading {url}"))?;
        if !response.status().is_success() {
            bail!("downloading {url}: HTTP {}", response.status());
        }
        let extension = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for_content_type)
            .unwrap_or("png");
        if response
            .content_length()
            .is_some_and(|len| len > self.max_download as u64)
        {
            bail!("downloading {url}: image larger than {} bytes", self.max_download);
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.with_context(|| format!("reading body of {url}"))? {
            if bytes.len() + chunk.len() > self.max_download {
                bail!("downloading {url}: image larger than {} bytes", self.max_download);
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            bail!("downloading {url}: empty body");
        }
        self.media
            .store("featured", extension, &bytes)
            .await
            .context("writing downloaded image")
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next()?.trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[async_trait]
impl Cms for SqliteCms {
    async fn get_option(&self, key: &str) -> Result<Option<String>> {
        get_option(&self.pool, key).await
    }

    async fn store_option(&self, key: &str, value: &str) -> Result<()> {
        set_option(&self.pool, key, value).await
    }

    async fn category_names(&self, ids: &[i64]) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(ids.len());
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            let row: Option<(String,)> = sqlx::query_as("SELECT name FROM categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("loading category name")?;
            if let Some((name,)) = row {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn insert_draft_post(&self, post: &NewDraftPost) -> Result<i64> {
        if post.title.trim().is_empty() {
            bail!("refusing to store a post without a title");
        }
        let mut tx = self.pool.begin().await.context("starting post insert")?;

        let result = sqlx::query("INSERT INTO posts (title, body_markup, status, author_id) VALUES (?, ?, 'draft', ?)")
            .bind(&post.title)
            .bind(&post.body_markup)
            .bind(post.author_id)
            .execute(&mut *tx)
            .await
            .context("inserting post")?;
        let post_id = result.last_insert_rowid();

        for category_id in &post.category_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO post_categories (post_id, category_id)
                 SELECT ?, id FROM categories WHERE id = ?",
            )
            .bind(post_id)
            .bind(category_id)
            .execute(&mut *tx)
            .await
            .context("linking post category")?;
        }

        tx.commit().await.context("committing post")?;
        debug!(post_id, "draft post stored");
        Ok(post_id)
    }

    async fn attach_media(&self, source: &ImageSource, post_id: i64) -> Result<i64> {
        let (source_url, path, url) = match source {
            ImageSource::Remote { url } => {
                let (path, public_url) = self.download(url).await?;
                (Some(url.as_str()), path, public_url)
            }
            ImageSource::Stored { path, url } => (None, path.clone(), url.clone()),
        };

        let inserted = sqlx::query("INSERT INTO media (post_id, source_url, file_path, url) VALUES (?, ?, ?, ?)")
            .bind(post_id)
            .bind(source_url)
            .bind(path.to_string_lossy().into_owned())
            .bind(&url)
            .execute(&self.pool)
            .await;
        let result = match inserted {
            Ok(result) => result,
            Err(e) => {
                // Nothing references the file any more.
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %remove, "failed to remove orphaned upload");
                }
                return Err(e).context("inserting media");
            }
        };
        let media_id = result.last_insert_rowid();
        info!(post_id, media_id, url = %url, "media attached");
        Ok(media_id)
    }

    async fn set_featured_image(&self, post_id: i64, media_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE posts SET featured_media_id = ? WHERE id = ?")
            .bind(media_id)
            .bind(post_id)
            .execute(&self.pool)
            .await
            .context("setting featured image")?;
        if result.rows_affected() == 0 {
            bail!("no post with id {post_id}");
        }
        Ok(())
    }

    async fn schedule_recurring_task(&self, name: &str, cadence: Cadence, first_run: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduled_tasks (name, cadence, next_run_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET cadence = excluded.cadence, next_run_at = excluded.next_run_at",
        )
        .bind(name)
        .bind(cadence.as_str())
        .bind(ts(first_run))
        .execute(&self.pool)
        .await
        .context("scheduling task")?;
        Ok(())
    }

    async fn clear_scheduled_task(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_tasks WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("clearing task")?;
        Ok(())
    }

    async fn get_next_run_info(&self, name: &str) -> Result<Option<NextRunInfo>> {
        let task = sqlx::query_as::<_, ScheduledTask>(
            "SELECT name, cadence, next_run_at FROM scheduled_tasks WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("loading task")?;
        Ok(task.and_then(|t| {
            Cadence::parse(&t.cadence).map(|cadence| NextRunInfo {
                cadence,
                next_run_at: t.next_run_at,
            })
        }))
    }

    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> bool {
        let Some(mailer) = &self.mailer else {
            debug!("no mail transport configured");
            return false;
        };
        match mailer.send(to, subject, body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(to, error = %e, "failed to send mail");
                false
            }
        }
    }
}
