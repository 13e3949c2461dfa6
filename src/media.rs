use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Uploads directory laid out as `YYYY/MM/<file>`, served under `base_url`.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    base_url: String,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Write `bytes` as a new uniquely named file and return its path and
    /// public URL.
    pub async fn store(&self, prefix: &str, extension: &str, bytes: &[u8]) -> std::io::Result<(PathBuf, String)> {
        self.store_at(Utc::now(), prefix, extension, bytes).await
    }

    pub async fn store_at(
        &self,
        now: DateTime<Utc>,
        prefix: &str,
        extension: &str,
        bytes: &[u8],
    ) -> std::io::Result<(PathBuf, String)> {
        let subdir = now.format("%Y/%m").to_string();
        let dir = self.root.join(&subdir);
        tokio::fs::create_dir_all(&dir).await?;

        let filename = format!("{prefix}-{}.{extension}", Uuid::new_v4());
        let path = dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        let url = format!("{}/{subdir}/{filename}", self.base_url);
        debug!(path = %path.display(), size = bytes.len(), "media file stored");
        Ok((path, url))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn stores_under_year_month_with_matching_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path(), "https://blog.example/uploads/");
        let now = Utc.with_ymd_and_hms(2026, 7, 4, 10, 0, 0).unwrap();

        let (path, url) = storage.store_at(now, "stability", "png", b"png-bytes").await.unwrap();

        assert!(path.starts_with(dir.path().join("2026/07")));
        assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
        let filename = path.file_name().unwrap().to_str().unwrap();
        assert!(filename.starts_with("stability-") && filename.ends_with(".png"));
        assert_eq!(url, format!("https://blog.example/uploads/2026/07/{filename}"));
    }

    #[tokio::test]
    async fn names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path(), "/uploads");
        let (a, _) = storage.store("img", "png", b"a").await.unwrap();
        let (b, _) = storage.store("img", "png", b"b").await.unwrap();
        assert_ne!(a, b);
    }
}
