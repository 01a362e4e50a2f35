//! JSON file persistence keyed by movie id.
//!
//! Layout under the data directory:
//!
//! ```text
//! movies/{id}.json               cached OMDb metadata
//! reviews/{id}_raw.json          review list
//! analysis/{id}_sentiment.json   latest analysis rows
//! samples/reviews_sample.json    sample reviews for /use-sample
//! ```

use crate::reviews::{builtin_sample, Review};
use crate::summary::AnalysisRow;
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SUBDIRS: [&str; 4] = ["movies", "reviews", "analysis", "samples"];
const SAMPLE_FILE: &str = "reviews_sample.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Movie ids become file names, so only a conservative character set is accepted.
pub fn is_valid_movie_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Clones share one write lock, so read-modify-write updates are serialized.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    writes: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Creates the directory layout and writes the sample file if missing.
    pub async fn init(&self) -> Result<()> {
        for sub in SUBDIRS {
            let dir = self.root.join(sub);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let sample = self.sample_path();
        if fs::metadata(&sample).await.is_err() {
            let _guard = self.writes.lock().await;
            write_json(&sample, &builtin_sample()).await?;
            info!(path = %sample.display(), "wrote sample reviews");
        }
        Ok(())
    }

    fn file(&self, sub: &str, id: &str, suffix: &str) -> Result<PathBuf> {
        if !is_valid_movie_id(id) {
            bail!("invalid movie id: {:?}", id);
        }
        Ok(self.root.join(sub).join(format!("{}{}.json", id, suffix)))
    }

    pub fn sample_path(&self) -> PathBuf {
        self.root.join("samples").join(SAMPLE_FILE)
    }

    pub async fn save_movie_meta(&self, id: &str, meta: &Value) -> Result<()> {
        let path = self.file("movies", id, "")?;
        let _guard = self.writes.lock().await;
        write_json(&path, meta).await
    }

    pub async fn load_movie_meta(&self, id: &str) -> Result<Option<Value>> {
        read_json(&self.file("movies", id, "")?).await
    }

    /// Replaces the stored review list.
    pub async fn save_reviews(&self, id: &str, reviews: &[Review]) -> Result<()> {
        let path = self.file("reviews", id, "_raw")?;
        let _guard = self.writes.lock().await;
        write_json(&path, reviews).await
    }

    pub async fn load_reviews(&self, id: &str) -> Result<Option<Vec<Review>>> {
        read_json(&self.file("reviews", id, "_raw")?).await
    }

    /// Appends to the stored review list and returns the new total.
    pub async fn append_reviews(&self, id: &str, new: Vec<Review>) -> Result<usize> {
        let path = self.file("reviews", id, "_raw")?;
        let _guard = self.writes.lock().await;
        let mut reviews: Vec<Review> = read_json(&path).await?.unwrap_or_default();
        reviews.extend(new);
        write_json(&path, &reviews).await?;
        Ok(reviews.len())
    }

    /// Replaces the analysis snapshot.
    pub async fn save_analysis(&self, id: &str, rows: &[AnalysisRow]) -> Result<()> {
        let path = self.file("analysis", id, "_sentiment")?;
        let _guard = self.writes.lock().await;
        write_json(&path, rows).await
    }

    pub async fn load_analysis(&self, id: &str) -> Result<Option<Vec<AnalysisRow>>> {
        read_json(&self.file("analysis", id, "_sentiment")?).await
    }

    pub async fn load_sample(&self) -> Result<Option<Vec<Review>>> {
        read_json(&self.sample_path()).await
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    // pid + sequence: every write gets its own temp file
    let tmp = path.with_extension(format!(
        "json.{}.{}.tmp",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, &body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("replacing {}", path.display()));
    }
    debug!(path = %path.display(), bytes = body.len(), "saved");
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::Label;

    fn review(text: &str) -> Review {
        Review::new(text, Some("test".to_string()), None)
    }

    #[tokio::test]
    async fn test_init_creates_layout_and_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.init().await.unwrap();

        for sub in SUBDIRS {
            assert!(dir.path().join(sub).is_dir());
        }
        let sample = store.load_sample().await.unwrap().unwrap();
        assert_eq!(sample, builtin_sample());
    }

    #[tokio::test]
    async fn test_init_keeps_existing_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        std::fs::create_dir_all(dir.path().join("samples")).unwrap();
        std::fs::write(store.sample_path(), r#"[{"text": "custom"}]"#).unwrap();

        store.init().await.unwrap();
        let sample = store.load_sample().await.unwrap().unwrap();
        assert_eq!(sample, vec![Review::new("custom", None, None)]);
    }

    #[tokio::test]
    async fn test_missing_files_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.load_reviews("tt0000001").await.unwrap().is_none());
        assert!(store.load_analysis("tt0000001").await.unwrap().is_none());
        assert!(store.load_movie_meta("tt0000001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reviews_overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        store.save_reviews("tt1", &[review("a"), review("b")]).await.unwrap();
        store.save_reviews("tt1", &[review("c")]).await.unwrap();
        assert_eq!(store.load_reviews("tt1").await.unwrap().unwrap(), vec![review("c")]);

        let total = store.append_reviews("tt1", vec![review("d"), review("e")]).await.unwrap();
        assert_eq!(total, 3);
        let texts: Vec<String> = store
            .load_reviews("tt1")
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["c", "d", "e"]);

        assert!(dir.path().join("reviews").join("tt1_raw.json").is_file());
    }

    #[tokio::test]
    async fn test_append_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert_eq!(store.append_reviews("tt2", vec![review("first")]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_analysis_round_trip_keeps_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let rows = vec![AnalysisRow {
            text: "สนุกมาก great".to_string(),
            source: None,
            timestamp: Some("2024-01-01T00:00:00Z".to_string()),
            label: Label::Positive,
            score: 0.85,
        }];
        store.save_analysis("tt3", &rows).await.unwrap();
        assert_eq!(store.load_analysis("tt3").await.unwrap().unwrap(), rows);

        let raw = std::fs::read_to_string(dir.path().join("analysis").join("tt3_sentiment.json")).unwrap();
        assert!(raw.contains("สนุกมาก"));
        assert!(raw.contains("\"POSITIVE\""));
    }

    #[tokio::test]
    async fn test_movie_meta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let meta = serde_json::json!({"Title": "Dune", "Response": "True"});
        store.save_movie_meta("tt1160419", &meta).await.unwrap();
        assert_eq!(store.load_movie_meta("tt1160419").await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.save_reviews("../escape", &[review("x")]).await.is_err());
        assert!(store.load_reviews("a/b").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_appends_keep_every_review() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.init().await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append_reviews("tt1", vec![review(&format!("r{}", i))]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.load_reviews("tt1").await.unwrap().unwrap();
        assert_eq!(stored.len(), 32);
        for i in 0..32 {
            assert!(stored.iter().any(|r| r.text == format!("r{}", i)));
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("reviews"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_from_separate_stores() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Store::new(dir.path());
                tokio::spawn(async move { store.save_reviews("tt2", &[review(&format!("v{}", i))]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stored = Store::new(dir.path()).load_reviews("tt2").await.unwrap().unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_movie_id_validation() {
        assert!(is_valid_movie_id("tt1160419"));
        assert!(is_valid_movie_id("my-movie_2"));
        assert!(!is_valid_movie_id(""));
        assert!(!is_valid_movie_id(".hidden"));
        assert!(!is_valid_movie_id("a/b"));
        assert!(!is_valid_movie_id("a b"));
    }
}
