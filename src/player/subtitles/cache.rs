//! On-disk subtitle payload cache.
//!
//! Pure performance cache keyed by (content id, stream index); the directory
//! may be deleted at any time.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::player::error::PlayerResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content_id: String,
    pub stream_index: i64,
}

impl CacheKey {
    pub fn new(content_id: impl Into<String>, stream_index: i64) -> Self {
        Self {
            content_id: content_id.into(),
            stream_index,
        }
    }

    fn file_name(&self, extension: &str) -> String {
        let safe: String = self
            .content_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}_{}.{}", safe, self.stream_index, extension)
    }
}

pub struct SubtitleCache {
    dir: PathBuf,
    /// Known files by key and extension
    entries: Mutex<HashMap<(CacheKey, String), PathBuf>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubtitleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached file for `key`, revalidated against the filesystem
    pub async fn get(&self, key: &CacheKey, extension: &str) -> Option<PathBuf> {
        let entry = (key.clone(), extension.to_string());
        let known = self.entries.lock().get(&entry).cloned();
        let path = known.unwrap_or_else(|| self.dir.join(key.file_name(extension)));

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            trace!("Subtitle cache hit {:?}", path);
            self.entries.lock().insert(entry, path.clone());
            Some(path)
        } else {
            self.entries.lock().remove(&entry);
            None
        }
    }

    pub async fn store(&self, key: &CacheKey, extension: &str, body: &[u8]) -> PlayerResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(key.file_name(extension));
        let partial = path.with_extension(format!("{}.part", extension));
        tokio::fs::write(&partial, body).await?;
        tokio::fs::rename(&partial, &path).await?;

        debug!("Cached subtitle {:?} ({} bytes)", path, body.len());
        self.entries
            .lock()
            .insert((key.clone(), extension.to_string()), path.clone());
        Ok(path)
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Return the cached file or run `fetch` and cache its result.
    ///
    /// Concurrent calls for the same key wait for each other, so a resource
    /// is fetched at most once. Failed fetches cache nothing.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, extension: &str, fetch: F) -> PlayerResult<PathBuf>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PlayerResult<Vec<u8>>>,
    {
        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            match self.get(key, extension).await {
                Some(path) => Ok(path),
                None => match fetch().await {
                    Ok(body) => self.store(key, extension, &body).await,
                    Err(e) => Err(e),
                },
            }
        };
        self.release_key_lock(key, lock);
        result
    }

    /// Drop the per-key lock once no other caller holds or waits on it
    fn release_key_lock(&self, key: &CacheKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(key);
        }
    }

    /// Forget every entry and delete the cache directory
    pub async fn clear(&self) -> PlayerResult<()> {
        self.entries.lock().clear();
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
