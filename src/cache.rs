//! Content-addressed image cache for geopin.
//!
//! Maps a photo record's id to its image bytes so an album only downloads
//! each image once. Entries live in memory with a disk backing under the
//! configured cache directory, so they survive restarts. There is no size or
//! age eviction: a cache entry lives exactly as long as its photo record, and
//! every record-deletion path evicts the matching entry.

use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Failures on the image-bytes path.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image download failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("image download returned status code {0}")]
    Http(u16),
    #[error("failed to access the image cache: {0}")]
    Io(#[from] std::io::Error),
}

/// Disk-backed store of image bytes keyed by photo id.
pub struct ImageCache {
    dir: PathBuf,
    memory: RwLock<HashMap<String, Vec<u8>>>,
}

impl ImageCache {
    /// Opens (and creates if needed) the cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            memory: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the cached bytes for an id, if present. Falls back from
    /// memory to the disk backing, so entries written by a previous run are
    /// still hits.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.memory.read().expect("cache lock poisoned").get(id) {
            return Some(bytes.clone());
        }

        let bytes = fs::read(self.disk_path(id)).ok()?;
        self.memory
            .write()
            .expect("cache lock poisoned")
            .insert(id.to_string(), bytes.clone());
        Some(bytes)
    }

    /// Whether an entry exists for the id, without reading its bytes.
    pub fn contains(&self, id: &str) -> bool {
        if self.memory.read().expect("cache lock poisoned").contains_key(id) {
            return true;
        }
        self.disk_path(id).exists()
    }

    /// Stores bytes for an id, overwriting any previous entry. The bytes for
    /// a given id are immutable once fetched, so concurrent writers are
    /// equivalent.
    pub fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), ImageError> {
        fs::write(self.disk_path(id), &bytes)?;
        self.memory
            .write()
            .expect("cache lock poisoned")
            .insert(id.to_string(), bytes);
        Ok(())
    }

    /// Drops the entry for an id, removing the disk artifact before
    /// returning. Absent ids are a no-op.
    pub fn evict(&self, id: &str) {
        self.memory.write().expect("cache lock poisoned").remove(id);

        let path = self.disk_path(id);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove cached image {}: {err}", path.display());
            }
        }
    }

    /// Display-time entry point: returns the cached bytes, downloading and
    /// caching them on a miss. A failed download leaves the cache unmodified.
    pub async fn load_via(
        &self,
        client: &reqwest::Client,
        id: &str,
        url: &str,
    ) -> Result<Vec<u8>, ImageError> {
        if let Some(bytes) = self.get(id) {
            debug!("cache hit for photo {id}");
            return Ok(bytes);
        }

        debug!("cache miss for photo {id}, downloading {url}");
        let response = client
            .get(url)
            .send()
            .await
            .map_err(ImageError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Http(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(ImageError::Transport)?.to_vec();
        self.put(id, bytes.clone())?;

        Ok(bytes)
    }

    /// Content-addressed backing file for an id. Hashing keeps remote ids out
    /// of the filesystem namespace.
    fn disk_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{:x}.img", md5::compute(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_evict_round_trip() {
        let dir = tempdir().unwrap();
        let cache = ImageCache::new(dir.path()).unwrap();

        assert!(cache.get("a").is_none());

        cache.put("a", b"jpeg bytes".to_vec()).unwrap();
        assert_eq!(cache.get("a").unwrap(), b"jpeg bytes");

        cache.evict("a");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_put_overwrites_idempotently() {
        let dir = tempdir().unwrap();
        let cache = ImageCache::new(dir.path()).unwrap();

        cache.put("a", b"first".to_vec()).unwrap();
        cache.put("a", b"first".to_vec()).unwrap();

        assert_eq!(cache.get("a").unwrap(), b"first");
    }

    #[test]
    fn test_evicting_an_absent_id_is_a_no_op() {
        let dir = tempdir().unwrap();
        let cache = ImageCache::new(dir.path()).unwrap();

        cache.evict("never-seen");
    }

    #[test]
    fn test_evict_removes_the_disk_artifact() {
        let dir = tempdir().unwrap();
        let cache = ImageCache::new(dir.path()).unwrap();

        cache.put("a", b"bytes".to_vec()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        cache.evict("a");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_entries_survive_a_restart() {
        let dir = tempdir().unwrap();

        {
            let cache = ImageCache::new(dir.path()).unwrap();
            cache.put("a", b"persisted".to_vec()).unwrap();
        }

        let reopened = ImageCache::new(dir.path()).unwrap();
        assert_eq!(reopened.get("a").unwrap(), b"persisted");
    }

    #[tokio::test]
    async fn test_load_via_downloads_on_miss_and_caches() {
        let mut server = mockito::Server::new_async().await;
        let image = server
            .mock("GET", "/a.jpg")
            .with_status(200)
            .with_body("image bytes")
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let cache = ImageCache::new(dir.path()).unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/a.jpg", server.url());

        let bytes = cache.load_via(&client, "a", &url).await.unwrap();
        assert_eq!(bytes, b"image bytes");

        // Second load is served from the cache, not the network.
        let bytes = cache.load_via(&client, "a", &url).await.unwrap();
        assert_eq!(bytes, b"image bytes");

        image.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_download_leaves_the_cache_unmodified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gone.jpg")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let cache = ImageCache::new(dir.path()).unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/gone.jpg", server.url());

        let err = cache.load_via(&client, "gone", &url).await.unwrap_err();

        assert!(matches!(err, ImageError::Http(404)));
        assert!(cache.get("gone").is_none());
    }
}
