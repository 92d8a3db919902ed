//! Album synchronization for geopin.
//!
//! This module is the orchestrator between the search client, the entity
//! store and the image cache:
//! - fetching an album for a pin that has none (`ensure_album`),
//! - discarding and re-fetching an album (`refresh_album`),
//! - deleting single photos and whole pins, keeping the cache coherent,
//! - prefetching image bytes for an album with bounded concurrency.
//!
//! A per-pin lock serializes album operations, so no two fetches for the
//! same pin are ever in flight together and commits for one pin never
//! interleave.

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cache::ImageCache;
use crate::flickr::{SearchClient, SearchError};
use crate::store::{PhotoRecord, PinStore, StoreError, StoreOp};

/// How many image downloads may run at once for one album.
const CONCURRENT_DOWNLOADS: usize = 8;

/// Failures raised by album operations.
#[derive(Debug, Error)]
pub enum AlbumError {
    #[error("no pin with id {0}")]
    UnknownPin(String),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What an album fetch accomplished.
#[derive(Debug, PartialEq, Eq)]
pub enum AlbumOutcome {
    /// The pin already owned photos; nothing was fetched.
    AlreadyPopulated,
    /// The search succeeded and this many records were committed.
    Fetched(usize),
    /// The search succeeded but found no photos for this location.
    Empty,
}

/// Result of prefetching one image, in the style of a per-photo sync status.
#[derive(Debug)]
pub enum PrefetchResult {
    /// The bytes were already cached.
    Cached(String),
    /// The bytes were downloaded and cached.
    Downloaded(String),
    /// The download failed; siblings are unaffected.
    Failed(String, String),
}

/// Orchestrates fetch, commit and cache invalidation for pin albums.
pub struct AlbumSyncService {
    client: SearchClient,
    http: reqwest::Client,
    store: Arc<Mutex<PinStore>>,
    cache: Arc<ImageCache>,
    pin_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AlbumSyncService {
    pub fn new(client: SearchClient, store: PinStore, cache: ImageCache) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            store: Arc::new(Mutex::new(store)),
            cache: Arc::new(cache),
            pin_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Shared handle to the entity store.
    pub fn store(&self) -> Arc<Mutex<PinStore>> {
        Arc::clone(&self.store)
    }

    /// Shared handle to the image cache.
    pub fn cache(&self) -> Arc<ImageCache> {
        Arc::clone(&self.cache)
    }

    /// Fetches an album for the pin unless it already owns one. A second
    /// call racing this one waits on the pin's lock and then observes the
    /// populated album instead of fetching again.
    pub async fn ensure_album(&self, pin_id: &str) -> Result<AlbumOutcome, AlbumError> {
        let lock = self.pin_lock(pin_id).await;
        let _guard = lock.lock().await;

        let (latitude, longitude, owned) = self.pin_snapshot(pin_id).await?;
        if owned > 0 {
            debug!("pin {pin_id} already owns {owned} photos, skipping fetch");
            return Ok(AlbumOutcome::AlreadyPopulated);
        }

        self.fetch_and_materialize(pin_id, latitude, longitude).await
    }

    /// Discards the pin's current album (evicting every cached image) and
    /// fetches a fresh one. The delete and the fetch are separate commits:
    /// if the fetch fails the album is left empty, and a later
    /// `ensure_album` repopulates it.
    pub async fn refresh_album(&self, pin_id: &str) -> Result<AlbumOutcome, AlbumError> {
        let lock = self.pin_lock(pin_id).await;
        let _guard = lock.lock().await;

        let (latitude, longitude, _) = self.pin_snapshot(pin_id).await?;

        {
            let mut store = self.store.lock().await;
            let old: Vec<String> = store
                .photos_for_pin(pin_id)
                .iter()
                .map(|record| record.id.clone())
                .collect();

            if !old.is_empty() {
                info!("refresh: discarding {} photos from pin {pin_id}", old.len());
                for photo_id in &old {
                    self.cache.evict(photo_id);
                }
                let ops = old
                    .into_iter()
                    .map(|photo_id| StoreOp::DeletePhoto {
                        pin_id: pin_id.to_string(),
                        photo_id,
                    })
                    .collect();
                store.commit(ops)?;
            }
        }

        self.fetch_and_materialize(pin_id, latitude, longitude).await
    }

    /// Deletes one photo from a pin's album, evicting its cached bytes.
    pub async fn discard_photo(&self, pin_id: &str, photo_id: &str) -> Result<(), AlbumError> {
        let lock = self.pin_lock(pin_id).await;
        let _guard = lock.lock().await;

        let mut store = self.store.lock().await;
        if store.get_pin(pin_id).is_none() {
            return Err(AlbumError::UnknownPin(pin_id.to_string()));
        }
        if store.get_photo(pin_id, photo_id).is_none() {
            return Ok(());
        }

        self.cache.evict(photo_id);
        store.commit(vec![StoreOp::DeletePhoto {
            pin_id: pin_id.to_string(),
            photo_id: photo_id.to_string(),
        }])?;

        Ok(())
    }

    /// Deletes a pin and its whole album, evicting every cached image.
    pub async fn forget_pin(&self, pin_id: &str) -> Result<(), AlbumError> {
        let lock = self.pin_lock(pin_id).await;
        let _guard = lock.lock().await;

        {
            let mut store = self.store.lock().await;
            if store.get_pin(pin_id).is_none() {
                return Err(AlbumError::UnknownPin(pin_id.to_string()));
            }

            for record in store.photos_for_pin(pin_id) {
                self.cache.evict(&record.id);
            }
            store.commit(vec![StoreOp::DeletePin {
                pin_id: pin_id.to_string(),
            }])?;
        }

        self.pin_locks.lock().await.remove(pin_id);
        Ok(())
    }

    /// Downloads the image bytes for every record in the pin's album that is
    /// not cached yet. Downloads run in bounded-concurrency batches; one
    /// failure never aborts its siblings.
    pub async fn prefetch_album(&self, pin_id: &str) -> Result<Vec<PrefetchResult>, AlbumError> {
        let targets: Vec<(String, String)> = {
            let store = self.store.lock().await;
            if store.get_pin(pin_id).is_none() {
                return Err(AlbumError::UnknownPin(pin_id.to_string()));
            }
            store
                .photos_for_pin(pin_id)
                .iter()
                .map(|record| (record.id.clone(), record.url.clone()))
                .collect()
        };

        let mut results = Vec::with_capacity(targets.len());
        for batch in targets.chunks(CONCURRENT_DOWNLOADS) {
            let downloads = batch.iter().map(|(photo_id, url)| {
                let cache = Arc::clone(&self.cache);
                let client = self.http.clone();
                async move {
                    if cache.get(photo_id).is_some() {
                        return PrefetchResult::Cached(photo_id.clone());
                    }
                    match cache.load_via(&client, photo_id, url).await {
                        Ok(_) => PrefetchResult::Downloaded(photo_id.clone()),
                        Err(err) => {
                            warn!("failed to download photo {photo_id}: {err}");
                            PrefetchResult::Failed(photo_id.clone(), err.to_string())
                        }
                    }
                }
            });
            results.extend(join_all(downloads).await);
        }

        Ok(results)
    }

    /// Runs the search and commits the materialized records as one batch.
    /// `NoResults` maps to the empty-album outcome; every other failure
    /// propagates untouched and commits nothing.
    async fn fetch_and_materialize(
        &self,
        pin_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<AlbumOutcome, AlbumError> {
        let metas = match self.client.search(latitude, longitude).await {
            Ok(metas) => metas,
            Err(SearchError::NoResults) => {
                info!("no images found for pin {pin_id}");
                return Ok(AlbumOutcome::Empty);
            }
            Err(err) => return Err(err.into()),
        };

        let ops: Vec<StoreOp> = metas
            .into_iter()
            .map(|meta| StoreOp::PutPhoto(PhotoRecord::new(meta.id, meta.url, pin_id)))
            .collect();
        let count = ops.len();

        let mut store = self.store.lock().await;
        store.commit(ops)?;
        info!("committed {count} photos for pin {pin_id}");

        Ok(AlbumOutcome::Fetched(count))
    }

    async fn pin_snapshot(&self, pin_id: &str) -> Result<(f64, f64, usize), AlbumError> {
        let store = self.store.lock().await;
        let pin = store
            .get_pin(pin_id)
            .ok_or_else(|| AlbumError::UnknownPin(pin_id.to_string()))?;
        Ok((pin.latitude, pin.longitude, store.album_len(pin_id)))
    }

    async fn pin_lock(&self, pin_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.pin_locks.lock().await;
        Arc::clone(
            locks
                .entry(pin_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
