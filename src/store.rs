//! Persisted pin and photo-record entities for geopin.
//!
//! This module is the crate's entity store: `Pin` markers, the `PhotoRecord`
//! albums they own, and `PinStore`, a YAML-file-backed index holding both.
//! The store is the single source of truth for what the cache layer is
//! allowed to hold; every mutation goes through an atomic batch commit so a
//! crash can never leave a half-written album behind.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::bbox::{LAT_MAX, LAT_MIN, LON_MAX, LON_MIN};

/// Failures raised by the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("latitude {0} is outside [-90, 90]")]
    InvalidLatitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    InvalidLongitude(f64),
    #[error("failed to access the pin index: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode the pin index: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A user-placed geographic marker. Owns zero or more photo records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    /// Locally assigned identifier.
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

impl Pin {
    /// Creates a pin, validating that the coordinate is on the map.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, StoreError> {
        if !(LAT_MIN..=LAT_MAX).contains(&latitude) {
            return Err(StoreError::InvalidLatitude(latitude));
        }
        if !(LON_MIN..=LON_MAX).contains(&longitude) {
            return Err(StoreError::InvalidLongitude(longitude));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            latitude,
            longitude,
            created_at: Utc::now(),
        })
    }
}

/// Persisted metadata for one remote photo, owned by exactly one pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Remote-assigned photo id, unique within the owning pin's album.
    pub id: String,
    /// URL the image bytes can be downloaded from.
    pub url: String,
    /// Id of the owning pin. Never empty.
    pub pin_id: String,
    /// When the metadata was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl PhotoRecord {
    pub fn new(id: impl Into<String>, url: impl Into<String>, pin_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            pin_id: pin_id.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Store key for this record. Remote ids are only unique per album, so
    /// the key is scoped by the owning pin.
    pub fn key(&self) -> String {
        record_key(&self.pin_id, &self.id)
    }
}

pub fn record_key(pin_id: &str, photo_id: &str) -> String {
    format!("{pin_id}:{photo_id}")
}

/// One mutation in an atomic batch.
#[derive(Debug, Clone)]
pub enum StoreOp {
    PutPin(Pin),
    PutPhoto(PhotoRecord),
    /// Removes one record. Absent keys are a no-op.
    DeletePhoto { pin_id: String, photo_id: String },
    /// Removes a pin and every record it owns.
    DeletePin { pin_id: String },
}

/// The serialized shape of the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    last_updated: DateTime<Utc>,
    pins: HashMap<String, Pin>,
    photos: HashMap<String, PhotoRecord>,
}

impl StoreData {
    fn new() -> Self {
        Self {
            last_updated: Utc::now(),
            pins: HashMap::new(),
            photos: HashMap::new(),
        }
    }

    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::PutPin(pin) => {
                self.pins.insert(pin.id.clone(), pin);
            }
            StoreOp::PutPhoto(record) => {
                self.photos.insert(record.key(), record);
            }
            StoreOp::DeletePhoto { pin_id, photo_id } => {
                self.photos.remove(&record_key(&pin_id, &photo_id));
            }
            StoreOp::DeletePin { pin_id } => {
                self.pins.remove(&pin_id);
                self.photos.retain(|_, record| record.pin_id != pin_id);
            }
        }
    }
}

/// File-backed store of pins and their photo records.
#[derive(Debug)]
pub struct PinStore {
    path: PathBuf,
    data: StoreData,
}

impl PinStore {
    /// Loads the store from the given path. A missing file yields an empty
    /// store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                data: StoreData::new(),
            });
        }

        let yaml = fs::read_to_string(path)?;
        let data: StoreData = serde_yaml::from_str(&yaml)?;

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Applies a batch of mutations as a unit: the staged state is written to
    /// disk first and only adopted in memory once the write has landed. On
    /// any failure the store is unchanged, both on disk and in memory.
    pub fn commit(&mut self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut staged = self.data.clone();
        let count = ops.len();
        for op in ops {
            staged.apply(op);
        }
        staged.last_updated = Utc::now();

        persist(&staged, &self.path)?;
        self.data = staged;
        debug!("committed {count} store ops to {}", self.path.display());

        Ok(())
    }

    pub fn get_pin(&self, pin_id: &str) -> Option<&Pin> {
        self.data.pins.get(pin_id)
    }

    /// All pins, oldest first.
    pub fn pins(&self) -> Vec<&Pin> {
        let mut pins: Vec<&Pin> = self.data.pins.values().collect();
        pins.sort_by_key(|pin| pin.created_at);
        pins
    }

    pub fn get_photo(&self, pin_id: &str, photo_id: &str) -> Option<&PhotoRecord> {
        self.data.photos.get(&record_key(pin_id, photo_id))
    }

    /// The album owned by a pin, ordered by photo id.
    pub fn photos_for_pin(&self, pin_id: &str) -> Vec<&PhotoRecord> {
        let mut album: Vec<&PhotoRecord> = self
            .data
            .photos
            .values()
            .filter(|record| record.pin_id == pin_id)
            .collect();
        album.sort_by(|a, b| a.id.cmp(&b.id));
        album
    }

    pub fn album_len(&self, pin_id: &str) -> usize {
        self.data
            .photos
            .values()
            .filter(|record| record.pin_id == pin_id)
            .count()
    }

    pub fn pin_count(&self) -> usize {
        self.data.pins.len()
    }

    pub fn photo_count(&self) -> usize {
        self.data.photos.len()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.data.last_updated
    }
}

/// Writes the index through a temp file so a crash mid-write cannot corrupt
/// the previous version.
fn persist(data: &StoreData, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let yaml = serde_yaml::to_string(data)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, yaml)?;
    fs::rename(&tmp, path)?;

    Ok(())
}
