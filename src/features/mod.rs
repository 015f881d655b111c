//! Feature records for analyzed photos and the store that tracks them.
//!
//! A [`FeatureRecord`] only exists once analysis has completed, so every
//! record in the store carries a non-empty embedding. That makes "record
//! present" the single signal downstream components need: nothing that is
//! still waiting for analysis can ever be scored or picked as a candidate.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for a photo, assigned by the owning application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoId(pub Uuid);

impl PhotoId {
    pub fn new() -> Self {
        PhotoId(Uuid::new_v4())
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which side of the library a photo belongs to. Links only ever cross
/// collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    MyWork,
    Inspiration,
}

impl Collection {
    pub fn opposite(&self) -> Collection {
        match self {
            Collection::MyWork => Collection::Inspiration,
            Collection::Inspiration => Collection::MyWork,
        }
    }

    /// Full display name for presentation surfaces.
    pub fn display_name(&self) -> &'static str {
        match self {
            Collection::MyWork => "My Work",
            Collection::Inspiration => "Inspiration",
        }
    }
}

/// Latest known features for one analyzed photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub photo_id: PhotoId,
    pub collection: Collection,
    /// L2-normalizable embedding; non-empty by construction.
    pub embedding: Vec<f32>,
    /// Coarse color-bucket labels, deduplicated, used for pre-filtering only.
    pub dominant_colors: Vec<String>,
    /// Width over height, when the source dimensions were known.
    pub aspect_ratio: Option<f32>,
    /// Time of the last successful analysis.
    pub analyzed_at: DateTime<Utc>,
}

impl FeatureRecord {
    /// Whether the scoring-relevant features match another record.
    /// `analyzed_at` is excluded: a re-analysis that produced identical
    /// features should not schedule any work.
    fn features_match(&self, other: &FeatureRecord) -> bool {
        self.collection == other.collection
            && self.embedding == other.embedding
            && self.dominant_colors == other.dominant_colors
            && self.aspect_ratio == other.aspect_ratio
    }

    /// Whether the two records share at least one dominant color bucket.
    pub fn shares_color(&self, other: &FeatureRecord) -> bool {
        self.dominant_colors
            .iter()
            .any(|c| other.dominant_colors.contains(c))
    }
}

/// Change notifications emitted by the store for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A record was created or its features changed; its links need
    /// reconciling.
    Changed(PhotoId),
    /// A record was removed; links touching it must be retired.
    Removed(PhotoId),
}

struct Inner {
    records: HashMap<PhotoId, FeatureRecord>,
    by_collection: HashMap<Collection, HashSet<PhotoId>>,
}

/// In-memory store of the latest [`FeatureRecord`] per photo.
///
/// Upsert, remove and get are O(1) amortized; listing a collection is
/// O(size of that collection) via a per-collection id index. Mutations that
/// affect discovery are reported through the event channel handed in at
/// construction.
pub struct FeatureStore {
    inner: RwLock<Inner>,
    events: mpsc::UnboundedSender<StoreEvent>,
}

impl FeatureStore {
    pub fn new(events: mpsc::UnboundedSender<StoreEvent>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                by_collection: HashMap::new(),
            }),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh the features for a photo.
    ///
    /// Repeated submissions for the same photo are re-analysis, not an
    /// error. A `Changed` event is emitted only when the record is new or
    /// its features actually differ from what was stored.
    pub fn upsert(
        &self,
        photo_id: PhotoId,
        collection: Collection,
        embedding: Vec<f32>,
        dominant_colors: Vec<String>,
        aspect_ratio: Option<f32>,
    ) -> Result<(), Error> {
        debug_assert!(!embedding.is_empty(), "upsert without embedding");
        if embedding.is_empty() {
            return Err(Error::EmptyEmbedding(photo_id));
        }

        let record = FeatureRecord {
            photo_id,
            collection,
            embedding,
            dominant_colors: dedup_colors(dominant_colors),
            aspect_ratio,
            analyzed_at: Utc::now(),
        };

        let mut inner = self.write();
        if let Some(existing) = inner.records.get(&photo_id) {
            if existing.features_match(&record) {
                return Ok(());
            }
            let old_collection = existing.collection;
            if old_collection != collection {
                if let Some(ids) = inner.by_collection.get_mut(&old_collection) {
                    ids.remove(&photo_id);
                }
            }
        }
        inner
            .by_collection
            .entry(collection)
            .or_default()
            .insert(photo_id);
        inner.records.insert(photo_id, record);
        drop(inner);

        let _ = self.events.send(StoreEvent::Changed(photo_id));
        Ok(())
    }

    /// Remove a photo's record. Unknown ids are a no-op.
    pub fn remove(&self, photo_id: PhotoId) {
        let mut inner = self.write();
        let Some(record) = inner.records.remove(&photo_id) else {
            return;
        };
        if let Some(ids) = inner.by_collection.get_mut(&record.collection) {
            ids.remove(&photo_id);
        }
        drop(inner);

        let _ = self.events.send(StoreEvent::Removed(photo_id));
    }

    pub fn get(&self, photo_id: PhotoId) -> Option<FeatureRecord> {
        self.read().records.get(&photo_id).cloned()
    }

    pub fn contains(&self, photo_id: PhotoId) -> bool {
        self.read().records.contains_key(&photo_id)
    }

    /// All analyzed records in one collection. Order is unspecified.
    pub fn list_by_collection(&self, collection: Collection) -> Vec<FeatureRecord> {
        let inner = self.read();
        let Some(ids) = inner.by_collection.get(&collection) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }
}

/// Deduplicate color buckets while preserving their order.
fn dedup_colors(colors: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    colors
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
