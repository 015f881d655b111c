//! Similarity links and their reconciliation against fresh scores.
//!
//! Links are kept in a pair-keyed map so existence checks during
//! reconciliation are O(1) and the at-most-one-link-per-pair invariant
//! holds by construction. Each update replaces the whole link value under
//! the write lock, so readers never observe a half-updated record.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::features::{Collection, FeatureRecord, FeatureStore, PhotoId};
use crate::scoring::ScoreResult;

/// Stable identifier for a link, generated once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub Uuid);

impl LinkId {
    pub fn new() -> Self {
        LinkId(Uuid::new_v4())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Collection-ordered key for a cross-collection pair.
///
/// The MyWork side always comes first, so the same two photos normalize to
/// the same key regardless of which side triggered discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub my_work: PhotoId,
    pub inspiration: PhotoId,
}

impl PairKey {
    /// Build the normalized key given one photo, its collection, and its
    /// opposite-collection opponent.
    pub fn normalized(photo_id: PhotoId, collection: Collection, opponent: PhotoId) -> Self {
        match collection {
            Collection::MyWork => PairKey {
                my_work: photo_id,
                inspiration: opponent,
            },
            Collection::Inspiration => PairKey {
                my_work: opponent,
                inspiration: photo_id,
            },
        }
    }

    pub fn touches(&self, photo_id: PhotoId) -> bool {
        self.my_work == photo_id || self.inspiration == photo_id
    }
}

/// A discovered cross-collection resonance between two photos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityLink {
    pub id: LinkId,
    /// MyWork-side photo.
    pub photo_a_id: PhotoId,
    /// Inspiration-side photo.
    pub photo_b_id: PhotoId,
    pub overall_score: f32,
    pub composition_score: Option<f32>,
    pub color_score: Option<f32>,
    pub subject_score: Option<f32>,
    /// Set once at creation; preserved across updates.
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
}

impl SimilarityLink {
    pub fn pair_key(&self) -> PairKey {
        PairKey {
            my_work: self.photo_a_id,
            inspiration: self.photo_b_id,
        }
    }
}

/// What one reconciliation pass did to the link set.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub created: Vec<SimilarityLink>,
    pub updated: Vec<SimilarityLink>,
    pub retired: Vec<SimilarityLink>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.retired.is_empty()
    }
}

/// Pair-keyed collection of current [`SimilarityLink`]s.
pub struct LinkStore {
    inner: RwLock<HashMap<PairKey, SimilarityLink>>,
}

impl LinkStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PairKey, SimilarityLink>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PairKey, SimilarityLink>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All current links, ranked by overall score, highest first.
    pub fn all(&self) -> Vec<SimilarityLink> {
        let mut links: Vec<SimilarityLink> = self.read().values().cloned().collect();
        links.sort_by(|a, b| {
            b.overall_score
                .partial_cmp(&a.overall_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        links
    }

    /// Current links touching one photo, ranked by overall score.
    pub fn for_photo(&self, photo_id: PhotoId) -> Vec<SimilarityLink> {
        let mut links: Vec<SimilarityLink> = self
            .read()
            .values()
            .filter(|l| l.pair_key().touches(photo_id))
            .cloned()
            .collect();
        links.sort_by(|a, b| {
            b.overall_score
                .partial_cmp(&a.overall_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        links
    }

    pub fn get(&self, key: &PairKey) -> Option<SimilarityLink> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Merge one photo's fresh scores into the link set.
    ///
    /// Policy:
    /// - score >= `publish_threshold`: create the link, or update it in
    ///   place preserving `id` and `created_at`;
    /// - score in the hysteresis band [`retire_threshold`,
    ///   `publish_threshold`): update an existing link, never create one;
    /// - score < `retire_threshold`: retire;
    /// - existing links whose opponent is absent from the scored set:
    ///   retire.
    ///
    /// Before creating or updating, both photos are checked against the
    /// feature store; a side removed mid-run retires the pair instead of
    /// publishing stale results.
    pub fn reconcile(
        &self,
        record: &FeatureRecord,
        scored: &[(PhotoId, ScoreResult)],
        store: &FeatureStore,
        publish_threshold: f32,
        retire_threshold: f32,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut links = self.write();

        // The photo itself may have been removed while its run was in
        // flight; discard the results and drop whatever links remain.
        if !store.contains(record.photo_id) {
            let stale: Vec<PairKey> = links
                .keys()
                .filter(|k| k.touches(record.photo_id))
                .copied()
                .collect();
            for key in stale {
                if let Some(link) = links.remove(&key) {
                    outcome.retired.push(link);
                }
            }
            return outcome;
        }

        let mut scored_keys = HashSet::with_capacity(scored.len());
        for (opponent, result) in scored {
            let key = PairKey::normalized(record.photo_id, record.collection, *opponent);
            scored_keys.insert(key);

            let opponent_present = store.contains(*opponent);
            let existing = links.get(&key);

            if !opponent_present || result.overall < retire_threshold {
                if let Some(link) = links.remove(&key) {
                    outcome.retired.push(link);
                }
                continue;
            }

            match existing {
                Some(link) => {
                    // Keep the stored score a function of the current
                    // records, whether or not it clears the publish bar.
                    let refreshed = SimilarityLink {
                        id: link.id,
                        created_at: link.created_at,
                        photo_a_id: key.my_work,
                        photo_b_id: key.inspiration,
                        overall_score: result.overall,
                        composition_score: result.composition,
                        color_score: result.color,
                        subject_score: result.subject,
                        description: result.description.clone(),
                    };
                    links.insert(key, refreshed.clone());
                    outcome.updated.push(refreshed);
                }
                None if result.overall >= publish_threshold => {
                    let link = SimilarityLink {
                        id: LinkId::new(),
                        photo_a_id: key.my_work,
                        photo_b_id: key.inspiration,
                        overall_score: result.overall,
                        composition_score: result.composition,
                        color_score: result.color,
                        subject_score: result.subject,
                        created_at: Utc::now(),
                        description: result.description.clone(),
                    };
                    links.insert(key, link.clone());
                    outcome.created.push(link);
                }
                // Below the publish bar and no existing link: the
                // hysteresis band creates nothing.
                None => {}
            }
        }

        // Links whose opponent dropped out of the scored set (removed, or
        // no longer passing the pre-filter) are stale.
        let stale: Vec<PairKey> = links
            .keys()
            .filter(|k| k.touches(record.photo_id) && !scored_keys.contains(*k))
            .copied()
            .collect();
        for key in stale {
            if let Some(link) = links.remove(&key) {
                outcome.retired.push(link);
            }
        }

        outcome
    }

    /// Retire every link touching a removed photo.
    pub fn remove_photo(&self, photo_id: PhotoId) -> Vec<SimilarityLink> {
        let mut links = self.write();
        let keys: Vec<PairKey> = links
            .keys()
            .filter(|k| k.touches(photo_id))
            .copied()
            .collect();
        let retired: Vec<SimilarityLink> = keys.iter().filter_map(|k| links.remove(k)).collect();
        if !retired.is_empty() {
            debug!(photo_id = %photo_id, count = retired.len(), "retired links for removed photo");
        }
        retired
    }
}

impl Default for LinkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn feature_store() -> FeatureStore {
        let (tx, _rx) = mpsc::unbounded_channel();
        FeatureStore::new(tx)
    }

    fn add(store: &FeatureStore, collection: Collection) -> PhotoId {
        let id = PhotoId::new();
        store
            .upsert(id, collection, vec![1.0, 0.0], vec!["red".into()], None)
            .unwrap();
        id
    }

    fn result(overall: f32) -> ScoreResult {
        ScoreResult {
            overall,
            subject: Some(overall),
            color: None,
            composition: None,
            description: None,
        }
    }

    const PUBLISH: f32 = 0.55;
    const RETIRE: f32 = 0.40;

    #[test]
    fn test_create_above_publish_threshold() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        let outcome = links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);
        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.updated.is_empty());
        assert_eq!(links.len(), 1);

        let link = &outcome.created[0];
        assert_eq!(link.photo_a_id, my_work);
        assert_eq!(link.photo_b_id, inspiration);
    }

    #[test]
    fn test_no_create_below_publish_threshold() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        let outcome = links.reconcile(&record, &[(inspiration, result(0.5))], &store, PUBLISH, RETIRE);
        assert!(outcome.is_empty());
        assert!(links.is_empty());
    }

    #[test]
    fn test_update_preserves_id_and_created_at() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        let outcome = links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);
        let created = outcome.created[0].clone();

        let outcome = links.reconcile(&record, &[(inspiration, result(0.7))], &store, PUBLISH, RETIRE);
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.updated.len(), 1);

        let updated = &outcome.updated[0];
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!((updated.overall_score - 0.7).abs() < 0.0001);
    }

    #[test]
    fn test_at_most_one_link_regardless_of_direction() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);

        // Discover from the MyWork side, then again from Inspiration.
        let record = store.get(my_work).unwrap();
        links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);
        let record = store.get(inspiration).unwrap();
        let outcome = links.reconcile(&record, &[(my_work, result(0.9))], &store, PUBLISH, RETIRE);

        assert!(outcome.created.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_hysteresis_band_never_flickers() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        // Oscillating between 0.45 and 0.50: below publish, above retire.
        for _ in 0..5 {
            let outcome =
                links.reconcile(&record, &[(inspiration, result(0.45))], &store, PUBLISH, RETIRE);
            assert!(outcome.is_empty());
            let outcome =
                links.reconcile(&record, &[(inspiration, result(0.50))], &store, PUBLISH, RETIRE);
            assert!(outcome.is_empty());
        }
        assert!(links.is_empty());
    }

    #[test]
    fn test_existing_link_survives_hysteresis_band() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);

        // Drops below publish but stays above retire: updated, not retired.
        let outcome = links.reconcile(&record, &[(inspiration, result(0.45))], &store, PUBLISH, RETIRE);
        assert_eq!(outcome.updated.len(), 1);
        assert!(outcome.retired.is_empty());
        assert_eq!(links.len(), 1);

        // Falls below retire: gone.
        let outcome = links.reconcile(&record, &[(inspiration, result(0.3))], &store, PUBLISH, RETIRE);
        assert_eq!(outcome.retired.len(), 1);
        assert!(links.is_empty());
    }

    #[test]
    fn test_idempotent_reconcile() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();
        let scored = vec![(inspiration, result(0.9))];

        let first = links.reconcile(&record, &scored, &store, PUBLISH, RETIRE);
        assert_eq!(first.created.len(), 1);

        let second = links.reconcile(&record, &scored, &store, PUBLISH, RETIRE);
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);
        assert_eq!(links.len(), 1);
        assert_eq!(second.updated[0].id, first.created[0].id);
    }

    #[test]
    fn test_opponent_absent_from_scored_set_retires() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);

        // A later pass where the opponent dropped out of the candidate set.
        let outcome = links.reconcile(&record, &[], &store, PUBLISH, RETIRE);
        assert_eq!(outcome.retired.len(), 1);
        assert!(links.is_empty());
    }

    #[test]
    fn test_removed_opponent_not_published() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        // Opponent vanishes between scoring and reconciliation.
        store.remove(inspiration);
        let outcome = links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);
        assert!(outcome.created.is_empty());
        assert!(links.is_empty());
    }

    #[test]
    fn test_removed_self_discards_results() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let inspiration = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        store.remove(my_work);
        let outcome = links.reconcile(&record, &[(inspiration, result(0.9))], &store, PUBLISH, RETIRE);
        assert!(outcome.created.is_empty());
        assert!(links.is_empty());
    }

    #[test]
    fn test_remove_photo_retires_all_links() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let first = add(&store, Collection::Inspiration);
        let second = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        links.reconcile(
            &record,
            &[(first, result(0.9)), (second, result(0.8))],
            &store,
            PUBLISH,
            RETIRE,
        );
        assert_eq!(links.len(), 2);

        let retired = links.remove_photo(my_work);
        assert_eq!(retired.len(), 2);
        assert!(links.is_empty());
    }

    #[test]
    fn test_all_is_ranked() {
        let store = feature_store();
        let links = LinkStore::new();
        let my_work = add(&store, Collection::MyWork);
        let low = add(&store, Collection::Inspiration);
        let high = add(&store, Collection::Inspiration);
        let record = store.get(my_work).unwrap();

        links.reconcile(
            &record,
            &[(low, result(0.6)), (high, result(0.95))],
            &store,
            PUBLISH,
            RETIRE,
        );

        let all = links.all();
        assert_eq!(all.len(), 2);
        assert!(all[0].overall_score >= all[1].overall_score);
        assert_eq!(all[0].photo_b_id, high);
    }
}
