//! Candidate selection for newly analyzed photos.
//!
//! Scoring every cross-collection pair on each analysis event would be
//! quadratic over time. The generator bounds the number of full-cost
//! scorer calls per event with a cheap color-overlap pre-filter, falling
//! back to the whole opposite collection while the corpus is small enough
//! that filtering saves nothing.

use tracing::debug;

use crate::features::{FeatureStore, PhotoId};

/// Opposite-collection photo ids worth scoring against the given photo.
///
/// Returns an empty vec when the photo is unknown or the opposite
/// collection is empty; neither is an error. Collections no larger than
/// `prefilter_min_corpus` skip the pre-filter entirely. A photo with no
/// color tags on either side is never excluded by the pre-filter: color
/// absence must not hide a subject match.
pub fn candidates_for(
    store: &FeatureStore,
    photo_id: PhotoId,
    prefilter_min_corpus: usize,
) -> Vec<PhotoId> {
    let Some(record) = store.get(photo_id) else {
        return Vec::new();
    };

    let opposite = store.list_by_collection(record.collection.opposite());
    if opposite.is_empty() {
        return Vec::new();
    }

    if opposite.len() <= prefilter_min_corpus {
        return opposite.into_iter().map(|r| r.photo_id).collect();
    }

    let total = opposite.len();
    let kept: Vec<PhotoId> = opposite
        .into_iter()
        .filter(|other| {
            record.dominant_colors.is_empty()
                || other.dominant_colors.is_empty()
                || record.shares_color(other)
        })
        .map(|r| r.photo_id)
        .collect();

    debug!(
        photo_id = %photo_id,
        total,
        kept = kept.len(),
        "color pre-filter applied"
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Collection;
    use tokio::sync::mpsc;

    fn store() -> FeatureStore {
        let (tx, _rx) = mpsc::unbounded_channel();
        FeatureStore::new(tx)
    }

    fn add(store: &FeatureStore, collection: Collection, colors: Vec<&str>) -> PhotoId {
        let id = PhotoId::new();
        store
            .upsert(
                id,
                collection,
                vec![1.0, 0.0],
                colors.into_iter().map(String::from).collect(),
                None,
            )
            .unwrap();
        id
    }

    #[test]
    fn test_empty_opposite_side() {
        let store = store();
        let id = add(&store, Collection::MyWork, vec!["red"]);
        assert!(candidates_for(&store, id, 64).is_empty());
    }

    #[test]
    fn test_unknown_photo() {
        let store = store();
        assert!(candidates_for(&store, PhotoId::new(), 64).is_empty());
    }

    #[test]
    fn test_small_corpus_skips_prefilter() {
        let store = store();
        let id = add(&store, Collection::MyWork, vec!["red"]);
        let other = add(&store, Collection::Inspiration, vec!["blue"]);

        // No color overlap, but the corpus is below the pre-filter floor.
        let candidates = candidates_for(&store, id, 64);
        assert_eq!(candidates, vec![other]);
    }

    #[test]
    fn test_prefilter_keeps_color_overlap() {
        let store = store();
        let id = add(&store, Collection::MyWork, vec!["red"]);
        let matching = add(&store, Collection::Inspiration, vec!["red", "green"]);
        let other = add(&store, Collection::Inspiration, vec!["blue"]);
        let untagged = add(&store, Collection::Inspiration, vec![]);

        // Force the pre-filter on with a floor of zero.
        let candidates = candidates_for(&store, id, 0);
        assert!(candidates.contains(&matching));
        assert!(!candidates.contains(&other));
        // A candidate without tags cannot be ruled out by color.
        assert!(candidates.contains(&untagged));
    }

    #[test]
    fn test_untagged_photo_sees_all() {
        let store = store();
        let id = add(&store, Collection::MyWork, vec![]);
        let a = add(&store, Collection::Inspiration, vec!["red"]);
        let b = add(&store, Collection::Inspiration, vec!["blue"]);

        let candidates = candidates_for(&store, id, 0);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.contains(&a));
        assert!(candidates.contains(&b));
    }

    #[test]
    fn test_candidates_only_cross_collection() {
        let store = store();
        let id = add(&store, Collection::MyWork, vec!["red"]);
        let same_side = add(&store, Collection::MyWork, vec!["red"]);
        let opposite = add(&store, Collection::Inspiration, vec!["red"]);

        let candidates = candidates_for(&store, id, 64);
        assert!(!candidates.contains(&same_side));
        assert!(candidates.contains(&opposite));
    }
}
