//! Visual similarity discovery engine for paired photo collections.
//!
//! The engine maintains a ranked, deduplicated set of cross-collection
//! links ("resonances") between a user's own work and their inspiration
//! library. An external analysis collaborator delivers embeddings and
//! dominant-color tags per photo; the engine turns those into
//! [`SimilarityLink`]s incrementally, off the interactive path:
//!
//! 1. [`features`] stores the latest features per photo and reports
//!    changes to the scheduler;
//! 2. [`candidates`] pre-filters the opposite collection so a single
//!    analysis event stays linear in corpus size;
//! 3. [`scoring`] computes deterministic sub-scores and a combined score
//!    for each surviving pair;
//! 4. [`links`] reconciles fresh scores into the link set under an
//!    at-most-one-link-per-pair invariant with hysteresis thresholds;
//! 5. [`engine`] debounces events, bounds concurrency, and publishes
//!    creation notifications.

pub mod candidates;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod links;
pub mod logging;
pub mod scoring;

pub use config::DiscoveryConfig;
pub use engine::DiscoveryEngine;
pub use error::Error;
pub use events::{PhotoAnalyzed, ResonanceDiscovered};
pub use features::{Collection, FeatureRecord, FeatureStore, PhotoId, StoreEvent};
pub use links::{LinkId, PairKey, ReconcileOutcome, SimilarityLink};
pub use scoring::{ScoreResult, ScoreWeights};
