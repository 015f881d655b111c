//! Discovery scheduling: coalescing analysis events into pipeline runs.
//!
//! The engine owns the feature and link stores and a dispatcher task that
//! consumes store events. Each changed photo moves through a small state
//! machine (`Pending` while its debounce window is open, `InFlight` while
//! its pipeline runs) so bursts of events coalesce into a single run and a
//! run is never concurrent with another run for the same photo. Distinct
//! photos run concurrently, bounded by a semaphore.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tracing::{debug, error, info};

use crate::candidates;
use crate::config::DiscoveryConfig;
use crate::error::Error;
use crate::events::{PhotoAnalyzed, ResonanceDiscovered};
use crate::features::{FeatureRecord, FeatureStore, PhotoId, StoreEvent};
use crate::links::{LinkStore, SimilarityLink};
use crate::scoring::{self, ScoreResult};

/// Per-photo scheduling state. Absent from the map means idle.
enum PhotoState {
    /// Waiting out the debounce window before a run starts.
    Pending,
    /// A pipeline run is executing; `dirty` records that another event
    /// arrived mid-flight and a re-run is needed.
    InFlight { dirty: bool },
}

struct Shared {
    store: Arc<FeatureStore>,
    links: Arc<LinkStore>,
    config: DiscoveryConfig,
    notify: broadcast::Sender<ResonanceDiscovered>,
    states: Mutex<HashMap<PhotoId, PhotoState>>,
    workers: Semaphore,
}

/// The process-wide discovery controller.
///
/// Construction spawns the dispatcher onto the current tokio runtime, so
/// the engine must be created from within one. Entry points enqueue and
/// return immediately; all scoring happens on background tasks. Dropping
/// the engine stops the dispatcher.
pub struct DiscoveryEngine {
    shared: Arc<Shared>,
    // Dropped with the engine, which signals the dispatcher to stop.
    _shutdown: watch::Sender<bool>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        let config = config.validated();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (notify, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            store: Arc::new(FeatureStore::new(event_tx)),
            links: Arc::new(LinkStore::new()),
            workers: Semaphore::new(config.worker_limit),
            states: Mutex::new(HashMap::new()),
            notify,
            config,
        });

        tokio::spawn(dispatch(Arc::clone(&shared), event_rx, shutdown_rx));

        Self {
            shared,
            _shutdown: shutdown_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DiscoveryConfig::default())
    }

    /// Ingest a completed analysis. Repeated calls for the same photo are
    /// re-analysis and update the stored features; identical features
    /// schedule no work.
    pub fn on_photo_analyzed(&self, event: PhotoAnalyzed) -> Result<(), Error> {
        let aspect_ratio = event.aspect_ratio();
        self.shared.store.upsert(
            event.photo_id,
            event.collection,
            event.embedding,
            event.dominant_colors,
            aspect_ratio,
        )
    }

    /// Note a photo's removal. Unknown ids are a no-op; known ids retire
    /// every link touching the photo.
    pub fn on_photo_removed(&self, photo_id: PhotoId) {
        self.shared.store.remove(photo_id);
    }

    /// Snapshot of all current links, ranked by overall score.
    pub fn links(&self) -> Vec<SimilarityLink> {
        self.shared.links.all()
    }

    /// Snapshot of the current links touching one photo.
    pub fn links_for(&self, photo_id: PhotoId) -> Vec<SimilarityLink> {
        self.shared.links.for_photo(photo_id)
    }

    /// Subscribe to link-creation notifications. Each created link is
    /// announced exactly once; updates are silent.
    pub fn subscribe(&self) -> broadcast::Receiver<ResonanceDiscovered> {
        self.shared.notify.subscribe()
    }

    /// Number of analyzed photos currently known to the engine.
    pub fn analyzed_count(&self) -> usize {
        self.shared.store.len()
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StoreEvent::Changed(photo_id)) => shared.schedule(photo_id),
                Some(StoreEvent::Removed(photo_id)) => {
                    shared.links.remove_photo(photo_id);
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("discovery dispatcher stopped");
}

impl Shared {
    fn lock_states(&self) -> MutexGuard<'_, HashMap<PhotoId, PhotoState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a photo towards a pipeline run, coalescing repeat events.
    fn schedule(self: &Arc<Self>, photo_id: PhotoId) {
        let mut states = self.lock_states();
        match states.get_mut(&photo_id) {
            // Already waiting; the pending run will see the latest features.
            Some(PhotoState::Pending) => {}
            Some(PhotoState::InFlight { dirty }) => *dirty = true,
            None => {
                states.insert(photo_id, PhotoState::Pending);
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.run_photo(photo_id).await });
            }
        }
    }

    /// Drive one photo through debounce, pipeline, and any re-runs its
    /// mid-flight events requested.
    async fn run_photo(self: Arc<Self>, photo_id: PhotoId) {
        loop {
            tokio::time::sleep(Duration::from_millis(self.config.debounce_ms)).await;

            let Ok(_permit) = self.workers.acquire().await else {
                return;
            };

            self.lock_states()
                .insert(photo_id, PhotoState::InFlight { dirty: false });

            // Failures stay contained to this photo's run.
            if let Err(e) = self.run_pipeline(photo_id).await {
                error!(photo_id = %photo_id, error = %e, "discovery run failed");
            }

            let run_again = {
                let mut states = self.lock_states();
                match states.remove(&photo_id) {
                    Some(PhotoState::InFlight { dirty: true }) => {
                        states.insert(photo_id, PhotoState::Pending);
                        true
                    }
                    _ => false,
                }
            };
            if !run_again {
                return;
            }
        }
    }

    /// Candidate generation, scoring, reconciliation, notification.
    async fn run_pipeline(&self, photo_id: PhotoId) -> Result<()> {
        let Some(record) = self.store.get(photo_id) else {
            debug!(photo_id = %photo_id, "photo removed before its run started");
            return Ok(());
        };

        let candidate_ids =
            candidates::candidates_for(&self.store, photo_id, self.config.prefilter_min_corpus);
        let opponents: Vec<FeatureRecord> = candidate_ids
            .iter()
            .filter_map(|id| self.store.get(*id))
            .collect();

        let weights = self.config.weights();
        let subject = record.clone();
        let scored: Vec<(PhotoId, ScoreResult)> = tokio::task::spawn_blocking(move || {
            opponents
                .par_iter()
                .filter_map(|opponent| match scoring::score(&subject, opponent, &weights) {
                    Ok(result) => Some((opponent.photo_id, result)),
                    Err(e) => {
                        error!(opponent = %opponent.photo_id, error = %e, "skipping unscorable pair");
                        None
                    }
                })
                .collect()
        })
        .await
        .context("scoring task panicked")?;

        let outcome = self.links.reconcile(
            &record,
            &scored,
            &self.store,
            self.config.publish_threshold,
            self.config.retire_threshold,
        );

        for link in &outcome.created {
            // No receivers is fine; presentation may not be listening yet.
            let _ = self.notify.send(ResonanceDiscovered {
                link_id: link.id,
                photo_a_id: link.photo_a_id,
                photo_b_id: link.photo_b_id,
                overall_score: link.overall_score,
            });
        }

        if !outcome.is_empty() {
            info!(
                photo_id = %photo_id,
                scored = scored.len(),
                created = outcome.created.len(),
                updated = outcome.updated.len(),
                retired = outcome.retired.len(),
                "reconciled links"
            );
        }

        Ok(())
    }
}
