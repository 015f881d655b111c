//! Engine error type.

use thiserror::Error;

use crate::features::PhotoId;

/// Errors surfaced at the engine boundary.
///
/// Most failure modes in the engine are deliberately silent (an empty
/// corpus, a photo removed mid-run); the variants here are precondition
/// violations that callers can and should prevent.
#[derive(Debug, Error)]
pub enum Error {
    /// A photo was submitted or scored without an embedding. Analysis
    /// completion is signalled by the embedding being present, so this
    /// indicates a caller bug rather than a runtime condition.
    #[error("photo {0} has no embedding")]
    EmptyEmbedding(PhotoId),
}
