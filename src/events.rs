//! Events crossing the engine boundary.

use crate::features::{Collection, PhotoId};
use crate::links::LinkId;

/// Inbound notification from the analysis collaborator: an embedding and
/// color tags are ready for a photo. Repeated emissions for the same photo
/// are re-analysis and treated as updates.
#[derive(Debug, Clone)]
pub struct PhotoAnalyzed {
    pub photo_id: PhotoId,
    pub collection: Collection,
    pub embedding: Vec<f32>,
    pub dominant_colors: Vec<String>,
    /// Source dimensions in pixels; zero means unknown.
    pub width: u32,
    pub height: u32,
}

impl PhotoAnalyzed {
    /// Width over height, when both dimensions were reported.
    pub fn aspect_ratio(&self) -> Option<f32> {
        (self.width > 0 && self.height > 0).then(|| self.width as f32 / self.height as f32)
    }
}

/// Outbound notification emitted exactly once when a link is created,
/// never on updates.
#[derive(Debug, Clone)]
pub struct ResonanceDiscovered {
    pub link_id: LinkId,
    /// MyWork-side photo.
    pub photo_a_id: PhotoId,
    /// Inspiration-side photo.
    pub photo_b_id: PhotoId,
    pub overall_score: f32,
}
