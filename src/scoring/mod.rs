//! Pairwise scoring of feature records.
//!
//! Scoring is a pure function of the two records: the same inputs always
//! produce the same sub-scores, overall score, and description text. The
//! reconciler relies on that determinism to make re-scoring idempotent.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::features::FeatureRecord;

/// Sub-scores at or above this value count as "strong" when composing the
/// description text.
const STRONG_SUBSCORE: f32 = 0.7;

/// Fixed weights for combining sub-scores. When a sub-score is not
/// computable the average is renormalized over the weights that remain, so
/// absence never penalizes a pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub subject: f32,
    pub color: f32,
    pub composition: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            subject: 0.6,
            color: 0.25,
            composition: 0.15,
        }
    }
}

/// Result of scoring one cross-collection pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    /// Weighted average of the available sub-scores, in [0,1].
    pub overall: f32,
    /// Embedding similarity rescaled to [0,1].
    pub subject: Option<f32>,
    /// Dominant-color overlap; `None` if either side has no color tags.
    pub color: Option<f32>,
    /// Aspect-ratio affinity; `None` unless both sides carry dimensions.
    pub composition: Option<f32>,
    /// Deterministic rationale text, present when any sub-score is strong.
    pub description: Option<String>,
}

/// Score a pair of analyzed records.
///
/// Precondition: both embeddings are non-empty. The store enforces this at
/// ingest, so hitting the error here means a caller bypassed it.
pub fn score(a: &FeatureRecord, b: &FeatureRecord, weights: &ScoreWeights) -> Result<ScoreResult, Error> {
    debug_assert!(!a.embedding.is_empty(), "scoring photo without embedding");
    debug_assert!(!b.embedding.is_empty(), "scoring photo without embedding");
    if a.embedding.is_empty() {
        return Err(Error::EmptyEmbedding(a.photo_id));
    }
    if b.embedding.is_empty() {
        return Err(Error::EmptyEmbedding(b.photo_id));
    }

    let cosine = cosine_similarity(&a.embedding, &b.embedding);
    let subject = Some(((cosine + 1.0) / 2.0).clamp(0.0, 1.0));
    let color = color_overlap(&a.dominant_colors, &b.dominant_colors);
    let composition = aspect_affinity(a.aspect_ratio, b.aspect_ratio);

    let overall = weighted_average(
        &[
            (subject, weights.subject),
            (color, weights.color),
            (composition, weights.composition),
        ],
    );

    Ok(ScoreResult {
        overall,
        subject,
        color,
        composition,
        description: describe(subject, color, composition),
    })
}

/// Average the sub-scores that are present, renormalized over their weights.
fn weighted_average(terms: &[(Option<f32>, f32)]) -> f32 {
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for (value, weight) in terms {
        if let Some(value) = value {
            sum += value * weight;
            weight_sum += weight;
        }
    }
    if weight_sum == 0.0 {
        0.0
    } else {
        (sum / weight_sum).clamp(0.0, 1.0)
    }
}

/// Intersection-over-union of two color-bucket sets.
/// `None` when either side has no tags, since no overlap can be measured.
fn color_overlap(a: &[String], b: &[String]) -> Option<f32> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let intersection = a.iter().filter(|c| b.contains(c)).count();
    let union = a.len() + b.iter().filter(|c| !a.contains(c)).count();
    Some(intersection as f32 / union as f32)
}

/// Affinity of two aspect ratios as min/max, in [0,1].
fn aspect_affinity(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    let (a, b) = (a?, b?);
    if a <= 0.0 || b <= 0.0 {
        return None;
    }
    Some((a.min(b) / a.max(b)).clamp(0.0, 1.0))
}

/// Compose the rationale text from the strong sub-scores, in fixed weight
/// order so the same inputs always yield the same sentence.
fn describe(subject: Option<f32>, color: Option<f32>, composition: Option<f32>) -> Option<String> {
    let mut strong = Vec::new();
    for (value, label) in [
        (subject, "subject"),
        (color, "color"),
        (composition, "composition"),
    ] {
        if value.is_some_and(|v| v >= STRONG_SUBSCORE) {
            strong.push(label);
        }
    }

    match strong.as_slice() {
        [] => None,
        [one] => Some(format!("Strong {} resonance", one)),
        [one, two] => Some(format!("Strong {} and {} resonance", one, two)),
        all => Some(format!("Strong {} resonance", all.join(", "))),
    }
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
