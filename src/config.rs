//! Engine configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::scoring::ScoreWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Minimum overall score for a new link to be published.
    #[serde(default = "default_publish_threshold")]
    pub publish_threshold: f32,

    /// Score below which an existing link is retired. Deliberately lower
    /// than the publish threshold: the gap is a hysteresis band that stops
    /// pairs near the boundary from flickering in and out on every re-score.
    #[serde(default = "default_retire_threshold")]
    pub retire_threshold: f32,

    #[serde(default = "default_subject_weight")]
    pub subject_weight: f32,

    #[serde(default = "default_color_weight")]
    pub color_weight: f32,

    #[serde(default = "default_composition_weight")]
    pub composition_weight: f32,

    /// Opposite-collection sizes up to this skip the color pre-filter;
    /// below it, filtering saves nothing over scoring everyone.
    #[serde(default = "default_prefilter_min_corpus")]
    pub prefilter_min_corpus: usize,

    /// Maximum number of photos whose pipelines run concurrently.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Quiet window after an analysis event before its run starts; events
    /// for the same photo inside the window coalesce into one run.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_publish_threshold() -> f32 {
    0.55
}

fn default_retire_threshold() -> f32 {
    0.40
}

fn default_subject_weight() -> f32 {
    0.6
}

fn default_color_weight() -> f32 {
    0.25
}

fn default_composition_weight() -> f32 {
    0.15
}

fn default_prefilter_min_corpus() -> usize {
    64
}

fn default_worker_limit() -> usize {
    2
}

fn default_debounce_ms() -> u64 {
    250
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            publish_threshold: default_publish_threshold(),
            retire_threshold: default_retire_threshold(),
            subject_weight: default_subject_weight(),
            color_weight: default_color_weight(),
            composition_weight: default_composition_weight(),
            prefilter_min_corpus: default_prefilter_min_corpus(),
            worker_limit: default_worker_limit(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = DiscoveryConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DiscoveryConfig = toml::from_str(&content)?;
        Ok(config.validated())
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("resona")
            .join("config.toml")
    }

    /// Clamp inconsistent values rather than failing: the retire threshold
    /// must stay strictly below the publish threshold or the hysteresis
    /// band collapses.
    pub fn validated(mut self) -> Self {
        self.publish_threshold = self.publish_threshold.clamp(0.0, 1.0);
        self.retire_threshold = self.retire_threshold.clamp(0.0, 1.0);
        if self.retire_threshold >= self.publish_threshold {
            let corrected = (self.publish_threshold - 0.15).max(0.0);
            warn!(
                retire = self.retire_threshold,
                publish = self.publish_threshold,
                corrected,
                "retire threshold must be below publish threshold, clamping"
            );
            self.retire_threshold = corrected;
        }
        if self.worker_limit == 0 {
            warn!("worker limit of zero would stall discovery, using 1");
            self.worker_limit = 1;
        }
        self
    }

    pub fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            subject: self.subject_weight,
            color: self.color_weight,
            composition: self.composition_weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert!((config.publish_threshold - 0.55).abs() < 0.0001);
        assert!((config.retire_threshold - 0.40).abs() < 0.0001);
        assert!(config.retire_threshold < config.publish_threshold);
        assert_eq!(config.worker_limit, 2);
    }

    #[test]
    fn test_validated_clamps_inverted_thresholds() {
        let config = DiscoveryConfig {
            publish_threshold: 0.5,
            retire_threshold: 0.6,
            ..DiscoveryConfig::default()
        }
        .validated();
        assert!(config.retire_threshold < config.publish_threshold);
    }

    #[test]
    fn test_validated_fixes_zero_workers() {
        let config = DiscoveryConfig {
            worker_limit: 0,
            ..DiscoveryConfig::default()
        }
        .validated();
        assert_eq!(config.worker_limit, 1);
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "publish_threshold = 0.7\n").unwrap();

        let config = DiscoveryConfig::load_from(&path).unwrap();
        assert!((config.publish_threshold - 0.7).abs() < 0.0001);
        // Unspecified fields fall back to defaults.
        assert!((config.retire_threshold - 0.40).abs() < 0.0001);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = DiscoveryConfig {
            debounce_ms: 10,
            ..DiscoveryConfig::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = DiscoveryConfig::load_from(&path).unwrap();
        assert_eq!(loaded.debounce_ms, 10);
    }
}
