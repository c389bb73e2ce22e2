use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CivicSignalError;
use crate::quality::GPS_REJECT_M;
use crate::types::BoundingBox;

/// TOML-backed engine configuration. Every field has a default, so an empty
/// file (or no file) yields the production constants.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub bounds: BoundingBox,
    pub quality: QualityConfig,
    pub clustering: ClusteringConfig,
    pub pending: PendingConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    /// Embedded media GPS within this distance of the reported point counts
    /// as consistent.
    pub media_gps_tolerance_m: f64,
    pub gps_reject_m: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            media_gps_tolerance_m: 200.0,
            gps_reject_m: GPS_REJECT_M,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    pub similarity_threshold: f64,
    pub max_cluster_radius_m: f64,
    pub min_cluster_radius_m: f64,
    pub max_members: usize,
    pub high_weight_threshold: f64,
    pub min_weight_for_cluster: f64,
    pub min_similar_reports: usize,
    /// Geohash length used for index buckets, pending pools and lanes.
    pub geocell_precision: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_cluster_radius_m: 1000.0,
            min_cluster_radius_m: 50.0,
            max_members: 50,
            high_weight_threshold: 3.0,
            min_weight_for_cluster: 1.0,
            min_similar_reports: 3,
            geocell_precision: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PendingConfig {
    /// Deferred entries older than this are surfaced to moderation.
    pub horizon_hours: i64,
    /// Maximum entries held per (category, geocell) pool.
    pub capacity_per_cell: usize,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 72,
            capacity_per_cell: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub classification_secs: u64,
    pub media_secs: u64,
    pub history_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classification_secs: 5,
            media_secs: 30,
            history_secs: 5,
        }
    }
}

impl TimeoutConfig {
    /// Validation budget for a submission: media processing gets the longer SLA.
    pub fn validation_timeout(&self, has_media: bool) -> Duration {
        if has_media {
            Duration::from_secs(self.media_secs)
        } else {
            Duration::from_secs(self.classification_secs)
        }
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_secs)
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CivicSignalError> {
        let c = &self.clustering;
        if !(0.0..=1.0).contains(&c.similarity_threshold) {
            return Err(CivicSignalError::Config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                c.similarity_threshold
            )));
        }
        if c.min_cluster_radius_m <= 0.0 || c.min_cluster_radius_m > c.max_cluster_radius_m {
            return Err(CivicSignalError::Config(format!(
                "cluster radius bounds are inverted: [{}, {}]",
                c.min_cluster_radius_m, c.max_cluster_radius_m
            )));
        }
        if c.max_members == 0 {
            return Err(CivicSignalError::Config("max_members must be positive".into()));
        }
        if !(1..=12).contains(&c.geocell_precision) {
            return Err(CivicSignalError::Config(format!(
                "geocell_precision must be within 1..=12, got {}",
                c.geocell_precision
            )));
        }
        if self.bounds.min_lat >= self.bounds.max_lat || self.bounds.min_lng >= self.bounds.max_lng {
            return Err(CivicSignalError::Config("bounding box is empty".into()));
        }
        if self.pending.horizon_hours <= 0 || self.pending.capacity_per_cell == 0 {
            return Err(CivicSignalError::Config(
                "pending horizon and capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
