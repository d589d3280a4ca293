// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core configuration.
//!
//! Every tunable the engine exposes, with the defaults the rest of the
//! crate assumes. Loading from disk is the embedder's concern; this type is
//! plain data plus validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attribute::GateConfig;
use crate::confidence::DecisionThresholds;
use crate::ident::PoolCapacities;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The tick rate must be positive and finite.
    #[error("tick rate must be positive and finite, got {0}")]
    BadTickRate(f64),
    /// A threshold fell outside `[0, 1]`.
    #[error("threshold {name} out of [0, 1]: {value}")]
    BadThreshold {
        /// Which threshold.
        name: &'static str,
        /// Offending value.
        value: f32,
    },
    /// The accept threshold must sit above the reject threshold.
    #[error("accept threshold {accept} must exceed reject threshold {reject}")]
    InvertedThresholds {
        /// Accept cut.
        accept: f32,
        /// Reject cut.
        reject: f32,
    },
    /// A capacity was zero.
    #[error("capacity {0} must be non-zero")]
    ZeroCapacity(&'static str),
}

/// Complete core configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Clock advance rate and target cycle pacing.
    pub tick_rate_hz: f64,
    /// Ring 2 buffer size.
    pub info_ring_capacity: usize,
    /// Ring 3 circular log size.
    pub authority_ring_capacity: usize,
    /// Ring 1 event ring size.
    pub container_event_capacity: usize,
    /// Commits between truth snapshots.
    pub snapshot_interval: u64,
    /// Per-cycle info drain cap.
    pub max_infos_per_cycle: usize,
    /// Confidence decision cuts.
    pub thresholds: DecisionThresholds,
    /// Freshness half-life in ticks.
    pub freshness_half_life: f32,
    /// Distance beyond which an actuator verification fails.
    pub verification_threshold: f32,
    /// Attribute ring gating and sampling.
    pub gate: GateConfig,
    /// Per-kind NetId pool sizes.
    pub pools: PoolCapacities,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20.0,
            info_ring_capacity: crate::info::DEFAULT_INFO_CAPACITY,
            authority_ring_capacity: crate::truth::DEFAULT_LOG_CAPACITY,
            container_event_capacity: crate::container::MIN_EVENT_CAPACITY,
            snapshot_interval: crate::truth::DEFAULT_SNAPSHOT_INTERVAL,
            max_infos_per_cycle: 1000,
            thresholds: DecisionThresholds::default(),
            freshness_half_life: crate::confidence::DEFAULT_FRESHNESS_HALF_LIFE,
            verification_threshold: 0.1,
            gate: GateConfig::default(),
            pools: PoolCapacities::default(),
        }
    }
}

impl CoreConfig {
    /// Validates the configuration, returning it unchanged on success.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if !(self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0) {
            return Err(ConfigError::BadTickRate(self.tick_rate_hz));
        }
        for (name, value) in [
            ("accept", self.thresholds.accept),
            ("reject", self.thresholds.reject),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::BadThreshold { name, value });
            }
        }
        if self.thresholds.accept <= self.thresholds.reject {
            return Err(ConfigError::InvertedThresholds {
                accept: self.thresholds.accept,
                reject: self.thresholds.reject,
            });
        }
        for (name, value) in [
            ("info_ring_capacity", self.info_ring_capacity),
            ("authority_ring_capacity", self.authority_ring_capacity),
            ("container_event_capacity", self.container_event_capacity),
            ("max_infos_per_cycle", self.max_infos_per_cycle),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity(name));
            }
        }
        if self.snapshot_interval == 0 {
            return Err(ConfigError::ZeroCapacity("snapshot_interval"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(CoreConfig::default().validated().is_ok());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let config = CoreConfig {
            thresholds: DecisionThresholds {
                accept: 0.2,
                reject: 0.8,
            },
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validated(),
            Err(ConfigError::InvertedThresholds { .. })
        ));
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = CoreConfig {
            info_ring_capacity: 0,
            ..CoreConfig::default()
        };
        assert_eq!(
            config.validated(),
            Err(ConfigError::ZeroCapacity("info_ring_capacity"))
        );
    }

    #[test]
    fn bad_tick_rate_rejected() {
        let config = CoreConfig {
            tick_rate_hz: 0.0,
            ..CoreConfig::default()
        };
        assert!(matches!(config.validated(), Err(ConfigError::BadTickRate(_))));
    }
}
