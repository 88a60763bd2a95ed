// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::{HardwareNode, JailStatus, NodeHealth, WarmKey, de};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracker_common::domain::parse_counter;

/// Per-epoch counters of a participant. All counters are non-negative decimal strings of
/// unbounded precision; they are parsed only when deriving rates or totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStats {
    #[serde(default = "zero")]
    pub inference_count: String,

    #[serde(default = "zero")]
    pub missed_requests: String,

    #[serde(default = "zero")]
    pub earned_coins: String,

    #[serde(default = "zero")]
    pub rewarded_coins: String,

    #[serde(default = "zero")]
    pub burned_coins: String,

    #[serde(default = "zero")]
    pub validated_inferences: String,

    #[serde(default = "zero")]
    pub invalidated_inferences: String,
}

impl Default for EpochStats {
    fn default() -> Self {
        Self {
            inference_count: zero(),
            missed_requests: zero(),
            earned_coins: zero(),
            rewarded_coins: zero(),
            burned_coins: zero(),
            validated_inferences: zero(),
            invalidated_inferences: zero(),
        }
    }
}

fn zero() -> String {
    "0".to_string()
}

impl EpochStats {
    /// `missed / (missed + inferences)` to 4 decimals; 0 when the denominator is 0.
    pub fn missed_rate(&self) -> f64 {
        let missed = parse_counter(&self.missed_requests);
        let inferences = parse_counter(&self.inference_count);
        let total = missed + inferences;

        if total == 0 {
            return 0.0;
        }

        round4(missed as f64 / total as f64)
    }

    /// `invalidated / inferences` to 4 decimals; 0 when there are no inferences.
    pub fn invalidation_rate(&self) -> f64 {
        let invalidated = parse_counter(&self.invalidated_inferences);
        let inferences = parse_counter(&self.inference_count);

        if inferences == 0 {
            return 0.0;
        }

        round4(invalidated as f64 / inferences as f64)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A participant as listed by the participants endpoint at a given height.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantRecord {
    pub index: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub inference_url: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, rename = "current_epoch_stats")]
    pub stats: EpochStats,
}

/// The fused per-participant record served per epoch: the participant listing joined with the
/// epoch group attributes, plus the jail and health overlays (absent overlays stay `None`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub index: String,

    #[serde(default)]
    pub address: String,

    #[serde(default, deserialize_with = "de::i64_flexible")]
    pub weight: i64,

    #[serde(default)]
    pub validator_key: Option<String>,

    #[serde(default)]
    pub inference_url: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default, rename = "current_epoch_stats")]
    pub stats: EpochStats,

    #[serde(default)]
    pub is_jailed: Option<bool>,

    #[serde(default)]
    pub jailed_until: Option<String>,

    #[serde(default)]
    pub ready_to_unjail: Option<bool>,

    #[serde(default)]
    pub node_healthy: Option<bool>,

    #[serde(default)]
    pub node_health_checked_at: Option<String>,

    #[serde(default)]
    pub moniker: Option<String>,

    #[serde(default)]
    pub identity: Option<String>,

    #[serde(default)]
    pub keybase_username: Option<String>,

    #[serde(default)]
    pub keybase_picture_url: Option<String>,

    #[serde(default)]
    pub website: Option<String>,

    #[serde(default)]
    pub validator_consensus_key: Option<String>,

    #[serde(default)]
    pub consensus_key_mismatch: Option<bool>,
}

impl ParticipantSnapshot {
    pub fn missed_rate(&self) -> f64 {
        self.stats.missed_rate()
    }

    pub fn invalidation_rate(&self) -> f64 {
        self.stats.invalidation_rate()
    }

    pub fn apply_jail(&mut self, jail: &JailStatus) {
        self.is_jailed = Some(jail.is_jailed);
        self.jailed_until = jail.jailed_until.clone();
        self.ready_to_unjail = Some(jail.ready_to_unjail);
        self.moniker = jail.moniker.clone();
        self.identity = jail.identity.clone();
        self.keybase_username = jail.keybase_username.clone();
        self.keybase_picture_url = jail.keybase_picture_url.clone();
        self.website = jail.website.clone();
        self.validator_consensus_key = jail.validator_consensus_key.clone();
        self.consensus_key_mismatch = jail.consensus_key_mismatch;
    }

    pub fn apply_health(&mut self, health: &NodeHealth) {
        self.node_healthy = Some(health.is_healthy);
        self.node_health_checked_at = Some(health.last_check.clone());
    }
}

/// The persisted form of a snapshot row: the fused record plus the participant's per-model
/// node-weight map, serialized as one JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredStats {
    #[serde(flatten)]
    pub snapshot: ParticipantSnapshot,

    #[serde(default)]
    pub ml_nodes_map: HashMap<String, i64>,
}

/// One row of the `inference_stats` table, keyed by (epoch, height, participant).
#[derive(Debug, Clone)]
pub struct StatsRow {
    pub participant_index: String,
    pub stats: StoredStats,
    pub seed_signature: Option<String>,
    pub cached_at: Option<String>,
}

/// Seed signature of a participant for an epoch.
#[derive(Debug, Clone, Serialize)]
pub struct SeedSignature {
    pub participant: String,
    pub epoch_id: u64,
    pub signature: String,
}

/// Everything served for a single participant: the fused snapshot plus its sub-resources.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantDetails {
    pub participant: ParticipantSnapshot,
    pub rewards: Vec<crate::domain::RewardSummary>,
    pub seed: Option<SeedSignature>,
    pub warm_keys: Vec<WarmKey>,
    pub hardware_nodes: Vec<HardwareNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(inferences: &str, missed: &str, invalidated: &str) -> EpochStats {
        EpochStats {
            inference_count: inferences.to_string(),
            missed_requests: missed.to_string(),
            invalidated_inferences: invalidated.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missed_rate() {
        assert_eq!(stats("0", "0", "0").missed_rate(), 0.0);
        assert_eq!(stats("5", "5", "0").missed_rate(), 0.5);
        assert_eq!(stats("10", "0", "0").missed_rate(), 0.0);
        assert_eq!(stats("2", "1", "0").missed_rate(), 0.3333);
    }

    #[test]
    fn test_invalidation_rate() {
        assert_eq!(stats("0", "0", "7").invalidation_rate(), 0.0);
        assert_eq!(stats("10", "0", "1").invalidation_rate(), 0.1);
        assert_eq!(stats("3", "0", "1").invalidation_rate(), 0.3333);
    }

    #[test]
    fn test_rates_within_unit_interval() {
        let samples = [
            ("0", "0"),
            ("1", "0"),
            ("0", "1"),
            ("123456789012345678901", "98765432109876543210"),
        ];
        for (inferences, missed) in samples {
            let rate = stats(inferences, missed, "0").missed_rate();
            assert!((0.0..=1.0).contains(&rate), "rate {rate} out of range");
        }
    }

    #[test]
    fn test_stored_stats_json_roundtrip() {
        let stored = StoredStats {
            snapshot: ParticipantSnapshot {
                index: "gonka1abc".to_string(),
                address: "gonka1abc".to_string(),
                weight: 100,
                validator_key: Some("key".to_string()),
                inference_url: Some("http://node:8000".to_string()),
                status: Some("ACTIVE".to_string()),
                models: vec!["m1".to_string()],
                stats: stats("10", "2", "1"),
                is_jailed: None,
                jailed_until: None,
                ready_to_unjail: None,
                node_healthy: None,
                node_health_checked_at: None,
                moniker: None,
                identity: None,
                keybase_username: None,
                keybase_picture_url: None,
                website: None,
                validator_consensus_key: None,
                consensus_key_mismatch: None,
            },
            ml_nodes_map: [("node-0".to_string(), 42)].into(),
        };

        let json = serde_json::to_string(&stored).unwrap();
        let parsed = serde_json::from_str::<StoredStats>(&json).unwrap();
        assert_eq!(parsed.snapshot.index, "gonka1abc");
        assert_eq!(parsed.snapshot.stats, stored.snapshot.stats);
        assert_eq!(parsed.ml_nodes_map.get("node-0"), Some(&42));

        // Re-serializing yields the identical JSON text.
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }
}
