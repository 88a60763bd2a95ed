// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{EpochParticipant, de};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Aggregated weight and participant count of one model in one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAggregate {
    pub model_id: String,
    pub total_weight: i64,
    pub participant_count: i64,
}

/// Static model descriptor from the models endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,

    #[serde(default)]
    pub proposed_by: String,

    #[serde(default)]
    pub v_ram: String,

    #[serde(default)]
    pub throughput_per_nonce: String,

    #[serde(default)]
    pub units_of_compute_per_token: String,

    #[serde(default)]
    pub hf_repo: String,

    #[serde(default)]
    pub hf_commit: String,

    #[serde(default)]
    pub model_args: Vec<String>,

    #[serde(default)]
    pub validation_threshold: serde_json::Value,
}

/// Live usage counters of one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUsageStats {
    #[serde(default)]
    pub model: String,

    #[serde(default = "zero")]
    pub ai_tokens: String,

    #[serde(default, deserialize_with = "de::i64_flexible")]
    pub inferences: i64,
}

fn zero() -> String {
    "0".to_string()
}

/// One model in the models view: the epoch aggregate enriched with the static descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ModelView {
    pub id: String,
    pub total_weight: i64,
    pub participant_count: i64,
    pub proposed_by: String,
    pub v_ram: String,
    pub throughput_per_nonce: String,
    pub units_of_compute_per_token: String,
    pub hf_repo: String,
    pub hf_commit: String,
    pub model_args: Vec<String>,
    pub validation_threshold: serde_json::Value,
}

/// The models view for one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsView {
    pub epoch_id: u64,
    pub height: u64,
    pub models: Vec<ModelView>,
    pub stats: Vec<ModelUsageStats>,
    pub cached_at: String,
    pub is_current: bool,
}

/// Aggregate model weights and participant counts across an epoch's active participants. The
/// `models` and `ml_nodes` lists are positionally aligned by protocol contract; extras on either
/// side are skipped with a warning.
pub fn aggregate_models(participants: &[EpochParticipant]) -> Vec<ModelAggregate> {
    let mut weights = BTreeMap::<&str, i64>::new();
    let mut members = BTreeMap::<&str, BTreeSet<&str>>::new();

    for participant in participants {
        if participant.models.len() != participant.ml_nodes.len() {
            warn!(
                index:% = participant.index,
                models = participant.models.len(),
                ml_nodes = participant.ml_nodes.len();
                "models and ml_nodes length mismatch, skipping extras"
            );
        }

        for (model, group) in participant.models.iter().zip(&participant.ml_nodes) {
            let weight = group.ml_nodes.iter().map(|node| node.poc_weight).sum::<i64>();
            *weights.entry(model).or_default() += weight;
            members
                .entry(model)
                .or_default()
                .insert(participant.index.as_str());
        }
    }

    weights
        .into_iter()
        .map(|(model_id, total_weight)| ModelAggregate {
            model_id: model_id.to_string(),
            total_weight,
            participant_count: members
                .get(model_id)
                .map(|set| set.len() as i64)
                .unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MlNode, MlNodeGroup};

    fn participant(index: &str, models: &[&str], node_weights: &[&[i64]]) -> EpochParticipant {
        EpochParticipant {
            index: index.to_string(),
            validator_key: None,
            weight: 0,
            inference_url: None,
            models: models.iter().map(|model| model.to_string()).collect(),
            seed: None,
            ml_nodes: node_weights
                .iter()
                .enumerate()
                .map(|(group, weights)| MlNodeGroup {
                    ml_nodes: weights
                        .iter()
                        .enumerate()
                        .map(|(node, weight)| MlNode {
                            node_id: format!("{index}-{group}-{node}"),
                            poc_weight: *weight,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_aggregate_models() {
        let participants = [
            participant("gonka1a", &["m1", "m2"], &[&[10, 5], &[1]]),
            participant("gonka1b", &["m1"], &[&[20]]),
        ];

        let aggregates = aggregate_models(&participants);
        assert_eq!(aggregates.len(), 2);

        let m1 = aggregates.iter().find(|m| m.model_id == "m1").unwrap();
        assert_eq!(m1.total_weight, 35);
        assert_eq!(m1.participant_count, 2);

        let m2 = aggregates.iter().find(|m| m.model_id == "m2").unwrap();
        assert_eq!(m2.total_weight, 1);
        assert_eq!(m2.participant_count, 1);
    }

    #[test]
    fn test_aggregate_models_skips_unaligned_extras() {
        // Two models, one node group: the second model has no aligned entry and is dropped.
        let participants = [participant("gonka1a", &["m1", "m2"], &[&[10]])];

        let aggregates = aggregate_models(&participants);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].model_id, "m1");
    }
}
