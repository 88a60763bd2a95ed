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

use crate::domain::{ParticipantSnapshot, de};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An epoch group as returned by the epoch endpoints: the active participant set and the block
/// heights framing the epoch.
#[derive(Debug, Clone, Deserialize)]
pub struct EpochGroup {
    #[serde(rename = "epoch_group_id", deserialize_with = "de::u64_flexible")]
    pub epoch_id: u64,

    #[serde(default, deserialize_with = "de::u64_flexible")]
    pub poc_start_block_height: u64,

    #[serde(default, deserialize_with = "de::u64_flexible")]
    pub effective_block_height: u64,

    #[serde(default)]
    pub participants: Vec<EpochParticipant>,
}

/// A member of an epoch's active participant set. `index` is a bech32 account address with HRP
/// `gonka`, `validator_key` a base64-encoded ed25519 public key.
#[derive(Debug, Clone, Deserialize)]
pub struct EpochParticipant {
    pub index: String,

    #[serde(default)]
    pub validator_key: Option<String>,

    #[serde(default, deserialize_with = "de::i64_flexible")]
    pub weight: i64,

    #[serde(default)]
    pub inference_url: Option<String>,

    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub seed: Option<Seed>,

    /// One entry per model, positionally aligned with `models`.
    #[serde(default)]
    pub ml_nodes: Vec<MlNodeGroup>,
}

impl EpochParticipant {
    pub fn seed_signature(&self) -> Option<String> {
        self.seed.as_ref().map(|seed| seed.signature.clone())
    }

    /// Flatten the nested node groups into `node_id -> poc_weight`.
    pub fn ml_nodes_map(&self) -> HashMap<String, i64> {
        self.ml_nodes
            .iter()
            .flat_map(|group| &group.ml_nodes)
            .map(|node| (node.node_id.clone(), node.poc_weight))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MlNodeGroup {
    #[serde(default)]
    pub ml_nodes: Vec<MlNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlNode {
    #[serde(default)]
    pub node_id: String,

    #[serde(default, deserialize_with = "de::i64_flexible")]
    pub poc_weight: i64,
}

/// The latest-epoch summary: current epoch index, PoC boundaries and epoch length.
#[derive(Debug, Clone)]
pub struct LatestEpochInfo {
    pub epoch_id: u64,
    pub poc_start_block_height: u64,
    pub next_poc_start: u64,
    pub epoch_length: u64,
}

/// A block header reference: height plus RFC 3339 timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub time: String,
}

/// The unified per-epoch view served to clients: the fused participant records at one height.
#[derive(Debug, Clone, Serialize)]
pub struct EpochSnapshot {
    pub epoch_id: u64,
    pub height: u64,
    pub participants: Vec<ParticipantSnapshot>,
    pub cached_at: Option<String>,
    pub is_current: bool,
    pub total_assigned_rewards_gnk: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_group_deserialization() {
        let json = r#"{
            "epoch_group_id": "41",
            "poc_start_block_height": "10000",
            "effective_block_height": 10010,
            "participants": [
                {
                    "index": "gonka1abc",
                    "validator_key": "a2V5",
                    "weight": "100",
                    "inference_url": "http://node-1:8000",
                    "models": ["m1", "m2"],
                    "seed": {"signature": "sig-1"},
                    "ml_nodes": [
                        {"ml_nodes": [{"node_id": "n0", "poc_weight": "7"}]},
                        {"ml_nodes": [{"node_id": "n1", "poc_weight": 3}]}
                    ]
                }
            ]
        }"#;

        let group = serde_json::from_str::<EpochGroup>(json).unwrap();
        assert_eq!(group.epoch_id, 41);
        assert_eq!(group.poc_start_block_height, 10_000);
        assert_eq!(group.effective_block_height, 10_010);

        let participant = &group.participants[0];
        assert_eq!(participant.weight, 100);
        assert_eq!(participant.seed_signature().as_deref(), Some("sig-1"));

        let nodes = participant.ml_nodes_map();
        assert_eq!(nodes.get("n0"), Some(&7));
        assert_eq!(nodes.get("n1"), Some(&3));
    }
}
