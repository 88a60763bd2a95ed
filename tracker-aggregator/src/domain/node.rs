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

use crate::domain::{
    BlockHeader, EpochGroup, HardwareNode, HealthProbe, LatestEpochInfo, ModelDescriptor,
    ModelUsageStats, ParticipantRecord, PerformanceSummary, RestrictionsParams, SigningInfo,
    Validator, WarmKey,
};
use thiserror::Error;

/// Error of a [Node] call.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Every configured base URL failed within one rotation cycle.
    #[error("all upstream endpoints failed for {endpoint}")]
    Unavailable { endpoint: String },

    /// The endpoint answered, but not with the expected payload.
    #[error("unexpected response for {endpoint}: {message}")]
    UnexpectedResponse { endpoint: String, message: String },
}

/// A Keybase profile resolved from a validator's identity field. Lookups never fail; an unknown
/// identity or an unreachable Keybase yields an empty profile.
#[derive(Debug, Clone, Default)]
pub struct KeybaseProfile {
    pub username: Option<String>,
    pub picture_url: Option<String>,
}

/// Upstream node abstraction: one method per consumed endpoint, plus the Keybase lookup and the
/// inference endpoint health probe. Implementations are stateless apart from URL rotation.
#[trait_variant::make(Send)]
pub trait Node
where
    Self: Clone + Send + Sync + 'static,
{
    /// Current chain height from the latest block.
    async fn latest_height(&self) -> Result<u64, NodeError>;

    /// Header of the block at the given height.
    async fn block(&self, height: u64) -> Result<BlockHeader, NodeError>;

    /// Latest epoch summary: current epoch index, PoC boundaries, epoch length.
    async fn latest_epoch(&self) -> Result<LatestEpochInfo, NodeError>;

    /// The current epoch group with its active participants.
    async fn current_epoch_group(&self) -> Result<EpochGroup, NodeError>;

    /// The epoch group of a specific epoch; fails for epochs the node does not expose (yet).
    async fn epoch_group(&self, epoch_id: u64) -> Result<EpochGroup, NodeError>;

    /// All chain participants, optionally at a specific height.
    async fn participants(&self, height: Option<u64>) -> Result<Vec<ParticipantRecord>, NodeError>;

    /// All staking validators, optionally at a specific height.
    async fn validators(&self, height: Option<u64>) -> Result<Vec<Validator>, NodeError>;

    /// Slashing signing info for a valcons address; `None` when the node has no record.
    async fn signing_info(
        &self,
        valcons_address: &str,
        height: Option<u64>,
    ) -> Result<Option<SigningInfo>, NodeError>;

    /// Authz grants issued by the given granter, de-duplicated by grantee.
    async fn authz_grants(&self, granter: &str) -> Result<Vec<WarmKey>, NodeError>;

    /// Per-epoch performance summary of one participant.
    async fn epoch_performance_summary(
        &self,
        epoch_id: u64,
        participant_id: &str,
        height: Option<u64>,
    ) -> Result<PerformanceSummary, NodeError>;

    /// Registered hardware nodes of one participant.
    async fn hardware_nodes(&self, participant_id: &str) -> Result<Vec<HardwareNode>, NodeError>;

    /// Static descriptors of all governed models.
    async fn models_all(&self) -> Result<Vec<ModelDescriptor>, NodeError>;

    /// Live usage counters per model.
    async fn models_stats(&self) -> Result<Vec<ModelUsageStats>, NodeError>;

    /// Chain-wide restriction parameters.
    async fn restrictions_params(&self) -> Result<RestrictionsParams, NodeError>;

    /// Probe a participant's inference endpoint. Never fails; an empty URL is reported as
    /// unhealthy.
    async fn check_node_health(&self, inference_url: &str) -> HealthProbe;

    /// Resolve a Keybase profile from a 16-hex-char identity.
    async fn keybase_profile(&self, identity: &str) -> KeybaseProfile;
}
