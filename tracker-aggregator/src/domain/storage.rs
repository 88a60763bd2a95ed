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
    HardwareNode, InferenceRecord, JailStatus, ModelAggregate, NodeHealth, Reward, StatsRow,
    Timeline, WarmKey,
};

/// Storage abstraction over the typed cache tables. List lookups are three-valued: `Ok(None)`
/// means never fetched, `Ok(Some(vec![]))` means fetched and confirmed empty.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    /// Liveness check of the backing store.
    async fn ping(&self) -> Result<(), sqlx::Error>;

    /// Replace the fused stats rows for (epoch, height) in one transaction.
    async fn save_stats_batch(
        &self,
        epoch_id: u64,
        height: u64,
        rows: &[StatsRow],
    ) -> Result<(), sqlx::Error>;

    /// Stats rows for an epoch, restricted to one height when given. Corrupt rows are skipped.
    async fn get_stats(
        &self,
        epoch_id: u64,
        height: Option<u64>,
    ) -> Result<Option<Vec<StatsRow>>, sqlx::Error>;

    async fn mark_epoch_finished(&self, epoch_id: u64, finish_height: u64)
    -> Result<(), sqlx::Error>;

    async fn is_epoch_finished(&self, epoch_id: u64) -> Result<bool, sqlx::Error>;

    /// Drop all stats and status rows of an epoch.
    async fn delete_epoch(&self, epoch_id: u64) -> Result<(), sqlx::Error>;

    async fn save_jail_statuses(
        &self,
        epoch_id: u64,
        statuses: &[JailStatus],
    ) -> Result<(), sqlx::Error>;

    async fn get_jail_statuses(
        &self,
        epoch_id: u64,
    ) -> Result<Option<Vec<JailStatus>>, sqlx::Error>;

    async fn save_node_health(&self, statuses: &[NodeHealth]) -> Result<(), sqlx::Error>;

    async fn get_node_health(&self) -> Result<Option<Vec<NodeHealth>>, sqlx::Error>;

    async fn save_rewards(&self, rewards: &[Reward]) -> Result<(), sqlx::Error>;

    async fn get_reward(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<Reward>, sqlx::Error>;

    async fn get_rewards_for_participant(
        &self,
        participant_id: &str,
        epoch_ids: &[u64],
    ) -> Result<Vec<Reward>, sqlx::Error>;

    /// Replace the warm keys of (epoch, participant); an empty set is recorded with a sentinel
    /// row.
    async fn save_warm_keys(
        &self,
        epoch_id: u64,
        participant_id: &str,
        warm_keys: &[WarmKey],
    ) -> Result<(), sqlx::Error>;

    async fn get_warm_keys(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<Vec<WarmKey>>, sqlx::Error>;

    /// Replace the hardware nodes of (epoch, participant); an empty set is recorded with a
    /// sentinel row.
    async fn save_hardware_nodes(
        &self,
        epoch_id: u64,
        participant_id: &str,
        nodes: &[HardwareNode],
    ) -> Result<(), sqlx::Error>;

    async fn get_hardware_nodes(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<Vec<HardwareNode>>, sqlx::Error>;

    async fn save_epoch_total_rewards(
        &self,
        epoch_id: u64,
        total_gnk: u64,
    ) -> Result<(), sqlx::Error>;

    async fn get_epoch_total_rewards(&self, epoch_id: u64) -> Result<Option<u64>, sqlx::Error>;

    async fn delete_epoch_total_rewards(&self, epoch_id: u64) -> Result<(), sqlx::Error>;

    async fn save_models(
        &self,
        epoch_id: u64,
        models: &[ModelAggregate],
    ) -> Result<(), sqlx::Error>;

    async fn get_models(&self, epoch_id: u64) -> Result<Option<Vec<ModelAggregate>>, sqlx::Error>;

    /// Cache the raw models catalog payloads for (epoch, height).
    async fn save_models_api_cache(
        &self,
        epoch_id: u64,
        height: u64,
        models_all: &str,
        models_stats: &str,
    ) -> Result<(), sqlx::Error>;

    /// Latest cached models catalog payloads for an epoch: `(models_all, models_stats,
    /// cached_at)`.
    async fn get_models_api_cache(
        &self,
        epoch_id: u64,
    ) -> Result<Option<(String, String, String)>, sqlx::Error>;

    /// Replace the inference list of (epoch, participant); an empty set is recorded with a
    /// sentinel row.
    async fn save_inferences(
        &self,
        epoch_id: u64,
        participant_id: &str,
        inferences: &[InferenceRecord],
    ) -> Result<(), sqlx::Error>;

    /// Inference records with their cache timestamp.
    async fn get_inferences(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<(Vec<InferenceRecord>, Option<String>)>, sqlx::Error>;

    async fn save_timeline(&self, timeline: &Timeline) -> Result<(), sqlx::Error>;

    async fn get_timeline(&self) -> Result<Option<Timeline>, sqlx::Error>;
}
