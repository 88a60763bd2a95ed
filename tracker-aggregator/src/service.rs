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
    BlockHeader, EpochGroup, EpochParticipant, EpochSnapshot, JailStatus, ModelAggregate,
    ModelDescriptor, ModelUsageStats, ModelView, ModelsView, NodeHealth, ParticipantDetails,
    ParticipantInferences, ParticipantRecord, ParticipantSnapshot, Reward, RewardSummary,
    SeedSignature, StatsRow, StoredStats, Timeline, TimelineEvent, aggregate_models,
    node::{Node, NodeError},
    storage::Storage,
};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use sqlx::types::chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::task;
use tracker_common::domain::{VALCONS_HRP, VALOPER_HRP, convert_bech32, pubkey_to_valcons, ugnk_to_gnk};

/// TTL of the in-memory current-epoch snapshot.
const CURRENT_EPOCH_TTL: Duration = Duration::from_secs(300);

/// Reading this many blocks before the next epoch's effective height yields a settled snapshot of
/// the finishing epoch, safe from late writes.
const SETTLED_HEIGHT_OFFSET: u64 = 10;

/// How many past epochs the rewards poll walks per participant.
const REWARD_POLL_EPOCHS: u64 = 6;

/// How many past epochs the total-rewards poll checks.
const TOTAL_REWARDS_POLL_EPOCHS: u64 = 5;

/// Size of the reward window in the participant details view.
const DETAILS_REWARD_WINDOW: u64 = 5;

/// Distance of the reference block used to derive the average block time.
const TIMELINE_REFERENCE_BLOCKS: u64 = 10_000;

/// The `jailed_until` zero value of the slashing module.
const JAILED_UNTIL_SENTINEL: &str = "1970-01-01";

/// Error of a read-path service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested height predates the epoch's effective start.
    #[error("height {requested} is before the effective start {effective} of epoch {epoch_id}")]
    InvalidHeight {
        epoch_id: u64,
        requested: u64,
        effective: u64,
    },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("cache store failure")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Default)]
struct CurrentEpoch {
    epoch_id: Option<u64>,
    snapshot: Option<EpochSnapshot>,
    fetched_at: Option<Instant>,
}

/// The aggregation engine: resolves canonical observation heights, fans out to the upstream node,
/// fuses the records by join keys, persists the result and serves reads from cache with inline
/// fills for cold sub-resources.
///
/// The in-memory current-epoch snapshot is replaced wholesale under the lock, so concurrent
/// readers always observe a consistent object.
#[derive(Clone)]
pub struct AggregationService<N, S> {
    node: N,
    storage: S,
    current: Arc<RwLock<CurrentEpoch>>,
}

impl<N, S> AggregationService<N, S>
where
    N: Node,
    S: Storage,
{
    pub fn new(node: N, storage: S) -> Self {
        Self {
            node,
            storage,
            current: Arc::new(RwLock::new(CurrentEpoch::default())),
        }
    }

    /// Resolve the single observation height for an epoch.
    ///
    /// The current epoch reads at the requested height or the chain tip. A finished epoch reads
    /// at the next epoch's effective height minus the settle offset (falling back to the next PoC
    /// start while the next epoch is not yet queryable); explicit heights are validated against
    /// the epoch's effective start and clamped to the canonical height.
    pub async fn canonical_height(
        &self,
        epoch_id: u64,
        requested: Option<u64>,
    ) -> Result<u64, ServiceError> {
        let latest = self.node.latest_epoch().await?;

        if epoch_id == latest.epoch_id {
            return match requested {
                Some(height) => Ok(height),
                None => Ok(self.node.latest_height().await?),
            };
        }

        let effective = self.node.epoch_group(epoch_id).await?.effective_block_height;

        let canonical = match self.node.epoch_group(epoch_id + 1).await {
            Ok(next) => next.effective_block_height.saturating_sub(SETTLED_HEIGHT_OFFSET),
            Err(_) => latest.next_poc_start.saturating_sub(SETTLED_HEIGHT_OFFSET),
        };

        match requested {
            None => Ok(canonical),

            Some(height) if height < effective => Err(ServiceError::InvalidHeight {
                epoch_id,
                requested: height,
                effective,
            }),

            Some(height) if height >= canonical => {
                info!(epoch_id, requested = height, canonical; "clamping height to canonical");
                Ok(canonical)
            }

            Some(height) => Ok(height),
        }
    }

    /// The current epoch's fused view, from the in-memory snapshot while fresh. A failed refresh
    /// falls back to the last good snapshot; with no snapshot at all the error surfaces.
    pub async fn current_epoch_stats(&self, reload: bool) -> Result<EpochSnapshot, ServiceError> {
        if !reload {
            let current = self.current.read();
            let fresh = current
                .fetched_at
                .is_some_and(|fetched_at| fetched_at.elapsed() < CURRENT_EPOCH_TTL);
            if fresh && let Some(snapshot) = &current.snapshot {
                debug!(epoch_id:? = current.epoch_id; "serving current epoch from memory");
                return Ok(snapshot.clone());
            }
        }

        match self.fetch_current_epoch().await {
            Ok(snapshot) => Ok(snapshot),

            Err(error) => {
                let snapshot = self.current.read().snapshot.clone();
                match snapshot {
                    Some(snapshot) => {
                        warn!(error:% = error; "current epoch refresh failed, serving last snapshot");
                        Ok(snapshot)
                    }
                    None => Err(error),
                }
            }
        }
    }

    async fn fetch_current_epoch(&self) -> Result<EpochSnapshot, ServiceError> {
        // Height is captured first and flows through to persistence.
        let height = self.node.latest_height().await?;
        let group = self.node.current_epoch_group().await?;
        let epoch_id = group.epoch_id;

        self.mark_epoch_finished_if_needed(epoch_id).await;

        let records = self.node.participants(Some(height)).await?;
        let (mut participants, rows) = fuse_participants(&group, &records);

        self.merge_overlays(epoch_id, &mut participants, height, &group.participants)
            .await;

        self.storage.save_stats_batch(epoch_id, height, &rows).await?;

        let snapshot = EpochSnapshot {
            epoch_id,
            height,
            participants,
            cached_at: Some(now()),
            is_current: true,
            total_assigned_rewards_gnk: None,
        };

        {
            let mut current = self.current.write();
            current.epoch_id = Some(epoch_id);
            current.snapshot = Some(snapshot.clone());
            current.fetched_at = Some(Instant::now());
        }

        self.spawn_participant_cache_fill(epoch_id, snapshot.participants.clone());

        info!(
            epoch_id,
            height,
            participants = snapshot.participants.len();
            "fetched current epoch stats"
        );

        Ok(snapshot)
    }

    /// A finished (or explicitly height-pinned) epoch's fused view. Cache hits reconstruct the
    /// persisted rows; misses fetch, fuse and persist at the canonical height and mark the epoch
    /// finished when no explicit height was requested.
    pub async fn historical_epoch_stats(
        &self,
        epoch_id: u64,
        height: Option<u64>,
        rewards_sync: bool,
    ) -> Result<EpochSnapshot, ServiceError> {
        let is_finished = self.storage.is_epoch_finished(epoch_id).await?;
        let target = self.canonical_height(epoch_id, height).await?;

        if let Some(rows) = self.storage.get_stats(epoch_id, Some(target)).await? {
            debug!(epoch_id, height = target; "serving epoch from cache");

            let cached_at = rows.first().and_then(|row| row.cached_at.clone());
            let mut participants = rows
                .into_iter()
                .map(|row| row.stats.snapshot)
                .collect::<Vec<_>>();

            // The active participant list only feeds potential inline overlay fills; a dark
            // upstream must not take the cached read down with it.
            let active = match self.node.epoch_group(epoch_id).await {
                Ok(group) => group.participants,
                Err(error) => {
                    warn!(epoch_id, error:% = error; "cannot fetch epoch group for overlay fill");
                    vec![]
                }
            };
            self.merge_overlays(epoch_id, &mut participants, target, &active)
                .await;

            let total = self.total_rewards_for(epoch_id, rewards_sync).await?;

            self.spawn_participant_cache_fill(epoch_id, participants.clone());

            return Ok(EpochSnapshot {
                epoch_id,
                height: target,
                participants,
                cached_at,
                is_current: false,
                total_assigned_rewards_gnk: total,
            });
        }

        info!(epoch_id, height = target; "fetching historical epoch");

        let records = self.node.participants(Some(target)).await?;
        let group = self.node.epoch_group(epoch_id).await?;
        let (mut participants, rows) = fuse_participants(&group, &records);

        self.storage.save_stats_batch(epoch_id, target, &rows).await?;

        if height.is_none() && !is_finished {
            self.storage.mark_epoch_finished(epoch_id, target).await?;
        }

        self.merge_overlays(epoch_id, &mut participants, target, &group.participants)
            .await;

        let total = self.total_rewards_for(epoch_id, rewards_sync).await?;

        let snapshot = EpochSnapshot {
            epoch_id,
            height: target,
            participants,
            cached_at: Some(now()),
            is_current: false,
            total_assigned_rewards_gnk: total,
        };

        self.spawn_participant_cache_fill(epoch_id, snapshot.participants.clone());

        Ok(snapshot)
    }

    /// Readiness: the cache store answers.
    pub async fn ready(&self) -> Result<(), ServiceError> {
        self.storage.ping().await?;
        Ok(())
    }

    /// The fused view of any epoch: the in-memory current snapshot when the epoch is the running
    /// one and no height is pinned, the settled historical view otherwise.
    pub async fn epoch_stats(
        &self,
        epoch_id: u64,
        height: Option<u64>,
    ) -> Result<EpochSnapshot, ServiceError> {
        let latest = self.node.latest_epoch().await?;

        if epoch_id == latest.epoch_id && height.is_none() {
            self.current_epoch_stats(false).await
        } else {
            self.historical_epoch_stats(epoch_id, height, false).await
        }
    }

    /// The models view of any epoch, current or historical.
    pub async fn epoch_models(
        &self,
        epoch_id: u64,
        height: Option<u64>,
    ) -> Result<ModelsView, ServiceError> {
        let latest = self.node.latest_epoch().await?;

        if epoch_id == latest.epoch_id && height.is_none() {
            self.current_models().await
        } else {
            self.historical_models(epoch_id, height).await
        }
    }

    /// Cached total rewards of an epoch; a cached zero is invalid and evicted. When absent the
    /// total is computed synchronously or dispatched in the background, depending on the caller.
    async fn total_rewards_for(
        &self,
        epoch_id: u64,
        rewards_sync: bool,
    ) -> Result<Option<u64>, ServiceError> {
        let mut total = self.storage.get_epoch_total_rewards(epoch_id).await?;

        if total == Some(0) {
            warn!(epoch_id; "evicting invalid cached total rewards of 0 GNK");
            self.storage.delete_epoch_total_rewards(epoch_id).await?;
            total = None;
        }

        if total.is_none() {
            if rewards_sync {
                if let Err(error) = self.calculate_total_rewards(epoch_id).await {
                    error!(epoch_id, error:% = error; "total rewards calculation failed");
                }
                total = self.storage.get_epoch_total_rewards(epoch_id).await?;
            } else {
                let service = self.clone();
                task::spawn(async move {
                    if let Err(error) = service.calculate_total_rewards(epoch_id).await {
                        error!(epoch_id, error:% = error; "total rewards calculation failed");
                    }
                });
            }
        }

        Ok(total)
    }

    /// On an epoch transition, take the settled snapshot of the finishing epoch exactly once:
    /// mark it finished and compute its total rewards synchronously.
    async fn mark_epoch_finished_if_needed(&self, current_epoch_id: u64) {
        let previous = self.current.read().epoch_id;
        let Some(previous) = previous else {
            return;
        };

        if current_epoch_id <= previous {
            return;
        }

        match self.storage.is_epoch_finished(previous).await {
            Ok(true) => {}

            Ok(false) => {
                info!(from = previous, to = current_epoch_id; "epoch transition detected");

                if let Err(error) = self.historical_epoch_stats(previous, None, true).await {
                    error!(
                        epoch_id = previous,
                        error:% = error;
                        "failed to finalize finished epoch"
                    );
                }
            }

            Err(error) => {
                warn!(epoch_id = previous, error:% = error; "cannot check epoch status");
            }
        }
    }

    /// Overlay cached jail and health data onto the fused records, fetching inline when a cache
    /// is cold. Missing overlays leave the fields unset; this never fails.
    async fn merge_overlays(
        &self,
        epoch_id: u64,
        participants: &mut [ParticipantSnapshot],
        height: u64,
        active: &[EpochParticipant],
    ) {
        let jail_statuses = match self.storage.get_jail_statuses(epoch_id).await {
            Ok(Some(statuses)) => statuses,

            Ok(None) => {
                info!(epoch_id; "no cached jail statuses, fetching inline");
                if let Err(error) = self.refresh_jail_statuses(epoch_id, height, active).await {
                    warn!(epoch_id, error:% = error; "inline jail refresh failed");
                }
                self.storage
                    .get_jail_statuses(epoch_id)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default()
            }

            Err(error) => {
                warn!(epoch_id, error:% = error; "cannot read jail statuses");
                vec![]
            }
        };

        let health_statuses = match self.storage.get_node_health().await {
            Ok(Some(statuses)) => statuses,

            Ok(None) => {
                info!("no cached health statuses, fetching inline");
                if let Err(error) = self.refresh_node_health(active).await {
                    warn!(error:% = error; "inline health refresh failed");
                }
                self.storage
                    .get_node_health()
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default()
            }

            Err(error) => {
                warn!(error:% = error; "cannot read health statuses");
                vec![]
            }
        };

        let jail_by_index = jail_statuses
            .iter()
            .map(|status| (status.participant_index.as_str(), status))
            .collect::<HashMap<_, _>>();
        let health_by_index = health_statuses
            .iter()
            .map(|status| (status.participant_index.as_str(), status))
            .collect::<HashMap<_, _>>();

        for participant in participants.iter_mut() {
            if let Some(jail) = jail_by_index.get(participant.index.as_str()) {
                participant.apply_jail(jail);
            }
            if let Some(health) = health_by_index.get(participant.index.as_str()) {
                participant.apply_health(health);
            }
        }
    }

    /// Compute and persist the jail overlay for every active participant at the given height:
    /// join validators by valoper address, derive the valcons address, resolve signing info for
    /// jailed validators and enrich the description via Keybase.
    pub async fn refresh_jail_statuses(
        &self,
        epoch_id: u64,
        height: u64,
        active: &[EpochParticipant],
    ) -> Result<(), ServiceError> {
        let validators = self.node.validators(Some(height)).await?;
        let validators_by_operator = validators
            .iter()
            .filter(|validator| validator.has_tokens())
            .map(|validator| (validator.operator_address.as_str(), validator))
            .collect::<HashMap<_, _>>();

        let now_utc = Utc::now();
        let mut statuses = Vec::new();

        for participant in active {
            let Some(valoper) = convert_bech32(&participant.index, VALOPER_HRP) else {
                warn!(index:% = participant.index; "participant index is not valid bech32, skipping");
                continue;
            };
            let Some(validator) = validators_by_operator.get(valoper.as_str()) else {
                continue;
            };

            let consensus_key = validator.consensus_key().map(ToString::to_string);

            let consensus_key_mismatch = match (&consensus_key, &participant.validator_key) {
                (Some(consensus_key), Some(validator_key)) if !validator_key.is_empty() => {
                    Some(consensus_key != validator_key)
                }
                _ => None,
            };

            let is_jailed = validator.jailed;
            let valcons_address = consensus_key
                .as_deref()
                .and_then(|key| pubkey_to_valcons(key, VALCONS_HRP));

            let mut jailed_until = None;
            let mut ready_to_unjail = false;

            if is_jailed && let Some(valcons) = valcons_address.as_deref() {
                let signing_info = self.node.signing_info(valcons, Some(height)).await?;

                if let Some(until) = signing_info.and_then(|info| info.jailed_until)
                    && !until.contains(JAILED_UNTIL_SENTINEL)
                {
                    if let Ok(until_time) = DateTime::parse_from_rfc3339(&until) {
                        ready_to_unjail = now_utc > until_time.with_timezone(&Utc);
                    }
                    jailed_until = Some(until);
                }
            }

            let description = &validator.description;
            let mut moniker = description.moniker.trim().to_string();
            let identity = description.identity.trim().to_string();
            let website = description.website.trim().to_string();

            // Upstream default descriptions leak the operator address as moniker.
            if moniker.starts_with(VALOPER_HRP) {
                moniker.clear();
            }

            let profile = if identity.is_empty() {
                Default::default()
            } else {
                self.node.keybase_profile(&identity).await
            };

            statuses.push(JailStatus {
                epoch_id,
                participant_index: participant.index.clone(),
                is_jailed,
                jailed_until,
                ready_to_unjail,
                valcons_address,
                moniker: Some(moniker).filter(|moniker| !moniker.is_empty()),
                identity: Some(identity).filter(|identity| !identity.is_empty()),
                keybase_username: profile.username,
                keybase_picture_url: profile.picture_url,
                website: Some(website).filter(|website| !website.is_empty()),
                validator_consensus_key: consensus_key,
                consensus_key_mismatch,
            });
        }

        self.storage.save_jail_statuses(epoch_id, &statuses).await?;
        info!(epoch_id, count = statuses.len(); "refreshed jail statuses");

        Ok(())
    }

    /// Probe every active participant's inference endpoint and persist the health overlay.
    pub async fn refresh_node_health(
        &self,
        active: &[EpochParticipant],
    ) -> Result<(), ServiceError> {
        let mut statuses = Vec::with_capacity(active.len());

        for participant in active {
            let url = participant.inference_url.as_deref().unwrap_or_default();
            let probe = self.node.check_node_health(url).await;

            statuses.push(NodeHealth {
                participant_index: participant.index.clone(),
                is_healthy: probe.is_healthy,
                last_check: now(),
                error_message: probe.error_message,
                response_time_ms: probe.response_time_ms,
            });
        }

        self.storage.save_node_health(&statuses).await?;
        info!(count = statuses.len(); "refreshed node health");

        Ok(())
    }

    /// Assemble the detail view of one participant: the fused snapshot, a reward window, the
    /// seed signature, warm keys and hardware nodes; cold sub-caches are filled inline.
    pub async fn participant_details(
        &self,
        participant_id: &str,
        epoch_id: u64,
        height: Option<u64>,
    ) -> Result<Option<ParticipantDetails>, ServiceError> {
        let latest = self.node.latest_epoch().await?;
        let is_current = epoch_id == latest.epoch_id;

        let stats = if is_current {
            self.current_epoch_stats(false).await?
        } else {
            self.historical_epoch_stats(epoch_id, height, false).await?
        };

        let Some(participant) = stats
            .participants
            .iter()
            .find(|participant| participant.index == participant_id)
            .cloned()
        else {
            return Ok(None);
        };

        let epoch_ids: Vec<u64> = if is_current {
            (1..=DETAILS_REWARD_WINDOW)
                .filter_map(|offset| latest.epoch_id.checked_sub(offset))
                .filter(|&id| id > 0)
                .collect()
        } else if epoch_id < latest.epoch_id {
            (0..=DETAILS_REWARD_WINDOW)
                .rev()
                .filter_map(|offset| epoch_id.checked_sub(offset))
                .filter(|&id| id > 0)
                .collect()
        } else {
            vec![]
        };

        let mut rewards_data = self
            .storage
            .get_rewards_for_participant(participant_id, &epoch_ids)
            .await?;

        let missing = epoch_ids
            .iter()
            .filter(|id| !rewards_data.iter().any(|reward| reward.epoch_id == **id))
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            debug!(participant_id, missing:? = missing; "fetching missing rewards inline");

            let mut fetched = Vec::new();
            for missing_epoch in missing {
                match self
                    .node
                    .epoch_performance_summary(missing_epoch, participant_id, None)
                    .await
                {
                    Ok(summary) => fetched.push(Reward {
                        epoch_id: missing_epoch,
                        participant_id: participant_id.to_string(),
                        rewarded_coins: summary.rewarded_coins,
                        claimed: summary.claimed,
                    }),
                    Err(error) => {
                        debug!(epoch_id = missing_epoch, error:% = error; "no reward summary")
                    }
                }
            }

            if !fetched.is_empty() {
                self.storage.save_rewards(&fetched).await?;
                rewards_data.extend(fetched);
            }
        }

        let mut rewards = rewards_data
            .iter()
            .map(|reward| RewardSummary {
                epoch_id: reward.epoch_id,
                assigned_reward_gnk: ugnk_to_gnk(&reward.rewarded_coins),
                claimed: reward.claimed,
            })
            .collect::<Vec<_>>();
        rewards.sort_by(|a, b| b.epoch_id.cmp(&a.epoch_id));

        // Seed signature and the per-model node weights come from the persisted stats row.
        let stats_rows = self.storage.get_stats(epoch_id, Some(stats.height)).await?;
        let own_row = stats_rows
            .unwrap_or_default()
            .into_iter()
            .find(|row| row.participant_index == participant_id);

        let seed = own_row
            .as_ref()
            .and_then(|row| row.seed_signature.clone())
            .map(|signature| SeedSignature {
                participant: participant_id.to_string(),
                epoch_id,
                signature,
            });
        let ml_nodes_map = own_row
            .map(|row| row.stats.ml_nodes_map)
            .unwrap_or_default();

        let warm_keys = match self.storage.get_warm_keys(epoch_id, participant_id).await? {
            Some(warm_keys) => warm_keys,

            None => {
                debug!(participant_id; "fetching warm keys inline");
                match self.node.authz_grants(participant_id).await {
                    Ok(warm_keys) => {
                        self.storage
                            .save_warm_keys(epoch_id, participant_id, &warm_keys)
                            .await?;
                        warm_keys
                    }
                    Err(error) => {
                        warn!(participant_id, error:% = error; "cannot fetch warm keys");
                        vec![]
                    }
                }
            }
        };

        let mut hardware_nodes = match self
            .storage
            .get_hardware_nodes(epoch_id, participant_id)
            .await?
        {
            Some(nodes) => nodes,

            None => {
                debug!(participant_id; "fetching hardware nodes inline");
                match self.node.hardware_nodes(participant_id).await {
                    Ok(nodes) => {
                        self.storage
                            .save_hardware_nodes(epoch_id, participant_id, &nodes)
                            .await?;
                        nodes
                    }
                    Err(error) => {
                        warn!(participant_id, error:% = error; "cannot fetch hardware nodes");
                        vec![]
                    }
                }
            }
        };

        // The epoch's node-weight map wins over the registry value.
        for node in hardware_nodes.iter_mut() {
            if let Some(weight) = ml_nodes_map.get(&node.local_id) {
                node.poc_weight = Some(*weight);
            }
        }

        Ok(Some(ParticipantDetails {
            participant,
            rewards,
            seed,
            warm_keys,
            hardware_nodes,
        }))
    }

    /// Walk recent epochs for every active participant and refresh unclaimed rewards.
    pub async fn poll_participant_rewards(&self) -> Result<(), ServiceError> {
        let height = self.node.latest_height().await?;
        let group = self.node.current_epoch_group().await?;

        let mut rewards = Vec::new();

        for participant in &group.participants {
            for offset in 1..=REWARD_POLL_EPOCHS {
                let Some(epoch_id) = group.epoch_id.checked_sub(offset).filter(|&id| id > 0)
                else {
                    continue;
                };

                // Claimed rewards are final.
                let cached = self.storage.get_reward(epoch_id, &participant.index).await?;
                if cached.is_some_and(|reward| reward.claimed) {
                    continue;
                }

                match self
                    .node
                    .epoch_performance_summary(epoch_id, &participant.index, Some(height))
                    .await
                {
                    Ok(summary) => rewards.push(Reward {
                        epoch_id,
                        participant_id: participant.index.clone(),
                        rewarded_coins: summary.rewarded_coins,
                        claimed: summary.claimed,
                    }),
                    Err(error) => {
                        debug!(
                            epoch_id,
                            index:% = participant.index,
                            error:% = error;
                            "no reward summary"
                        );
                    }
                }
            }
        }

        if !rewards.is_empty() {
            self.storage.save_rewards(&rewards).await?;
            info!(count = rewards.len(); "saved reward records");
        }

        Ok(())
    }

    /// Refresh warm keys of every active participant.
    pub async fn poll_warm_keys(&self) -> Result<(), ServiceError> {
        let group = self.node.current_epoch_group().await?;

        for participant in &group.participants {
            match self.node.authz_grants(&participant.index).await {
                Ok(warm_keys) => {
                    self.storage
                        .save_warm_keys(group.epoch_id, &participant.index, &warm_keys)
                        .await?;
                }
                Err(error) => {
                    debug!(index:% = participant.index, error:% = error; "cannot fetch warm keys");
                }
            }
        }

        info!(participants = group.participants.len(); "completed warm keys poll");
        Ok(())
    }

    /// Refresh hardware nodes of every active participant.
    pub async fn poll_hardware_nodes(&self) -> Result<(), ServiceError> {
        let group = self.node.current_epoch_group().await?;

        for participant in &group.participants {
            match self.node.hardware_nodes(&participant.index).await {
                Ok(nodes) => {
                    self.storage
                        .save_hardware_nodes(group.epoch_id, &participant.index, &nodes)
                        .await?;
                }
                Err(error) => {
                    debug!(
                        index:% = participant.index,
                        error:% = error;
                        "cannot fetch hardware nodes"
                    );
                }
            }
        }

        info!(participants = group.participants.len(); "completed hardware nodes poll");
        Ok(())
    }

    /// Refresh the jail overlay for the current epoch.
    pub async fn poll_jail_statuses(&self) -> Result<(), ServiceError> {
        let group = self.node.current_epoch_group().await?;
        let height = self.node.latest_height().await?;

        self.refresh_jail_statuses(group.epoch_id, height, &group.participants)
            .await
    }

    /// Refresh the health overlay for the current epoch's participants.
    pub async fn poll_node_health(&self) -> Result<(), ServiceError> {
        let group = self.node.current_epoch_group().await?;

        self.refresh_node_health(&group.participants).await
    }

    /// Backfill total rewards of recent epochs, evicting invalid zeros.
    pub async fn poll_epoch_total_rewards(&self) -> Result<(), ServiceError> {
        let latest = self.node.latest_epoch().await?;

        for offset in 1..=TOTAL_REWARDS_POLL_EPOCHS {
            let Some(epoch_id) = latest.epoch_id.checked_sub(offset).filter(|&id| id > 0) else {
                continue;
            };

            match self.storage.get_epoch_total_rewards(epoch_id).await? {
                Some(total) if total > 0 => continue,

                Some(_) => {
                    warn!(epoch_id; "evicting invalid cached total rewards of 0 GNK");
                    self.storage.delete_epoch_total_rewards(epoch_id).await?;
                }

                None => {}
            }

            if let Err(error) = self.calculate_total_rewards(epoch_id).await {
                error!(epoch_id, error:% = error; "total rewards calculation failed");
            }
        }

        Ok(())
    }

    /// Sum rewards across all active participants of an epoch. A sum of zero means the chain has
    /// not assigned rewards yet and must not be cached; per-participant rewards observed along
    /// the way are persisted opportunistically.
    pub async fn calculate_total_rewards(&self, epoch_id: u64) -> Result<(), ServiceError> {
        let group = self.node.epoch_group(epoch_id).await?;

        let mut total_ugnk: u128 = 0;
        let mut fetched = 0usize;
        let mut rewards = Vec::new();

        for participant in &group.participants {
            match self
                .node
                .epoch_performance_summary(epoch_id, &participant.index, None)
                .await
            {
                Ok(summary) => {
                    total_ugnk += summary.rewarded_coins.trim().parse::<u128>().unwrap_or(0);
                    fetched += 1;
                    rewards.push(Reward {
                        epoch_id,
                        participant_id: participant.index.clone(),
                        rewarded_coins: summary.rewarded_coins,
                        claimed: summary.claimed,
                    });
                }
                Err(error) => {
                    debug!(epoch_id, index:% = participant.index, error:% = error; "no reward summary");
                }
            }
        }

        if total_ugnk == 0 {
            if fetched > 0 {
                warn!(
                    epoch_id,
                    fetched;
                    "rewards sum to 0, not yet assigned upstream, skipping cache"
                );
            }
            return Ok(());
        }

        if !rewards.is_empty() {
            self.storage.save_rewards(&rewards).await?;
        }

        let total_gnk = (total_ugnk / tracker_common::domain::UGNK_PER_GNK) as u64;
        self.storage.save_epoch_total_rewards(epoch_id, total_gnk).await?;
        info!(epoch_id, total_gnk, fetched; "calculated epoch total rewards");

        Ok(())
    }

    /// The models view of the current epoch: cached per-epoch aggregates enriched with the live
    /// catalog, which is persisted for later historical reads.
    pub async fn current_models(&self) -> Result<ModelsView, ServiceError> {
        let group = self.node.current_epoch_group().await?;
        let height = self.node.latest_height().await?;

        let aggregates = self
            .epoch_model_aggregates(group.epoch_id, &group.participants)
            .await?;

        let descriptors = self.node.models_all().await?;
        let stats = self.node.models_stats().await?;
        self.cache_models_catalog(group.epoch_id, height, &descriptors, &stats)
            .await;

        Ok(build_models_view(
            group.epoch_id,
            height,
            aggregates,
            descriptors,
            stats,
            true,
        ))
    }

    /// The models view of a historical epoch; the catalog comes from the cache when present.
    pub async fn historical_models(
        &self,
        epoch_id: u64,
        height: Option<u64>,
    ) -> Result<ModelsView, ServiceError> {
        let group = self.node.epoch_group(epoch_id).await?;
        let target = self.canonical_height(epoch_id, height).await?;

        let aggregates = self
            .epoch_model_aggregates(epoch_id, &group.participants)
            .await?;

        let (descriptors, stats) = match self.storage.get_models_api_cache(epoch_id).await? {
            Some((models_all, models_stats, _)) => {
                let descriptors = serde_json::from_str::<Vec<ModelDescriptor>>(&models_all)
                    .unwrap_or_else(|error| {
                        warn!(epoch_id, error:% = error; "corrupt models catalog cache");
                        vec![]
                    });
                let stats = serde_json::from_str::<Vec<ModelUsageStats>>(&models_stats)
                    .unwrap_or_else(|error| {
                        warn!(epoch_id, error:% = error; "corrupt models stats cache");
                        vec![]
                    });
                (descriptors, stats)
            }

            None => {
                let descriptors = self.node.models_all().await?;
                let stats = self.node.models_stats().await?;
                self.cache_models_catalog(epoch_id, target, &descriptors, &stats)
                    .await;
                (descriptors, stats)
            }
        };

        Ok(build_models_view(
            epoch_id, target, aggregates, descriptors, stats, false,
        ))
    }

    async fn epoch_model_aggregates(
        &self,
        epoch_id: u64,
        participants: &[EpochParticipant],
    ) -> Result<Vec<ModelAggregate>, ServiceError> {
        if let Some(models) = self.storage.get_models(epoch_id).await? {
            return Ok(models);
        }

        let aggregates = aggregate_models(participants);
        if !aggregates.is_empty() {
            self.storage.save_models(epoch_id, &aggregates).await?;
        }

        Ok(aggregates)
    }

    async fn cache_models_catalog(
        &self,
        epoch_id: u64,
        height: u64,
        descriptors: &[ModelDescriptor],
        stats: &[ModelUsageStats],
    ) {
        let (Ok(models_all), Ok(models_stats)) =
            (serde_json::to_string(descriptors), serde_json::to_string(stats))
        else {
            return;
        };

        if let Err(error) = self
            .storage
            .save_models_api_cache(epoch_id, height, &models_all, &models_stats)
            .await
        {
            warn!(epoch_id, error:% = error; "cannot cache models catalog");
        }
    }

    /// Cached inferences of one participant, grouped by outcome; `None` until a filler has
    /// populated the cache.
    pub async fn participant_inferences(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<ParticipantInferences>, ServiceError> {
        let Some((records, cached_at)) =
            self.storage.get_inferences(epoch_id, participant_id).await?
        else {
            return Ok(None);
        };

        Ok(Some(ParticipantInferences::group(
            epoch_id,
            participant_id.to_string(),
            records,
            cached_at,
        )))
    }

    /// The chain timeline; a failed assembly falls back to the cached one.
    pub async fn timeline(&self) -> Result<Timeline, ServiceError> {
        match self.assemble_timeline().await {
            Ok(timeline) => {
                if let Err(error) = self.storage.save_timeline(&timeline).await {
                    warn!(error:% = error; "cannot cache timeline");
                }
                Ok(timeline)
            }

            Err(error) => match self.storage.get_timeline().await? {
                Some(timeline) => {
                    warn!(error:% = error; "timeline assembly failed, serving cache");
                    Ok(timeline)
                }
                None => Err(error),
            },
        }
    }

    async fn assemble_timeline(&self) -> Result<Timeline, ServiceError> {
        let height = self.node.latest_height().await?;
        let current_block = self.node.block(height).await?;

        let reference_height = height.saturating_sub(TIMELINE_REFERENCE_BLOCKS).max(1);
        let reference_block = self.node.block(reference_height).await?;

        let avg_block_time = average_block_time(&current_block, &reference_block);

        let restrictions = self.node.restrictions_params().await?;
        let latest = self.node.latest_epoch().await?;

        let events = vec![TimelineEvent {
            block_height: restrictions.restriction_end_block,
            description: "Money Transfer Enabled".to_string(),
            occurred: height >= restrictions.restriction_end_block,
        }];

        Ok(Timeline {
            current_block,
            reference_block,
            avg_block_time,
            events,
            current_epoch_start: latest.poc_start_block_height,
            current_epoch_index: latest.epoch_id,
            epoch_length: latest.epoch_length,
        })
    }

    /// Fill per-participant sub-caches (reward, warm keys, hardware) in the background; only
    /// cold entries are fetched.
    fn spawn_participant_cache_fill(&self, epoch_id: u64, participants: Vec<ParticipantSnapshot>) {
        let service = self.clone();

        task::spawn(async move {
            service.ensure_participant_caches(epoch_id, &participants).await;
        });
    }

    async fn ensure_participant_caches(&self, epoch_id: u64, participants: &[ParticipantSnapshot]) {
        for participant in participants {
            let participant_id = participant.index.as_str();

            match self.storage.get_reward(epoch_id, participant_id).await {
                Ok(None) => {
                    if let Ok(summary) = self
                        .node
                        .epoch_performance_summary(epoch_id, participant_id, None)
                        .await
                    {
                        let reward = Reward {
                            epoch_id,
                            participant_id: participant_id.to_string(),
                            rewarded_coins: summary.rewarded_coins,
                            claimed: summary.claimed,
                        };
                        if let Err(error) = self.storage.save_rewards(&[reward]).await {
                            debug!(participant_id, error:% = error; "cannot cache reward");
                        }
                    }
                }
                Ok(Some(_)) => {}
                Err(error) => debug!(participant_id, error:% = error; "cannot read reward cache"),
            }

            match self.storage.get_warm_keys(epoch_id, participant_id).await {
                Ok(None) => {
                    if let Ok(warm_keys) = self.node.authz_grants(participant_id).await
                        && let Err(error) = self
                            .storage
                            .save_warm_keys(epoch_id, participant_id, &warm_keys)
                            .await
                    {
                        debug!(participant_id, error:% = error; "cannot cache warm keys");
                    }
                }
                Ok(Some(_)) => {}
                Err(error) => {
                    debug!(participant_id, error:% = error; "cannot read warm keys cache")
                }
            }

            match self
                .storage
                .get_hardware_nodes(epoch_id, participant_id)
                .await
            {
                Ok(None) => {
                    if let Ok(nodes) = self.node.hardware_nodes(participant_id).await
                        && let Err(error) = self
                            .storage
                            .save_hardware_nodes(epoch_id, participant_id, &nodes)
                            .await
                    {
                        debug!(participant_id, error:% = error; "cannot cache hardware nodes");
                    }
                }
                Ok(Some(_)) => {}
                Err(error) => {
                    debug!(participant_id, error:% = error; "cannot read hardware cache")
                }
            }
        }
    }
}

/// Intersect the epoch group's active set with the participant listing, preserving the group's
/// order, and build both the served snapshots and the rows to persist.
fn fuse_participants(
    group: &EpochGroup,
    records: &[ParticipantRecord],
) -> (Vec<ParticipantSnapshot>, Vec<StatsRow>) {
    let records_by_index = records
        .iter()
        .map(|record| (record.index.as_str(), record))
        .collect::<HashMap<_, _>>();

    let mut snapshots = Vec::with_capacity(group.participants.len());
    let mut rows = Vec::with_capacity(group.participants.len());

    for member in &group.participants {
        let Some(record) = records_by_index.get(member.index.as_str()) else {
            debug!(index:% = member.index; "active participant missing from listing, skipping");
            continue;
        };

        let snapshot = ParticipantSnapshot {
            index: record.index.clone(),
            address: record.address.clone(),
            weight: member.weight,
            validator_key: member.validator_key.clone(),
            inference_url: record.inference_url.clone(),
            status: record.status.clone(),
            models: member.models.clone(),
            stats: record.stats.clone(),
            ..Default::default()
        };

        rows.push(StatsRow {
            participant_index: snapshot.index.clone(),
            stats: StoredStats {
                snapshot: snapshot.clone(),
                ml_nodes_map: member.ml_nodes_map(),
            },
            seed_signature: member.seed_signature(),
            cached_at: None,
        });
        snapshots.push(snapshot);
    }

    (snapshots, rows)
}

fn build_models_view(
    epoch_id: u64,
    height: u64,
    aggregates: Vec<ModelAggregate>,
    descriptors: Vec<ModelDescriptor>,
    stats: Vec<ModelUsageStats>,
    is_current: bool,
) -> ModelsView {
    let aggregates_by_id = aggregates
        .iter()
        .map(|aggregate| (aggregate.model_id.as_str(), aggregate))
        .collect::<HashMap<_, _>>();

    let models = descriptors
        .into_iter()
        .map(|descriptor| {
            let aggregate = aggregates_by_id.get(descriptor.id.as_str());

            ModelView {
                total_weight: aggregate.map(|a| a.total_weight).unwrap_or_default(),
                participant_count: aggregate.map(|a| a.participant_count).unwrap_or_default(),
                id: descriptor.id,
                proposed_by: descriptor.proposed_by,
                v_ram: descriptor.v_ram,
                throughput_per_nonce: descriptor.throughput_per_nonce,
                units_of_compute_per_token: descriptor.units_of_compute_per_token,
                hf_repo: descriptor.hf_repo,
                hf_commit: descriptor.hf_commit,
                model_args: descriptor.model_args,
                validation_threshold: descriptor.validation_threshold,
            }
        })
        .collect();

    ModelsView {
        epoch_id,
        height,
        models,
        stats,
        cached_at: now(),
        is_current,
    }
}

fn average_block_time(current: &BlockHeader, reference: &BlockHeader) -> f64 {
    let blocks = current.height.saturating_sub(reference.height);
    if blocks == 0 {
        return 0.0;
    }

    let (Ok(current_time), Ok(reference_time)) = (
        DateTime::parse_from_rfc3339(&current.time),
        DateTime::parse_from_rfc3339(&reference.time),
    ) else {
        return 0.0;
    };

    let seconds = (current_time - reference_time).num_milliseconds() as f64 / 1_000.0;
    ((seconds / blocks as f64) * 100.0).round() / 100.0
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        EpochStats, HardwareNode, HealthProbe, LatestEpochInfo, MlNode, MlNodeGroup,
        ModelDescriptor, ModelUsageStats, ParticipantRecord, PerformanceSummary,
        RestrictionsParams, Seed, SigningInfo, Validator, WarmKey, node::KeybaseProfile,
    };
    use crate::infra::storage::SqliteStorage;
    use assert_matches::assert_matches;
    use std::sync::Mutex;
    use tracker_common::{domain::ACCOUNT_HRP, infra::pool::SqlitePool};

    const P1: &str = "gonka1qqyc9gsld2666kpunherra8rx2efwg4v8wafg3";
    const P2: &str = "gonka14cu38xpsd8pz5zdkkzwf0jwtpc0vv309ake364";
    const CONSENSUS_KEY: &str = "YrQI3q3zBpHDLEMZvgqEkNwjc/BmZ5HkEMYgQwYp+8E=";

    #[derive(Default)]
    struct MockState {
        height: u64,
        current_epoch_id: u64,
        next_poc_start: u64,
        epoch_length: u64,
        epoch_groups: HashMap<u64, EpochGroup>,
        participants: Vec<ParticipantRecord>,
        validators: Vec<Validator>,
        signing_infos: HashMap<String, SigningInfo>,
        summaries: HashMap<(u64, String), PerformanceSummary>,
        summary_calls: HashMap<(u64, String), usize>,
        warm_keys: HashMap<String, Vec<WarmKey>>,
        authz_calls: HashMap<String, usize>,
        hardware: HashMap<String, Vec<HardwareNode>>,
        blocks: HashMap<u64, String>,
        restriction_end_block: u64,
        models: Vec<ModelDescriptor>,
        model_stats: Vec<ModelUsageStats>,
        fail_all: bool,
    }

    #[derive(Clone, Default)]
    struct MockNode {
        state: Arc<Mutex<MockState>>,
    }

    impl MockNode {
        fn unavailable(endpoint: &str) -> NodeError {
            NodeError::Unavailable {
                endpoint: endpoint.to_string(),
            }
        }

        fn check(&self, endpoint: &str) -> Result<(), NodeError> {
            if self.state.lock().unwrap().fail_all {
                Err(Self::unavailable(endpoint))
            } else {
                Ok(())
            }
        }
    }

    impl Node for MockNode {
        async fn latest_height(&self) -> Result<u64, NodeError> {
            self.check("latest_height")?;
            Ok(self.state.lock().unwrap().height)
        }

        async fn block(&self, height: u64) -> Result<BlockHeader, NodeError> {
            self.check("block")?;
            let state = self.state.lock().unwrap();
            let time = state
                .blocks
                .get(&height)
                .cloned()
                .ok_or_else(|| Self::unavailable("block"))?;
            Ok(BlockHeader { height, time })
        }

        async fn latest_epoch(&self) -> Result<LatestEpochInfo, NodeError> {
            self.check("latest_epoch")?;
            let state = self.state.lock().unwrap();
            Ok(LatestEpochInfo {
                epoch_id: state.current_epoch_id,
                poc_start_block_height: state.next_poc_start.saturating_sub(state.epoch_length),
                next_poc_start: state.next_poc_start,
                epoch_length: state.epoch_length,
            })
        }

        async fn current_epoch_group(&self) -> Result<EpochGroup, NodeError> {
            self.check("current_epoch_group")?;
            let state = self.state.lock().unwrap();
            state
                .epoch_groups
                .get(&state.current_epoch_id)
                .cloned()
                .ok_or_else(|| Self::unavailable("current_epoch_group"))
        }

        async fn epoch_group(&self, epoch_id: u64) -> Result<EpochGroup, NodeError> {
            self.check("epoch_group")?;
            self.state
                .lock()
                .unwrap()
                .epoch_groups
                .get(&epoch_id)
                .cloned()
                .ok_or_else(|| Self::unavailable("epoch_group"))
        }

        async fn participants(
            &self,
            _height: Option<u64>,
        ) -> Result<Vec<ParticipantRecord>, NodeError> {
            self.check("participants")?;
            Ok(self.state.lock().unwrap().participants.clone())
        }

        async fn validators(&self, _height: Option<u64>) -> Result<Vec<Validator>, NodeError> {
            self.check("validators")?;
            Ok(self.state.lock().unwrap().validators.clone())
        }

        async fn signing_info(
            &self,
            valcons_address: &str,
            _height: Option<u64>,
        ) -> Result<Option<SigningInfo>, NodeError> {
            self.check("signing_info")?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .signing_infos
                .get(valcons_address)
                .cloned())
        }

        async fn authz_grants(&self, granter: &str) -> Result<Vec<WarmKey>, NodeError> {
            self.check("authz_grants")?;
            let mut state = self.state.lock().unwrap();
            *state.authz_calls.entry(granter.to_string()).or_default() += 1;
            Ok(state.warm_keys.get(granter).cloned().unwrap_or_default())
        }

        async fn epoch_performance_summary(
            &self,
            epoch_id: u64,
            participant_id: &str,
            _height: Option<u64>,
        ) -> Result<PerformanceSummary, NodeError> {
            self.check("epoch_performance_summary")?;
            let mut state = self.state.lock().unwrap();
            let key = (epoch_id, participant_id.to_string());
            *state.summary_calls.entry(key.clone()).or_default() += 1;
            state
                .summaries
                .get(&key)
                .cloned()
                .ok_or_else(|| Self::unavailable("epoch_performance_summary"))
        }

        async fn hardware_nodes(
            &self,
            participant_id: &str,
        ) -> Result<Vec<HardwareNode>, NodeError> {
            self.check("hardware_nodes")?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .hardware
                .get(participant_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn models_all(&self) -> Result<Vec<ModelDescriptor>, NodeError> {
            self.check("models_all")?;
            Ok(self.state.lock().unwrap().models.clone())
        }

        async fn models_stats(&self) -> Result<Vec<ModelUsageStats>, NodeError> {
            self.check("models_stats")?;
            Ok(self.state.lock().unwrap().model_stats.clone())
        }

        async fn restrictions_params(&self) -> Result<RestrictionsParams, NodeError> {
            self.check("restrictions_params")?;
            Ok(RestrictionsParams {
                restriction_end_block: self.state.lock().unwrap().restriction_end_block,
            })
        }

        async fn check_node_health(&self, inference_url: &str) -> HealthProbe {
            if inference_url.is_empty() {
                HealthProbe::unhealthy("No inference URL")
            } else {
                HealthProbe {
                    is_healthy: true,
                    error_message: None,
                    response_time_ms: Some(5),
                }
            }
        }

        async fn keybase_profile(&self, _identity: &str) -> KeybaseProfile {
            KeybaseProfile::default()
        }
    }

    fn member(index: &str, weight: i64) -> EpochParticipant {
        EpochParticipant {
            index: index.to_string(),
            validator_key: Some(CONSENSUS_KEY.to_string()),
            weight,
            inference_url: Some(format!("http://{index}:8000")),
            models: vec![],
            seed: Some(Seed {
                signature: format!("seed-{index}"),
            }),
            ml_nodes: vec![],
        }
    }

    fn group(epoch_id: u64, effective: u64, participants: Vec<EpochParticipant>) -> EpochGroup {
        EpochGroup {
            epoch_id,
            poc_start_block_height: effective.saturating_sub(10),
            effective_block_height: effective,
            participants,
        }
    }

    fn listing(index: &str, inferences: &str, missed: &str) -> ParticipantRecord {
        ParticipantRecord {
            index: index.to_string(),
            address: index.to_string(),
            inference_url: Some(format!("http://{index}:8000")),
            status: Some("ACTIVE".to_string()),
            stats: EpochStats {
                inference_count: inferences.to_string(),
                missed_requests: missed.to_string(),
                ..Default::default()
            },
        }
    }

    /// Epoch 41 is current at height 10 500, with P1 and P2 active. The listing is deliberately
    /// in the opposite order of the epoch group.
    fn mock() -> MockNode {
        let node = MockNode::default();

        {
            let mut state = node.state.lock().unwrap();
            state.height = 10_500;
            state.current_epoch_id = 41;
            state.next_poc_start = 11_000;
            state.epoch_length = 1_000;
            state
                .epoch_groups
                .insert(41, group(41, 10_010, vec![member(P1, 100), member(P2, 200)]));
            state.participants = vec![listing(P2, "5", "5"), listing(P1, "10", "0")];
        }

        node
    }

    async fn service(node: MockNode) -> AggregationService<MockNode, SqliteStorage> {
        let pool = SqlitePool::in_memory().await.unwrap();
        let storage = SqliteStorage::new(pool);
        storage.migrate().await.unwrap();

        AggregationService::new(node, storage)
    }

    /// Let spawned background fills finish.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_canonical_height_for_current_epoch() {
        let service = service(mock()).await;

        assert_eq!(service.canonical_height(41, None).await.unwrap(), 10_500);
        assert_eq!(
            service.canonical_height(41, Some(10_123)).await.unwrap(),
            10_123
        );
    }

    #[tokio::test]
    async fn test_canonical_height_clamps_to_settled() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            state.current_epoch_id = 42;
            state.epoch_groups.insert(42, group(42, 10_100, vec![]));
        }
        let service = service(node).await;

        // 10 blocks before the next epoch's effective height.
        assert_eq!(service.canonical_height(41, None).await.unwrap(), 10_090);
        // Heights at or past the canonical one are clamped down.
        assert_eq!(
            service.canonical_height(41, Some(10_095)).await.unwrap(),
            10_090
        );
        // Heights inside the epoch pass through.
        assert_eq!(
            service.canonical_height(41, Some(10_050)).await.unwrap(),
            10_050
        );
    }

    #[tokio::test]
    async fn test_canonical_height_rejects_pre_epoch_height() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            state.current_epoch_id = 42;
            state.epoch_groups.insert(42, group(42, 10_100, vec![]));
        }
        let service = service(node).await;

        assert_matches!(
            service.canonical_height(41, Some(9_000)).await,
            Err(ServiceError::InvalidHeight {
                epoch_id: 41,
                requested: 9_000,
                effective: 10_010,
            })
        );
    }

    #[tokio::test]
    async fn test_canonical_height_falls_back_to_next_poc_start() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            // Epoch 42 has begun but its group is not queryable yet.
            state.current_epoch_id = 42;
        }
        let service = service(node).await;

        assert_eq!(service.canonical_height(41, None).await.unwrap(), 10_990);
    }

    #[tokio::test]
    async fn test_current_epoch_cold_fetch() {
        let service = service(mock()).await;

        let snapshot = service.current_epoch_stats(true).await.unwrap();

        assert_eq!(snapshot.epoch_id, 41);
        assert_eq!(snapshot.height, 10_500);
        assert!(snapshot.is_current);

        // Participants follow the epoch group order, not the listing order.
        assert_eq!(snapshot.participants.len(), 2);
        assert_eq!(snapshot.participants[0].index, P1);
        assert_eq!(snapshot.participants[1].index, P2);

        assert_eq!(snapshot.participants[0].weight, 100);
        assert_eq!(snapshot.participants[0].missed_rate(), 0.0);
        assert_eq!(snapshot.participants[1].missed_rate(), 0.5);

        // The health overlay was filled inline.
        assert_eq!(snapshot.participants[0].node_healthy, Some(true));

        settle().await;
    }

    #[tokio::test]
    async fn test_current_epoch_served_from_memory_within_ttl() {
        let node = mock();
        let service = service(node.clone()).await;

        let first = service.current_epoch_stats(true).await.unwrap();

        node.state.lock().unwrap().height = 10_600;

        let second = service.current_epoch_stats(false).await.unwrap();
        assert_eq!(second.height, first.height);

        let reloaded = service.current_epoch_stats(true).await.unwrap();
        assert_eq!(reloaded.height, 10_600);

        settle().await;
    }

    #[tokio::test]
    async fn test_current_epoch_falls_back_to_snapshot_when_upstream_down() {
        let node = mock();
        let service = service(node.clone()).await;

        let snapshot = service.current_epoch_stats(true).await.unwrap();

        node.state.lock().unwrap().fail_all = true;

        let served = service.current_epoch_stats(true).await.unwrap();
        assert_eq!(served.height, snapshot.height);
        assert_eq!(served.epoch_id, snapshot.epoch_id);

        settle().await;
    }

    #[tokio::test]
    async fn test_current_epoch_errors_without_any_snapshot() {
        let node = mock();
        node.state.lock().unwrap().fail_all = true;
        let service = service(node).await;

        assert_matches!(
            service.current_epoch_stats(true).await,
            Err(ServiceError::Node(NodeError::Unavailable { .. }))
        );
    }

    #[tokio::test]
    async fn test_epoch_transition_finalizes_previous_epoch() {
        let node = mock();
        let service = service(node.clone()).await;

        // First tick establishes epoch 41 as current.
        service.current_epoch_stats(true).await.unwrap();

        {
            let mut state = node.state.lock().unwrap();
            state.current_epoch_id = 42;
            state.height = 11_050;
            state.next_poc_start = 12_000;
            state
                .epoch_groups
                .insert(42, group(42, 11_010, vec![member(P1, 100), member(P2, 200)]));
            state
                .summaries
                .insert((41, P1.to_string()), PerformanceSummary {
                    rewarded_coins: "2500000000".to_string(),
                    claimed: false,
                });
            state
                .summaries
                .insert((41, P2.to_string()), PerformanceSummary {
                    rewarded_coins: "2500000000".to_string(),
                    claimed: false,
                });
        }

        // Second tick detects the transition and finalizes epoch 41 synchronously.
        let snapshot = service.current_epoch_stats(true).await.unwrap();
        assert_eq!(snapshot.epoch_id, 42);

        assert!(service.storage.is_epoch_finished(41).await.unwrap());
        assert_eq!(
            service.storage.get_epoch_total_rewards(41).await.unwrap(),
            Some(5)
        );

        // Historical reads of the finished epoch hit the settled snapshot and the cached total.
        let historical = service.historical_epoch_stats(41, None, false).await.unwrap();
        assert_eq!(historical.height, 11_000);
        assert!(!historical.is_current);
        assert_eq!(historical.total_assigned_rewards_gnk, Some(5));
        assert_eq!(historical.participants.len(), 2);

        settle().await;
    }

    #[tokio::test]
    async fn test_historical_read_survives_upstream_changes() {
        let node = mock();
        let service = service(node.clone()).await;

        {
            let mut state = node.state.lock().unwrap();
            state.current_epoch_id = 42;
            state.epoch_groups.insert(42, group(42, 11_010, vec![]));
        }

        let first = service.historical_epoch_stats(41, None, false).await.unwrap();
        assert_eq!(first.participants.len(), 2);

        // The listing changes upstream; the settled snapshot does not.
        node.state.lock().unwrap().participants = vec![];

        let second = service.historical_epoch_stats(41, None, false).await.unwrap();
        assert_eq!(second.height, first.height);
        assert_eq!(second.participants.len(), 2);
        assert_eq!(
            serde_json::to_string(&second.participants).unwrap(),
            serde_json::to_string(&first.participants).unwrap(),
        );

        settle().await;
    }

    #[tokio::test]
    async fn test_zero_reward_sum_is_not_cached() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            state
                .summaries
                .insert((41, P1.to_string()), PerformanceSummary::default());
            state
                .summaries
                .insert((41, P2.to_string()), PerformanceSummary::default());
        }
        let service = service(node).await;

        service.calculate_total_rewards(41).await.unwrap();

        assert_eq!(service.storage.get_epoch_total_rewards(41).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_warm_keys_fetched_inline_once() {
        let node = mock();
        let service = service(node.clone()).await;

        let details = service
            .participant_details(P1, 41, None)
            .await
            .unwrap()
            .unwrap();
        assert!(details.warm_keys.is_empty());
        settle().await;

        // The confirmed-empty set is persisted, not re-fetched.
        assert_eq!(
            service.storage.get_warm_keys(41, P1).await.unwrap(),
            Some(vec![])
        );
        let calls = *node.state.lock().unwrap().authz_calls.get(P1).unwrap();

        let details = service
            .participant_details(P1, 41, None)
            .await
            .unwrap()
            .unwrap();
        assert!(details.warm_keys.is_empty());
        settle().await;

        let calls_after = *node.state.lock().unwrap().authz_calls.get(P1).unwrap();
        assert_eq!(calls_after, calls);
    }

    #[tokio::test]
    async fn test_participant_details_rewards_window() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            for epoch_id in [38, 39, 40] {
                state
                    .summaries
                    .insert((epoch_id, P1.to_string()), PerformanceSummary {
                        rewarded_coins: format!("{}", epoch_id as u128 * 1_000_000_000),
                        claimed: epoch_id == 38,
                    });
            }
        }
        let service = service(node).await;

        let details = service
            .participant_details(P1, 41, None)
            .await
            .unwrap()
            .unwrap();

        // Rewards cover the epochs the chain still answers for, newest first, in whole GNK.
        let epochs = details
            .rewards
            .iter()
            .map(|reward| reward.epoch_id)
            .collect::<Vec<_>>();
        assert_eq!(epochs, vec![40, 39, 38]);
        assert_eq!(details.rewards[0].assigned_reward_gnk, 40);
        assert!(details.rewards[2].claimed);

        assert_eq!(details.seed.as_ref().unwrap().signature, format!("seed-{P1}"));

        settle().await;
    }

    #[tokio::test]
    async fn test_unknown_participant_details_is_none() {
        let service = service(mock()).await;

        let details = service
            .participant_details("gonka1unknown", 41, None)
            .await
            .unwrap();
        assert!(details.is_none());

        settle().await;
    }

    #[tokio::test]
    async fn test_rewards_poll_skips_claimed() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            for offset in 1..=REWARD_POLL_EPOCHS {
                for participant in [P1, P2] {
                    state
                        .summaries
                        .insert((41 - offset, participant.to_string()), PerformanceSummary {
                            rewarded_coins: "1000000000".to_string(),
                            claimed: false,
                        });
                }
            }
        }
        let service = service(node.clone()).await;

        service
            .storage
            .save_rewards(&[Reward {
                epoch_id: 40,
                participant_id: P1.to_string(),
                rewarded_coins: "1000000000".to_string(),
                claimed: true,
            }])
            .await
            .unwrap();

        service.poll_participant_rewards().await.unwrap();

        let state = node.state.lock().unwrap();
        assert!(!state.summary_calls.contains_key(&(40, P1.to_string())));
        assert_eq!(state.summary_calls.get(&(40, P2.to_string())), Some(&1));
        assert_eq!(state.summary_calls.get(&(39, P1.to_string())), Some(&1));
    }

    #[tokio::test]
    async fn test_jail_overlay_joins_validators() {
        let node = mock();
        let valoper = convert_bech32(P1, VALOPER_HRP).unwrap();
        let valcons = pubkey_to_valcons(CONSENSUS_KEY, VALCONS_HRP).unwrap();
        {
            let mut state = node.state.lock().unwrap();
            state.validators = vec![serde_json::from_value(serde_json::json!({
                "operator_address": valoper,
                "consensus_pubkey": {"key": CONSENSUS_KEY},
                "jailed": true,
                "tokens": "1000",
                "description": {
                    "moniker": "gonkavaloper1leaked",
                    "identity": "",
                    "website": "https://example.com"
                }
            }))
            .unwrap()];
            state.signing_infos.insert(valcons.clone(), SigningInfo {
                jailed_until: Some("2024-01-01T00:00:00Z".to_string()),
            });
        }
        let service = service(node).await;

        let active = vec![member(P1, 100), member(P2, 200)];
        service.refresh_jail_statuses(41, 10_500, &active).await.unwrap();

        let statuses = service.storage.get_jail_statuses(41).await.unwrap().unwrap();
        // P2 has no matching validator and produces no row.
        assert_eq!(statuses.len(), 1);

        let status = &statuses[0];
        assert_eq!(status.participant_index, P1);
        assert!(status.is_jailed);
        assert!(status.ready_to_unjail);
        assert_eq!(status.jailed_until.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(status.valcons_address.as_deref(), Some(valcons.as_str()));
        // The leaked bech32 moniker is blanked; the key matches the epoch's validator key.
        assert_eq!(status.moniker, None);
        assert_eq!(status.website.as_deref(), Some("https://example.com"));
        assert_eq!(status.consensus_key_mismatch, Some(false));
    }

    #[tokio::test]
    async fn test_jail_overlay_flags_key_mismatch() {
        let node = mock();
        let valoper = convert_bech32(P1, VALOPER_HRP).unwrap();
        {
            let mut state = node.state.lock().unwrap();
            state.validators = vec![serde_json::from_value(serde_json::json!({
                "operator_address": valoper,
                "consensus_pubkey": {"key": "c29tZSBvdGhlciBrZXk="},
                "jailed": false,
                "tokens": "1000"
            }))
            .unwrap()];
        }
        let service = service(node).await;

        let active = vec![member(P1, 100)];
        service.refresh_jail_statuses(41, 10_500, &active).await.unwrap();

        let statuses = service.storage.get_jail_statuses(41).await.unwrap().unwrap();
        assert_eq!(statuses[0].consensus_key_mismatch, Some(true));
        assert!(!statuses[0].is_jailed);
        assert_eq!(statuses[0].jailed_until, None);
    }

    #[tokio::test]
    async fn test_models_view_uses_cached_aggregates() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            let mut p1 = member(P1, 100);
            p1.models = vec!["m1".to_string()];
            p1.ml_nodes = vec![MlNodeGroup {
                ml_nodes: vec![MlNode {
                    node_id: "n0".to_string(),
                    poc_weight: 10,
                }],
            }];
            state.epoch_groups.insert(41, group(41, 10_010, vec![p1]));
            state.models = vec![ModelDescriptor {
                id: "m1".to_string(),
                ..Default::default()
            }];
            state.model_stats = vec![ModelUsageStats {
                model: "m1".to_string(),
                ai_tokens: "123".to_string(),
                inferences: 4,
            }];
        }
        let service = service(node.clone()).await;

        let view = service.current_models().await.unwrap();
        assert_eq!(view.epoch_id, 41);
        assert!(view.is_current);
        assert_eq!(view.models.len(), 1);
        assert_eq!(view.models[0].total_weight, 10);
        assert_eq!(view.models[0].participant_count, 1);
        assert_eq!(view.stats.len(), 1);

        // Aggregates are frozen per epoch; upstream weight changes do not alter them.
        {
            let mut state = node.state.lock().unwrap();
            let group = state.epoch_groups.get_mut(&41).unwrap();
            group.participants[0].ml_nodes[0].ml_nodes[0].poc_weight = 99;
        }
        let view = service.current_models().await.unwrap();
        assert_eq!(view.models[0].total_weight, 10);
    }

    #[tokio::test]
    async fn test_timeline_and_cache_fallback() {
        let node = mock();
        {
            let mut state = node.state.lock().unwrap();
            state.height = 20_000;
            state.restriction_end_block = 15_000;
            state
                .blocks
                .insert(20_000, "2025-06-02T00:00:00Z".to_string());
            state
                .blocks
                .insert(10_000, "2025-06-01T00:00:00Z".to_string());
        }
        let service = service(node.clone()).await;

        let timeline = service.timeline().await.unwrap();
        assert_eq!(timeline.current_block.height, 20_000);
        assert_eq!(timeline.reference_block.height, 10_000);
        assert_eq!(timeline.avg_block_time, 8.64);
        assert_eq!(timeline.events.len(), 1);
        assert!(timeline.events[0].occurred);
        assert_eq!(timeline.current_epoch_index, 41);

        node.state.lock().unwrap().fail_all = true;

        let cached = service.timeline().await.unwrap();
        assert_eq!(cached.current_block.height, 20_000);
        assert_eq!(cached.avg_block_time, 8.64);
    }

    #[tokio::test]
    async fn test_participant_inferences_served_from_cache() {
        let service = service(mock()).await;

        assert!(service.participant_inferences(41, P1).await.unwrap().is_none());

        service.storage.save_inferences(41, P1, &[]).await.unwrap();

        let inferences = service.participant_inferences(41, P1).await.unwrap().unwrap();
        assert!(inferences.successful.is_empty());
        assert!(inferences.expired.is_empty());
        assert!(inferences.invalidated.is_empty());
    }

    #[test]
    fn test_account_hrp_matches_fixtures() {
        assert!(P1.starts_with(ACCOUNT_HRP));
        assert!(P2.starts_with(ACCOUNT_HRP));
    }
}
