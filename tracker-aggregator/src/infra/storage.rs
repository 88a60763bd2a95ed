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
    EMPTY_MARKER, HardwareNode, InferenceRecord, JailStatus, ModelAggregate, NodeHealth, Reward,
    StatsRow, StoredStats, Timeline, WarmKey, storage::Storage,
};
use indoc::indoc;
use log::{info, warn};
use sqlx::types::chrono::Utc;
use tracker_common::infra::pool::SqlitePool;

type Tx = sqlx::Transaction<'static, sqlx::Sqlite>;

/// SQLite based implementation of [Storage]: one cache file, one table per entity, batch writes
/// in one transaction each.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// Idempotent schema, applied at startup.
const SCHEMA: &[&str] = &[
    indoc! {"
        CREATE TABLE IF NOT EXISTS inference_stats (
            epoch_id INTEGER NOT NULL,
            height INTEGER NOT NULL,
            participant_index TEXT NOT NULL,
            stats_json TEXT NOT NULL,
            seed_signature TEXT,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (epoch_id, height, participant_index)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_epoch_height
        ON inference_stats(epoch_id, height)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS epoch_status (
            epoch_id INTEGER PRIMARY KEY,
            is_finished BOOLEAN NOT NULL,
            finish_height INTEGER,
            marked_at TEXT NOT NULL
        )
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS jail_status (
            epoch_id INTEGER NOT NULL,
            participant_index TEXT NOT NULL,
            is_jailed BOOLEAN NOT NULL,
            jailed_until TEXT,
            ready_to_unjail BOOLEAN,
            valcons_address TEXT,
            moniker TEXT,
            identity TEXT,
            keybase_username TEXT,
            keybase_picture_url TEXT,
            website TEXT,
            validator_consensus_key TEXT,
            consensus_key_mismatch BOOLEAN,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (epoch_id, participant_index)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_participant_jail
        ON jail_status(participant_index)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS node_health (
            participant_index TEXT NOT NULL,
            is_healthy BOOLEAN NOT NULL,
            last_check TEXT NOT NULL,
            error_message TEXT,
            response_time_ms INTEGER,
            PRIMARY KEY (participant_index)
        )
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS participant_rewards (
            epoch_id INTEGER NOT NULL,
            participant_id TEXT NOT NULL,
            rewarded_coins TEXT NOT NULL,
            claimed INTEGER NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (epoch_id, participant_id)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_participant_rewards
        ON participant_rewards(participant_id)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS participant_warm_keys (
            epoch_id INTEGER NOT NULL,
            participant_id TEXT NOT NULL,
            grantee_address TEXT NOT NULL,
            granted_at TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (epoch_id, participant_id, grantee_address)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_warm_keys_participant
        ON participant_warm_keys(epoch_id, participant_id)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS participant_hardware_nodes (
            epoch_id INTEGER NOT NULL,
            participant_id TEXT NOT NULL,
            local_id TEXT NOT NULL,
            status TEXT NOT NULL,
            models_json TEXT NOT NULL,
            hardware_json TEXT NOT NULL,
            host TEXT NOT NULL,
            port TEXT NOT NULL,
            poc_weight INTEGER,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (epoch_id, participant_id, local_id)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_hardware_nodes_participant
        ON participant_hardware_nodes(epoch_id, participant_id)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS epoch_total_rewards (
            epoch_id INTEGER PRIMARY KEY,
            total_rewards_gnk INTEGER NOT NULL,
            calculated_at TEXT NOT NULL
        )
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS models (
            epoch_id INTEGER NOT NULL,
            model_id TEXT NOT NULL,
            total_weight INTEGER NOT NULL,
            participant_count INTEGER NOT NULL,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (epoch_id, model_id)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_models_epoch
        ON models(epoch_id)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS models_api_cache (
            epoch_id INTEGER NOT NULL,
            height INTEGER NOT NULL,
            models_all_json TEXT NOT NULL,
            models_stats_json TEXT NOT NULL,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (epoch_id, height)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_models_api_epoch
        ON models_api_cache(epoch_id)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS participant_inferences (
            epoch_id INTEGER NOT NULL,
            participant_id TEXT NOT NULL,
            inference_id TEXT NOT NULL,
            status TEXT NOT NULL,
            start_block_height TEXT NOT NULL,
            start_block_timestamp TEXT NOT NULL,
            validated_by_json TEXT,
            prompt_hash TEXT,
            response_hash TEXT,
            prompt_payload TEXT,
            response_payload TEXT,
            prompt_token_count TEXT,
            completion_token_count TEXT,
            model TEXT,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (epoch_id, participant_id, inference_id)
        )
    "},
    indoc! {"
        CREATE INDEX IF NOT EXISTS idx_participant_inferences
        ON participant_inferences(epoch_id, participant_id, status)
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS timeline_cache (
            id INTEGER PRIMARY KEY,
            timeline_json TEXT NOT NULL,
            cached_at TEXT NOT NULL
        )
    "},
];

impl SqliteStorage {
    /// Create a new [SqliteStorage].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the schema; safe to call on every start.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }

        info!("cache schema up to date");
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn encode_json<T>(value: &T) -> Result<String, sqlx::Error>
where
    T: serde::Serialize,
{
    serde_json::to_string(value).map_err(|error| sqlx::Error::Encode(error.into()))
}

impl Storage for SqliteStorage {
    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&*self.pool)
            .await
            .map(drop)
    }

    async fn save_stats_batch(
        &self,
        epoch_id: u64,
        height: u64,
        rows: &[StatsRow],
    ) -> Result<(), sqlx::Error> {
        let cached_at = now();
        let mut tx: Tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(indoc! {"
                INSERT OR REPLACE INTO inference_stats
                (epoch_id, height, participant_index, stats_json, seed_signature, cached_at)
                VALUES ($1, $2, $3, $4, $5, $6)
            "})
            .bind(epoch_id as i64)
            .bind(height as i64)
            .bind(&row.participant_index)
            .bind(encode_json(&row.stats)?)
            .bind(&row.seed_signature)
            .bind(&cached_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(epoch_id, height, count = rows.len(); "saved stats batch");

        Ok(())
    }

    async fn get_stats(
        &self,
        epoch_id: u64,
        height: Option<u64>,
    ) -> Result<Option<Vec<StatsRow>>, sqlx::Error> {
        let query = match height {
            Some(_) => indoc! {"
                SELECT participant_index, stats_json, seed_signature, cached_at
                FROM inference_stats
                WHERE epoch_id = $1 AND height = $2
            "},
            None => indoc! {"
                SELECT participant_index, stats_json, seed_signature, cached_at
                FROM inference_stats
                WHERE epoch_id = $1
            "},
        };

        let mut rows = sqlx::query_as::<_, (String, String, Option<String>, String)>(query)
            .bind(epoch_id as i64);
        if let Some(height) = height {
            rows = rows.bind(height as i64);
        }
        let rows = rows.fetch_all(&*self.pool).await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut stats_rows = Vec::with_capacity(rows.len());
        for (participant_index, stats_json, seed_signature, cached_at) in rows {
            match serde_json::from_str::<StoredStats>(&stats_json) {
                Ok(stats) => stats_rows.push(StatsRow {
                    participant_index,
                    stats,
                    seed_signature,
                    cached_at: Some(cached_at),
                }),

                Err(error) => {
                    warn!(
                        epoch_id,
                        participant_index:% = participant_index,
                        error:% = error;
                        "corrupt stats row, skipping"
                    );
                }
            }
        }

        Ok(Some(stats_rows))
    }

    async fn mark_epoch_finished(
        &self,
        epoch_id: u64,
        finish_height: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(indoc! {"
            INSERT OR REPLACE INTO epoch_status (epoch_id, is_finished, finish_height, marked_at)
            VALUES ($1, TRUE, $2, $3)
        "})
        .bind(epoch_id as i64)
        .bind(finish_height as i64)
        .bind(now())
        .execute(&*self.pool)
        .await?;

        info!(epoch_id, finish_height; "marked epoch finished");
        Ok(())
    }

    async fn is_epoch_finished(&self, epoch_id: u64) -> Result<bool, sqlx::Error> {
        let finished = sqlx::query_as::<_, (bool,)>(indoc! {"
            SELECT is_finished FROM epoch_status WHERE epoch_id = $1
        "})
        .bind(epoch_id as i64)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(finished.is_some_and(|(finished,)| finished))
    }

    async fn delete_epoch(&self, epoch_id: u64) -> Result<(), sqlx::Error> {
        let mut tx: Tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM inference_stats WHERE epoch_id = $1")
            .bind(epoch_id as i64)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM epoch_status WHERE epoch_id = $1")
            .bind(epoch_id as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    async fn save_jail_statuses(
        &self,
        epoch_id: u64,
        statuses: &[JailStatus],
    ) -> Result<(), sqlx::Error> {
        let recorded_at = now();
        let mut tx: Tx = self.pool.begin().await?;

        for status in statuses {
            sqlx::query(indoc! {"
                INSERT OR REPLACE INTO jail_status
                (epoch_id, participant_index, is_jailed, jailed_until, ready_to_unjail,
                 valcons_address, moniker, identity, keybase_username, keybase_picture_url,
                 website, validator_consensus_key, consensus_key_mismatch, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "})
            .bind(epoch_id as i64)
            .bind(&status.participant_index)
            .bind(status.is_jailed)
            .bind(&status.jailed_until)
            .bind(status.ready_to_unjail)
            .bind(&status.valcons_address)
            .bind(&status.moniker)
            .bind(&status.identity)
            .bind(&status.keybase_username)
            .bind(&status.keybase_picture_url)
            .bind(&status.website)
            .bind(&status.validator_consensus_key)
            .bind(status.consensus_key_mismatch)
            .bind(&recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(epoch_id, count = statuses.len(); "saved jail statuses");

        Ok(())
    }

    async fn get_jail_statuses(
        &self,
        epoch_id: u64,
    ) -> Result<Option<Vec<JailStatus>>, sqlx::Error> {
        type Row = (
            String,         // participant_index
            bool,           // is_jailed
            Option<String>, // jailed_until
            Option<bool>,   // ready_to_unjail
            Option<String>, // valcons_address
            Option<String>, // moniker
            Option<String>, // identity
            Option<String>, // keybase_username
            Option<String>, // keybase_picture_url
            Option<String>, // website
            Option<String>, // validator_consensus_key
            Option<bool>,   // consensus_key_mismatch
        );

        let rows = sqlx::query_as::<_, Row>(indoc! {"
            SELECT participant_index, is_jailed, jailed_until, ready_to_unjail, valcons_address,
                   moniker, identity, keybase_username, keybase_picture_url, website,
                   validator_consensus_key, consensus_key_mismatch
            FROM jail_status
            WHERE epoch_id = $1
        "})
        .bind(epoch_id as i64)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let statuses = rows
            .into_iter()
            .map(
                |(
                    participant_index,
                    is_jailed,
                    jailed_until,
                    ready_to_unjail,
                    valcons_address,
                    moniker,
                    identity,
                    keybase_username,
                    keybase_picture_url,
                    website,
                    validator_consensus_key,
                    consensus_key_mismatch,
                )| JailStatus {
                    epoch_id,
                    participant_index,
                    is_jailed,
                    jailed_until,
                    ready_to_unjail: ready_to_unjail.unwrap_or_default(),
                    valcons_address,
                    moniker,
                    identity,
                    keybase_username,
                    keybase_picture_url,
                    website,
                    validator_consensus_key,
                    consensus_key_mismatch,
                },
            )
            .collect();

        Ok(Some(statuses))
    }

    async fn save_node_health(&self, statuses: &[NodeHealth]) -> Result<(), sqlx::Error> {
        let mut tx: Tx = self.pool.begin().await?;

        for status in statuses {
            sqlx::query(indoc! {"
                INSERT OR REPLACE INTO node_health
                (participant_index, is_healthy, last_check, error_message, response_time_ms)
                VALUES ($1, $2, $3, $4, $5)
            "})
            .bind(&status.participant_index)
            .bind(status.is_healthy)
            .bind(&status.last_check)
            .bind(&status.error_message)
            .bind(status.response_time_ms)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(count = statuses.len(); "saved node health statuses");

        Ok(())
    }

    async fn get_node_health(&self) -> Result<Option<Vec<NodeHealth>>, sqlx::Error> {
        type Row = (String, bool, String, Option<String>, Option<i64>);

        let rows = sqlx::query_as::<_, Row>(indoc! {"
            SELECT participant_index, is_healthy, last_check, error_message, response_time_ms
            FROM node_health
        "})
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let statuses = rows
            .into_iter()
            .map(
                |(participant_index, is_healthy, last_check, error_message, response_time_ms)| {
                    NodeHealth {
                        participant_index,
                        is_healthy,
                        last_check,
                        error_message,
                        response_time_ms,
                    }
                },
            )
            .collect();

        Ok(Some(statuses))
    }

    async fn save_rewards(&self, rewards: &[Reward]) -> Result<(), sqlx::Error> {
        let last_updated = now();
        let mut tx: Tx = self.pool.begin().await?;

        for reward in rewards {
            sqlx::query(indoc! {"
                INSERT OR REPLACE INTO participant_rewards
                (epoch_id, participant_id, rewarded_coins, claimed, last_updated)
                VALUES ($1, $2, $3, $4, $5)
            "})
            .bind(reward.epoch_id as i64)
            .bind(&reward.participant_id)
            .bind(&reward.rewarded_coins)
            .bind(reward.claimed)
            .bind(&last_updated)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_reward(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<Reward>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String, bool)>(indoc! {"
            SELECT rewarded_coins, claimed
            FROM participant_rewards
            WHERE epoch_id = $1 AND participant_id = $2
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|(rewarded_coins, claimed)| Reward {
            epoch_id,
            participant_id: participant_id.to_string(),
            rewarded_coins,
            claimed,
        }))
    }

    async fn get_rewards_for_participant(
        &self,
        participant_id: &str,
        epoch_ids: &[u64],
    ) -> Result<Vec<Reward>, sqlx::Error> {
        if epoch_ids.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = (0..epoch_ids.len())
            .map(|index| format!("${}", index + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT epoch_id, rewarded_coins, claimed
             FROM participant_rewards
             WHERE participant_id = $1 AND epoch_id IN ({placeholders})
             ORDER BY epoch_id DESC"
        );

        let mut rows = sqlx::query_as::<_, (i64, String, bool)>(&query).bind(participant_id);
        for epoch_id in epoch_ids {
            rows = rows.bind(*epoch_id as i64);
        }
        let rows = rows.fetch_all(&*self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(epoch_id, rewarded_coins, claimed)| Reward {
                epoch_id: epoch_id as u64,
                participant_id: participant_id.to_string(),
                rewarded_coins,
                claimed,
            })
            .collect())
    }

    async fn save_warm_keys(
        &self,
        epoch_id: u64,
        participant_id: &str,
        warm_keys: &[WarmKey],
    ) -> Result<(), sqlx::Error> {
        let last_updated = now();
        let mut tx: Tx = self.pool.begin().await?;

        sqlx::query(indoc! {"
            DELETE FROM participant_warm_keys
            WHERE epoch_id = $1 AND participant_id = $2
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .execute(&mut *tx)
        .await?;

        if warm_keys.is_empty() {
            sqlx::query(indoc! {"
                INSERT INTO participant_warm_keys
                (epoch_id, participant_id, grantee_address, granted_at, last_updated)
                VALUES ($1, $2, $3, '', $4)
            "})
            .bind(epoch_id as i64)
            .bind(participant_id)
            .bind(EMPTY_MARKER)
            .bind(&last_updated)
            .execute(&mut *tx)
            .await?;
        } else {
            for warm_key in warm_keys {
                sqlx::query(indoc! {"
                    INSERT INTO participant_warm_keys
                    (epoch_id, participant_id, grantee_address, granted_at, last_updated)
                    VALUES ($1, $2, $3, $4, $5)
                "})
                .bind(epoch_id as i64)
                .bind(participant_id)
                .bind(&warm_key.grantee_address)
                .bind(&warm_key.granted_at)
                .bind(&last_updated)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await
    }

    async fn get_warm_keys(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<Vec<WarmKey>>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (String, String)>(indoc! {"
            SELECT grantee_address, granted_at
            FROM participant_warm_keys
            WHERE epoch_id = $1 AND participant_id = $2
            ORDER BY granted_at DESC
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let warm_keys = rows
            .into_iter()
            .filter(|(grantee_address, _)| grantee_address != EMPTY_MARKER)
            .map(|(grantee_address, granted_at)| WarmKey {
                grantee_address,
                granted_at,
            })
            .collect();

        Ok(Some(warm_keys))
    }

    async fn save_hardware_nodes(
        &self,
        epoch_id: u64,
        participant_id: &str,
        nodes: &[HardwareNode],
    ) -> Result<(), sqlx::Error> {
        let last_updated = now();
        let mut tx: Tx = self.pool.begin().await?;

        sqlx::query(indoc! {"
            DELETE FROM participant_hardware_nodes
            WHERE epoch_id = $1 AND participant_id = $2
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .execute(&mut *tx)
        .await?;

        if nodes.is_empty() {
            sqlx::query(indoc! {"
                INSERT INTO participant_hardware_nodes
                (epoch_id, participant_id, local_id, status, models_json, hardware_json,
                 host, port, poc_weight, last_updated)
                VALUES ($1, $2, $3, $4, '[]', '[]', '', '', NULL, $5)
            "})
            .bind(epoch_id as i64)
            .bind(participant_id)
            .bind(EMPTY_MARKER)
            .bind(EMPTY_MARKER)
            .bind(&last_updated)
            .execute(&mut *tx)
            .await?;
        } else {
            for node in nodes {
                sqlx::query(indoc! {"
                    INSERT INTO participant_hardware_nodes
                    (epoch_id, participant_id, local_id, status, models_json, hardware_json,
                     host, port, poc_weight, last_updated)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "})
                .bind(epoch_id as i64)
                .bind(participant_id)
                .bind(&node.local_id)
                .bind(&node.status)
                .bind(encode_json(&node.models)?)
                .bind(encode_json(&node.hardware)?)
                .bind(&node.host)
                .bind(&node.port)
                .bind(node.poc_weight)
                .bind(&last_updated)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await
    }

    async fn get_hardware_nodes(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<Vec<HardwareNode>>, sqlx::Error> {
        type Row = (String, String, String, String, String, String, Option<i64>);

        let rows = sqlx::query_as::<_, Row>(indoc! {"
            SELECT local_id, status, models_json, hardware_json, host, port, poc_weight
            FROM participant_hardware_nodes
            WHERE epoch_id = $1 AND participant_id = $2
            ORDER BY local_id ASC
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut nodes = Vec::with_capacity(rows.len());
        for (local_id, status, models_json, hardware_json, host, port, poc_weight) in rows {
            if status == EMPTY_MARKER {
                continue;
            }

            let models = match serde_json::from_str(&models_json) {
                Ok(models) => models,
                Err(error) => {
                    warn!(local_id:% = local_id, error:% = error; "corrupt hardware models column, skipping");
                    continue;
                }
            };
            let hardware = match serde_json::from_str(&hardware_json) {
                Ok(hardware) => hardware,
                Err(error) => {
                    warn!(local_id:% = local_id, error:% = error; "corrupt hardware column, skipping");
                    continue;
                }
            };

            nodes.push(HardwareNode {
                local_id,
                status,
                models,
                hardware,
                host,
                port,
                poc_weight,
            });
        }

        Ok(Some(nodes))
    }

    async fn save_epoch_total_rewards(
        &self,
        epoch_id: u64,
        total_gnk: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(indoc! {"
            INSERT OR REPLACE INTO epoch_total_rewards (epoch_id, total_rewards_gnk, calculated_at)
            VALUES ($1, $2, $3)
        "})
        .bind(epoch_id as i64)
        .bind(total_gnk as i64)
        .bind(now())
        .execute(&*self.pool)
        .await?;

        info!(epoch_id, total_gnk; "saved epoch total rewards");
        Ok(())
    }

    async fn get_epoch_total_rewards(&self, epoch_id: u64) -> Result<Option<u64>, sqlx::Error> {
        let total = sqlx::query_as::<_, (i64,)>(indoc! {"
            SELECT total_rewards_gnk FROM epoch_total_rewards WHERE epoch_id = $1
        "})
        .bind(epoch_id as i64)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(total.map(|(total,)| total as u64))
    }

    async fn delete_epoch_total_rewards(&self, epoch_id: u64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM epoch_total_rewards WHERE epoch_id = $1")
            .bind(epoch_id as i64)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    async fn save_models(
        &self,
        epoch_id: u64,
        models: &[ModelAggregate],
    ) -> Result<(), sqlx::Error> {
        let cached_at = now();
        let mut tx: Tx = self.pool.begin().await?;

        for model in models {
            sqlx::query(indoc! {"
                INSERT OR REPLACE INTO models
                (epoch_id, model_id, total_weight, participant_count, cached_at)
                VALUES ($1, $2, $3, $4, $5)
            "})
            .bind(epoch_id as i64)
            .bind(&model.model_id)
            .bind(model.total_weight)
            .bind(model.participant_count)
            .bind(&cached_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn get_models(&self, epoch_id: u64) -> Result<Option<Vec<ModelAggregate>>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(indoc! {"
            SELECT model_id, total_weight, participant_count
            FROM models
            WHERE epoch_id = $1
            ORDER BY model_id
        "})
        .bind(epoch_id as i64)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let models = rows
            .into_iter()
            .map(|(model_id, total_weight, participant_count)| ModelAggregate {
                model_id,
                total_weight,
                participant_count,
            })
            .collect();

        Ok(Some(models))
    }

    async fn save_models_api_cache(
        &self,
        epoch_id: u64,
        height: u64,
        models_all: &str,
        models_stats: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(indoc! {"
            INSERT OR REPLACE INTO models_api_cache
            (epoch_id, height, models_all_json, models_stats_json, cached_at)
            VALUES ($1, $2, $3, $4, $5)
        "})
        .bind(epoch_id as i64)
        .bind(height as i64)
        .bind(models_all)
        .bind(models_stats)
        .bind(now())
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn get_models_api_cache(
        &self,
        epoch_id: u64,
    ) -> Result<Option<(String, String, String)>, sqlx::Error> {
        sqlx::query_as::<_, (String, String, String)>(indoc! {"
            SELECT models_all_json, models_stats_json, cached_at
            FROM models_api_cache
            WHERE epoch_id = $1
            ORDER BY height DESC
            LIMIT 1
        "})
        .bind(epoch_id as i64)
        .fetch_optional(&*self.pool)
        .await
    }

    async fn save_inferences(
        &self,
        epoch_id: u64,
        participant_id: &str,
        inferences: &[InferenceRecord],
    ) -> Result<(), sqlx::Error> {
        let last_updated = now();
        let mut tx: Tx = self.pool.begin().await?;

        sqlx::query(indoc! {"
            DELETE FROM participant_inferences
            WHERE epoch_id = $1 AND participant_id = $2
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .execute(&mut *tx)
        .await?;

        if inferences.is_empty() {
            sqlx::query(indoc! {"
                INSERT INTO participant_inferences
                (epoch_id, participant_id, inference_id, status, start_block_height,
                 start_block_timestamp, validated_by_json, last_updated)
                VALUES ($1, $2, '', $3, '0', '0', '[]', $4)
            "})
            .bind(epoch_id as i64)
            .bind(participant_id)
            .bind(EMPTY_MARKER)
            .bind(&last_updated)
            .execute(&mut *tx)
            .await?;
        } else {
            for inference in inferences {
                sqlx::query(indoc! {"
                    INSERT INTO participant_inferences
                    (epoch_id, participant_id, inference_id, status, start_block_height,
                     start_block_timestamp, validated_by_json, prompt_hash, response_hash,
                     prompt_payload, response_payload, prompt_token_count,
                     completion_token_count, model, last_updated)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "})
                .bind(epoch_id as i64)
                .bind(participant_id)
                .bind(&inference.inference_id)
                .bind(&inference.status)
                .bind(&inference.start_block_height)
                .bind(&inference.start_block_timestamp)
                .bind(encode_json(&inference.validated_by)?)
                .bind(&inference.prompt_hash)
                .bind(&inference.response_hash)
                .bind(&inference.prompt_payload)
                .bind(&inference.response_payload)
                .bind(&inference.prompt_token_count)
                .bind(&inference.completion_token_count)
                .bind(&inference.model)
                .bind(&last_updated)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        info!(epoch_id, participant_id, count = inferences.len(); "saved inferences");

        Ok(())
    }

    async fn get_inferences(
        &self,
        epoch_id: u64,
        participant_id: &str,
    ) -> Result<Option<(Vec<InferenceRecord>, Option<String>)>, sqlx::Error> {
        type Row = (
            String,         // inference_id
            String,         // status
            String,         // start_block_height
            String,         // start_block_timestamp
            Option<String>, // validated_by_json
            Option<String>, // prompt_hash
            Option<String>, // response_hash
            Option<String>, // prompt_payload
            Option<String>, // response_payload
            Option<String>, // prompt_token_count
            Option<String>, // completion_token_count
            Option<String>, // model
            String,         // last_updated
        );

        let rows = sqlx::query_as::<_, Row>(indoc! {"
            SELECT inference_id, status, start_block_height, start_block_timestamp,
                   validated_by_json, prompt_hash, response_hash, prompt_payload,
                   response_payload, prompt_token_count, completion_token_count, model,
                   last_updated
            FROM participant_inferences
            WHERE epoch_id = $1 AND participant_id = $2
            ORDER BY start_block_timestamp DESC
        "})
        .bind(epoch_id as i64)
        .bind(participant_id)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let cached_at = rows.first().map(|row| row.12.clone());
        let has_marker = rows.iter().any(|row| row.1 == EMPTY_MARKER);

        let mut records = Vec::new();
        for (
            inference_id,
            status,
            start_block_height,
            start_block_timestamp,
            validated_by_json,
            prompt_hash,
            response_hash,
            prompt_payload,
            response_payload,
            prompt_token_count,
            completion_token_count,
            model,
            _,
        ) in rows
        {
            if status == EMPTY_MARKER {
                continue;
            }

            let validated_by = validated_by_json
                .as_deref()
                .map(|json| {
                    serde_json::from_str(json).unwrap_or_else(|error| {
                        warn!(
                            inference_id:% = inference_id,
                            error:% = error;
                            "corrupt validated_by column"
                        );
                        vec![]
                    })
                })
                .unwrap_or_default();

            records.push(InferenceRecord {
                inference_id,
                status,
                start_block_height,
                start_block_timestamp,
                validated_by,
                prompt_hash,
                response_hash,
                prompt_payload,
                response_payload,
                prompt_token_count,
                completion_token_count,
                model,
            });
        }

        if records.is_empty() && !has_marker {
            return Ok(None);
        }

        Ok(Some((records, cached_at)))
    }

    async fn save_timeline(&self, timeline: &Timeline) -> Result<(), sqlx::Error> {
        let mut tx: Tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM timeline_cache")
            .execute(&mut *tx)
            .await?;
        sqlx::query(indoc! {"
            INSERT INTO timeline_cache (id, timeline_json, cached_at)
            VALUES (1, $1, $2)
        "})
        .bind(encode_json(timeline)?)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    async fn get_timeline(&self) -> Result<Option<Timeline>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String,)>(indoc! {"
            SELECT timeline_json FROM timeline_cache WHERE id = 1
        "})
        .fetch_optional(&*self.pool)
        .await?;

        let Some((timeline_json,)) = row else {
            return Ok(None);
        };

        match serde_json::from_str(&timeline_json) {
            Ok(timeline) => Ok(Some(timeline)),
            Err(error) => {
                warn!(error:% = error; "corrupt timeline cache, ignoring");
                Ok(None)
            }
        }
    }
}
