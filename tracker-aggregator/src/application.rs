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

use crate::{
    domain::{node::Node, storage::Storage},
    service::{AggregationService, ServiceError},
};
use log::{error, info};
use serde::Deserialize;
use std::{future::Future, time::Duration};
use tokio::{
    task::{self, JoinHandle},
    time::sleep,
};

/// Poll intervals of the refresh loops.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde", default = "current_epoch_interval_default")]
    pub current_epoch_interval: Duration,

    #[serde(with = "humantime_serde", default = "jail_status_interval_default")]
    pub jail_status_interval: Duration,

    #[serde(with = "humantime_serde", default = "node_health_interval_default")]
    pub node_health_interval: Duration,

    #[serde(with = "humantime_serde", default = "rewards_interval_default")]
    pub rewards_interval: Duration,

    #[serde(with = "humantime_serde", default = "warm_keys_interval_default")]
    pub warm_keys_interval: Duration,

    #[serde(with = "humantime_serde", default = "hardware_nodes_interval_default")]
    pub hardware_nodes_interval: Duration,

    #[serde(with = "humantime_serde", default = "epoch_total_rewards_interval_default")]
    pub epoch_total_rewards_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            current_epoch_interval: current_epoch_interval_default(),
            jail_status_interval: jail_status_interval_default(),
            node_health_interval: node_health_interval_default(),
            rewards_interval: rewards_interval_default(),
            warm_keys_interval: warm_keys_interval_default(),
            hardware_nodes_interval: hardware_nodes_interval_default(),
            epoch_total_rewards_interval: epoch_total_rewards_interval_default(),
        }
    }
}

fn current_epoch_interval_default() -> Duration {
    Duration::from_secs(30)
}

fn jail_status_interval_default() -> Duration {
    Duration::from_secs(120)
}

fn node_health_interval_default() -> Duration {
    Duration::from_secs(60)
}

fn rewards_interval_default() -> Duration {
    Duration::from_secs(60)
}

fn warm_keys_interval_default() -> Duration {
    Duration::from_secs(300)
}

fn hardware_nodes_interval_default() -> Duration {
    Duration::from_secs(600)
}

fn epoch_total_rewards_interval_default() -> Duration {
    Duration::from_secs(600)
}

/// Run the seven refresh loops until the surrounding task is dropped. Initial delays are
/// staggered to avoid a thundering herd on cold start; every loop isolates its own errors.
pub async fn run<N, S>(config: Config, service: AggregationService<N, S>) -> anyhow::Result<()>
where
    N: Node,
    S: Storage,
{
    info!(config:?; "starting refresh loops");

    let tasks = [
        spawn_loop("current_epoch", Duration::ZERO, config.current_epoch_interval, {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { service.current_epoch_stats(true).await.map(drop) }
            }
        }),
        spawn_loop(
            "node_health",
            Duration::from_secs(5),
            config.node_health_interval,
            {
                let service = service.clone();
                move || {
                    let service = service.clone();
                    async move { service.poll_node_health().await }
                }
            },
        ),
        spawn_loop(
            "jail_status",
            Duration::from_secs(10),
            config.jail_status_interval,
            {
                let service = service.clone();
                move || {
                    let service = service.clone();
                    async move { service.poll_jail_statuses().await }
                }
            },
        ),
        spawn_loop("rewards", Duration::from_secs(15), config.rewards_interval, {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { service.poll_participant_rewards().await }
            }
        }),
        spawn_loop(
            "warm_keys",
            Duration::from_secs(20),
            config.warm_keys_interval,
            {
                let service = service.clone();
                move || {
                    let service = service.clone();
                    async move { service.poll_warm_keys().await }
                }
            },
        ),
        spawn_loop(
            "hardware_nodes",
            Duration::from_secs(25),
            config.hardware_nodes_interval,
            {
                let service = service.clone();
                move || {
                    let service = service.clone();
                    async move { service.poll_hardware_nodes().await }
                }
            },
        ),
        spawn_loop(
            "epoch_total_rewards",
            Duration::from_secs(30),
            config.epoch_total_rewards_interval,
            {
                let service = service.clone();
                move || {
                    let service = service.clone();
                    async move { service.poll_epoch_total_rewards().await }
                }
            },
        ),
    ];

    // The loops never complete on their own; park here so dropping the surrounding task (e.g. on
    // SIGTERM) tears them down within one cycle.
    let result = futures::future::join_all(tasks).await;
    anyhow::bail!("refresh loops terminated unexpectedly: {result:?}")
}

fn spawn_loop<A, F>(
    name: &'static str,
    initial_delay: Duration,
    interval: Duration,
    mut action: A,
) -> JoinHandle<()>
where
    A: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<(), ServiceError>> + Send,
{
    task::spawn(async move {
        sleep(initial_delay).await;

        loop {
            if let Err(err) = action().await {
                error!(task = name, error:% = err; "refresh task failed");
            }

            sleep(interval).await;
        }
    })
}
