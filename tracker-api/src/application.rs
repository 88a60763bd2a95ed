// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::infra::api::AxumApi;
use anyhow::Context;
use log::warn;
use tokio::{select, signal::unix::Signal, task};
use tracker_aggregator::{
    application as refresh,
    infra::{node::HttpNode, storage::SqliteStorage},
    service::AggregationService,
};

/// Run the refresh loops and the API until either fails or SIGTERM arrives.
pub async fn run(
    refresh_config: refresh::Config,
    api: AxumApi,
    service: AggregationService<HttpNode, SqliteStorage>,
    mut sigterm: Signal,
) -> anyhow::Result<()> {
    let refresh_task = task::spawn(refresh::run(refresh_config, service));
    let api_task = task::spawn(api.serve());

    select! {
        result = refresh_task => result
            .context("refresh_task panicked")
            .and_then(|r| r.context("refresh_task failed")),

        result = api_task => result
            .context("api_task panicked")
            .and_then(|r| r.context("api_task failed")),

        _ = sigterm.recv() => {
            warn!("SIGTERM received");
            Ok(())
        }
    }
}
