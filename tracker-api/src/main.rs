// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use log::{error, info};
use std::panic;
use tokio::signal::unix::{SignalKind, signal};
use tracker_api::{application, config::Config, infra::api::AxumApi};
use tracker_common::{config::ConfigExt, infra::pool::SqlitePool, telemetry};
use tracker_aggregator::{
    infra::{node::HttpNode, storage::SqliteStorage},
    service::AggregationService,
};

#[tokio::main]
async fn main() {
    telemetry::init_logging();
    panic::set_hook(Box::new(|panic| error!(panic:%; "process panicked")));

    if let Err(error) = run().await {
        let backtrace = error.backtrace();
        let error = format!("{error:#}");
        error!(error, backtrace:%; "process exited with ERROR");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler can be registered");

    let config = Config::load().context("load configuration")?;
    info!(config:?; "starting");

    let Config {
        api_config,
        node_config,
        storage_config,
        refresh_config,
    } = config;

    let pool = SqlitePool::new(storage_config)
        .await
        .context("create cache pool")?;
    let storage = SqliteStorage::new(pool);
    storage.migrate().await.context("apply cache schema")?;

    let node = HttpNode::new(node_config).context("create upstream node client")?;
    let service = AggregationService::new(node, storage);

    let api = AxumApi::new(api_config, service.clone());

    application::run(refresh_config, api, service, sigterm)
        .await
        .context("run tracker")
}
