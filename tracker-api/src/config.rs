// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::infra;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default, rename = "api")]
    pub api_config: infra::api::Config,

    #[serde(default, rename = "node")]
    pub node_config: tracker_aggregator::infra::node::Config,

    #[serde(default, rename = "storage")]
    pub storage_config: tracker_common::infra::pool::Config,

    #[serde(default, rename = "refresh")]
    pub refresh_config: tracker_aggregator::application::Config,
}
