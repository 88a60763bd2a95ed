// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::domain::de;
use serde::{Deserialize, Serialize};

/// An authz grant delegating narrow permissions to an auxiliary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmKey {
    pub grantee_address: String,
    pub granted_at: String,
}

/// A hardware node from the registry. `poc_weight` is overlaid from the epoch's ml-nodes map when
/// the epoch carries an entry for `local_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareNode {
    #[serde(default)]
    pub local_id: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub hardware: Vec<HardwareSpec>,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: String,

    #[serde(default, deserialize_with = "de::i64_flexible_opt")]
    pub poc_weight: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSpec {
    #[serde(rename = "type")]
    pub hardware_type: String,

    #[serde(default, deserialize_with = "de::i64_flexible")]
    pub count: i64,
}
