// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// The jail overlay of one participant in one epoch, refreshed periodically and overwritten in
/// place. Keyed by (epoch, participant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JailStatus {
    pub epoch_id: u64,
    pub participant_index: String,
    pub is_jailed: bool,
    pub jailed_until: Option<String>,
    pub ready_to_unjail: bool,
    pub valcons_address: Option<String>,
    pub moniker: Option<String>,
    pub identity: Option<String>,
    pub keybase_username: Option<String>,
    pub keybase_picture_url: Option<String>,
    pub website: Option<String>,
    pub validator_consensus_key: Option<String>,
    pub consensus_key_mismatch: Option<bool>,
}

/// The health overlay of one participant; a single global row, no epoch dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealth {
    pub participant_index: String,
    pub is_healthy: bool,
    pub last_check: String,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
}

/// Result of probing one inference endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub is_healthy: bool,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
}

impl HealthProbe {
    pub fn unhealthy(error_message: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            error_message: Some(error_message.into()),
            response_time_ms: None,
        }
    }
}
