// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// A participant's reward for one epoch, in uGNK as a decimal string. Once `claimed` is observed
/// no further refresh is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub epoch_id: u64,
    pub participant_id: String,
    pub rewarded_coins: String,
    pub claimed: bool,
}

/// The per-epoch performance summary of one participant as reported upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerformanceSummary {
    #[serde(default = "zero")]
    pub rewarded_coins: String,

    #[serde(default)]
    pub claimed: bool,
}

fn zero() -> String {
    "0".to_string()
}

/// A reward converted to whole GNK for the details view.
#[derive(Debug, Clone, Serialize)]
pub struct RewardSummary {
    pub epoch_id: u64,
    pub assigned_reward_gnk: u64,
    pub claimed: bool,
}
