// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{BlockHeader, de};
use serde::{Deserialize, Serialize};

/// Chain-wide restriction parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RestrictionsParams {
    #[serde(default, deserialize_with = "de::u64_flexible")]
    pub restriction_end_block: u64,
}

/// A notable upcoming or past chain event on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub block_height: u64,
    pub description: String,
    pub occurred: bool,
}

/// The chain timeline: current and reference blocks, derived average block time and upcoming
/// events. Serializable both ways because the last good timeline is kept in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub current_block: BlockHeader,
    pub reference_block: BlockHeader,
    pub avg_block_time: f64,
    pub events: Vec<TimelineEvent>,
    pub current_epoch_start: u64,
    pub current_epoch_index: u64,
    pub epoch_length: u64,
}
