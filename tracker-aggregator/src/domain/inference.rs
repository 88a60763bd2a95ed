// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Sentinel status of the row distinguishing "fetched, confirmed empty" from "never fetched" in
/// the per-participant list tables.
pub const EMPTY_MARKER: &str = "_EMPTY_MARKER_";

/// A single recorded inference of a participant in an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub inference_id: String,

    pub status: String,

    #[serde(default)]
    pub start_block_height: String,

    #[serde(default)]
    pub start_block_timestamp: String,

    #[serde(default)]
    pub validated_by: Vec<String>,

    #[serde(default)]
    pub prompt_hash: Option<String>,

    #[serde(default)]
    pub response_hash: Option<String>,

    #[serde(default)]
    pub prompt_payload: Option<String>,

    #[serde(default)]
    pub response_payload: Option<String>,

    #[serde(default)]
    pub prompt_token_count: Option<String>,

    #[serde(default)]
    pub completion_token_count: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

/// Cached inferences of one participant in one epoch, grouped by outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantInferences {
    pub epoch_id: u64,
    pub participant_id: String,
    pub successful: Vec<InferenceRecord>,
    pub expired: Vec<InferenceRecord>,
    pub invalidated: Vec<InferenceRecord>,
    pub cached_at: Option<String>,
}

impl ParticipantInferences {
    pub fn group(
        epoch_id: u64,
        participant_id: String,
        records: Vec<InferenceRecord>,
        cached_at: Option<String>,
    ) -> Self {
        let mut successful = Vec::new();
        let mut expired = Vec::new();
        let mut invalidated = Vec::new();

        for record in records {
            match record.status.to_ascii_uppercase() {
                status if status.contains("EXPIRED") => expired.push(record),
                status if status.contains("INVALIDATED") => invalidated.push(record),
                _ => successful.push(record),
            }
        }

        Self {
            epoch_id,
            participant_id,
            successful,
            expired,
            invalidated,
            cached_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: &str) -> InferenceRecord {
        InferenceRecord {
            inference_id: id.to_string(),
            status: status.to_string(),
            start_block_height: "1".to_string(),
            start_block_timestamp: "1".to_string(),
            validated_by: vec![],
            prompt_hash: None,
            response_hash: None,
            prompt_payload: None,
            response_payload: None,
            prompt_token_count: None,
            completion_token_count: None,
            model: None,
        }
    }

    #[test]
    fn test_group_by_status() {
        let grouped = ParticipantInferences::group(
            7,
            "gonka1abc".to_string(),
            vec![
                record("a", "FINISHED"),
                record("b", "EXPIRED"),
                record("c", "INVALIDATED"),
                record("d", "VALIDATED"),
            ],
            None,
        );

        assert_eq!(grouped.successful.len(), 2);
        assert_eq!(grouped.expired.len(), 1);
        assert_eq!(grouped.invalidated.len(), 1);
    }
}
