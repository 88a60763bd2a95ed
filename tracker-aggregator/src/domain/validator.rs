// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use tracker_common::domain::parse_counter;

/// A staking validator as returned by the validators endpoint. Joined to participants by
/// converting the participant index to the valoper HRP.
#[derive(Debug, Clone, Deserialize)]
pub struct Validator {
    pub operator_address: String,

    #[serde(default)]
    pub consensus_pubkey: Option<ConsensusPubkey>,

    #[serde(default)]
    pub jailed: bool,

    #[serde(default)]
    pub tokens: Option<String>,

    #[serde(default)]
    pub description: ValidatorDescription,
}

impl Validator {
    /// First non-empty of the pubkey's `key` or `value` field; gateways differ on which one they
    /// populate.
    pub fn consensus_key(&self) -> Option<&str> {
        let pubkey = self.consensus_pubkey.as_ref()?;
        pubkey
            .key
            .as_deref()
            .filter(|key| !key.is_empty())
            .or_else(|| pubkey.value.as_deref().filter(|value| !value.is_empty()))
    }

    pub fn has_tokens(&self) -> bool {
        self.tokens
            .as_deref()
            .is_some_and(|tokens| parse_counter(tokens) > 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusPubkey {
    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidatorDescription {
    #[serde(default)]
    pub moniker: String,

    #[serde(default)]
    pub identity: String,

    #[serde(default)]
    pub website: String,
}

/// Slashing signing info for a valcons address.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningInfo {
    #[serde(default)]
    pub jailed_until: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_key_prefers_key_over_value() {
        let validator = serde_json::from_str::<Validator>(
            r#"{
                "operator_address": "gonkavaloper1xyz",
                "consensus_pubkey": {"key": "aaa", "value": "bbb"},
                "jailed": true,
                "tokens": "100"
            }"#,
        )
        .unwrap();

        assert_eq!(validator.consensus_key(), Some("aaa"));
        assert!(validator.has_tokens());
    }

    #[test]
    fn test_consensus_key_falls_back_to_value() {
        let validator = serde_json::from_str::<Validator>(
            r#"{
                "operator_address": "gonkavaloper1xyz",
                "consensus_pubkey": {"key": "", "value": "bbb"}
            }"#,
        )
        .unwrap();

        assert_eq!(validator.consensus_key(), Some("bbb"));
        assert!(!validator.has_tokens());
    }
}
