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

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bech32::{Bech32, Hrp};
use sha2::{Digest, Sha256};

/// HRP of account addresses.
pub const ACCOUNT_HRP: &str = "gonka";

/// HRP of validator operator addresses; same 20-byte payload as the account address.
pub const VALOPER_HRP: &str = "gonkavaloper";

/// HRP of validator consensus addresses; payload is SHA-256 of the ed25519 consensus pubkey,
/// truncated to 20 bytes.
pub const VALCONS_HRP: &str = "gonkavalcons";

/// Re-encode a bech32 address under another HRP, validating the checksum on decode. `None` means
/// the input is not a valid bech32 string; callers skip the affected record.
pub fn convert_bech32(address: &str, hrp: &str) -> Option<String> {
    let (_, bytes) = bech32::decode(address).ok()?;
    let hrp = Hrp::parse(hrp).ok()?;

    bech32::encode::<Bech32>(hrp, &bytes).ok()
}

/// Derive the valcons address from a base64-encoded ed25519 consensus pubkey:
/// SHA-256(pubkey), first 20 bytes, bech32-encoded under the given HRP.
pub fn pubkey_to_valcons(pubkey: &str, hrp: &str) -> Option<String> {
    let key = BASE64.decode(pubkey).ok()?;
    let digest = Sha256::digest(&key);
    let hrp = Hrp::parse(hrp).ok()?;

    bech32::encode::<Bech32>(hrp, &digest[..20]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_bech32_roundtrip() {
        let payload = [7u8; 20];
        let address =
            bech32::encode::<Bech32>(Hrp::parse(ACCOUNT_HRP).unwrap(), &payload).unwrap();

        let valoper = convert_bech32(&address, VALOPER_HRP).unwrap();
        assert!(valoper.starts_with("gonkavaloper1"));

        let back = convert_bech32(&valoper, ACCOUNT_HRP).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_convert_bech32_invalid_input() {
        assert_eq!(convert_bech32("not-a-bech32-address", VALOPER_HRP), None);
        assert_eq!(convert_bech32("", VALOPER_HRP), None);
    }

    #[test]
    fn test_pubkey_to_valcons() {
        let pubkey = "YrQI3q3zBpHDLEMZvgqEkNwjc/BmZ5HkEMYgQwYp+8E=";

        let valcons = pubkey_to_valcons(pubkey, VALCONS_HRP).unwrap();
        assert!(valcons.starts_with("gonkavalcons1"));

        let (hrp, bytes) = bech32::decode(&valcons).unwrap();
        assert_eq!(hrp.as_str(), VALCONS_HRP);
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn test_pubkey_to_valcons_custom_hrp() {
        let pubkey = "YrQI3q3zBpHDLEMZvgqEkNwjc/BmZ5HkEMYgQwYp+8E=";

        let valcons = pubkey_to_valcons(pubkey, "cosmosvalcons").unwrap();
        assert!(valcons.starts_with("cosmosvalcons1"));
    }

    #[test]
    fn test_pubkey_to_valcons_invalid_base64() {
        assert_eq!(pubkey_to_valcons("%%%", VALCONS_HRP), None);
    }
}
