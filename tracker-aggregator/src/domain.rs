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

pub mod node;
pub mod storage;

mod epoch;
mod hardware;
mod inference;
mod jail;
mod model;
mod participant;
mod reward;
mod timeline;
mod validator;

pub use epoch::*;
pub use hardware::*;
pub use inference::*;
pub use jail::*;
pub use model::*;
pub use participant::*;
pub use reward::*;
pub use timeline::*;
pub use validator::*;

/// Deserializers for chain numbers: the gRPC gateway encodes uint64 as JSON strings, older
/// gateways emit plain numbers.
pub(crate) mod de {
    use serde::{Deserialize, Deserializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i128),
        Text(String),
    }

    pub fn u64_flexible<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Number(number) => u64::try_from(number).map_err(Error::custom),
            Raw::Text(text) => text.parse().map_err(Error::custom),
        }
    }

    pub fn i64_flexible<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Number(number) => i64::try_from(number).map_err(Error::custom),
            Raw::Text(text) => text.parse().map_err(Error::custom),
        }
    }

    pub fn i64_flexible_opt<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Number(number)) => i64::try_from(number).map(Some).map_err(Error::custom),
            Some(Raw::Text(text)) => text.parse().map(Some).map_err(Error::custom),
        }
    }
}
