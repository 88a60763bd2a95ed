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

use crate::domain::{
    BlockHeader, EpochGroup, HardwareNode, HealthProbe, LatestEpochInfo, ModelDescriptor,
    ModelUsageStats, ParticipantRecord, PerformanceSummary, RestrictionsParams, SigningInfo,
    Validator, WarmKey, de,
    node::{KeybaseProfile, Node, NodeError},
};
use anyhow::Context;
use log::{debug, warn};
use reqwest::Client as HttpClient;
use serde::{Deserialize, de::DeserializeOwned};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

/// Header understood by the gRPC gateway to query state at a specific height.
const BLOCK_HEIGHT_HEADER: &str = "x-cosmos-block-height";

const KEYBASE_LOOKUP_URL: &str = "https://keybase.io/_/api/1.0/user/lookup.json";

/// Config for the upstream node client.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Comma-separated list of upstream base URLs, tried in order with rotation on failure.
    pub urls: String,

    /// Per-request timeout for chain and Keybase calls.
    #[serde(with = "humantime_serde", default = "request_timeout_default")]
    pub request_timeout: Duration,

    /// Per-request timeout for inference endpoint health probes.
    #[serde(with = "humantime_serde", default = "health_timeout_default")]
    pub health_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: "http://node2.gonka.ai:8000".to_string(),
            request_timeout: request_timeout_default(),
            health_timeout: health_timeout_default(),
        }
    }
}

fn request_timeout_default() -> Duration {
    Duration::from_secs(10)
}

fn health_timeout_default() -> Duration {
    Duration::from_secs(5)
}

/// A [Node] implementation over the REST gateway of the upstream nodes. Keeps a monotonically
/// advancing rotation index: a successful call leaves it unchanged, any transport error or
/// non-2xx response advances it and the call retries on the next URL, up to one full cycle.
#[derive(Clone)]
pub struct HttpNode {
    client: HttpClient,
    health_client: HttpClient,
    base_urls: Arc<Vec<String>>,
    url_index: Arc<AtomicUsize>,
}

impl HttpNode {
    /// Create a new [HttpNode] with the given [Config].
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let base_urls = config
            .urls
            .split(',')
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect::<Vec<_>>();
        anyhow::ensure!(!base_urls.is_empty(), "no upstream base URLs configured");

        let user_agent = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        let client = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(config.request_timeout)
            .build()
            .context("build HTTP client")?;
        let health_client = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(config.health_timeout)
            .build()
            .context("build health probe client")?;

        Ok(Self {
            client,
            health_client,
            base_urls: Arc::new(base_urls),
            url_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn current_base_url(&self) -> &str {
        let index = self.url_index.load(Ordering::Relaxed) % self.base_urls.len();
        &self.base_urls[index]
    }

    fn rotate(&self) {
        self.url_index.fetch_add(1, Ordering::Relaxed);
    }

    /// One logical endpoint invocation: try every base URL at most once, rotating on failure.
    async fn get_json<T>(&self, path: &str, height: Option<u64>) -> Result<T, NodeError>
    where
        T: DeserializeOwned,
    {
        for _ in 0..self.base_urls.len() {
            let base_url = self.current_base_url();
            let url = format!("{base_url}{path}");

            let mut request = self.client.get(&url);
            if let Some(height) = height {
                request = request.header(BLOCK_HEIGHT_HEADER, height);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<T>().await.map_err(|error| {
                        NodeError::UnexpectedResponse {
                            endpoint: path.to_string(),
                            message: error.to_string(),
                        }
                    });
                }

                Ok(response) => {
                    debug!(
                        url:% = url,
                        status:% = response.status();
                        "upstream returned error status, rotating"
                    );
                    self.rotate();
                }

                Err(error) => {
                    debug!(url:% = url, error:% = error; "upstream request failed, rotating");
                    self.rotate();
                }
            }
        }

        Err(NodeError::Unavailable {
            endpoint: path.to_string(),
        })
    }
}

impl Node for HttpNode {
    async fn latest_height(&self) -> Result<u64, NodeError> {
        let response = self
            .get_json::<BlockResponse>("/cosmos/base/tendermint/v1beta1/blocks/latest", None)
            .await?;

        Ok(response.block.header.height)
    }

    async fn block(&self, height: u64) -> Result<BlockHeader, NodeError> {
        let response = self
            .get_json::<BlockResponse>(
                &format!("/cosmos/base/tendermint/v1beta1/blocks/{height}"),
                None,
            )
            .await?;

        Ok(BlockHeader {
            height: response.block.header.height,
            time: response.block.header.time,
        })
    }

    async fn latest_epoch(&self) -> Result<LatestEpochInfo, NodeError> {
        let response = self
            .get_json::<LatestEpochResponse>("/gonka/inference/v1/latest_epoch", None)
            .await?;

        Ok(LatestEpochInfo {
            epoch_id: response.latest_epoch.index,
            poc_start_block_height: response.latest_epoch.poc_start_block_height,
            next_poc_start: response.epoch_stages.next_poc_start,
            epoch_length: response.epoch_params.epoch_length,
        })
    }

    async fn current_epoch_group(&self) -> Result<EpochGroup, NodeError> {
        let response = self
            .get_json::<EpochGroupResponse>("/gonka/inference/v1/epochs/current_epoch_group", None)
            .await?;

        Ok(response.active_participants)
    }

    async fn epoch_group(&self, epoch_id: u64) -> Result<EpochGroup, NodeError> {
        let response = self
            .get_json::<EpochGroupResponse>(
                &format!("/gonka/inference/v1/epochs/{epoch_id}/epoch_group"),
                None,
            )
            .await?;

        Ok(response.active_participants)
    }

    async fn participants(&self, height: Option<u64>) -> Result<Vec<ParticipantRecord>, NodeError> {
        let path = match height {
            Some(height) => format!("/gonka/inference/v1/participants?height={height}"),
            None => "/gonka/inference/v1/participants".to_string(),
        };
        let response = self.get_json::<ParticipantsResponse>(&path, None).await?;

        Ok(response.participant)
    }

    async fn validators(&self, height: Option<u64>) -> Result<Vec<Validator>, NodeError> {
        let response = self
            .get_json::<ValidatorsResponse>(
                "/cosmos/staking/v1beta1/validators?pagination.limit=500",
                height,
            )
            .await?;

        Ok(response.validators)
    }

    async fn signing_info(
        &self,
        valcons_address: &str,
        height: Option<u64>,
    ) -> Result<Option<SigningInfo>, NodeError> {
        let path = format!("/cosmos/slashing/v1beta1/signing_infos/{valcons_address}");

        // A missing signing info is not an error; the caller treats it as "no record".
        match self.get_json::<SigningInfoResponse>(&path, height).await {
            Ok(response) => Ok(Some(response.val_signing_info)),
            Err(error) => {
                debug!(valcons_address, error:% = error; "no signing info");
                Ok(None)
            }
        }
    }

    async fn authz_grants(&self, granter: &str) -> Result<Vec<WarmKey>, NodeError> {
        let response = self
            .get_json::<AuthzGrantsResponse>(
                &format!("/cosmos/authz/v1beta1/grants/granter/{granter}"),
                None,
            )
            .await?;

        // One grantee may hold several message-type grants; the cache is keyed by grantee.
        let mut seen = HashSet::new();
        let warm_keys = response
            .grants
            .into_iter()
            .filter(|grant| seen.insert(grant.grantee.clone()))
            .map(|grant| WarmKey {
                grantee_address: grant.grantee,
                granted_at: grant
                    .granted_at
                    .or(grant.expiration)
                    .unwrap_or_default(),
            })
            .collect();

        Ok(warm_keys)
    }

    async fn epoch_performance_summary(
        &self,
        epoch_id: u64,
        participant_id: &str,
        height: Option<u64>,
    ) -> Result<PerformanceSummary, NodeError> {
        let response = self
            .get_json::<PerformanceSummaryResponse>(
                &format!("/gonka/inference/v1/epoch_performance_summary/{epoch_id}/{participant_id}"),
                height,
            )
            .await?;

        Ok(response.summary)
    }

    async fn hardware_nodes(&self, participant_id: &str) -> Result<Vec<HardwareNode>, NodeError> {
        let response = self
            .get_json::<HardwareNodesResponse>(
                &format!("/gonka/inference/v1/hardware_nodes/{participant_id}"),
                None,
            )
            .await?;

        Ok(response.nodes)
    }

    async fn models_all(&self) -> Result<Vec<ModelDescriptor>, NodeError> {
        let response = self
            .get_json::<ModelsResponse>("/gonka/inference/v1/models", None)
            .await?;

        Ok(response.model)
    }

    async fn models_stats(&self) -> Result<Vec<ModelUsageStats>, NodeError> {
        let response = self
            .get_json::<ModelsStatsResponse>("/gonka/inference/v1/models_stats", None)
            .await?;

        Ok(response.stats_models)
    }

    async fn restrictions_params(&self) -> Result<RestrictionsParams, NodeError> {
        let response = self
            .get_json::<RestrictionsParamsResponse>("/gonka/inference/v1/restrictions_params", None)
            .await?;

        Ok(response.params)
    }

    async fn check_node_health(&self, inference_url: &str) -> HealthProbe {
        if inference_url.is_empty() {
            return HealthProbe::unhealthy("No inference URL");
        }

        let url = format!("{}/healthz", inference_url.trim_end_matches('/'));
        let started = Instant::now();

        match self.health_client.get(&url).send().await {
            Ok(response) => {
                let response_time_ms = started.elapsed().as_millis() as i64;

                if response.status().is_success() {
                    HealthProbe {
                        is_healthy: true,
                        error_message: None,
                        response_time_ms: Some(response_time_ms),
                    }
                } else {
                    HealthProbe {
                        is_healthy: false,
                        error_message: Some(format!("HTTP {}", response.status().as_u16())),
                        response_time_ms: Some(response_time_ms),
                    }
                }
            }

            Err(error) => HealthProbe::unhealthy(error.to_string()),
        }
    }

    async fn keybase_profile(&self, identity: &str) -> KeybaseProfile {
        let request = self
            .client
            .get(KEYBASE_LOOKUP_URL)
            .query(&[("key_suffix", identity), ("fields", "basics,pictures")]);

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(identity, error:% = error; "keybase lookup failed");
                return KeybaseProfile::default();
            }
        };

        match response.json::<KeybaseLookupResponse>().await {
            Ok(lookup) => {
                let user = lookup.them.into_iter().flatten().next();

                match user {
                    Some(user) => KeybaseProfile {
                        username: user.basics.and_then(|basics| basics.username),
                        picture_url: user
                            .pictures
                            .and_then(|pictures| pictures.primary)
                            .and_then(|primary| primary.url),
                    },
                    None => KeybaseProfile::default(),
                }
            }

            Err(error) => {
                warn!(identity, error:% = error; "keybase lookup returned unexpected payload");
                KeybaseProfile::default()
            }
        }
    }
}

#[derive(Deserialize)]
struct BlockResponse {
    block: Block,
}

#[derive(Deserialize)]
struct Block {
    header: Header,
}

#[derive(Deserialize)]
struct Header {
    #[serde(deserialize_with = "de::u64_flexible")]
    height: u64,

    #[serde(default)]
    time: String,
}

#[derive(Deserialize)]
struct LatestEpochResponse {
    latest_epoch: LatestEpoch,

    #[serde(default)]
    epoch_stages: EpochStages,

    #[serde(default)]
    epoch_params: EpochParams,
}

#[derive(Deserialize)]
struct LatestEpoch {
    #[serde(deserialize_with = "de::u64_flexible")]
    index: u64,

    #[serde(default, deserialize_with = "de::u64_flexible")]
    poc_start_block_height: u64,
}

#[derive(Default, Deserialize)]
struct EpochStages {
    #[serde(default, deserialize_with = "de::u64_flexible")]
    next_poc_start: u64,
}

#[derive(Default, Deserialize)]
struct EpochParams {
    #[serde(default, deserialize_with = "de::u64_flexible")]
    epoch_length: u64,
}

#[derive(Deserialize)]
struct EpochGroupResponse {
    active_participants: EpochGroup,
}

#[derive(Deserialize)]
struct ParticipantsResponse {
    #[serde(default)]
    participant: Vec<ParticipantRecord>,
}

#[derive(Deserialize)]
struct ValidatorsResponse {
    #[serde(default)]
    validators: Vec<Validator>,
}

#[derive(Deserialize)]
struct SigningInfoResponse {
    val_signing_info: SigningInfo,
}

#[derive(Deserialize)]
struct AuthzGrantsResponse {
    #[serde(default)]
    grants: Vec<RawGrant>,
}

#[derive(Deserialize)]
struct RawGrant {
    grantee: String,

    #[serde(default)]
    granted_at: Option<String>,

    #[serde(default)]
    expiration: Option<String>,
}

#[derive(Deserialize)]
struct PerformanceSummaryResponse {
    #[serde(default, rename = "epochPerformanceSummary")]
    summary: PerformanceSummary,
}

#[derive(Deserialize)]
struct HardwareNodesResponse {
    #[serde(default, alias = "hardware_nodes")]
    nodes: Vec<HardwareNode>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    model: Vec<ModelDescriptor>,
}

#[derive(Deserialize)]
struct ModelsStatsResponse {
    #[serde(default)]
    stats_models: Vec<ModelUsageStats>,
}

#[derive(Deserialize)]
struct RestrictionsParamsResponse {
    params: RestrictionsParams,
}

#[derive(Deserialize)]
struct KeybaseLookupResponse {
    #[serde(default)]
    them: Option<Vec<KeybaseUser>>,
}

#[derive(Deserialize)]
struct KeybaseUser {
    #[serde(default)]
    basics: Option<KeybaseBasics>,

    #[serde(default)]
    pictures: Option<KeybasePictures>,
}

#[derive(Deserialize)]
struct KeybaseBasics {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct KeybasePictures {
    #[serde(default)]
    primary: Option<KeybasePicture>,
}

#[derive(Deserialize)]
struct KeybasePicture {
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(urls: &str) -> HttpNode {
        HttpNode::new(Config {
            urls: urls.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_parsing() {
        let node = node(" http://node-1:8000/ , http://node-2:8000 ");
        assert_eq!(
            *node.base_urls,
            vec![
                "http://node-1:8000".to_string(),
                "http://node-2:8000".to_string()
            ]
        );
    }

    #[test]
    fn test_rotation_wraps() {
        let node = node("http://node-1:8000,http://node-2:8000");

        assert_eq!(node.current_base_url(), "http://node-1:8000");
        node.rotate();
        assert_eq!(node.current_base_url(), "http://node-2:8000");
        node.rotate();
        assert_eq!(node.current_base_url(), "http://node-1:8000");
    }

    #[test]
    fn test_empty_url_list_is_rejected() {
        let result = HttpNode::new(Config {
            urls: " , ".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_health_probe_without_url() {
        let node = node("http://node-1:8000");

        let probe = node.check_node_health("").await;
        assert!(!probe.is_healthy);
        assert_eq!(probe.error_message.as_deref(), Some("No inference URL"));
        assert_eq!(probe.response_time_ms, None);
    }
}
