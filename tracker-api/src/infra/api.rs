// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{io, net::IpAddr};
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tower_http::cors::{Any, CorsLayer};
use tracker_aggregator::{
    domain::{EpochSnapshot, ModelsView, ParticipantDetails, ParticipantSnapshot, Timeline},
    infra::{node::HttpNode, storage::SqliteStorage},
    service::{AggregationService, ServiceError},
};

type Service = AggregationService<HttpNode, SqliteStorage>;

/// Config for the HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub address: IpAddr,

    pub port: u16,

    /// Allowed CORS origin; `*` allows any.
    pub cors_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: [0, 0, 0, 0].into(),
            port: 8000,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AxumApiError {
    #[error("invalid CORS origin")]
    CorsOrigin(#[source] axum::http::header::InvalidHeaderValue),

    #[error("cannot bind tcp listener")]
    Bind(#[source] io::Error),

    #[error("cannot serve API")]
    Serve(#[source] io::Error),
}

/// Axum based API serving the aggregated views as JSON.
pub struct AxumApi {
    config: Config,
    service: Service,
}

impl AxumApi {
    pub fn new(config: Config, service: Service) -> Self {
        Self { config, service }
    }

    pub async fn serve(self) -> Result<(), AxumApiError> {
        let Config {
            address,
            port,
            cors_origin,
        } = self.config;

        let cors = match cors_origin.as_str() {
            "*" => CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
            origin => CorsLayer::new()
                .allow_origin(
                    origin
                        .parse::<HeaderValue>()
                        .map_err(AxumApiError::CorsOrigin)?,
                )
                .allow_methods(Any)
                .allow_headers(Any),
        };

        let app = make_app(self.service).layer(cors);

        let listener = tokio::net::TcpListener::bind((address, port))
            .await
            .map_err(AxumApiError::Bind)?;
        info!(address:?, port; "listening to TCP connections");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(AxumApiError::Serve)
    }
}

fn make_app(service: Service) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .route("/api/v1/epochs/current", get(current_epoch))
        .route("/api/v1/epochs/{epoch_id}", get(epoch))
        .route(
            "/api/v1/epochs/{epoch_id}/participants/{participant_id}",
            get(participant),
        )
        .route(
            "/api/v1/epochs/{epoch_id}/participants/{participant_id}/inferences",
            get(participant_inferences),
        )
        .route("/api/v1/epochs/{epoch_id}/models", get(epoch_models))
        .route("/api/v1/models", get(current_models))
        .route("/api/v1/timeline", get(timeline))
        .with_state(service)
}

async fn shutdown_signal() {
    signal(SignalKind::terminate())
        .expect("install SIGTERM handler")
        .recv()
        .await;
}

/// User-visible error shape; only invalid heights and a dark upstream without cache escape the
/// aggregation service.
enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal,
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::InvalidHeight { .. } => ApiError::BadRequest(error.to_string()),
            ServiceError::Node(_) => ApiError::Unavailable(error.to_string()),
            ServiceError::Storage(_) => {
                warn!(error:% = error; "storage failure on read path");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };

        (status, Json(serde_json::json!({ "detail": message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct HeightQuery {
    height: Option<u64>,
}

async fn ready(State(service): State<Service>) -> impl IntoResponse {
    match service.ready().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache not ready").into_response(),
    }
}

async fn current_epoch(State(service): State<Service>) -> Result<Json<EpochDto>, ApiError> {
    let snapshot = service.current_epoch_stats(false).await?;
    Ok(Json(snapshot.into()))
}

async fn epoch(
    State(service): State<Service>,
    Path(epoch_id): Path<u64>,
    Query(query): Query<HeightQuery>,
) -> Result<Json<EpochDto>, ApiError> {
    let snapshot = service.epoch_stats(epoch_id, query.height).await?;
    Ok(Json(snapshot.into()))
}

async fn participant(
    State(service): State<Service>,
    Path((epoch_id, participant_id)): Path<(u64, String)>,
    Query(query): Query<HeightQuery>,
) -> Result<Response, ApiError> {
    let details = service
        .participant_details(&participant_id, epoch_id, query.height)
        .await?;

    match details {
        Some(details) => Ok(Json(ParticipantDetailsDto::from(details)).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn participant_inferences(
    State(service): State<Service>,
    Path((epoch_id, participant_id)): Path<(u64, String)>,
) -> Result<Response, ApiError> {
    let inferences = service
        .participant_inferences(epoch_id, &participant_id)
        .await?;

    match inferences {
        Some(inferences) => Ok(Json(inferences).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn epoch_models(
    State(service): State<Service>,
    Path(epoch_id): Path<u64>,
    Query(query): Query<HeightQuery>,
) -> Result<Json<ModelsView>, ApiError> {
    let view = service.epoch_models(epoch_id, query.height).await?;
    Ok(Json(view))
}

async fn current_models(State(service): State<Service>) -> Result<Json<ModelsView>, ApiError> {
    let view = service.current_models().await?;
    Ok(Json(view))
}

async fn timeline(State(service): State<Service>) -> Result<Json<Timeline>, ApiError> {
    let timeline = service.timeline().await?;
    Ok(Json(timeline))
}

/// A participant as served: the fused snapshot plus the derived rates.
#[derive(Debug, Serialize)]
struct ParticipantDto {
    #[serde(flatten)]
    snapshot: ParticipantSnapshot,

    missed_rate: f64,

    invalidation_rate: f64,
}

impl From<ParticipantSnapshot> for ParticipantDto {
    fn from(snapshot: ParticipantSnapshot) -> Self {
        let missed_rate = snapshot.missed_rate();
        let invalidation_rate = snapshot.invalidation_rate();

        Self {
            snapshot,
            missed_rate,
            invalidation_rate,
        }
    }
}

#[derive(Debug, Serialize)]
struct EpochDto {
    epoch_id: u64,
    height: u64,
    participants: Vec<ParticipantDto>,
    cached_at: Option<String>,
    is_current: bool,
    total_assigned_rewards_gnk: Option<u64>,
}

impl From<EpochSnapshot> for EpochDto {
    fn from(snapshot: EpochSnapshot) -> Self {
        Self {
            epoch_id: snapshot.epoch_id,
            height: snapshot.height,
            participants: snapshot
                .participants
                .into_iter()
                .map(ParticipantDto::from)
                .collect(),
            cached_at: snapshot.cached_at,
            is_current: snapshot.is_current,
            total_assigned_rewards_gnk: snapshot.total_assigned_rewards_gnk,
        }
    }
}

#[derive(Debug, Serialize)]
struct ParticipantDetailsDto {
    participant: ParticipantDto,
    rewards: Vec<tracker_aggregator::domain::RewardSummary>,
    seed: Option<tracker_aggregator::domain::SeedSignature>,
    warm_keys: Vec<tracker_aggregator::domain::WarmKey>,
    hardware_nodes: Vec<tracker_aggregator::domain::HardwareNode>,
}

impl From<ParticipantDetails> for ParticipantDetailsDto {
    fn from(details: ParticipantDetails) -> Self {
        Self {
            participant: details.participant.into(),
            rewards: details.rewards,
            seed: details.seed,
            warm_keys: details.warm_keys,
            hardware_nodes: details.hardware_nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_aggregator::domain::EpochStats;

    #[test]
    fn test_participant_dto_carries_rates() {
        let snapshot = ParticipantSnapshot {
            index: "gonka1abc".to_string(),
            stats: EpochStats {
                inference_count: "5".to_string(),
                missed_requests: "5".to_string(),
                invalidated_inferences: "1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let dto = ParticipantDto::from(snapshot);
        let json = serde_json::to_value(&dto).unwrap();

        assert_eq!(json["index"], "gonka1abc");
        assert_eq!(json["missed_rate"], 0.5);
        assert_eq!(json["invalidation_rate"], 0.2);
        assert_eq!(json["current_epoch_stats"]["inference_count"], "5");
    }
}
