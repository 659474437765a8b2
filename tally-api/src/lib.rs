//! Read-only JSON API over the points snapshots. Every route resolves the
//! nearest snapshot at or before the requested block; an empty history is an
//! empty response, never an error.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use alloy_primitives::Address;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use tally_store::{ReceiverType, Store};

#[cfg(test)]
mod tests;

type AppState = Arc<Store>;

pub fn router(store: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/last_block", get(last_block))
        .route("/api/stats", get(stats))
        .route("/api/all", get(all_points))
        .route("/api/{receiver_type}/{receiver_address}", get(receiver_points))
        .with_state(store)
}

pub async fn serve(store: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api listening");

    axum::serve(listener, router(store)).await
}

enum ApiError {
    BadRequest(&'static str),
    Internal {
        error: &'static str,
        request_id: &'static str,
    },
}

impl ApiError {
    fn internal(error: &'static str, request_id: &'static str) -> impl Fn(tally_store::Error) -> ApiError {
        move |err| {
            error!(?err, request_id, "store failure");
            ApiError::Internal { error, request_id }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal { error, request_id } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error, "request_id": request_id })),
            )
                .into_response(),
        }
    }
}

#[derive(Serialize)]
struct PointsEntry {
    network_address: String,
    vault_address: String,
    points: String,
}

#[derive(Serialize)]
struct ReceiverResponse {
    receiver_address: String,
    receiver_type: &'static str,
    block_number: u64,
    points: Vec<PointsEntry>,
}

#[derive(Serialize)]
struct StatsResponse {
    total_points: String,
    stakers: u64,
    networks: u64,
    operators: u64,
}

#[derive(Serialize)]
struct AllPointsEntry {
    receiver_address: String,
    receiver_type: &'static str,
    block_number: u64,
    network_address: String,
    vault_address: String,
    points: String,
}

fn parse_receiver_type(value: &str) -> Result<ReceiverType, ApiError> {
    ReceiverType::parse(value).ok_or(ApiError::BadRequest("Invalid receiver type"))
}

fn parse_address(value: &str) -> Result<Address, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid receiver address"))
}

fn required_u64(
    params: &HashMap<String, String>,
    name: &str,
    message: &'static str,
) -> Result<u64, ApiError> {
    params
        .get(name)
        .and_then(|raw| raw.parse().ok())
        .ok_or(ApiError::BadRequest(message))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "message": "Service is healthy." }))
}

async fn last_block(State(store): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let last = store
        .last_snapshot()
        .map_err(ApiError::internal(
            "Failed to get last processed block",
            "last_block_0",
        ))?
        .unwrap_or(0);

    Ok(Json(json!({ "last_block_number": last })))
}

async fn receiver_points(
    State(store): State<AppState>,
    Path((receiver_type, receiver_address)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ReceiverResponse>, ApiError> {
    let receiver_type = parse_receiver_type(&receiver_type)?;
    let receiver = parse_address(&receiver_address)?;
    let block_number = required_u64(&params, "block_number", "Invalid block")?;

    let snapshot = store
        .closest_snapshot(block_number)
        .map_err(ApiError::internal(
            "Failed to get closest updated block",
            "points_0",
        ))?;

    let Some(snapshot) = snapshot else {
        return Ok(Json(ReceiverResponse {
            receiver_address: receiver.to_string(),
            receiver_type: receiver_type.as_str(),
            block_number: 0,
            points: Vec::new(),
        }));
    };

    let rows = match receiver_type {
        ReceiverType::Staker => store
            .points_by_staker(snapshot, receiver)
            .map_err(ApiError::internal(
                "Failed to get staker historical points",
                "points_1",
            ))?,
        ReceiverType::Network => store
            .points_by_network(snapshot, receiver)
            .map_err(ApiError::internal(
                "Failed to get network historical points",
                "points_2",
            ))?,
        ReceiverType::Operator => store
            .points_by_operator(snapshot, receiver)
            .map_err(ApiError::internal(
                "Failed to get operator historical points",
                "points_3",
            ))?,
    };

    Ok(Json(ReceiverResponse {
        receiver_address: receiver.to_string(),
        receiver_type: receiver_type.as_str(),
        block_number: snapshot,
        points: rows
            .into_iter()
            .map(|row| PointsEntry {
                network_address: row.network.to_string(),
                vault_address: row.vault.to_string(),
                points: row.points.to_string(),
            })
            .collect(),
    }))
}

async fn stats(
    State(store): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let receiver_type = match params.get("receiver_type") {
        Some(raw) => Some(parse_receiver_type(raw)?),
        None => None,
    };
    let block_number = required_u64(&params, "block_number", "Invalid block")?;

    let snapshot = store
        .closest_snapshot(block_number)
        .map_err(ApiError::internal(
            "Failed to get closest updated block",
            "stats_0",
        ))?;

    let Some(snapshot) = snapshot else {
        return Ok(Json(StatsResponse {
            total_points: "0".into(),
            stakers: 0,
            networks: 0,
            operators: 0,
        }));
    };

    let stats = store
        .points_stats(snapshot, receiver_type)
        .map_err(ApiError::internal(
            "Failed to get historical stats",
            "stats_1",
        ))?;

    Ok(Json(StatsResponse {
        total_points: stats.total_points.to_string(),
        stakers: stats.stakers,
        networks: stats.networks,
        operators: stats.operators,
    }))
}

async fn all_points(
    State(store): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<AllPointsEntry>>, ApiError> {
    let receiver_type = match params.get("receiver_type") {
        Some(raw) => Some(parse_receiver_type(raw)?),
        None => None,
    };
    let block_number = required_u64(&params, "block_number", "Invalid block")?;
    let offset = required_u64(&params, "offset", "Invalid offset")? as usize;
    let limit = required_u64(&params, "limit", "Invalid limit")? as usize;

    let snapshot = store
        .closest_snapshot(block_number)
        .map_err(ApiError::internal(
            "Failed to get closest updated block",
            "all_0",
        ))?;

    let Some(snapshot) = snapshot else {
        return Ok(Json(Vec::new()));
    };

    let rows = match receiver_type {
        Some(kind) => store
            .points_all(snapshot, kind, offset, limit)
            .map_err(ApiError::internal(
                "Failed to get historical points",
                "all_1",
            ))?,
        None => store
            .all_points(snapshot, offset, limit)
            .map_err(ApiError::internal(
                "Failed to get all historical points",
                "all_2",
            ))?,
    };

    Ok(Json(
        rows.into_iter()
            .map(|row| AllPointsEntry {
                receiver_address: row.receiver.to_string(),
                receiver_type: row.receiver_type.as_str(),
                block_number: snapshot,
                network_address: row.network.to_string(),
                vault_address: row.vault.to_string(),
                points: row.points.to_string(),
            })
            .collect(),
    ))
}
