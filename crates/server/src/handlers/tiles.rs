//! Tile population endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use populator_core::{AreaItem, TileCoordinate, WORLD_CRS84};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Query string shared by the population endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    /// Ask tile workers to render even when the tile looks up to date.
    pub force: Option<bool>,
}

/// Response for an accepted area request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaAccepted {
    pub message: &'static str,
    pub request_id: Uuid,
}

/// Response for accepted explicit tiles.
#[derive(Debug, Serialize)]
pub struct TilesAccepted {
    pub message: &'static str,
    pub tiles: usize,
}

/// POST /tiles/area - Queue one or more areas for population.
///
/// The body is a single `{area, minZoom, maxZoom}` object or a non-empty array
/// of them. Identical pending requests are rejected with 409.
pub async fn populate_area(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Json<AreaAccepted>> {
    let items = parse_area_items(body)?;
    for item in &items {
        item.validate(&WORLD_CRS84)?;
    }

    let request_id = state
        .submitter
        .submit_area_request(items, query.force)
        .await?;

    Ok(Json(AreaAccepted {
        message: "OK",
        request_id,
    }))
}

/// POST /tiles/list - Queue explicit metatiles.
pub async fn populate_tiles(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Json<TilesAccepted>> {
    let tiles = parse_tiles(body)?;
    for tile in &tiles {
        WORLD_CRS84.validate_tile(tile)?;
    }

    let count = state
        .submitter
        .submit_explicit_tiles(tiles, query.force)
        .await?;

    Ok(Json(TilesAccepted {
        message: "OK",
        tiles: count,
    }))
}

fn parse_area_items(body: Value) -> ApiResult<Vec<AreaItem>> {
    let items = match body {
        Value::Array(values) => values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AreaItem>, _>>(),
        value => serde_json::from_value(value).map(|item| vec![item]),
    }
    .map_err(|e| ApiError::BadRequest(format!("invalid area request: {e}")))?;

    if items.is_empty() {
        return Err(ApiError::BadRequest(
            "request must contain at least one area".to_string(),
        ));
    }
    Ok(items)
}

fn parse_tiles(body: Value) -> ApiResult<Vec<TileCoordinate>> {
    let Value::Array(values) = body else {
        return Err(ApiError::BadRequest("request body must be an array".to_string()));
    };
    if values.is_empty() {
        return Err(ApiError::BadRequest(
            "tile list must not be empty".to_string(),
        ));
    }
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            serde_json::from_value(value)
                .map_err(|e| ApiError::BadRequest(format!("invalid tile at index {i}: {e}")))
        })
        .collect()
}
