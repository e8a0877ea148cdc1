//! Area requests as they travel through the upstream queue.

use crate::error::{Error, Result};
use crate::geometry::Area;
use crate::grid::TileGrid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An area to populate over an inclusive zoom range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaItem {
    pub area: Area,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl AreaItem {
    pub fn new(area: Area, min_zoom: u8, max_zoom: u8) -> Self {
        Self {
            area,
            min_zoom,
            max_zoom,
        }
    }

    /// Validate an item received from a caller.
    pub fn validate(&self, grid: &TileGrid) -> Result<()> {
        grid.validate_zoom(self.min_zoom)?;
        grid.validate_zoom(self.max_zoom)?;
        if self.min_zoom > self.max_zoom {
            return Err(Error::InvalidZoomRange(
                "minZoom must be less than or equal to maxZoom".to_string(),
            ));
        }
        match &self.area {
            Area::BBox(bbox) => grid.validate_bbox(bbox),
            area => area.validate(),
        }
    }

    /// One item per concrete geometry, sharing this item's zoom range.
    pub fn flatten(self) -> Vec<AreaItem> {
        let (min_zoom, max_zoom) = (self.min_zoom, self.max_zoom);
        self.area
            .flatten()
            .into_iter()
            .map(|area| AreaItem::new(area, min_zoom, max_zoom))
            .collect()
    }
}

/// Where a request originated; selects the tile deduplication policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// Explicit caller request; overlapping tiles are kept.
    Api,
    /// System-generated fan-out from expired tiles; overlapping tiles collapse.
    ExpiredTiles,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::ExpiredTiles => "expiredTiles",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the upstream request queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestBatch {
    pub items: Vec<AreaItem>,
    pub source: Source,
    /// Opaque version marker copied onto every produced tile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl RequestBatch {
    pub fn new(items: Vec<AreaItem>, source: Source) -> Self {
        Self {
            items,
            source,
            state: None,
            force: None,
        }
    }

    pub fn with_state(mut self, state: Option<i64>) -> Self {
        self.state = state;
        self
    }

    pub fn with_force(mut self, force: Option<bool>) -> Self {
        self.force = force;
        self
    }

    /// Flatten every FeatureCollection into per-feature items, keeping order.
    pub fn normalized(self) -> Self {
        Self {
            items: self.items.into_iter().flat_map(AreaItem::flatten).collect(),
            ..self
        }
    }
}
