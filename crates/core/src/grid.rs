//! Tile grid math and metatile enumeration.
//!
//! The grid is a power-of-two pyramid over fixed world bounds. Zoom 0 is
//! `zoom0_columns x zoom0_rows` tiles and every zoom level doubles both
//! dimensions. `x` counts eastwards from the western bound and `y` southwards
//! from the northern bound.

use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::tile::TileCoordinate;
use std::ops::RangeInclusive;

/// Deepest zoom level any grid supports.
pub const MAX_ZOOM: u8 = 30;

/// A tile pyramid definition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileGrid {
    pub bounds: BoundingBox,
    pub zoom0_columns: u32,
    pub zoom0_rows: u32,
    pub max_zoom: u8,
}

/// WGS84 geographic grid: two square tiles at zoom 0.
pub const WORLD_CRS84: TileGrid = TileGrid {
    bounds: BoundingBox {
        west: -180.0,
        south: -90.0,
        east: 180.0,
        north: 90.0,
    },
    zoom0_columns: 2,
    zoom0_rows: 1,
    max_zoom: MAX_ZOOM,
};

impl TileGrid {
    pub fn validate_zoom(&self, zoom: u8) -> Result<()> {
        if zoom > self.max_zoom {
            return Err(Error::InvalidZoomRange(format!(
                "zoom level {zoom} is out of range of tile grid (max {})",
                self.max_zoom
            )));
        }
        Ok(())
    }

    /// Check box ordering and that the box lies within the grid bounds.
    pub fn validate_bbox(&self, bbox: &BoundingBox) -> Result<()> {
        bbox.validate()?;
        if !bbox.within(&self.bounds) {
            return Err(Error::InvalidBoundingBox(
                "bounding box is not within the tile grid".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that a tile address exists in this grid.
    pub fn validate_tile(&self, tile: &TileCoordinate) -> Result<()> {
        if tile.metatile == 0 {
            return Err(Error::InvalidMetatile(tile.metatile));
        }
        self.validate_zoom(tile.z)?;
        if tile.x >= self.columns(tile.z, tile.metatile) {
            return Err(Error::InvalidTile(
                "x index out of range of tile grid".to_string(),
            ));
        }
        if tile.y >= self.rows(tile.z, tile.metatile) {
            return Err(Error::InvalidTile(
                "y index out of range of tile grid".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of metatile columns at `zoom`.
    ///
    /// Callers must have checked `zoom` and `metatile`.
    pub fn columns(&self, zoom: u8, metatile: u32) -> u32 {
        let base = u64::from(self.zoom0_columns) << zoom;
        base.div_ceil(u64::from(metatile.max(1))) as u32
    }

    /// Number of metatile rows at `zoom`.
    pub fn rows(&self, zoom: u8, metatile: u32) -> u32 {
        let base = u64::from(self.zoom0_rows) << zoom;
        base.div_ceil(u64::from(metatile.max(1))) as u32
    }

    fn metatile_width(&self, zoom: u8, metatile: u32) -> f64 {
        (self.bounds.east - self.bounds.west) / f64::from(self.zoom0_columns)
            / 2f64.powi(i32::from(zoom))
            * f64::from(metatile)
    }

    fn metatile_height(&self, zoom: u8, metatile: u32) -> f64 {
        (self.bounds.north - self.bounds.south) / f64::from(self.zoom0_rows)
            / 2f64.powi(i32::from(zoom))
            * f64::from(metatile)
    }

    /// The metatiles covering `bbox` at `zoom`.
    ///
    /// A box edge that lies exactly on a tile boundary does not pull in the
    /// neighbouring tile. Parts of the box outside the grid bounds are ignored.
    pub fn tile_range(&self, bbox: &BoundingBox, zoom: u8, metatile: u32) -> Result<TileRange> {
        if metatile == 0 {
            return Err(Error::InvalidMetatile(metatile));
        }
        self.validate_zoom(zoom)?;

        let Some(clipped) = bbox.clip(&self.bounds) else {
            return Ok(TileRange::empty(zoom, metatile));
        };

        let width = self.metatile_width(zoom, metatile);
        let height = self.metatile_height(zoom, metatile);
        let last_column = self.columns(zoom, metatile) - 1;
        let last_row = self.rows(zoom, metatile) - 1;

        let min_x = ((clipped.west - self.bounds.west) / width).floor();
        let max_x = last_index((clipped.east - self.bounds.west) / width, min_x);
        let min_y = ((self.bounds.north - clipped.north) / height).floor();
        let max_y = last_index((self.bounds.north - clipped.south) / height, min_y);

        let clamp = |v: f64, last: u32| (v.max(0.0) as u32).min(last);

        Ok(TileRange {
            zoom,
            metatile,
            x: clamp(min_x, last_column)..=clamp(max_x, last_column),
            y: clamp(min_y, last_row)..=clamp(max_y, last_row),
        })
    }

    /// The area a metatile covers, clipped to the grid bounds.
    pub fn tile_bbox(&self, tile: &TileCoordinate) -> BoundingBox {
        let width = self.metatile_width(tile.z, tile.metatile);
        let height = self.metatile_height(tile.z, tile.metatile);
        let west = self.bounds.west + f64::from(tile.x) * width;
        let north = self.bounds.north - f64::from(tile.y) * height;
        BoundingBox {
            west,
            south: (north - height).max(self.bounds.south),
            east: (west + width).min(self.bounds.east),
            north,
        }
    }
}

fn last_index(edge: f64, first: f64) -> f64 {
    let index = edge.floor();
    if index == edge && index > first {
        index - 1.0
    } else {
        index
    }
}

/// A rectangular block of metatiles at a single zoom level.
///
/// Enumeration is lazy and can be restarted by calling [`TileRange::tiles`] again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub metatile: u32,
    pub x: RangeInclusive<u32>,
    pub y: RangeInclusive<u32>,
}

impl TileRange {
    fn empty(zoom: u8, metatile: u32) -> Self {
        #[allow(clippy::reversed_empty_ranges)]
        Self {
            zoom,
            metatile,
            x: 1..=0,
            y: 1..=0,
        }
    }

    pub fn len(&self) -> u64 {
        let span = |r: &RangeInclusive<u32>| {
            if r.is_empty() {
                0
            } else {
                u64::from(r.end() - r.start()) + 1
            }
        };
        span(&self.x) * span(&self.y)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        let (zoom, metatile) = (self.zoom, self.metatile);
        self.y.clone().flat_map(move |y| {
            self.x
                .clone()
                .map(move |x| TileCoordinate::new(x, y, zoom, metatile))
        })
    }
}
