//! Core domain types and tile math for the tiles populator.
//!
//! This crate is pure and synchronous:
//! - Area requests and their canonical hash
//! - Geometry resolution and GeoJSON validation
//! - The tile grid and metatile enumeration
//! - Tile jobs handed to downstream workers
//! - Configuration shared by the queue and server crates

pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod hash;
pub mod request;
pub mod tile;

pub use error::{Error, Result};
pub use geometry::{Area, BoundingBox, ResolvedArea};
pub use grid::{MAX_ZOOM, TileGrid, TileRange, WORLD_CRS84};
pub use hash::RequestHash;
pub use request::{AreaItem, RequestBatch, Source};
pub use tile::{TileCoordinate, TileJob};
