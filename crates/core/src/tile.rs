//! Tile coordinates and downstream tile jobs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn default_metatile() -> u32 {
    1
}

/// A metatile address: a block of `metatile x metatile` base tiles at zoom `z`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub x: u32,
    pub y: u32,
    pub z: u8,
    #[serde(default = "default_metatile")]
    pub metatile: u32,
}

impl TileCoordinate {
    pub fn new(x: u32, y: u32, z: u8, metatile: u32) -> Self {
        Self { x, y, z, metatile }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}@{}", self.z, self.x, self.y, self.metatile)
    }
}

/// A message on the downstream tiles queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileJob {
    #[serde(flatten)]
    pub tile: TileCoordinate,
    /// Id of the request job this tile was expanded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl TileJob {
    pub fn new(tile: TileCoordinate) -> Self {
        Self {
            tile,
            parent: None,
            state: None,
            force: None,
        }
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_state(mut self, state: Option<i64>) -> Self {
        self.state = state;
        self
    }

    pub fn with_force(mut self, force: Option<bool>) -> Self {
        self.force = force;
        self
    }

    /// Key under which overlapping expired-tile jobs collapse.
    ///
    /// A missing state counts as state 0 and a missing force flag as unforced.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.state.unwrap_or(0),
            self.tile.z,
            self.tile.x,
            self.tile.y,
            self.tile.metatile,
            if self.force == Some(true) {
                "forced"
            } else {
                "unforced"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tile_job_wire_format() {
        let parent = Uuid::nil();
        let job = TileJob::new(TileCoordinate::new(39176, 10600, 18, 8))
            .with_parent(parent)
            .with_state(Some(3));
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            json!({
                "x": 39176,
                "y": 10600,
                "z": 18,
                "metatile": 8,
                "parent": "00000000-0000-0000-0000-000000000000",
                "state": 3
            })
        );
    }

    #[test]
    fn test_metatile_defaults_to_one() {
        let tile: TileCoordinate = serde_json::from_value(json!({"x": 1, "y": 2, "z": 3})).unwrap();
        assert_eq!(tile.metatile, 1);
    }

    #[test]
    fn test_dedup_key_normalizes_missing_fields() {
        let tile = TileCoordinate::new(1, 2, 3, 8);
        let bare = TileJob::new(tile);
        let explicit = TileJob::new(tile).with_state(Some(0)).with_force(Some(false));
        assert_eq!(bare.dedup_key(), "0/3/1/2/8/unforced");
        assert_eq!(bare.dedup_key(), explicit.dedup_key());

        let forced = TileJob::new(tile).with_force(Some(true));
        assert_eq!(forced.dedup_key(), "0/3/1/2/8/forced");
    }

    #[test]
    fn test_dedup_key_ignores_parent() {
        let tile = TileCoordinate::new(5, 6, 7, 1);
        let a = TileJob::new(tile).with_parent(Uuid::new_v4());
        let b = TileJob::new(tile).with_parent(Uuid::new_v4());
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
