//! Sample areas shared by the integration tests.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use populator_core::{BoundingBox, TileCoordinate};
use serde_json::{Value, json};

/// Small box inside a single zoom 18 metatile.
#[allow(dead_code)]
pub const BBOX1: BoundingBox = BoundingBox {
    west: 35.20076259970665,
    south: 31.770502933414285,
    east: 35.20134598016739,
    north: 31.77073210500818,
};

/// Box covering 2 x 7 metatiles at zoom 18 with metatile 8.
#[allow(dead_code)]
pub const BBOX2: BoundingBox = BoundingBox {
    west: 35.20076259970665,
    south: 31.770502933414285,
    east: 35.21034598016739,
    north: 31.80173210500818,
};

#[allow(dead_code)]
pub fn bbox_array(bbox: &BoundingBox) -> Value {
    json!([bbox.west, bbox.south, bbox.east, bbox.north])
}

/// A polygon Feature tracing the outline of `bbox`.
#[allow(dead_code)]
pub fn bbox_polygon(bbox: &BoundingBox) -> Value {
    json!({
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [bbox.west, bbox.south],
                [bbox.east, bbox.south],
                [bbox.east, bbox.north],
                [bbox.west, bbox.north],
                [bbox.west, bbox.south]
            ]]
        }
    })
}

/// A polygon whose ring doubles back on itself.
#[allow(dead_code)]
pub fn bad_feature() -> Value {
    json!({
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [-0.703125, 24.84656534821976],
                [11.25, 24.84656534821976],
                [11.25, 22.0],
                [11.25, 31.353636941500987],
                [-0.703125, 31.353636941500987],
                [-0.703125, 24.84656534821976]
            ]]
        }
    })
}

#[allow(dead_code)]
pub fn good_feature() -> Value {
    json!({
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Point",
            "coordinates": [34.771677996274775, 32.084672588143604]
        }
    })
}

/// A thin diagonal strip, far smaller than its bounding box.
#[allow(dead_code)]
pub fn good_large_feature() -> Value {
    json!({
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [34.771474389898145, 32.10290092398452],
                [34.7958478351276, 32.03734236397234],
                [34.801910881204805, 32.03775353581486],
                [34.779598871642236, 32.10238732492981],
                [34.771474389898145, 32.10290092398452]
            ]]
        }
    })
}

#[allow(dead_code)]
pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({ "type": "FeatureCollection", "features": features })
}

/// The metatiles BBOX2 expands to at zoom 18.
#[allow(dead_code)]
pub fn bbox2_tiles() -> Vec<TileCoordinate> {
    [
        (39177, 10594),
        (39176, 10594),
        (39176, 10595),
        (39176, 10596),
        (39177, 10595),
        (39177, 10596),
        (39177, 10597),
        (39176, 10597),
        (39176, 10598),
        (39176, 10599),
        (39177, 10598),
        (39177, 10599),
        (39177, 10600),
        (39176, 10600),
    ]
    .into_iter()
    .map(|(x, y)| TileCoordinate::new(x, y, 18, 8))
    .collect()
}
