//! Area geometry: bounding boxes, GeoJSON areas and their resolution.
//!
//! An inbound area is either a plain bounding box or a GeoJSON Feature /
//! FeatureCollection. Resolving an area yields the box to enumerate tiles
//! over and, for GeoJSON input, the exact shape used to filter those tiles.

use crate::error::{Error, Result};
use geo::algorithm::line_intersection::LineIntersection;
use geo::algorithm::sweep::{Cross, Intersections, LineOrPoint};
use geo::{BoundingRect, Coord, Intersects, Line, Rect};
use geojson::{Feature, FeatureCollection, GeoJson, Position, Value};
use serde::{Deserialize, Serialize, Serializer};

/// Axis-aligned box in longitude/latitude degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Check coordinate ordering.
    pub fn validate(&self) -> Result<()> {
        let finite = [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(Error::InvalidBoundingBox(
                "bounding box coordinates must be finite numbers".to_string(),
            ));
        }
        if self.east <= self.west {
            return Err(Error::InvalidBoundingBox(
                "bounding box's east must be larger than west".to_string(),
            ));
        }
        if self.north <= self.south {
            return Err(Error::InvalidBoundingBox(
                "bounding box's north must be larger than south".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this box lies inside `outer` (edges may touch).
    pub fn within(&self, outer: &BoundingBox) -> bool {
        self.west >= outer.west
            && self.east <= outer.east
            && self.south >= outer.south
            && self.north <= outer.north
    }

    /// Intersection with `other`, if the two boxes overlap or touch.
    pub fn clip(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let clipped = BoundingBox {
            west: self.west.max(other.west),
            south: self.south.max(other.south),
            east: self.east.min(other.east),
            north: self.north.min(other.north),
        };
        (clipped.west <= clipped.east && clipped.south <= clipped.north).then_some(clipped)
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            west: rect.min().x,
            south: rect.min().y,
            east: rect.max().x,
            north: rect.max().y,
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([west, south, east, north]: [f64; 4]) -> Self {
        Self::new(west, south, east, north)
    }
}

/// The area of an inbound request.
///
/// Boxes arrive either as `[west, south, east, north]` arrays or as objects and
/// always serialize as objects, so two spellings of the same box produce the
/// same canonical hash.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "AreaRepr")]
pub enum Area {
    BBox(BoundingBox),
    Feature(Box<Feature>),
    FeatureCollection(FeatureCollection),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AreaRepr {
    Array([f64; 4]),
    Object(BoundingBox),
    GeoJson(GeoJson),
}

impl TryFrom<AreaRepr> for Area {
    type Error = Error;

    fn try_from(repr: AreaRepr) -> Result<Self> {
        match repr {
            AreaRepr::Array(coords) => Ok(Area::BBox(coords.into())),
            AreaRepr::Object(bbox) => Ok(Area::BBox(bbox)),
            AreaRepr::GeoJson(GeoJson::Feature(feature)) => Ok(Area::Feature(Box::new(feature))),
            AreaRepr::GeoJson(GeoJson::FeatureCollection(collection)) => {
                Ok(Area::FeatureCollection(collection))
            }
            AreaRepr::GeoJson(GeoJson::Geometry(_)) => Err(Error::InvalidGeometry(
                "expected a Feature or FeatureCollection, got a bare geometry".to_string(),
            )),
        }
    }
}

impl Serialize for Area {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Area::BBox(bbox) => bbox.serialize(serializer),
            Area::Feature(feature) => feature.serialize(serializer),
            Area::FeatureCollection(collection) => collection.serialize(serializer),
        }
    }
}

impl Area {
    /// Split a FeatureCollection into one area per member feature.
    ///
    /// Boxes and single features are returned as-is.
    pub fn flatten(self) -> Vec<Area> {
        match self {
            Area::FeatureCollection(collection) => collection
                .features
                .into_iter()
                .map(|feature| Area::Feature(Box::new(feature)))
                .collect(),
            other => vec![other],
        }
    }

    /// Whether the area carries an exact shape (as opposed to a plain box).
    pub fn is_geojson(&self) -> bool {
        !matches!(self, Area::BBox(_))
    }

    /// Validate the area without resolving it.
    pub fn validate(&self) -> Result<()> {
        match self {
            Area::BBox(bbox) => bbox.validate(),
            Area::Feature(feature) => validate_feature(feature),
            Area::FeatureCollection(collection) => {
                if collection.features.is_empty() {
                    return Err(Error::InvalidGeometry(
                        "feature collection has no features".to_string(),
                    ));
                }
                collection.features.iter().try_for_each(validate_feature)
            }
        }
    }

    /// Resolve the area into its enclosing box and, for GeoJSON, the exact shape.
    pub fn resolve(&self) -> Result<ResolvedArea> {
        let shape = match self {
            Area::BBox(bbox) => {
                return Ok(ResolvedArea {
                    bbox: *bbox,
                    shape: None,
                });
            }
            Area::Feature(feature) => {
                validate_feature(feature)?;
                feature_shape(feature)?
            }
            Area::FeatureCollection(collection) => {
                self.validate()?;
                let members = collection
                    .features
                    .iter()
                    .map(feature_shape)
                    .collect::<Result<Vec<_>>>()?;
                geo::Geometry::GeometryCollection(geo::GeometryCollection::from(members))
            }
        };
        let rect = shape
            .bounding_rect()
            .ok_or_else(|| Error::InvalidGeometry("geometry has no coordinates".to_string()))?;
        Ok(ResolvedArea {
            bbox: rect.into(),
            shape: Some(shape),
        })
    }
}

/// An area reduced to the box tiles are enumerated over.
#[derive(Clone, Debug)]
pub struct ResolvedArea {
    pub bbox: BoundingBox,
    shape: Option<geo::Geometry<f64>>,
}

impl ResolvedArea {
    /// True when tiles must be filtered against the exact shape.
    pub fn is_exact_shape(&self) -> bool {
        self.shape.is_some()
    }

    /// Whether a tile box touches the area.
    ///
    /// Plain boxes accept every tile produced for them.
    pub fn intersects(&self, tile_bbox: &BoundingBox) -> bool {
        match &self.shape {
            Some(shape) => shape.intersects(&tile_bbox.to_rect().to_polygon()),
            None => true,
        }
    }
}

fn feature_shape(feature: &Feature) -> Result<geo::Geometry<f64>> {
    let geometry = feature
        .geometry
        .clone()
        .ok_or_else(|| Error::InvalidGeometry("feature has no geometry".to_string()))?;
    geo::Geometry::<f64>::try_from(geometry).map_err(|e| Error::InvalidGeometry(e.to_string()))
}

fn validate_feature(feature: &Feature) -> Result<()> {
    match &feature.geometry {
        Some(geometry) => validate_value(&geometry.value),
        None => Err(Error::InvalidGeometry("feature has no geometry".to_string())),
    }
}

fn validate_value(value: &Value) -> Result<()> {
    match value {
        Value::Point(position) => validate_position(position),
        Value::MultiPoint(positions) => positions.iter().try_for_each(|p| validate_position(p)),
        Value::LineString(line) => validate_line(line),
        Value::MultiLineString(lines) => lines.iter().try_for_each(|l| validate_line(l)),
        Value::Polygon(rings) => validate_polygon(rings),
        Value::MultiPolygon(polygons) => polygons.iter().try_for_each(|p| validate_polygon(p)),
        Value::GeometryCollection(geometries) => {
            geometries.iter().try_for_each(|g| validate_value(&g.value))
        }
    }
}

fn validate_position(position: &Position) -> Result<()> {
    if position.len() < 2 || position.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidGeometry(format!(
            "invalid position {position:?}"
        )));
    }
    Ok(())
}

fn validate_line(line: &[Position]) -> Result<()> {
    if line.len() < 2 {
        return Err(Error::InvalidGeometry(
            "line string needs at least 2 positions".to_string(),
        ));
    }
    line.iter().try_for_each(|p| validate_position(p))
}

fn validate_polygon(rings: &[Vec<Position>]) -> Result<()> {
    if rings.is_empty() {
        return Err(Error::InvalidGeometry("polygon has no rings".to_string()));
    }
    for ring in rings {
        if ring.len() < 4 {
            return Err(Error::InvalidGeometry(
                "polygon ring needs at least 4 positions".to_string(),
            ));
        }
        ring.iter().try_for_each(|p| validate_position(p))?;
        if ring.first().map(|p| &p[..2]) != ring.last().map(|p| &p[..2]) {
            return Err(Error::InvalidGeometry(
                "polygon ring is not closed".to_string(),
            ));
        }
        if ring_self_intersects(ring) {
            return Err(Error::InvalidGeometry(
                "polygon ring intersects itself".to_string(),
            ));
        }
    }
    Ok(())
}

/// A ring edge tagged with its position, so sweep hits can be told apart
/// from the vertex shared by neighbouring edges.
#[derive(Clone, Copy, Debug)]
struct RingEdge {
    index: usize,
    line: Line<f64>,
}

impl Cross for RingEdge {
    type Scalar = f64;

    fn line(&self) -> LineOrPoint<f64> {
        self.line.into()
    }
}

/// Detects rings whose edges cross, touch or fold back onto each other.
///
/// Neighbouring edges may only share their common vertex; any other contact
/// between two edges makes the ring invalid. Runs a sweep over the edges, so
/// cost grows with the number of edges plus the number of contacts found.
fn ring_self_intersects(ring: &[Position]) -> bool {
    let edges: Vec<RingEdge> = ring
        .windows(2)
        .map(|pair| Line::new((pair[0][0], pair[0][1]), (pair[1][0], pair[1][1])))
        .filter(|line| line.start != line.end)
        .enumerate()
        .map(|(index, line)| RingEdge { index, line })
        .collect();
    let count = edges.len();

    Intersections::from_iter(edges).any(|(a, b, hit)| {
        let (first, second) = if a.index < b.index { (a, b) } else { (b, a) };
        let (i, j) = (first.index, second.index);
        match hit {
            LineIntersection::Collinear { .. } => true,
            LineIntersection::SinglePoint { intersection, .. } => {
                let shared = if j == i + 1 {
                    Some(first.line.end)
                } else if i == 0 && j == count - 1 {
                    Some(first.line.start)
                } else {
                    None
                };
                shared != Some(intersection)
            }
        }
    })
}
