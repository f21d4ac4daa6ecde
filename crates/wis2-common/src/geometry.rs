//! GeoJSON geometry primitives used in records and notifications.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;

/// A station position: longitude, latitude and optional elevation in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
    pub elevation: Option<f64>,
}

impl Point {
    pub fn new(lon: f64, lat: f64, elevation: Option<f64>) -> Self {
        Self {
            lon,
            lat,
            elevation,
        }
    }

    /// GeoJSON coordinate array, `[lon, lat]` or `[lon, lat, z]`.
    pub fn coordinates(&self) -> Vec<f64> {
        match self.elevation {
            Some(z) => vec![self.lon, self.lat, z],
            None => vec![self.lon, self.lat],
        }
    }
}

/// GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Vec<f64> },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

impl Geometry {
    pub fn point(point: &Point) -> Self {
        Geometry::Point {
            coordinates: point.coordinates(),
        }
    }

    /// Closed, counter-clockwise polygon ring around a bounding box.
    pub fn polygon(bbox: &BoundingBox) -> Self {
        let ring = vec![
            [bbox.min_x, bbox.min_y],
            [bbox.max_x, bbox.min_y],
            [bbox.max_x, bbox.max_y],
            [bbox.min_x, bbox.max_y],
            [bbox.min_x, bbox.min_y],
        ];
        Geometry::Polygon {
            coordinates: vec![ring],
        }
    }

    /// Bounding geometry of a set of points: a point when they coincide,
    /// otherwise the polygon of their envelope.
    pub fn bounding<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let points: Vec<&Point> = points.into_iter().collect();
        let bbox = BoundingBox::enclosing(points.iter().copied())?;
        if bbox.is_point() {
            // Keep the elevation when every point agrees on it.
            let first = points[0];
            let elevation = if points.iter().all(|p| p.elevation == first.elevation) {
                first.elevation
            } else {
                None
            };
            Some(Geometry::point(&Point::new(bbox.min_x, bbox.min_y, elevation)))
        } else {
            Some(Geometry::polygon(&bbox))
        }
    }
}
