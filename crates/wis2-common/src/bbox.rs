//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// A geographic bounding box in degrees (EPSG:4326).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Degenerate box covering a single point.
    pub fn from_point(point: &Point) -> Self {
        Self::new(point.lon, point.lat, point.lon, point.lat)
    }

    /// Envelope of all given points, or `None` when there are none.
    pub fn enclosing<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::from_point(first);
        for point in iter {
            bbox.extend(point);
        }
        Some(bbox)
    }

    /// Grow the box to include a point.
    pub fn extend(&mut self, point: &Point) {
        self.min_x = self.min_x.min(point.lon);
        self.min_y = self.min_y.min(point.lat);
        self.max_x = self.max_x.max(point.lon);
        self.max_y = self.max_y.max(point.lat);
    }

    /// Width of the bounding box in degrees.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in degrees.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the box has collapsed to a single position.
    pub fn is_point(&self) -> bool {
        self.width() == 0.0 && self.height() == 0.0
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_points() {
        let points = vec![
            Point::new(33.5, -14.2, None),
            Point::new(35.0, -15.8, Some(1200.0)),
            Point::new(34.1, -13.0, None),
        ];
        let bbox = BoundingBox::enclosing(&points).unwrap();
        assert_eq!(bbox.min_x, 33.5);
        assert_eq!(bbox.max_x, 35.0);
        assert_eq!(bbox.min_y, -15.8);
        assert_eq!(bbox.max_y, -13.0);
        assert!(bbox.contains_point(34.0, -14.0));
        assert!(!bbox.is_point());
    }

    #[test]
    fn test_enclosing_empty() {
        let points: Vec<Point> = Vec::new();
        assert!(BoundingBox::enclosing(&points).is_none());
    }

    #[test]
    fn test_single_point_box() {
        let bbox = BoundingBox::from_point(&Point::new(10.0, 20.0, None));
        assert!(bbox.is_point());
    }
}
