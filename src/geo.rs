//! Geographic primitives: points, the quadrilateral search region and distances.
//!
//! Coordinates are plain WGS84 degrees. Distances use the haversine formula on a
//! spherical earth, which is accurate enough for ranking sites inside a region.

use serde::{Deserialize, Serialize};
use crate::error::{PlannerError, Result};

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Number of vertices a region must have
pub const REGION_VERTICES: usize = 4;

/// A geographic point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lng: f64, lat: f64) -> Self {
        GeoPoint { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Great-circle distance to another point, in kilometers
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        // clamp guards against -0.0 and rounding noise on identical points
        (EARTH_RADIUS_KM * c).max(0.0)
    }
}

/// Axis-aligned bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        BoundingBox { min_lng, min_lat, max_lng, max_lat }
    }

    /// Bounding box of Ethiopia, the default area for synthetic datasets
    pub fn ethiopia() -> Self {
        BoundingBox::new(32.997583, 3.397448, 47.982379, 14.894053)
    }

    /// Regular `side x side` lattice spanning the box, row by row from the
    /// south-west corner. A single-point lattice sits at the box center.
    pub fn lattice(&self, side: usize) -> Vec<GeoPoint> {
        let axis = |lo: f64, hi: f64, k: usize| -> f64 {
            if side <= 1 {
                (lo + hi) / 2.0
            } else {
                lo + (hi - lo) * k as f64 / (side - 1) as f64
            }
        };

        let mut points = Vec::with_capacity(side * side);
        for row in 0..side {
            let lat = axis(self.min_lat, self.max_lat, row);
            for col in 0..side {
                points.push(GeoPoint::new(axis(self.min_lng, self.max_lng, col), lat));
            }
        }
        points
    }
}

/// The user-drawn quadrilateral inside which sites are selected.
///
/// Only the vertex count is validated; the caller is responsible for passing a
/// simple (non-self-intersecting) polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GeoPoint>", into = "Vec<GeoPoint>")]
pub struct Region {
    vertices: [GeoPoint; REGION_VERTICES],
}

impl Region {
    pub fn new(vertices: [GeoPoint; REGION_VERTICES]) -> Self {
        Region { vertices }
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for v in &self.vertices {
            bbox.min_lng = bbox.min_lng.min(v.lng);
            bbox.min_lat = bbox.min_lat.min(v.lat);
            bbox.max_lng = bbox.max_lng.max(v.lng);
            bbox.max_lat = bbox.max_lat.max(v.lat);
        }
        bbox
    }

    /// Even-odd ray casting point-in-polygon test
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let (x, y) = (point.lng, point.lat);
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;

        for i in 0..n {
            let (xi, yi) = (self.vertices[i].lng, self.vertices[i].lat);
            let (xj, yj) = (self.vertices[j].lng, self.vertices[j].lat);

            if (yi > y) != (yj > y) {
                let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
                if x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }

        inside
    }
}

impl TryFrom<Vec<GeoPoint>> for Region {
    type Error = PlannerError;

    fn try_from(points: Vec<GeoPoint>) -> Result<Self> {
        if points.len() != REGION_VERTICES {
            return Err(PlannerError::invalid(format!(
                "region must have exactly {} vertices, got {}",
                REGION_VERTICES,
                points.len()
            )));
        }
        if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
            return Err(PlannerError::invalid(format!("region vertex {:?} is not finite", bad)));
        }
        Ok(Region::new([points[0], points[1], points[2], points[3]]))
    }
}

impl From<Region> for Vec<GeoPoint> {
    fn from(region: Region) -> Self {
        region.vertices.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Region {
        Region::new([
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(0.0, 1.0),
        ])
    }

    #[test]
    fn test_contains() {
        let region = unit_square();
        assert!(region.contains(&GeoPoint::new(0.5, 0.5)));
        assert!(!region.contains(&GeoPoint::new(1.5, 0.5)));
        assert!(!region.contains(&GeoPoint::new(0.5, -0.1)));
    }

    #[test]
    fn test_contains_concave_quad() {
        // arrowhead pointing right, notch at (0.5, 0.5)
        let region = Region::new([
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(2.0, 0.5),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.5, 0.5),
        ]);
        assert!(region.contains(&GeoPoint::new(1.0, 0.5)));
        assert!(!region.contains(&GeoPoint::new(0.2, 0.5)));
    }

    #[test]
    fn test_distance() {
        let addis = GeoPoint::new(38.7578, 9.0301);
        assert_eq!(addis.distance_km(&addis), 0.0);

        // one degree of latitude is ~111.19 km
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        assert!((a.distance_km(&b) - 111.19).abs() < 0.01);
        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-12);
    }

    #[test]
    fn test_region_vertex_count() {
        let three = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(Region::try_from(three).is_err());

        let json = r#"[{"lat":0,"lng":0},{"lat":0,"lng":1},{"lat":1,"lng":1},{"lat":1,"lng":0}]"#;
        let region: Region = serde_json::from_str(json).unwrap();
        assert!(region.contains(&GeoPoint::new(0.5, 0.5)));
    }

    #[test]
    fn test_lattice() {
        let bbox = unit_square().bounding_box();
        let points = bbox.lattice(3);
        assert_eq!(points.len(), 9);
        assert_eq!(points[0], GeoPoint::new(0.0, 0.0));
        assert_eq!(points[8], GeoPoint::new(1.0, 1.0));
        assert_eq!(bbox.lattice(1), vec![GeoPoint::new(0.5, 0.5)]);
    }
}
