/*!
 * Area-of-interest geometry.
 *
 * The heavy lifting is done by the `geo` crate; this module only wraps a
 * multipolygon with the parsing and the point predicate the rest of the crate
 * needs.
 */

use crate::error::{SwathPixError, SwathPixResult};
use geo::{Geometry, Intersects, MultiPolygon, Point, Polygon};
use wkt::{ToWkt, TryFromWkt};

/// A polygon (or multipolygon) used purely as a spatial predicate.
///
/// Points on the boundary count as inside, so edge pixels of an area are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest(MultiPolygon<f64>);

impl AreaOfInterest {
    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        AreaOfInterest(MultiPolygon::new(vec![polygon]))
    }

    pub fn from_multi_polygon(multi_polygon: MultiPolygon<f64>) -> Self {
        AreaOfInterest(multi_polygon)
    }

    /// Parse a well-known-text POLYGON or MULTIPOLYGON.
    pub fn from_wkt(wkt_str: &str) -> SwathPixResult<Self> {
        let geometry: Geometry<f64> = Geometry::try_from_wkt_str(wkt_str)
            .map_err(|err| SwathPixError::InvalidGeometry(format!("{err}")))?;

        match geometry {
            Geometry::Polygon(polygon) => Ok(Self::from_polygon(polygon)),
            Geometry::MultiPolygon(multi_polygon) => Ok(AreaOfInterest(multi_polygon)),
            _ => Err(SwathPixError::InvalidGeometry(
                "expected a POLYGON or MULTIPOLYGON".to_string(),
            )),
        }
    }

    /// Does the point at (`lon`, `lat`) intersect this area?
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.0.intersects(&Point::new(lon, lat))
    }

    /// Render back to well-known-text, e.g. for a catalog search request.
    pub fn to_wkt(&self) -> String {
        self.0.wkt_string()
    }

    pub fn as_multi_polygon(&self) -> &MultiPolygon<f64> {
        &self.0
    }
}
