//! Geometry operands for `geo_within`.

use bson::{Bson, doc};

use crate::error::{FilterError, Result};

/// Longitude/latitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

/// Discriminator for loosely shaped coordinate lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoType {
    /// Closed ring of at least three distinct vertices.
    Polygon,
    /// Exactly two corners: bottom-left then top-right.
    BBox,
}

/// Area operand for a containment query.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Closed ring (first vertex equals last).
    Polygon(Vec<Point>),
    BoundingBox { bottom_left: Point, top_right: Point },
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    fn validate(&self) -> Result<()> {
        if !self.lon.is_finite() || !self.lat.is_finite() {
            return Err(invalid(format!("non-finite coordinate {self:?}")));
        }
        if !(-180.0..=180.0).contains(&self.lon) || !(-90.0..=90.0).contains(&self.lat) {
            return Err(invalid(format!(
                "coordinate ({}, {}) out of range",
                self.lon, self.lat
            )));
        }
        Ok(())
    }

    fn to_bson(self) -> Bson {
        Bson::Array(vec![Bson::Double(self.lon), Bson::Double(self.lat)])
    }
}

impl From<(f64, f64)> for Point {
    fn from((lon, lat): (f64, f64)) -> Self {
        Point::new(lon, lat)
    }
}

impl From<[f64; 2]> for Point {
    fn from([lon, lat]: [f64; 2]) -> Self {
        Point::new(lon, lat)
    }
}

fn invalid(msg: String) -> crate::error::QuerierError {
    FilterError::InvalidGeometry(msg).into()
}

impl Geometry {
    /// Build a polygon from its vertices, closing the ring if needed.
    pub fn polygon<I, P>(vertices: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Point>,
    {
        let mut ring: Vec<Point> = vertices.into_iter().map(Into::into).collect();
        for point in &ring {
            point.validate()?;
        }

        let mut distinct: Vec<Point> = Vec::with_capacity(ring.len());
        for point in &ring {
            if !distinct.contains(point) {
                distinct.push(*point);
            }
        }
        if distinct.len() < 3 {
            return Err(invalid(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        if ring.first() != ring.last() {
            ring.push(ring[0]);
        }
        Ok(Geometry::Polygon(ring))
    }

    /// Build an axis-aligned box from its bottom-left and top-right corners.
    pub fn bounding_box(bottom_left: impl Into<Point>, top_right: impl Into<Point>) -> Result<Self> {
        let bottom_left = bottom_left.into();
        let top_right = top_right.into();
        bottom_left.validate()?;
        top_right.validate()?;

        if bottom_left.lon > top_right.lon || bottom_left.lat > top_right.lat {
            return Err(invalid(format!(
                "bottom-left corner {bottom_left:?} is not below/left of top-right {top_right:?}"
            )));
        }
        Ok(Geometry::BoundingBox {
            bottom_left,
            top_right,
        })
    }

    /// Interpret a coordinate list according to `geo_type`.
    pub fn from_coordinates<I, P>(coordinates: I, geo_type: GeoType) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Point>,
    {
        match geo_type {
            GeoType::Polygon => Self::polygon(coordinates),
            GeoType::BBox => {
                let points: Vec<Point> = coordinates.into_iter().map(Into::into).collect();
                match points.as_slice() {
                    [bottom_left, top_right] => Self::bounding_box(*bottom_left, *top_right),
                    _ => Err(invalid(format!(
                        "bounding box needs exactly 2 corners, got {}",
                        points.len()
                    ))),
                }
            }
        }
    }

    pub fn geo_type(&self) -> GeoType {
        match self {
            Geometry::Polygon(_) => GeoType::Polygon,
            Geometry::BoundingBox { .. } => GeoType::BBox,
        }
    }

    /// Operand of the `$geoWithin` operator.
    pub(crate) fn to_operand(&self) -> Bson {
        match self {
            Geometry::Polygon(ring) => {
                let ring: Vec<Bson> = ring.iter().map(|p| p.to_bson()).collect();
                Bson::Document(doc! {
                    "$geometry": {
                        "type": "Polygon",
                        "coordinates": [ring],
                    }
                })
            }
            Geometry::BoundingBox {
                bottom_left,
                top_right,
            } => Bson::Document(doc! {
                "$box": [bottom_left.to_bson(), top_right.to_bson()],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Filter;
    use crate::error::QuerierError;

    fn spain_box() -> Vec<(f64, f64)> {
        vec![(-9.39, 35.95), (3.04, 43.75)]
    }

    #[test]
    fn test_polygon_is_closed() {
        let geometry = Geometry::polygon([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]).unwrap();
        let Geometry::Polygon(ring) = geometry else {
            panic!("expected polygon");
        };
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_polygon_needs_three_vertices() {
        let err = Geometry::polygon([(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, QuerierError::Filter(FilterError::InvalidGeometry(_))));
    }

    #[test]
    fn test_out_of_range_coordinate() {
        assert!(Geometry::bounding_box((0.0, 0.0), (181.0, 1.0)).is_err());
        assert!(Geometry::polygon([(0.0, f64::NAN), (1.0, 0.0), (1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_bbox_requires_two_corners() {
        let err = Geometry::from_coordinates(
            [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)],
            GeoType::BBox,
        )
        .unwrap_err();
        assert!(matches!(err, QuerierError::Filter(FilterError::InvalidGeometry(_))));

        assert!(Geometry::from_coordinates([(1.0, 1.0), (0.0, 0.0)], GeoType::BBox).is_err());
    }

    #[test]
    fn test_bbox_serializes_to_box() {
        let geometry = Geometry::from_coordinates(spain_box(), GeoType::BBox).unwrap();
        assert_eq!(geometry.geo_type(), GeoType::BBox);

        let mut filter = Filter::new();
        filter.geo_within("coordinates", geometry).unwrap();

        assert_eq!(
            filter.serialize(),
            doc! { "coordinates": { "$geoWithin": { "$box": [[-9.39, 35.95], [3.04, 43.75]] } } }
        );
    }

    #[test]
    fn test_polygon_serializes_to_geometry() {
        let geometry = Geometry::from_coordinates(
            [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
            GeoType::Polygon,
        )
        .unwrap();

        let mut filter = Filter::new();
        filter.geo_within("place.location", geometry).unwrap();

        assert_eq!(
            filter.serialize(),
            doc! {
                "place.location": {
                    "$geoWithin": {
                        "$geometry": {
                            "type": "Polygon",
                            "coordinates": [[[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]]],
                        }
                    }
                }
            }
        );
    }
}
