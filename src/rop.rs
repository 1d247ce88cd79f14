use std::fmt;

use geo::{Contains, Point};

use crate::model::{FeatureId, PolygonCollection};

/// A reference/observation point feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub fid: FeatureId,
    pub location: Point<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RopProblem {
    pub fid: FeatureId,
    pub location: Point<f64>,
}

impl fmt::Display for RopProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reference point {} at ({:.3}, {:.3}) is not inside any sampling unit",
            self.fid,
            self.location.x(),
            self.location.y()
        )
    }
}

/// List the points that fall outside every sampling unit. Points on a unit
/// edge count as outside.
pub fn check_rop_containment(
    points: &[ReferencePoint],
    collection: &PolygonCollection,
) -> Vec<RopProblem> {
    points
        .iter()
        .filter(|p| {
            !collection
                .records
                .iter()
                .any(|r| r.geometry.contains(&p.location))
        })
        .map(|p| RopProblem {
            fid: p.fid,
            location: p.location,
        })
        .collect()
}
