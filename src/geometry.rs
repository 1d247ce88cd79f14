//! Polygon set operations used by the validator and the reconciler.
//!
//! Everything above this module talks to a [`GeometryEngine`] so that the
//! core algorithms can be exercised without a GIS toolkit. [`GeoEngine`] is
//! the default implementation on top of the `geo` crate.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, BoundingRect, Euclidean, Intersects, Length, MultiPolygon, Polygon};
use thiserror::Error;

use crate::model::AdminKey;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("non-finite coordinate in polygon {polygon}")]
    NonFinite { polygon: usize },

    #[error("ring {ring} of polygon {polygon} has {len} coordinates; at least 4 are required")]
    ShortRing {
        polygon: usize,
        ring: usize,
        len: usize,
    },

    #[error("exterior ring of polygon {polygon} encloses no area")]
    ZeroArea { polygon: usize },
}

pub type GeometryResult<T> = std::result::Result<T, GeometryError>;

pub trait GeometryEngine: Sync {
    fn union(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>>;

    fn difference(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>>;

    fn intersection(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>>;

    /// Restrict `a` to the area of `mask`.
    fn clip(
        &self,
        a: &MultiPolygon<f64>,
        mask: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>> {
        self.intersection(a, mask)
    }

    /// Union of all inputs into one geometry.
    fn dissolve(&self, parts: &[MultiPolygon<f64>]) -> GeometryResult<MultiPolygon<f64>> {
        parts
            .iter()
            .try_fold(MultiPolygon::new(Vec::new()), |acc, part| self.union(&acc, part))
    }

    /// Union per key. Groups with different keys are never merged, even when
    /// they touch. Output is ordered by key.
    fn dissolve_by_key(
        &self,
        items: Vec<(AdminKey, MultiPolygon<f64>)>,
    ) -> GeometryResult<Vec<(AdminKey, MultiPolygon<f64>)>> {
        let mut groups: BTreeMap<AdminKey, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for (key, geometry) in items {
            groups.entry(key).or_default().push(geometry);
        }
        groups
            .into_iter()
            .map(|(key, parts)| Ok((key, self.dissolve(&parts)?)))
            .collect()
    }

    /// Split into single-part polygons.
    fn explode(&self, mp: &MultiPolygon<f64>) -> Vec<Polygon<f64>> {
        mp.0.clone()
    }

    fn area(&self, mp: &MultiPolygon<f64>) -> f64;

    /// Cheap prefilter: true when the bounding boxes of `a` and `b` meet.
    fn bbox_intersects(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool;

    /// Reject geometry the engine cannot operate on.
    fn validate(&self, mp: &MultiPolygon<f64>) -> GeometryResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoEngine;

impl GeometryEngine for GeoEngine {
    fn union(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>> {
        if a.0.is_empty() {
            return Ok(b.clone());
        }
        if b.0.is_empty() {
            return Ok(a.clone());
        }
        Ok(a.union(b))
    }

    fn difference(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>> {
        if a.0.is_empty() || b.0.is_empty() {
            return Ok(a.clone());
        }
        Ok(a.difference(b))
    }

    fn intersection(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> GeometryResult<MultiPolygon<f64>> {
        if a.0.is_empty() || b.0.is_empty() {
            return Ok(MultiPolygon::new(Vec::new()));
        }
        Ok(a.intersection(b))
    }

    fn area(&self, mp: &MultiPolygon<f64>) -> f64 {
        mp.unsigned_area()
    }

    fn bbox_intersects(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
        match (a.bounding_rect(), b.bounding_rect()) {
            (Some(ra), Some(rb)) => ra.intersects(&rb),
            _ => false,
        }
    }

    fn validate(&self, mp: &MultiPolygon<f64>) -> GeometryResult<()> {
        for (index, polygon) in mp.0.iter().enumerate() {
            let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
            for (ring_index, ring) in rings.enumerate() {
                if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                    return Err(GeometryError::NonFinite { polygon: index });
                }
                if ring.0.len() < 4 {
                    return Err(GeometryError::ShortRing {
                        polygon: index,
                        ring: ring_index,
                        len: ring.0.len(),
                    });
                }
            }
            if Polygon::new(polygon.exterior().clone(), Vec::new()).unsigned_area() == 0.0 {
                return Err(GeometryError::ZeroArea { polygon: index });
            }
        }
        Ok(())
    }
}

pub fn perimeter(polygon: &Polygon<f64>) -> f64 {
    polygon.exterior().length::<Euclidean>()
        + polygon
            .interiors()
            .iter()
            .map(|ring| ring.length::<Euclidean>())
            .sum::<f64>()
}

/// A polygon is noise when its area, or its mean width, is within the
/// cluster tolerance. Slivers left along shared edges by floating-point
/// rounding fall into the second case.
pub fn is_noise(polygon: &Polygon<f64>, tolerance: f64) -> bool {
    let area = polygon.unsigned_area();
    if area <= tolerance {
        return true;
    }
    let perimeter = perimeter(polygon);
    perimeter > 0.0 && 2.0 * area / perimeter <= tolerance
}

/// Drop every noise polygon.
pub fn denoise(mp: MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(
        mp.0
            .into_iter()
            .filter(|p| !is_noise(p, tolerance))
            .collect(),
    )
}
