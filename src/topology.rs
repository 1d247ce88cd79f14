use std::collections::BTreeSet;
use std::fmt;

use geo::{MultiPolygon, Polygon};
use rayon::prelude::*;
use tracing::debug;

use crate::config::Context;
use crate::error::Result;
use crate::geometry::{denoise, GeometryEngine};
use crate::model::{FeatureId, PolygonCollection, ReferenceBoundary};

/// A topology rule evaluated against a polygon collection.
#[derive(Debug, Clone, Copy)]
pub enum Rule<'a> {
    MustNotOverlap,
    MustExactlyCover(&'a ReferenceBoundary),
}

impl Rule<'_> {
    pub fn id(&self) -> RuleId {
        match self {
            Rule::MustNotOverlap => RuleId::Overlap,
            Rule::MustExactlyCover(_) => RuleId::Gap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    Overlap,
    Gap,
}

impl RuleId {
    pub fn name(self) -> &'static str {
        match self {
            RuleId::Overlap => "overlap",
            RuleId::Gap => "gap",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One contiguous violating region.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub geometry: Polygon<f64>,
    pub area: f64,
    /// Features taking part in the violation, when they can be identified.
    pub features: Vec<FeatureId>,
}

/// Result of a single validation pass. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationSet {
    pub rule: RuleId,
    pub violations: Vec<Violation>,
}

impl ViolationSet {
    pub fn empty(rule: RuleId) -> Self {
        Self {
            rule,
            violations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn total_area(&self) -> f64 {
        self.violations.iter().map(|v| v.area).sum()
    }

    pub fn features(&self) -> Vec<FeatureId> {
        self.violations
            .iter()
            .flat_map(|v| v.features.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn to_multipolygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(self.violations.iter().map(|v| v.geometry.clone()).collect())
    }
}

/// Evaluate `rule` against `collection`. Never mutates its inputs; a
/// non-empty result is data, not an error.
pub fn validate<E: GeometryEngine>(
    ctx: &Context<E>,
    collection: &PolygonCollection,
    rule: Rule<'_>,
) -> Result<ViolationSet> {
    for record in &collection.records {
        ctx.engine.validate(&record.geometry)?;
    }

    let set = match rule {
        Rule::MustNotOverlap => overlaps(ctx, collection)?,
        Rule::MustExactlyCover(boundary) => gaps(ctx, collection, boundary)?,
    };

    debug!(
        "Rule {} found {} violations ({:.4} square units)",
        set.rule,
        set.len(),
        set.total_area()
    );
    Ok(set)
}

struct PairOverlap {
    features: [FeatureId; 2],
    geometry: MultiPolygon<f64>,
}

fn overlaps<E: GeometryEngine>(
    ctx: &Context<E>,
    collection: &PolygonCollection,
) -> Result<ViolationSet> {
    let engine = &ctx.engine;
    let tolerance = ctx.tolerance();
    let records = &collection.records;

    // 各レコードを起点に後続レコードとの交差を並列で求める
    let pairs: Vec<Vec<PairOverlap>> = (0..records.len())
        .into_par_iter()
        .map(|i| -> Result<Vec<PairOverlap>> {
            let mut found = Vec::new();
            for j in (i + 1)..records.len() {
                let (a, b) = (&records[i], &records[j]);
                if !engine.bbox_intersects(&a.geometry, &b.geometry) {
                    continue;
                }
                let shared = denoise(engine.intersection(&a.geometry, &b.geometry)?, tolerance);
                if !shared.0.is_empty() {
                    found.push(PairOverlap {
                        features: [a.fid, b.fid],
                        geometry: shared,
                    });
                }
            }
            Ok(found)
        })
        .collect::<Result<_>>()?;
    let pairs: Vec<PairOverlap> = pairs.into_iter().flatten().collect();

    if pairs.is_empty() {
        return Ok(ViolationSet::empty(RuleId::Overlap));
    }

    let geometries: Vec<MultiPolygon<f64>> = pairs.iter().map(|p| p.geometry.clone()).collect();
    let merged = denoise(engine.dissolve(&geometries)?, tolerance);

    let mut violations = Vec::new();
    for region in engine.explode(&merged) {
        let region_mp = MultiPolygon::new(vec![region.clone()]);
        let mut features = BTreeSet::new();
        for pair in &pairs {
            if !engine.bbox_intersects(&pair.geometry, &region_mp) {
                continue;
            }
            let common = engine.intersection(&pair.geometry, &region_mp)?;
            if engine.area(&common) > tolerance {
                features.extend(pair.features);
            }
        }
        violations.push(Violation {
            area: engine.area(&region_mp),
            geometry: region,
            features: features.into_iter().collect(),
        });
    }

    Ok(ViolationSet {
        rule: RuleId::Overlap,
        violations,
    })
}

fn gaps<E: GeometryEngine>(
    ctx: &Context<E>,
    collection: &PolygonCollection,
    boundary: &ReferenceBoundary,
) -> Result<ViolationSet> {
    let engine = &ctx.engine;
    let tolerance = ctx.tolerance();

    let boundary_geometry = boundary_geometry(engine, boundary)?;
    let geometries: Vec<MultiPolygon<f64>> = collection
        .records
        .iter()
        .map(|r| r.geometry.clone())
        .collect();
    let covered = engine.dissolve(&geometries)?;
    let clipped = engine.clip(&covered, &boundary_geometry)?;

    let uncovered = engine.difference(&boundary_geometry, &clipped)?;
    let excess = engine.difference(&clipped, &boundary_geometry)?;
    let symmetric = denoise(engine.union(&uncovered, &excess)?, tolerance);

    let violations = engine
        .explode(&symmetric)
        .into_iter()
        .map(|gap| Violation {
            area: engine.area(&MultiPolygon::new(vec![gap.clone()])),
            geometry: gap,
            features: Vec::new(),
        })
        .collect();

    Ok(ViolationSet {
        rule: RuleId::Gap,
        violations,
    })
}

/// Validated union of all boundary parts.
pub(crate) fn boundary_geometry<E: GeometryEngine>(
    engine: &E,
    boundary: &ReferenceBoundary,
) -> Result<MultiPolygon<f64>> {
    let parts: Vec<MultiPolygon<f64>> = boundary
        .parts
        .iter()
        .map(|p| MultiPolygon::new(vec![p.geometry.clone()]))
        .collect();
    for part in &parts {
        engine.validate(part)?;
    }
    Ok(engine.dissolve(&parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use crate::config::{Context, ValidationConfig};
    use crate::geometry::tests::rect;
    use crate::model::{AdminKey, Attributes, BoundaryPart, PolygonRecord};

    fn record(fid: FeatureId, geometry: MultiPolygon<f64>) -> PolygonRecord {
        PolygonRecord {
            fid,
            geometry,
            admin: AdminKey::default(),
            attributes: Attributes::default(),
            acres: None,
        }
    }

    fn boundary(geometry: MultiPolygon<f64>) -> ReferenceBoundary {
        ReferenceBoundary::new(
            geometry
                .0
                .into_iter()
                .map(|geometry| BoundaryPart {
                    admin: AdminKey::default(),
                    geometry,
                })
                .collect(),
        )
    }

    #[test]
    fn test_adjacent_polygons_do_not_overlap() {
        let ctx = Context::new(ValidationConfig::default());
        let collection = PolygonCollection::new(vec![
            record(1, rect(0.0, 0.0, 5.0, 10.0)),
            record(2, rect(5.0, 0.0, 10.0, 10.0)),
        ]);

        let set = validate(&ctx, &collection, Rule::MustNotOverlap).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.rule, RuleId::Overlap);
    }

    #[test]
    fn test_overlap_regions_are_contiguous() {
        let ctx = Context::new(ValidationConfig::default());
        // 1 and 2 overlap, 2 and 3 overlap in a region touching the first
        let collection = PolygonCollection::new(vec![
            record(1, rect(0.0, 0.0, 4.0, 4.0)),
            record(2, rect(3.0, 0.0, 6.0, 4.0)),
            record(3, rect(3.0, 3.0, 8.0, 8.0)),
            record(4, rect(20.0, 20.0, 22.0, 22.0)),
        ]);

        let set = validate(&ctx, &collection, Rule::MustNotOverlap).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.violations[0].features, vec![1, 2, 3]);
        // 1x4 strip and 3x1 strip share the 1x1 cell at (3..4, 3..4)
        assert!((set.total_area() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_overlaps_are_reported_separately() {
        let ctx = Context::new(ValidationConfig::default());
        let collection = PolygonCollection::new(vec![
            record(1, rect(0.0, 0.0, 2.0, 2.0)),
            record(2, rect(1.0, 1.0, 3.0, 3.0)),
            record(3, rect(10.0, 0.0, 12.0, 2.0)),
            record(4, rect(11.0, 1.0, 13.0, 3.0)),
        ]);

        let set = validate(&ctx, &collection, Rule::MustNotOverlap).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.features(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_long_thin_overlap_is_noise() {
        let ctx = Context::new(ValidationConfig::default());
        // 1000 x 0.0008: area 0.8, mean width below the tolerance
        let collection = PolygonCollection::new(vec![
            record(1, rect(0.0, 0.0, 1000.0, 10.0)),
            record(2, rect(0.0, 9.9992, 1000.0, 20.0)),
        ]);

        let set = validate(&ctx, &collection, Rule::MustNotOverlap).unwrap();
        assert!(set.is_empty());

        let tight = Context::new(ValidationConfig::default().with_cluster_tolerance(0.0001));
        let set = validate(&tight, &collection, Rule::MustNotOverlap).unwrap();
        assert_eq!(set.len(), 1);
        assert!((set.total_area() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_coverage_ignores_area_outside_boundary() {
        let ctx = Context::new(ValidationConfig::default());
        let collection = PolygonCollection::new(vec![record(1, rect(-1.0, -1.0, 11.0, 11.0))]);
        let extent = boundary(rect(0.0, 0.0, 10.0, 10.0));

        let set = validate(&ctx, &collection, Rule::MustExactlyCover(&extent)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_sliver_gaps_below_tolerance_are_noise() {
        let ctx = Context::new(ValidationConfig::default());
        let collection = PolygonCollection::new(vec![
            record(1, rect(0.0, 0.0, 4.9995, 10.0)),
            record(2, rect(5.0, 0.0, 10.0, 10.0)),
        ]);
        let extent = boundary(rect(0.0, 0.0, 10.0, 10.0));

        let set = validate(&ctx, &collection, Rule::MustExactlyCover(&extent)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_degenerate_geometry_is_an_error() {
        let ctx = Context::new(ValidationConfig::default());
        let flat = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]]);
        let collection = PolygonCollection::new(vec![record(1, flat)]);

        assert!(validate(&ctx, &collection, Rule::MustNotOverlap).is_err());
    }
}
