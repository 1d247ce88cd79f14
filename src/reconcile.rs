use geo::MultiPolygon;
use tracing::{debug, info};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::geometry::{denoise, GeometryEngine};
use crate::model::{AdminKey, BoundaryPart, PolygonCollection, ReferenceBoundary};
use crate::topology::boundary_geometry;

/// Grow `boundary` so that it absorbs every `Revision` polygon lying outside
/// it.
///
/// The result always contains `boundary`, never extends past `tract`, and is
/// returned unchanged when no revision area falls outside, so calling this
/// twice in a row gives the same boundary both times.
pub fn reconcile<E: GeometryEngine>(
    ctx: &Context<E>,
    collection: &PolygonCollection,
    boundary: &ReferenceBoundary,
    tract: &MultiPolygon<f64>,
) -> Result<ReferenceBoundary> {
    let engine = &ctx.engine;
    let tolerance = ctx.tolerance();

    if tract.0.is_empty() || engine.area(tract) <= tolerance {
        return Err(Error::MissingTract);
    }
    engine.validate(tract)?;

    let current = boundary_geometry(engine, boundary)?;
    if current.0.is_empty() {
        return Err(Error::EmptyBoundary);
    }

    let overhang = denoise(engine.difference(&current, tract)?, tolerance);
    if !overhang.0.is_empty() {
        return Err(Error::BoundaryOutsideTract {
            area: engine.area(&overhang),
        });
    }

    let mut additions: Vec<(AdminKey, MultiPolygon<f64>)> = Vec::new();
    for record in collection.revisions() {
        engine.validate(&record.geometry)?;
        let outside = denoise(engine.difference(&record.geometry, &current)?, tolerance);
        if !outside.0.is_empty() {
            debug!(
                "Revision feature {} extends {:.4} square units outside the boundary",
                record.fid,
                engine.area(&outside)
            );
            additions.push((record.admin.clone(), outside));
        }
    }

    if additions.is_empty() {
        debug!("No revision area outside the boundary");
        return Ok(boundary.clone());
    }

    let before = engine.area(&current);

    // 既存の境界に追加分を合わせ、行政キーごとにディゾルブする
    let mut items: Vec<(AdminKey, MultiPolygon<f64>)> = boundary
        .parts
        .iter()
        .map(|p| (p.admin.clone(), MultiPolygon::new(vec![p.geometry.clone()])))
        .collect();
    items.extend(additions);
    let groups = engine.dissolve_by_key(items)?;

    let mut parts = Vec::new();
    for (admin, geometry) in groups {
        let clipped = denoise(engine.clip(&geometry, tract)?, tolerance);
        for polygon in engine.explode(&clipped) {
            parts.push(BoundaryPart {
                admin: admin.clone(),
                geometry: polygon,
            });
        }
    }

    if parts.is_empty() {
        return Err(Error::EmptyBoundary);
    }

    let reconciled = ReferenceBoundary::new(parts);
    let after = engine.area(&boundary_geometry(engine, &reconciled)?);
    info!(
        "Reference boundary grew from {:.4} to {:.4} square units ({} parts)",
        before,
        after,
        reconciled.parts.len()
    );

    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::geometry::tests::rect;
    use crate::geometry::GeoEngine;
    use crate::model::{Attributes, FeatureId, PolygonRecord};

    fn key(tract: &str) -> AdminKey {
        AdminKey {
            state_code: "19".to_string(),
            state_name: "Iowa".to_string(),
            county_code: "015".to_string(),
            county_name: "Boone".to_string(),
            tract_number: tract.to_string(),
        }
    }

    fn record(
        fid: FeatureId,
        status: &str,
        admin: AdminKey,
        geometry: MultiPolygon<f64>,
    ) -> PolygonRecord {
        PolygonRecord {
            fid,
            geometry,
            admin,
            attributes: Attributes {
                eval_status: Some(status.to_string()),
                ..Default::default()
            },
            acres: None,
        }
    }

    fn boundary(admin: AdminKey, geometry: MultiPolygon<f64>) -> ReferenceBoundary {
        ReferenceBoundary::new(
            geometry
                .0
                .into_iter()
                .map(|geometry| BoundaryPart {
                    admin: admin.clone(),
                    geometry,
                })
                .collect(),
        )
    }

    fn area(b: &ReferenceBoundary) -> f64 {
        GeoEngine.area(&boundary_geometry(&GeoEngine, b).unwrap())
    }

    #[test]
    fn test_no_revisions_leaves_boundary_unchanged() {
        let ctx = Context::new(ValidationConfig::default());
        let extent = boundary(key("100"), rect(0.0, 0.0, 10.0, 10.0));
        let collection = PolygonCollection::new(vec![record(
            1,
            "Certified",
            key("100"),
            rect(0.0, 0.0, 12.0, 10.0),
        )]);

        let result = reconcile(&ctx, &collection, &extent, &rect(0.0, 0.0, 20.0, 20.0)).unwrap();
        assert_eq!(result, extent);
    }

    #[test]
    fn test_revision_growth_is_clipped_to_tract() {
        let ctx = Context::new(ValidationConfig::default());
        let extent = boundary(key("100"), rect(0.0, 0.0, 10.0, 10.0));
        let collection = PolygonCollection::new(vec![record(
            1,
            "Revision",
            key("100"),
            rect(5.0, 0.0, 10.0, 14.0),
        )]);
        let tract = rect(0.0, 0.0, 12.0, 12.0);

        let result = reconcile(&ctx, &collection, &extent, &tract).unwrap();

        assert_eq!(result.parts.len(), 1);
        assert!((area(&result) - 110.0).abs() < 1e-6);
        let escaped = GeoEngine
            .difference(&boundary_geometry(&GeoEngine, &result).unwrap(), &tract)
            .unwrap();
        assert!(GeoEngine.area(&escaped) < 1e-9);
    }

    #[test]
    fn test_distinct_admin_keys_stay_separate() {
        let ctx = Context::new(ValidationConfig::default());
        let extent = boundary(key("100"), rect(0.0, 0.0, 10.0, 10.0));
        let collection = PolygonCollection::new(vec![record(
            1,
            "Revision",
            key("200"),
            rect(10.0, 0.0, 15.0, 10.0),
        )]);

        let result = reconcile(&ctx, &collection, &extent, &rect(0.0, 0.0, 20.0, 20.0)).unwrap();

        assert_eq!(result.parts.len(), 2);
        assert_eq!(result.parts[0].admin, key("100"));
        assert_eq!(result.parts[1].admin, key("200"));
        assert!((area(&result) - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_growth_is_exploded() {
        let ctx = Context::new(ValidationConfig::default());
        let extent = boundary(key("100"), rect(0.0, 0.0, 10.0, 10.0));
        let collection = PolygonCollection::new(vec![record(
            1,
            "Revision",
            key("100"),
            rect(12.0, 0.0, 14.0, 2.0),
        )]);

        let result = reconcile(&ctx, &collection, &extent, &rect(0.0, 0.0, 20.0, 20.0)).unwrap();
        assert_eq!(result.parts.len(), 2);
    }

    #[test]
    fn test_missing_tract_is_fatal() {
        let ctx = Context::new(ValidationConfig::default());
        let extent = boundary(key("100"), rect(0.0, 0.0, 10.0, 10.0));
        let collection = PolygonCollection::default();

        let err =
            reconcile(&ctx, &collection, &extent, &MultiPolygon::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::MissingTract));
    }

    #[test]
    fn test_boundary_outside_tract_is_fatal() {
        let ctx = Context::new(ValidationConfig::default());
        let extent = boundary(key("100"), rect(0.0, 0.0, 10.0, 10.0));
        let collection = PolygonCollection::default();

        let err = reconcile(&ctx, &collection, &extent, &rect(0.0, 0.0, 8.0, 10.0)).unwrap_err();
        assert!(matches!(err, Error::BoundaryOutsideTract { .. }));
    }

    #[test]
    fn test_empty_boundary_is_fatal() {
        let ctx = Context::new(ValidationConfig::default());
        let collection = PolygonCollection::default();

        let err = reconcile(
            &ctx,
            &collection,
            &ReferenceBoundary::default(),
            &rect(0.0, 0.0, 8.0, 10.0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyBoundary));
    }
}
