//! Access to one project's datasets.

use geo::MultiPolygon;

use crate::error::Result;
use crate::model::{Acreage, PolygonCollection, ReferenceBoundary};
use crate::rop::ReferencePoint;

pub mod dataset;

pub use self::dataset::{load_domains, DatasetRef, GdalStore};

/// Source and sink of project data for the workflow.
///
/// Only [`ProjectStore::commit`] and [`ProjectStore::clear_scratch`] write
/// anything, and the workflow calls `commit` only after every check passed.
pub trait ProjectStore {
    /// Short label used in diagnostics.
    fn describe(&self) -> String;

    /// Whether another process holds an open edit session on the project.
    fn edit_session_active(&self) -> Result<bool>;

    fn load_collection(&self) -> Result<PolygonCollection>;

    fn load_boundary(&self) -> Result<ReferenceBoundary>;

    fn load_tract(&self) -> Result<MultiPolygon<f64>>;

    /// Reference points to check for containment. None by default.
    fn load_points(&self) -> Result<Vec<ReferencePoint>> {
        Ok(Vec::new())
    }

    /// Persist the reconciled boundary and recalculated acreage.
    fn commit(&mut self, boundary: &ReferenceBoundary, acreage: &Acreage) -> Result<()>;

    /// Remove scratch artifacts left by earlier runs.
    fn clear_scratch(&mut self) -> Result<()>;
}

/// In-memory project, used by tests and by callers that already hold the
/// data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    pub collection: PolygonCollection,
    pub boundary: ReferenceBoundary,
    pub tract: MultiPolygon<f64>,
    pub points: Vec<ReferencePoint>,
    pub edit_session: bool,
    pub commits: Vec<(ReferenceBoundary, Acreage)>,
    pub scratch_clears: usize,
}

impl MemoryStore {
    pub fn new(
        collection: PolygonCollection,
        boundary: ReferenceBoundary,
        tract: MultiPolygon<f64>,
    ) -> Self {
        Self {
            collection,
            boundary,
            tract,
            points: Vec::new(),
            edit_session: false,
            commits: Vec::new(),
            scratch_clears: 0,
        }
    }

    pub fn with_points(mut self, points: Vec<ReferencePoint>) -> Self {
        self.points = points;
        self
    }
}

impl ProjectStore for MemoryStore {
    fn describe(&self) -> String {
        "in-memory project".to_string()
    }

    fn edit_session_active(&self) -> Result<bool> {
        Ok(self.edit_session)
    }

    fn load_collection(&self) -> Result<PolygonCollection> {
        Ok(self.collection.clone())
    }

    fn load_boundary(&self) -> Result<ReferenceBoundary> {
        Ok(self.boundary.clone())
    }

    fn load_tract(&self) -> Result<MultiPolygon<f64>> {
        Ok(self.tract.clone())
    }

    fn load_points(&self) -> Result<Vec<ReferencePoint>> {
        Ok(self.points.clone())
    }

    fn commit(&mut self, boundary: &ReferenceBoundary, acreage: &Acreage) -> Result<()> {
        self.boundary = boundary.clone();
        for (fid, value) in &acreage.records {
            if let Some(record) = self.collection.records.iter_mut().find(|r| r.fid == *fid) {
                record.acres = Some(*value);
            }
        }
        self.commits.push((boundary.clone(), acreage.clone()));
        Ok(())
    }

    fn clear_scratch(&mut self) -> Result<()> {
        self.scratch_clears += 1;
        Ok(())
    }
}
