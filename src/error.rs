use std::path::PathBuf;

use thiserror::Error;

use crate::geometry::GeometryError;
use crate::model::FieldKind;

/// Fatal failures of a validation run.
///
/// Topology and attribute violations are not errors; they are reported as
/// data through [`crate::workflow::Outcome::Fail`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("dataset not found: {0}")]
    MissingDataset(PathBuf),

    #[error("layer '{layer}' not found in {path}")]
    MissingLayer { path: PathBuf, layer: String },

    #[error("an edit session is open on {0}; save or discard edits and try again")]
    EditSessionOpen(String),

    #[error("tract boundary is missing or empty")]
    MissingTract,

    #[error("no domain table supplied for enumerated field '{0}'")]
    MissingDomain(FieldKind),

    #[error("reference boundary would be left with no features")]
    EmptyBoundary,

    #[error("reference boundary extends {area:.4} square units past the tract boundary")]
    BoundaryOutsideTract { area: f64 },

    #[error("geometry engine failure: {0}")]
    Geometry(#[from] GeometryError),

    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
