pub mod attributes;
pub mod config;
pub mod error;
pub mod geometry;
pub mod model;
pub mod reconcile;
pub mod rop;
pub mod store;
pub mod topology;
pub mod workflow;

pub use config::{Context, FieldNames, ValidationConfig};
pub use error::{Error, Result};
pub use geometry::{GeoEngine, GeometryEngine};
pub use model::{
    AdminKey, Attributes, BoundaryPart, Domain, DomainSet, EvalStatus, FieldKind,
    PolygonCollection, PolygonRecord, ReferenceBoundary, Snapshot,
};
pub use store::{DatasetRef, GdalStore, MemoryStore, ProjectStore};
pub use topology::{validate, Rule, RuleId, ViolationSet};
pub use workflow::{Outcome, Stage, Workflow};
