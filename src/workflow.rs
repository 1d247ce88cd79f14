//! Orchestration of one validation run over a project.
//!
//! ```text
//! Idle -> Backup -> ValidateOverlap -> [ReconcileExtent] -> ValidateCoverage
//!      -> CheckAttributes -> Commit -> Done
//! ```
//!
//! Any failed check moves to `Fail` and ends the run without committing.

use std::fmt;

use tracing::{info, warn};

use crate::attributes::{check_attributes, AttributeProblem};
use crate::config::Context;
use crate::error::{Error, Result};
use crate::geometry::GeometryEngine;
use crate::model::{
    acres, Acreage, DomainSet, FeatureId, FieldKind, PolygonCollection, ReferenceBoundary,
    Snapshot,
};
use crate::reconcile::reconcile;
use crate::rop::{check_rop_containment, RopProblem};
use crate::store::ProjectStore;
use crate::topology::{validate, Rule, ViolationSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Backup,
    ValidateOverlap,
    ReconcileExtent,
    ValidateCoverage,
    CheckAttributes,
    Commit,
    Done,
    Fail,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Backup => "backup",
            Stage::ValidateOverlap => "validate-overlap",
            Stage::ReconcileExtent => "reconcile-extent",
            Stage::ValidateCoverage => "validate-coverage",
            Stage::CheckAttributes => "check-attributes",
            Stage::Commit => "commit",
            Stage::Done => "done",
            Stage::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// What went wrong, in terms a user can act on.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub rule: String,
    pub message: String,
    pub features: Vec<FeatureId>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)?;
        if !self.features.is_empty() {
            let ids: Vec<String> = self.features.iter().map(u64::to_string).collect();
            write!(f, " (features: {})", ids.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub boundary: ReferenceBoundary,
    pub acreage: Acreage,
    pub reconciled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailReport {
    /// The stage whose check failed.
    pub stage: Stage,
    pub diagnostic: Diagnostic,
    pub violations: Option<ViolationSet>,
    pub attribute_problems: Vec<AttributeProblem>,
    pub rop_problems: Vec<RopProblem>,
    /// Project state as loaded, before any mutation.
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pass(PassReport),
    Fail(Box<FailReport>),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass(_))
    }

    /// The stage the run ended in: `Done`, or the stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Outcome::Pass(_) => Stage::Done,
            Outcome::Fail(report) => report.stage,
        }
    }
}

/// Acreage of every record and every boundary part.
pub fn compute_acreage<E: GeometryEngine>(
    ctx: &Context<E>,
    collection: &PolygonCollection,
    boundary: &ReferenceBoundary,
) -> Acreage {
    let per_acre = ctx.config.square_units_per_acre;
    Acreage {
        records: collection
            .records
            .iter()
            .map(|r| (r.fid, acres(ctx.engine.area(&r.geometry), per_acre)))
            .collect(),
        boundary_parts: boundary
            .parts
            .iter()
            .map(|p| {
                let part = geo::MultiPolygon::new(vec![p.geometry.clone()]);
                acres(ctx.engine.area(&part), per_acre)
            })
            .collect(),
    }
}

pub struct Workflow<'a, E: GeometryEngine> {
    ctx: &'a Context<E>,
    domains: &'a DomainSet,
    stage: Stage,
}

impl<'a, E: GeometryEngine> Workflow<'a, E> {
    pub fn new(ctx: &'a Context<E>, domains: &'a DomainSet) -> Self {
        Self {
            ctx,
            domains,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        info!("Stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn fail(&mut self, report: FailReport) -> Outcome {
        warn!("Validation failed at {}: {}", report.stage, report.diagnostic);
        self.enter(Stage::Fail);
        Outcome::Fail(Box::new(report))
    }

    /// Run the whole pipeline against `store`.
    ///
    /// Precondition and engine failures are returned as `Err`. Topology and
    /// attribute problems end in [`Outcome::Fail`], and the store is then
    /// left untouched apart from scratch cleanup.
    pub fn run<S: ProjectStore>(&mut self, store: &mut S) -> Result<Outcome> {
        self.stage = Stage::Idle;

        if store.edit_session_active()? {
            return Err(Error::EditSessionOpen(store.describe()));
        }
        if let Some(field) = FieldKind::ENUMERATED
            .into_iter()
            .find(|f| self.domains.get(*f).is_none())
        {
            return Err(Error::MissingDomain(field));
        }

        store.clear_scratch()?;

        let collection = store.load_collection()?;
        let loaded_boundary = store.load_boundary()?;
        if loaded_boundary.is_empty() {
            return Err(Error::EmptyBoundary);
        }
        let tract = store.load_tract()?;
        if tract.0.is_empty() {
            return Err(Error::MissingTract);
        }
        let points = store.load_points()?;

        self.enter(Stage::Backup);
        let snapshot = Snapshot::take(&collection, &loaded_boundary);

        self.enter(Stage::ValidateOverlap);
        let overlaps = validate(self.ctx, &collection, Rule::MustNotOverlap)?;
        if !overlaps.is_empty() {
            let diagnostic = Diagnostic {
                rule: overlaps.rule.to_string(),
                message: format!(
                    "{} overlapping regions ({:.4} square units) between polygons",
                    overlaps.len(),
                    overlaps.total_area()
                ),
                features: overlaps.features(),
            };
            return Ok(self.fail(FailReport {
                stage: Stage::ValidateOverlap,
                diagnostic,
                violations: Some(overlaps),
                attribute_problems: Vec::new(),
                rop_problems: Vec::new(),
                snapshot,
            }));
        }

        let mut boundary = loaded_boundary;
        let mut reconciled = false;
        if collection.has_revisions() {
            self.enter(Stage::ReconcileExtent);
            let updated = reconcile(self.ctx, &collection, &boundary, &tract)?;
            reconciled = updated != boundary;
            boundary = updated;
        }

        self.enter(Stage::ValidateCoverage);
        let gaps = validate(self.ctx, &collection, Rule::MustExactlyCover(&boundary))?;
        if !gaps.is_empty() {
            let diagnostic = Diagnostic {
                rule: gaps.rule.to_string(),
                message: format!(
                    "{} gaps ({:.4} square units) between the polygons and the request extent",
                    gaps.len(),
                    gaps.total_area()
                ),
                features: Vec::new(),
            };
            return Ok(self.fail(FailReport {
                stage: Stage::ValidateCoverage,
                diagnostic,
                violations: Some(gaps),
                attribute_problems: Vec::new(),
                rop_problems: Vec::new(),
                snapshot,
            }));
        }

        self.enter(Stage::CheckAttributes);
        let problems = check_attributes(&self.ctx.config, &collection, self.domains)?;
        if let Some(first) = problems.first() {
            let diagnostic = Diagnostic {
                rule: first.rule.to_string(),
                message: first.to_string(),
                features: vec![first.fid],
            };
            return Ok(self.fail(FailReport {
                stage: Stage::CheckAttributes,
                diagnostic,
                violations: None,
                attribute_problems: problems,
                rop_problems: Vec::new(),
                snapshot,
            }));
        }

        let outside = check_rop_containment(&points, &collection);
        if let Some(first) = outside.first() {
            let diagnostic = Diagnostic {
                rule: "rop_containment".to_string(),
                message: first.to_string(),
                features: outside.iter().map(|p| p.fid).collect(),
            };
            return Ok(self.fail(FailReport {
                stage: Stage::CheckAttributes,
                diagnostic,
                violations: None,
                attribute_problems: Vec::new(),
                rop_problems: outside,
                snapshot,
            }));
        }

        self.enter(Stage::Commit);
        let acreage = compute_acreage(self.ctx, &collection, &boundary);
        store.commit(&boundary, &acreage)?;
        info!(
            "Committed {} boundary parts ({:.3} acres) and {} polygons ({:.3} acres)",
            boundary.parts.len(),
            acreage.total_boundary(),
            acreage.records.len(),
            acreage.total_records()
        );

        store.clear_scratch()?;
        self.enter(Stage::Done);

        Ok(Outcome::Pass(PassReport {
            boundary,
            acreage,
            reconciled,
        }))
    }
}
