use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::collections::HashMap;
use wetland_topo::model::{self, SQUARE_METRES_PER_ACRE};
use wetland_topo::store::load_domains;
use wetland_topo::{
    Context, DatasetRef, Error, FieldKind, FieldNames, GdalStore, Outcome, Stage,
    ValidationConfig, Workflow,
};

#[pymodule]
fn wetland_topo(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyValidationResult>()?;
    m.add_function(wrap_pyfunction!(validate_project, m)?)?;
    m.add_function(wrap_pyfunction!(acres, m)?)?;
    Ok(())
}

#[pyclass(name = "ValidationResult")]
#[derive(Clone)]
pub struct PyValidationResult {
    #[pyo3(get)]
    pub passed: bool,
    #[pyo3(get)]
    pub stage: String,
    #[pyo3(get)]
    pub message: String,
    #[pyo3(get)]
    pub violation_count: usize,
    #[pyo3(get)]
    pub violation_area: f64,
    #[pyo3(get)]
    pub feature_ids: Vec<u64>,
}

impl From<Outcome> for PyValidationResult {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Pass(report) => PyValidationResult {
                passed: true,
                stage: Stage::Done.to_string(),
                message: format!(
                    "{} boundary parts, {:.3} acres",
                    report.boundary.parts.len(),
                    report.acreage.total_boundary()
                ),
                violation_count: 0,
                violation_area: 0.0,
                feature_ids: Vec::new(),
            },
            Outcome::Fail(report) => {
                let (violation_count, violation_area) = match &report.violations {
                    Some(violations) => (violations.len(), violations.total_area()),
                    None => (
                        report.attribute_problems.len() + report.rop_problems.len(),
                        0.0,
                    ),
                };
                PyValidationResult {
                    passed: false,
                    stage: report.stage.to_string(),
                    message: report.diagnostic.to_string(),
                    violation_count,
                    violation_area,
                    feature_ids: report.diagnostic.features.clone(),
                }
            }
        }
    }
}

#[pymethods]
impl PyValidationResult {
    fn __bool__(&self) -> bool {
        self.passed
    }

    fn __repr__(&self) -> String {
        format!(
            "ValidationResult(passed={}, stage='{}', violation_count={}, violation_area={})",
            if self.passed { "True" } else { "False" },
            self.stage,
            self.violation_count,
            self.violation_area
        )
    }
}

fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::MissingDataset(_) | Error::MissingLayer { .. } | Error::Store(_) => {
            PyErr::new::<PyIOError, _>(format!("Failed to access project: {}", e))
        }
        _ => PyErr::new::<PyValueError, _>(e.to_string()),
    }
}

fn parse_ref(value: &str) -> PyResult<DatasetRef> {
    value.parse().map_err(PyErr::new::<PyValueError, _>)
}

#[pyfunction]
#[pyo3(signature = (collection, boundary, tract, domains, rop=None))]
pub fn validate_project(
    collection: &str,
    boundary: &str,
    tract: &str,
    domains: HashMap<String, String>,
    rop: Option<&str>,
) -> PyResult<PyValidationResult> {
    let mut refs = Vec::with_capacity(domains.len());
    for (field, target) in &domains {
        let field: FieldKind = field.parse().map_err(PyErr::new::<PyValueError, _>)?;
        refs.push((field, parse_ref(target)?));
    }
    refs.sort_by_key(|(field, _)| *field);
    let domains = load_domains(&refs).map_err(to_py_err)?;

    let rop = rop.map(parse_ref).transpose()?;
    let mut store = GdalStore::new(
        parse_ref(collection)?,
        parse_ref(boundary)?,
        parse_ref(tract)?,
        FieldNames::default(),
    )
    .with_points(rop);

    let ctx = Context::new(ValidationConfig::default());
    let outcome = Workflow::new(&ctx, &domains)
        .run(&mut store)
        .map_err(to_py_err)?;

    if let Outcome::Fail(report) = &outcome {
        if let Some(violations) = &report.violations {
            store.export_violations(violations).map_err(to_py_err)?;
        }
    }
    Ok(outcome.into())
}

#[pyfunction]
#[pyo3(signature = (area, square_units_per_acre=SQUARE_METRES_PER_ACRE))]
pub fn acres(area: f64, square_units_per_acre: f64) -> f64 {
    model::acres(area, square_units_per_acre)
}
