//! Attribute completeness and domain membership checks.
//!
//! Checks run by category in a fixed order (required fields, domain codes,
//! occurrence year, three-factor resolution), each category across every
//! record. How far a pass goes is decided by the [`ProblemSink`]: the default
//! [`FailFast`] sink stops at the first problem.

use std::fmt;
use std::ops::ControlFlow;

use tracing::debug;

use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::model::{DomainSet, FeatureId, FieldKind, PolygonCollection, PolygonRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeRule {
    Required,
    Domain,
    OccurrenceYear,
    ThreeFactor,
}

impl AttributeRule {
    pub const ORDER: [AttributeRule; 4] = [
        AttributeRule::Required,
        AttributeRule::Domain,
        AttributeRule::OccurrenceYear,
        AttributeRule::ThreeFactor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AttributeRule::Required => "required",
            AttributeRule::Domain => "domain",
            AttributeRule::OccurrenceYear => "occurrence_year",
            AttributeRule::ThreeFactor => "three_factor",
        }
    }
}

impl fmt::Display for AttributeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeProblem {
    pub fid: FeatureId,
    pub field: FieldKind,
    pub rule: AttributeRule,
    /// The offending value, if the field was populated.
    pub value: Option<String>,
}

impl fmt::Display for AttributeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.value.as_deref().unwrap_or("");
        match self.rule {
            AttributeRule::Required => write!(
                f,
                "feature {}: required field '{}' is empty",
                self.fid, self.field
            ),
            AttributeRule::Domain => write!(
                f,
                "feature {}: '{}' is not a valid code for '{}'",
                self.fid, value, self.field
            ),
            AttributeRule::OccurrenceYear if self.value.is_none() => write!(
                f,
                "feature {}: occurrence year is required for this wetland label",
                self.fid
            ),
            AttributeRule::OccurrenceYear => write!(
                f,
                "feature {}: occurrence year '{}' is not a valid year in range",
                self.fid, value
            ),
            AttributeRule::ThreeFactor => write!(
                f,
                "feature {}: three-factor flag '{}' must be resolved to yes or no",
                self.fid, value
            ),
        }
    }
}

/// Receives problems as they are found and decides whether checking goes on.
pub trait ProblemSink {
    fn report(&mut self, problem: AttributeProblem) -> ControlFlow<()>;
}

/// Stops at the first problem.
#[derive(Debug, Default)]
pub struct FailFast {
    problem: Option<AttributeProblem>,
}

impl FailFast {
    pub fn into_problems(self) -> Vec<AttributeProblem> {
        self.problem.into_iter().collect()
    }
}

impl ProblemSink for FailFast {
    fn report(&mut self, problem: AttributeProblem) -> ControlFlow<()> {
        self.problem = Some(problem);
        ControlFlow::Break(())
    }
}

/// Gathers every problem in one pass.
#[derive(Debug, Default)]
pub struct CollectAll {
    problems: Vec<AttributeProblem>,
}

impl CollectAll {
    pub fn into_problems(self) -> Vec<AttributeProblem> {
        self.problems
    }
}

impl ProblemSink for CollectAll {
    fn report(&mut self, problem: AttributeProblem) -> ControlFlow<()> {
        self.problems.push(problem);
        ControlFlow::Continue(())
    }
}

/// Check `collection` with the default fail-fast policy.
pub fn check_attributes(
    config: &ValidationConfig,
    collection: &PolygonCollection,
    domains: &DomainSet,
) -> Result<Vec<AttributeProblem>> {
    let mut sink = FailFast::default();
    check_attributes_with(config, collection, domains, &mut sink)?;
    Ok(sink.into_problems())
}

/// Check `collection`, handing each problem to `sink`.
///
/// Fails only when a domain table for an enumerated field is missing.
pub fn check_attributes_with<S: ProblemSink>(
    config: &ValidationConfig,
    collection: &PolygonCollection,
    domains: &DomainSet,
    sink: &mut S,
) -> Result<()> {
    if let Some(field) = FieldKind::ENUMERATED
        .into_iter()
        .find(|f| domains.get(*f).is_none())
    {
        return Err(Error::MissingDomain(field));
    }

    for rule in AttributeRule::ORDER {
        debug!("Checking attribute rule {}", rule);
        for record in &collection.records {
            if check_record(config, domains, rule, record, sink).is_break() {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn check_record<S: ProblemSink>(
    config: &ValidationConfig,
    domains: &DomainSet,
    rule: AttributeRule,
    record: &PolygonRecord,
    sink: &mut S,
) -> ControlFlow<()> {
    let attrs = &record.attributes;
    let problem = |field: FieldKind, value: Option<&str>| AttributeProblem {
        fid: record.fid,
        field,
        rule,
        value: value.map(str::to_string),
    };

    match rule {
        AttributeRule::Required => {
            for field in FieldKind::REQUIRED {
                if attrs.get(field).map_or(true, |v| v.trim().is_empty()) {
                    if sink.report(problem(field, None)).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
        AttributeRule::Domain => {
            for field in FieldKind::ENUMERATED {
                let (Some(value), Some(domain)) = (attrs.get(field), domains.get(field)) else {
                    continue;
                };
                if !domain.contains(value) {
                    if sink.report(problem(field, Some(value))).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
        AttributeRule::OccurrenceYear => {
            if attrs.wetland_label.as_deref() == Some(config.occurrence_label.as_str()) {
                let year = attrs.occurrence_year.as_deref().filter(|v| !v.trim().is_empty());
                let valid = year
                    .and_then(parse_year)
                    .is_some_and(|y| y > config.min_occurrence_year && y <= config.current_year);
                if !valid {
                    if sink.report(problem(FieldKind::OccurrenceYear, year)).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
        AttributeRule::ThreeFactor => {
            if let Some(value) = attrs.three_factor.as_deref() {
                if value == config.undetermined_three_factor {
                    if sink.report(problem(FieldKind::ThreeFactor, Some(value))).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }
    ControlFlow::Continue(())
}

fn parse_year(value: &str) -> Option<i32> {
    let value = value.trim();
    if let Ok(year) = value.parse::<i32>() {
        return Some(year);
    }
    // 数値型フィールドから読まれた "2005.0" のような値
    value
        .parse::<f64>()
        .ok()
        .filter(|y| y.fract() == 0.0 && y.is_finite())
        .map(|y| y as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::rect;
    use crate::model::{AdminKey, Attributes, Domain};

    fn domains() -> DomainSet {
        DomainSet::new()
            .with(
                FieldKind::EvalStatus,
                Domain::with_codes("eval_status", ["New Request", "Revision", "Certified"]),
            )
            .with(
                FieldKind::WetlandLabel,
                Domain::with_codes("wetland_label", ["W", "NW", "PC", "CW+Yr"]),
            )
            .with(
                FieldKind::ThreeFactor,
                Domain::with_codes("three_factor", ["Y", "N", "U"]),
            )
            .with(
                FieldKind::DeterminationMethod,
                Domain::with_codes("method", ["On-Site", "Off-Site"]),
            )
    }

    fn attributes() -> Attributes {
        Attributes {
            eval_status: Some("New Request".to_string()),
            wetland_label: Some("W".to_string()),
            occurrence_year: None,
            three_factor: Some("Y".to_string()),
            determination_method: Some("On-Site".to_string()),
            determination_staff: Some("J. Smith".to_string()),
            determination_date: None,
        }
    }

    fn collection(attrs: Vec<Attributes>) -> PolygonCollection {
        PolygonCollection::new(
            attrs
                .into_iter()
                .enumerate()
                .map(|(i, attributes)| PolygonRecord {
                    fid: i as FeatureId + 1,
                    geometry: rect(i as f64, 0.0, i as f64 + 1.0, 1.0),
                    admin: AdminKey::default(),
                    attributes,
                    acres: None,
                })
                .collect(),
        )
    }

    fn config() -> ValidationConfig {
        ValidationConfig::default().with_current_year(2024)
    }

    #[test]
    fn test_valid_records_pass() {
        let problems =
            check_attributes(&config(), &collection(vec![attributes()]), &domains()).unwrap();
        assert!(problems.is_empty());
    }

    #[test]
    fn test_fail_fast_reports_null_before_bad_code() {
        let bad_code = Attributes {
            determination_method: Some("Drive-By".to_string()),
            ..attributes()
        };
        let null_staff = Attributes {
            determination_staff: None,
            ..attributes()
        };
        let problems = check_attributes(
            &config(),
            &collection(vec![bad_code, null_staff]),
            &domains(),
        )
        .unwrap();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].rule, AttributeRule::Required);
        assert_eq!(problems[0].fid, 2);
        assert_eq!(problems[0].field, FieldKind::DeterminationStaff);
    }

    #[test]
    fn test_collect_all_reports_every_category() {
        let bad_code = Attributes {
            determination_method: Some("Drive-By".to_string()),
            ..attributes()
        };
        let null_staff = Attributes {
            determination_staff: Some("  ".to_string()),
            three_factor: Some("U".to_string()),
            ..attributes()
        };
        let mut sink = CollectAll::default();
        check_attributes_with(
            &config(),
            &collection(vec![bad_code, null_staff]),
            &domains(),
            &mut sink,
        )
        .unwrap();

        let rules: Vec<AttributeRule> = sink.into_problems().iter().map(|p| p.rule).collect();
        assert_eq!(
            rules,
            vec![
                AttributeRule::Required,
                AttributeRule::Domain,
                AttributeRule::ThreeFactor
            ]
        );
    }

    #[test]
    fn test_occurrence_year_range() {
        let cases = [
            (None, false),
            (Some("abc"), false),
            (Some("1990"), false),
            (Some("1991"), true),
            (Some("2024"), true),
            (Some("2024.0"), true),
            (Some("2025"), false),
        ];
        for (year, ok) in cases {
            let attrs = Attributes {
                wetland_label: Some("CW+Yr".to_string()),
                occurrence_year: year.map(str::to_string),
                ..attributes()
            };
            let problems =
                check_attributes(&config(), &collection(vec![attrs]), &domains()).unwrap();
            assert_eq!(problems.is_empty(), ok, "occurrence year {:?}", year);
            if !ok {
                assert_eq!(problems[0].rule, AttributeRule::OccurrenceYear);
            }
        }
    }

    #[test]
    fn test_undetermined_three_factor_is_rejected() {
        let attrs = Attributes {
            three_factor: Some("U".to_string()),
            ..attributes()
        };
        let problems = check_attributes(&config(), &collection(vec![attrs]), &domains()).unwrap();
        assert_eq!(problems[0].rule, AttributeRule::ThreeFactor);
        assert_eq!(problems[0].value.as_deref(), Some("U"));
    }

    #[test]
    fn test_missing_domain_is_a_precondition_error() {
        let mut partial = DomainSet::new();
        partial.insert(
            FieldKind::EvalStatus,
            Domain::with_codes("eval_status", ["Revision"]),
        );
        let err =
            check_attributes(&config(), &collection(vec![attributes()]), &partial).unwrap_err();
        assert!(matches!(err, Error::MissingDomain(FieldKind::WetlandLabel)));
    }
}
