use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use geo::{Area, BooleanOps, MultiPolygon, Polygon};

/// Feature identifier as assigned by the backing dataset.
pub type FeatureId = u64;

/// Administrative identity of an area. Boundary parts are dissolved by this
/// key, so two touching parts with different keys stay separate.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdminKey {
    pub state_code: String,
    pub state_name: String,
    pub county_code: String,
    pub county_name: String,
    pub tract_number: String,
}

impl fmt::Display for AdminKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} tract {}",
            self.state_code, self.county_code, self.tract_number
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalStatus {
    NewRequest,
    Revision,
    Certified,
    PriorDetermination,
}

impl EvalStatus {
    pub const ALL: [EvalStatus; 4] = [
        EvalStatus::NewRequest,
        EvalStatus::Revision,
        EvalStatus::Certified,
        EvalStatus::PriorDetermination,
    ];

    pub fn code(self) -> &'static str {
        match self {
            EvalStatus::NewRequest => "New Request",
            EvalStatus::Revision => "Revision",
            EvalStatus::Certified => "Certified",
            EvalStatus::PriorDetermination => "Prior Determination",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Attribute fields known to the consistency checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    EvalStatus,
    WetlandLabel,
    ThreeFactor,
    DeterminationMethod,
    DeterminationStaff,
    OccurrenceYear,
}

impl FieldKind {
    /// Fields that must be populated on every record, in check order.
    pub const REQUIRED: [FieldKind; 5] = [
        FieldKind::EvalStatus,
        FieldKind::WetlandLabel,
        FieldKind::ThreeFactor,
        FieldKind::DeterminationMethod,
        FieldKind::DeterminationStaff,
    ];

    /// Fields whose values are constrained by a domain table.
    pub const ENUMERATED: [FieldKind; 4] = [
        FieldKind::EvalStatus,
        FieldKind::WetlandLabel,
        FieldKind::ThreeFactor,
        FieldKind::DeterminationMethod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::EvalStatus => "eval_status",
            FieldKind::WetlandLabel => "wetland_label",
            FieldKind::ThreeFactor => "three_factor",
            FieldKind::DeterminationMethod => "determination_method",
            FieldKind::DeterminationStaff => "determination_staff",
            FieldKind::OccurrenceYear => "occurrence_year",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            FieldKind::EvalStatus,
            FieldKind::WetlandLabel,
            FieldKind::ThreeFactor,
            FieldKind::DeterminationMethod,
            FieldKind::DeterminationStaff,
            FieldKind::OccurrenceYear,
        ]
        .into_iter()
        .find(|k| k.name() == s)
        .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Raw attribute values of one record. Values are kept as read so that
/// invalid codes can be reported verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub eval_status: Option<String>,
    pub wetland_label: Option<String>,
    pub occurrence_year: Option<String>,
    pub three_factor: Option<String>,
    pub determination_method: Option<String>,
    pub determination_staff: Option<String>,
    pub determination_date: Option<String>,
}

impl Attributes {
    pub fn get(&self, field: FieldKind) -> Option<&str> {
        let value = match field {
            FieldKind::EvalStatus => &self.eval_status,
            FieldKind::WetlandLabel => &self.wetland_label,
            FieldKind::ThreeFactor => &self.three_factor,
            FieldKind::DeterminationMethod => &self.determination_method,
            FieldKind::DeterminationStaff => &self.determination_staff,
            FieldKind::OccurrenceYear => &self.occurrence_year,
        };
        value.as_deref()
    }

    pub fn status(&self) -> Option<EvalStatus> {
        self.eval_status.as_deref().and_then(EvalStatus::from_code)
    }
}

/// One sampling unit or determination polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
    pub fid: FeatureId,
    pub geometry: MultiPolygon<f64>,
    pub admin: AdminKey,
    pub attributes: Attributes,
    pub acres: Option<f64>,
}

impl PolygonRecord {
    pub fn is_revision(&self) -> bool {
        self.attributes.status() == Some(EvalStatus::Revision)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonCollection {
    pub records: Vec<PolygonRecord>,
}

impl PolygonCollection {
    pub fn new(records: Vec<PolygonRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, fid: FeatureId) -> Option<&PolygonRecord> {
        self.records.iter().find(|r| r.fid == fid)
    }

    pub fn revisions(&self) -> impl Iterator<Item = &PolygonRecord> {
        self.records.iter().filter(|r| r.is_revision())
    }

    pub fn has_revisions(&self) -> bool {
        self.revisions().next().is_some()
    }
}

/// A single-part area of the request extent.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPart {
    pub admin: AdminKey,
    pub geometry: Polygon<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceBoundary {
    pub parts: Vec<BoundaryPart>,
}

impl ReferenceBoundary {
    pub fn new(parts: Vec<BoundaryPart>) -> Self {
        Self { parts }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Union of all parts.
    pub fn geometry(&self) -> MultiPolygon<f64> {
        self.parts
            .iter()
            .fold(MultiPolygon::new(Vec::new()), |acc, part| {
                acc.union(&MultiPolygon::new(vec![part.geometry.clone()]))
            })
    }

    pub fn area(&self) -> f64 {
        self.geometry().unsigned_area()
    }
}

/// Valid (code, description) pairs for an enumerated field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    pub name: String,
    entries: BTreeMap<String, String>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_codes<I, S>(name: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut domain = Self::new(name);
        for code in codes {
            let code = code.into();
            domain.insert(code.clone(), code);
        }
        domain
    }

    pub fn insert(&mut self, code: impl Into<String>, description: impl Into<String>) {
        self.entries.insert(code.into(), description.into());
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn description(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainSet {
    domains: BTreeMap<FieldKind, Domain>,
}

impl DomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: FieldKind, domain: Domain) {
        self.domains.insert(field, domain);
    }

    pub fn with(mut self, field: FieldKind, domain: Domain) -> Self {
        self.insert(field, domain);
        self
    }

    pub fn get(&self, field: FieldKind) -> Option<&Domain> {
        self.domains.get(&field)
    }
}

/// Value copy of the mutable project state, taken before any mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    collection: PolygonCollection,
    boundary: ReferenceBoundary,
}

impl Snapshot {
    pub fn take(collection: &PolygonCollection, boundary: &ReferenceBoundary) -> Self {
        Self {
            collection: collection.clone(),
            boundary: boundary.clone(),
        }
    }

    pub fn collection(&self) -> &PolygonCollection {
        &self.collection
    }

    pub fn boundary(&self) -> &ReferenceBoundary {
        &self.boundary
    }

    pub fn restore(&self) -> (PolygonCollection, ReferenceBoundary) {
        (self.collection.clone(), self.boundary.clone())
    }
}

pub const SQUARE_METRES_PER_ACRE: f64 = 4046.856_422_4;

pub fn acres(area: f64, square_units_per_acre: f64) -> f64 {
    area / square_units_per_acre
}

/// Recalculated acreage for the collection and the boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acreage {
    pub records: Vec<(FeatureId, f64)>,
    pub boundary_parts: Vec<f64>,
}

impl Acreage {
    pub fn total_records(&self) -> f64 {
        self.records.iter().map(|(_, a)| a).sum()
    }

    pub fn total_boundary(&self) -> f64 {
        self.boundary_parts.iter().sum()
    }
}
