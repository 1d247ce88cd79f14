use chrono::Datelike;

use crate::geometry::{GeoEngine, GeometryEngine};
use crate::model::SQUARE_METRES_PER_ACRE;

pub const DEFAULT_CLUSTER_TOLERANCE: f64 = 0.001;
pub const DEFAULT_OCCURRENCE_LABEL: &str = "CW+Yr";
pub const DEFAULT_MIN_OCCURRENCE_YEAR: i32 = 1990;
pub const DEFAULT_UNDETERMINED_THREE_FACTOR: &str = "U";

/// Column names of the on-disk polygon and boundary layers.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNames {
    pub eval_status: String,
    pub wetland_label: String,
    pub occurrence_year: String,
    pub three_factor: String,
    pub determination_method: String,
    pub determination_staff: String,
    pub determination_date: String,
    pub state_code: String,
    pub state_name: String,
    pub county_code: String,
    pub county_name: String,
    pub tract_number: String,
    pub acres: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            eval_status: "eval_status".to_string(),
            wetland_label: "wetland_label".to_string(),
            occurrence_year: "occur_year".to_string(),
            three_factor: "three_factors".to_string(),
            determination_method: "method".to_string(),
            determination_staff: "deter_staff".to_string(),
            determination_date: "deter_date".to_string(),
            state_code: "admin_state".to_string(),
            state_name: "admin_state_name".to_string(),
            county_code: "admin_county".to_string(),
            county_name: "admin_county_name".to_string(),
            tract_number: "tract_number".to_string(),
            acres: "acres".to_string(),
        }
    }
}

impl FieldNames {
    /// Administrative columns, in [`crate::model::AdminKey`] field order.
    pub fn admin(&self) -> [&str; 5] {
        [
            &self.state_code,
            &self.state_name,
            &self.county_code,
            &self.county_name,
            &self.tract_number,
        ]
    }
}

/// Settings for one validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Linear tolerance in working units. An overlap or gap polygon is noise,
    /// and not reported, when its area is at or below this value or when its
    /// mean width `2 * area / perimeter` is. The width test drops long
    /// slivers whose total area exceeds the tolerance, such as a 1000 x 0.0008
    /// strip along a shared edge.
    pub cluster_tolerance: f64,
    /// Wetland label that requires an occurrence year.
    pub occurrence_label: String,
    /// Occurrence years must be strictly greater than this.
    pub min_occurrence_year: i32,
    /// Occurrence years must not exceed this.
    pub current_year: i32,
    pub undetermined_three_factor: String,
    pub square_units_per_acre: f64,
    pub fields: FieldNames,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cluster_tolerance: DEFAULT_CLUSTER_TOLERANCE,
            occurrence_label: DEFAULT_OCCURRENCE_LABEL.to_string(),
            min_occurrence_year: DEFAULT_MIN_OCCURRENCE_YEAR,
            current_year: chrono::Utc::now().year(),
            undetermined_three_factor: DEFAULT_UNDETERMINED_THREE_FACTOR.to_string(),
            square_units_per_acre: SQUARE_METRES_PER_ACRE,
            fields: FieldNames::default(),
        }
    }
}

impl ValidationConfig {
    pub fn with_cluster_tolerance(mut self, tolerance: f64) -> Self {
        self.cluster_tolerance = tolerance;
        self
    }

    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    pub fn with_occurrence_label(mut self, label: impl Into<String>) -> Self {
        self.occurrence_label = label.into();
        self
    }

    pub fn with_square_units_per_acre(mut self, units: f64) -> Self {
        self.square_units_per_acre = units;
        self
    }

    pub fn with_fields(mut self, fields: FieldNames) -> Self {
        self.fields = fields;
        self
    }
}

/// Explicit configuration and geometry engine handed to every component.
#[derive(Debug, Clone, Default)]
pub struct Context<E = GeoEngine> {
    pub config: ValidationConfig,
    pub engine: E,
}

impl Context<GeoEngine> {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            engine: GeoEngine,
        }
    }
}

impl<E: GeometryEngine> Context<E> {
    pub fn with_engine(config: ValidationConfig, engine: E) -> Self {
        Self { config, engine }
    }

    pub fn tolerance(&self) -> f64 {
        self.config.cluster_tolerance
    }
}
