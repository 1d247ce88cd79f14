use anyhow::{anyhow, bail, Context};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::sql::Dialect;
use gdal::vector::{
    Feature, FieldValue, Layer, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType, ToGdal,
};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use geo::{MultiPolygon, Point};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::ProjectStore;
use crate::config::FieldNames;
use crate::error::{Error, Result};
use crate::geometry::{GeoEngine, GeometryEngine};
use crate::model::{
    Acreage, AdminKey, Attributes, BoundaryPart, Domain, DomainSet, FieldKind, PolygonCollection,
    PolygonRecord, ReferenceBoundary,
};
use crate::rop::ReferencePoint;
use crate::topology::ViolationSet;

const EDIT_LOCK_SUFFIX: &str = ".ed.lock";
const SCRATCH_SUFFIX: &str = "scratch";
const DOMAIN_CODE_FIELD: &str = "code";
const DOMAIN_DESCRIPTION_FIELD: &str = "description";

/// A layer inside a vector dataset, written `PATH` or `PATH::LAYER`.
/// Without a layer name the first layer of the dataset is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub path: PathBuf,
    pub layer: Option<String>,
}

impl DatasetRef {
    pub fn new(path: impl Into<PathBuf>, layer: Option<&str>) -> Self {
        Self {
            path: path.into(),
            layer: layer.map(str::to_string),
        }
    }
}

impl FromStr for DatasetRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("dataset reference must not be empty".to_string());
        }
        match s.rsplit_once("::") {
            Some((path, layer)) if !path.is_empty() && !layer.is_empty() => {
                Ok(DatasetRef::new(path, Some(layer)))
            }
            Some(_) => Err(format!("invalid dataset reference: {}", s)),
            None => Ok(DatasetRef::new(s, None)),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layer {
            Some(layer) => write!(f, "{}::{}", self.path.display(), layer),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

fn open_dataset(path: &Path, update: bool) -> Result<Dataset> {
    if !path.exists() {
        return Err(Error::MissingDataset(path.to_path_buf()));
    }
    let mut open_flags = GdalOpenFlags::GDAL_OF_VECTOR;
    if update {
        open_flags |= GdalOpenFlags::GDAL_OF_UPDATE;
    }
    let dataset = Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags,
            ..Default::default()
        },
    )
    .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    Ok(dataset)
}

fn open_layer<'a>(dataset: &'a Dataset, target: &DatasetRef) -> Result<Layer<'a>> {
    let layer = match &target.layer {
        Some(name) => dataset.layer_by_name(name),
        None => dataset.layer(0),
    };
    layer.map_err(|_| Error::MissingLayer {
        path: target.path.clone(),
        layer: target.layer.clone().unwrap_or_else(|| "#0".to_string()),
    })
}

fn value_to_string(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::StringValue(s) => Some(s),
        FieldValue::IntegerValue(i) => Some(i.to_string()),
        FieldValue::Integer64Value(i) => Some(i.to_string()),
        FieldValue::RealValue(r) if r.fract() == 0.0 => Some(format!("{}", r as i64)),
        FieldValue::RealValue(r) => Some(r.to_string()),
        FieldValue::DateValue(d) => Some(d.to_string()),
        FieldValue::DateTimeValue(d) => Some(d.to_rfc3339()),
        _ => None,
    }
}

/// Read a field as text. A column missing from the layer reads as null.
fn string_field(feature: &Feature, name: &str) -> anyhow::Result<Option<String>> {
    let Ok(index) = feature.field_index(name) else {
        return Ok(None);
    };
    let value = feature
        .field(index)
        .with_context(|| format!("Failed to read field {}", name))?;
    Ok(value.and_then(value_to_string))
}

fn fid(feature: &Feature) -> anyhow::Result<u64> {
    feature.fid().ok_or_else(|| anyhow!("feature without FID"))
}

fn polygon_geometry(feature: &Feature) -> anyhow::Result<MultiPolygon<f64>> {
    let geometry = feature
        .geometry()
        .ok_or_else(|| anyhow!("feature {:?} has no geometry", feature.fid()))?;
    match geometry.to_geo().context("Failed to convert geometry")? {
        geo::Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        other => bail!(
            "feature {:?} is not a polygon: {:?}",
            feature.fid(),
            std::mem::discriminant(&other)
        ),
    }
}

fn admin_key(feature: &Feature, fields: &FieldNames) -> anyhow::Result<AdminKey> {
    let [state_code, state_name, county_code, county_name, tract_number] = fields.admin();
    Ok(AdminKey {
        state_code: string_field(feature, state_code)?.unwrap_or_default(),
        state_name: string_field(feature, state_name)?.unwrap_or_default(),
        county_code: string_field(feature, county_code)?.unwrap_or_default(),
        county_name: string_field(feature, county_name)?.unwrap_or_default(),
        tract_number: string_field(feature, tract_number)?.unwrap_or_default(),
    })
}

fn table_name(layer: &Layer, target: &DatasetRef) -> String {
    target.layer.clone().unwrap_or_else(|| layer.name())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn layer_columns(layer: &Layer) -> Vec<String> {
    layer.defn().fields().map(|f| f.name()).collect()
}

fn has_column(columns: &[String], name: &str) -> bool {
    columns.iter().any(|c| c == name)
}

/// Run `write` inside a transaction on `dataset`, rolling back when it
/// fails. Drivers without transaction support are written directly.
fn in_transaction<F>(dataset: &mut Dataset, write: F) -> Result<()>
where
    F: FnOnce(&Dataset) -> Result<()>,
{
    if let Ok(transaction) = dataset.start_transaction() {
        write(&*transaction)?;
        transaction
            .commit()
            .context("Failed to commit transaction")?;
        return Ok(());
    }
    warn!("Driver does not support transactions; writing without rollback");
    write(dataset)
}

struct BoundaryWrites<'a> {
    target: &'a DatasetRef,
    table: &'a str,
    names: &'a [&'a str],
    rows: Vec<(gdal::vector::Geometry, Vec<FieldValue>)>,
}

impl BoundaryWrites<'_> {
    fn apply(self, dataset: &Dataset) -> Result<()> {
        // 境界レイヤーの地物を入れ替える
        dataset
            .execute_sql(format!("DELETE FROM {}", quote(self.table)), None, Dialect::SQLITE)
            .with_context(|| format!("Failed to clear boundary layer {}", self.table))?;
        let mut layer = open_layer(dataset, self.target)?;
        for (geometry, values) in self.rows {
            layer
                .create_feature_fields(geometry, self.names, &values)
                .context("Failed to write boundary feature")?;
        }
        Ok(())
    }
}

struct AcresWrites<'a> {
    table: &'a str,
    column: &'a str,
    records: &'a [(u64, f64)],
}

impl AcresWrites<'_> {
    fn apply(&self, dataset: &Dataset) -> Result<()> {
        // 各ポリゴンの面積（エーカー）を更新
        for (fid, acres) in self.records {
            let sql = format!(
                "UPDATE {} SET {} = {} WHERE ROWID = {}",
                quote(self.table),
                quote(self.column),
                acres,
                fid
            );
            dataset
                .execute_sql(&sql, None, Dialect::SQLITE)
                .with_context(|| format!("Failed to update acres of feature {}", fid))?;
        }
        Ok(())
    }
}

/// Project backed by vector datasets read through GDAL.
#[derive(Debug, Clone)]
pub struct GdalStore {
    collection: DatasetRef,
    boundary: DatasetRef,
    tract: DatasetRef,
    points: Option<DatasetRef>,
    fields: FieldNames,
}

impl GdalStore {
    pub fn new(
        collection: DatasetRef,
        boundary: DatasetRef,
        tract: DatasetRef,
        fields: FieldNames,
    ) -> Self {
        Self {
            collection,
            boundary,
            tract,
            points: None,
            fields,
        }
    }

    pub fn with_points(mut self, points: Option<DatasetRef>) -> Self {
        self.points = points;
        self
    }

    /// Directory for ephemeral artifacts, next to the collection dataset.
    pub fn scratch_dir(&self) -> PathBuf {
        let path = &self.collection.path;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        path.with_file_name(format!("{}.{}", name, SCRATCH_SUFFIX))
    }

    /// Write `violations` to a GeoPackage in the scratch directory for
    /// display, returning its path.
    pub fn export_violations(&self, violations: &ViolationSet) -> Result<PathBuf> {
        let dir = self.scratch_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create scratch directory {}", dir.display()))?;
        let output_path = dir.join(format!("{}_violations.gpkg", violations.rule));
        if output_path.exists() {
            fs::remove_file(&output_path).with_context(|| {
                format!("Failed to remove stale scratch file {}", output_path.display())
            })?;
        }

        let srs = self.collection_srs()?;

        // GPKGドライバーを取得
        let driver =
            DriverManager::get_driver_by_name("GPKG").context("Failed to get GPKG driver")?;
        let mut dataset = driver
            .create_vector_only(&output_path)
            .context("Failed to create scratch dataset")?;

        let layer_name = format!("{}_violations", violations.rule);
        let mut layer = dataset
            .create_layer(LayerOptions {
                name: &layer_name,
                srs: srs.as_ref(),
                ty: OGRwkbGeometryType::wkbPolygon,
                options: None,
            })
            .context("Failed to create violation layer")?;
        layer
            .create_defn_fields(&[
                ("rule", OGRFieldType::OFTString),
                ("area", OGRFieldType::OFTReal),
                ("features", OGRFieldType::OFTString),
            ])
            .context("Failed to create violation fields")?;

        for violation in &violations.violations {
            let geometry = violation
                .geometry
                .to_gdal()
                .context("Failed to convert violation geometry")?;
            let features = violation
                .features
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            layer
                .create_feature_fields(
                    geometry,
                    &["rule", "area", "features"],
                    &[
                        FieldValue::StringValue(violations.rule.to_string()),
                        FieldValue::RealValue(violation.area),
                        FieldValue::StringValue(features),
                    ],
                )
                .context("Failed to write violation feature")?;
        }

        info!(
            "Written {} {} violations: {:?}",
            violations.len(),
            violations.rule,
            output_path
        );
        Ok(output_path)
    }

    fn collection_srs(&self) -> Result<Option<SpatialRef>> {
        let dataset = open_dataset(&self.collection.path, false)?;
        let layer = open_layer(&dataset, &self.collection)?;
        Ok(layer.spatial_ref())
    }
}

impl ProjectStore for GdalStore {
    fn describe(&self) -> String {
        self.collection.to_string()
    }

    fn edit_session_active(&self) -> Result<bool> {
        for path in [&self.collection.path, &self.boundary.path] {
            if !path.is_dir() {
                continue;
            }
            let entries = fs::read_dir(path)
                .with_context(|| format!("Failed to list {}", path.display()))?;
            for entry in entries {
                let entry = entry.with_context(|| format!("Failed to list {}", path.display()))?;
                if entry.file_name().to_string_lossy().ends_with(EDIT_LOCK_SUFFIX) {
                    warn!("Edit lock found: {:?}", entry.path());
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn load_collection(&self) -> Result<PolygonCollection> {
        let dataset = open_dataset(&self.collection.path, false)?;
        let mut layer = open_layer(&dataset, &self.collection)?;
        let f = &self.fields;

        let mut records = Vec::new();
        for feature in layer.features() {
            let attributes = Attributes {
                eval_status: string_field(&feature, &f.eval_status)?,
                wetland_label: string_field(&feature, &f.wetland_label)?,
                occurrence_year: string_field(&feature, &f.occurrence_year)?,
                three_factor: string_field(&feature, &f.three_factor)?,
                determination_method: string_field(&feature, &f.determination_method)?,
                determination_staff: string_field(&feature, &f.determination_staff)?,
                determination_date: string_field(&feature, &f.determination_date)?,
            };
            records.push(PolygonRecord {
                fid: fid(&feature)?,
                geometry: polygon_geometry(&feature)?,
                admin: admin_key(&feature, f)?,
                attributes,
                acres: string_field(&feature, &f.acres)?.and_then(|v| v.parse().ok()),
            });
        }

        info!("Loaded {} polygons from {}", records.len(), self.collection);
        Ok(PolygonCollection::new(records))
    }

    fn load_boundary(&self) -> Result<ReferenceBoundary> {
        let dataset = open_dataset(&self.boundary.path, false)?;
        let mut layer = open_layer(&dataset, &self.boundary)?;

        let mut parts = Vec::new();
        for feature in layer.features() {
            let admin = admin_key(&feature, &self.fields)?;
            for polygon in polygon_geometry(&feature)? {
                parts.push(BoundaryPart {
                    admin: admin.clone(),
                    geometry: polygon,
                });
            }
        }

        info!("Loaded {} boundary parts from {}", parts.len(), self.boundary);
        Ok(ReferenceBoundary::new(parts))
    }

    fn load_tract(&self) -> Result<MultiPolygon<f64>> {
        let dataset = open_dataset(&self.tract.path, false)?;
        let mut layer = open_layer(&dataset, &self.tract)?;

        let mut polygons = Vec::new();
        for feature in layer.features() {
            polygons.push(polygon_geometry(&feature)?);
        }
        debug!("Loaded {} tract features from {}", polygons.len(), self.tract);
        Ok(GeoEngine.dissolve(&polygons)?)
    }

    fn load_points(&self) -> Result<Vec<ReferencePoint>> {
        let Some(target) = &self.points else {
            return Ok(Vec::new());
        };
        let dataset = open_dataset(&target.path, false)?;
        let mut layer = open_layer(&dataset, target)?;

        let mut points = Vec::new();
        for feature in layer.features() {
            let fid = fid(&feature)?;
            let geometry = feature
                .geometry()
                .ok_or_else(|| anyhow!("reference point {} has no geometry", fid))?;
            match geometry.to_geo().context("Failed to convert geometry")? {
                geo::Geometry::Point(location) => points.push(ReferencePoint { fid, location }),
                geo::Geometry::MultiPoint(mp) => points.extend(
                    mp.0.into_iter()
                        .map(|location: Point<f64>| ReferencePoint { fid, location }),
                ),
                _ => return Err(anyhow!("reference point {} is not a point", fid).into()),
            }
        }
        info!("Loaded {} reference points from {}", points.len(), target);
        Ok(points)
    }

    fn commit(&mut self, boundary: &ReferenceBoundary, acreage: &Acreage) -> Result<()> {
        // 書き込み前に列とジオメトリをすべて検証する
        let (boundary_table, boundary_columns) = {
            let dataset = open_dataset(&self.boundary.path, false)?;
            let layer = open_layer(&dataset, &self.boundary)?;
            (table_name(&layer, &self.boundary), layer_columns(&layer))
        };
        let admin = self.fields.admin();
        if let Some(missing) = admin.iter().find(|c| !has_column(&boundary_columns, c)) {
            return Err(anyhow!(
                "boundary layer {} has no column {}; nothing was written",
                self.boundary,
                missing
            )
            .into());
        }
        let has_acres = has_column(&boundary_columns, &self.fields.acres);

        let collection_table = {
            let dataset = open_dataset(&self.collection.path, false)?;
            let layer = open_layer(&dataset, &self.collection)?;
            if !has_column(&layer_columns(&layer), &self.fields.acres) {
                return Err(anyhow!(
                    "polygon layer {} has no column {}; nothing was written",
                    self.collection,
                    self.fields.acres
                )
                .into());
            }
            table_name(&layer, &self.collection)
        };

        let mut names: Vec<&str> = admin.to_vec();
        if has_acres {
            names.push(&self.fields.acres);
        }
        let mut rows = Vec::with_capacity(boundary.parts.len());
        for (index, part) in boundary.parts.iter().enumerate() {
            let mut values = vec![
                FieldValue::StringValue(part.admin.state_code.clone()),
                FieldValue::StringValue(part.admin.state_name.clone()),
                FieldValue::StringValue(part.admin.county_code.clone()),
                FieldValue::StringValue(part.admin.county_name.clone()),
                FieldValue::StringValue(part.admin.tract_number.clone()),
            ];
            if has_acres {
                let acres = acreage.boundary_parts.get(index).copied().unwrap_or_default();
                values.push(FieldValue::RealValue(acres));
            }
            let geometry = part
                .geometry
                .to_gdal()
                .context("Failed to convert boundary geometry")?;
            rows.push((geometry, values));
        }

        let boundary_writes = BoundaryWrites {
            target: &self.boundary,
            table: &boundary_table,
            names: &names,
            rows,
        };
        let acres_writes = AcresWrites {
            table: &collection_table,
            column: &self.fields.acres,
            records: &acreage.records,
        };

        // 同じデータセットなら一つのトランザクションで書き込む
        let mut boundary_dataset = open_dataset(&self.boundary.path, true)?;
        if self.boundary.path == self.collection.path {
            in_transaction(&mut boundary_dataset, |dataset| {
                boundary_writes.apply(dataset)?;
                acres_writes.apply(dataset)
            })?;
        } else {
            let mut collection_dataset = open_dataset(&self.collection.path, true)?;
            in_transaction(&mut boundary_dataset, |dataset| {
                boundary_writes.apply(dataset)?;
                in_transaction(&mut collection_dataset, |dataset| acres_writes.apply(dataset))
            })?;
        }

        info!(
            "Written {} boundary parts to {} and acres on {} polygons",
            boundary.parts.len(),
            self.boundary,
            acreage.records.len()
        );
        Ok(())
    }

    fn clear_scratch(&mut self) -> Result<()> {
        let dir = self.scratch_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove scratch directory {}", dir.display()))?;
            debug!("Removed scratch directory {:?}", dir);
        }
        Ok(())
    }
}

/// Read `code`/`description` tables, one per enumerated field.
pub fn load_domains(refs: &[(FieldKind, DatasetRef)]) -> Result<DomainSet> {
    let mut domains = DomainSet::new();
    for (field, target) in refs {
        let dataset = open_dataset(&target.path, false)?;
        let mut layer = open_layer(&dataset, target)?;
        let mut domain = Domain::new(table_name(&layer, target));
        for feature in layer.features() {
            let Some(code) = string_field(&feature, DOMAIN_CODE_FIELD)? else {
                continue;
            };
            let description = string_field(&feature, DOMAIN_DESCRIPTION_FIELD)?
                .unwrap_or_else(|| code.clone());
            domain.insert(code, description);
        }
        info!("Loaded {} codes for {} from {}", domain.len(), field, target);
        domains.insert(*field, domain);
    }
    Ok(domains)
}
