//! NetCDF concatenation along the record dimension.
//!
//! Every input must carry the same variables with the same types and the
//! same non-record dimension lengths. Variables laid out with the record
//! dimension first are appended input by input; the rest are taken from the
//! first input.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use geoslice_core::sink::tmp_path_for;
use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::{AttributeValue, Extents, File, FileMut, Variable, VariableMut};

use crate::error::MergeError;
use crate::{ConcatEngine, MergeStats};

/// Concatenates NetCDF artifacts along a time dimension
#[derive(Debug, Clone)]
pub struct NetcdfConcat {
    dimension: String,
}

impl NetcdfConcat {
    /// `data_format` the archive is asked for when this engine merges
    pub const FORMAT: &'static str = "netcdf";

    pub fn new(dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
        }
    }

    pub fn dimension(&self) -> &str {
        &self.dimension
    }
}

fn corrupt(path: &Path, e: impl std::fmt::Display) -> MergeError {
    MergeError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn mismatch(path: &Path, message: String) -> MergeError {
    MergeError::SchemaMismatch {
        path: path.to_path_buf(),
        message,
    }
}

fn open(path: &Path) -> Result<File, MergeError> {
    netcdf::open(path).map_err(|e| corrupt(path, e))
}

#[derive(Debug, Clone, PartialEq)]
struct VariableLayout {
    name: String,
    dims: Vec<String>,
    vartype: NcVariableType,
}

impl VariableLayout {
    fn of(var: &Variable<'_>) -> Self {
        Self {
            name: var.name(),
            dims: var.dimensions().iter().map(|d| d.name()).collect(),
            vartype: var.vartype(),
        }
    }

    fn is_record(&self, dimension: &str) -> bool {
        self.dims.first().is_some_and(|d| d == dimension)
    }
}

/// Shape shared by every input
#[derive(Debug)]
struct Layout {
    /// Non-record dimensions with their lengths, in file order
    fixed_dims: Vec<(String, usize)>,
    variables: Vec<VariableLayout>,
}

impl Layout {
    fn read(file: &File, path: &Path, dimension: &str) -> Result<Self, MergeError> {
        if file.dimension(dimension).is_none() {
            return Err(MergeError::MissingDimension {
                path: path.to_path_buf(),
                dimension: dimension.to_string(),
            });
        }
        let fixed_dims = file
            .dimensions()
            .filter(|d| d.name() != dimension)
            .map(|d| (d.name(), d.len()))
            .collect();

        let mut variables = Vec::new();
        for var in file.variables() {
            let layout = VariableLayout::of(&var);
            if !is_numeric(&layout.vartype) {
                return Err(corrupt(
                    path,
                    format!("variable '{}' has unsupported type", layout.name),
                ));
            }
            if !layout.is_record(dimension) && layout.dims.iter().any(|d| d == dimension) {
                return Err(corrupt(
                    path,
                    format!("variable '{}' does not lead with '{dimension}'", layout.name),
                ));
            }
            variables.push(layout);
        }
        Ok(Self {
            fixed_dims,
            variables,
        })
    }

    fn check_matches(&self, other: &Layout, path: &Path) -> Result<(), MergeError> {
        for (name, len) in &self.fixed_dims {
            match other.fixed_dims.iter().find(|(n, _)| n == name) {
                Some((_, found)) if found == len => {}
                Some((_, found)) => {
                    return Err(mismatch(
                        path,
                        format!("dimension {name}: expected length {len}, found {found}"),
                    ));
                }
                None => return Err(mismatch(path, format!("dimension {name} is missing"))),
            }
        }
        if self.variables.len() != other.variables.len() {
            return Err(mismatch(
                path,
                format!(
                    "expected {} variables, found {}",
                    self.variables.len(),
                    other.variables.len()
                ),
            ));
        }
        for expected in &self.variables {
            match other.variables.iter().find(|v| v.name == expected.name) {
                Some(found) if found == expected => {}
                Some(found) => {
                    return Err(mismatch(
                        path,
                        format!(
                            "variable {}: expected {:?} over {:?}, found {:?} over {:?}",
                            expected.name,
                            expected.vartype,
                            expected.dims,
                            found.vartype,
                            found.dims
                        ),
                    ));
                }
                None => {
                    return Err(mismatch(
                        path,
                        format!("variable {} is missing", expected.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_numeric(vartype: &NcVariableType) -> bool {
    matches!(vartype, NcVariableType::Int(_) | NcVariableType::Float(_))
}

/// Coordinate values with their `units`, for ordering checks and messages
struct TimeAxis {
    values: Vec<f64>,
    units: Option<String>,
}

impl TimeAxis {
    fn read(file: &File, path: &Path, dimension: &str) -> Result<Self, MergeError> {
        let var = file
            .variable(dimension)
            .ok_or_else(|| MergeError::MissingDimension {
                path: path.to_path_buf(),
                dimension: dimension.to_string(),
            })?;
        let values = var
            .get_values::<f64, _>(..)
            .map_err(|e| corrupt(path, e))?;
        let units = match var.attribute_value("units") {
            Some(Ok(AttributeValue::Str(units))) => Some(units),
            _ => None,
        };
        Ok(Self { values, units })
    }

    fn render(&self, value: f64) -> String {
        match &self.units {
            Some(units) => format!("{value} {units}"),
            None => value.to_string(),
        }
    }
}

/// Record offsets of each input in the merged file
fn plan(
    inputs: &[PathBuf],
    dimension: &str,
) -> Result<(Layout, Vec<usize>, usize), MergeError> {
    let mut layout: Option<Layout> = None;
    let mut offsets = Vec::with_capacity(inputs.len());
    let mut records = 0usize;
    let mut previous_end: Option<f64> = None;
    let mut units: Option<Option<String>> = None;

    for path in inputs {
        let file = open(path)?;
        let found = Layout::read(&file, path, dimension)?;
        if let Some(expected) = &layout {
            expected.check_matches(&found, path)?;
        } else {
            layout = Some(found);
        }

        let axis = TimeAxis::read(&file, path, dimension)?;
        let expected_units = units.get_or_insert_with(|| axis.units.clone());
        if *expected_units != axis.units {
            return Err(mismatch(
                path,
                format!(
                    "'{dimension}' units {:?}, expected {:?}",
                    axis.units, expected_units
                ),
            ));
        }
        if let Some(pair) = axis.values.windows(2).find(|w| w[1] <= w[0]) {
            return Err(corrupt(
                path,
                format!(
                    "'{dimension}' values not strictly increasing ({} then {})",
                    axis.render(pair[0]),
                    axis.render(pair[1])
                ),
            ));
        }
        match (previous_end, axis.values.first(), axis.values.last()) {
            (Some(prev), Some(&first), _) if first <= prev => {
                return Err(MergeError::Overlap {
                    path: path.clone(),
                    previous_end: axis.render(prev),
                    start: axis.render(first),
                });
            }
            (_, _, Some(&last)) => previous_end = Some(last),
            (_, _, None) => log::debug!("{}: no records", path.display()),
        }

        offsets.push(records);
        records += axis.values.len();
    }

    let layout = layout.ok_or(MergeError::NoInputs)?;
    Ok((layout, offsets, records))
}

/// Removes the tmp file unless the merge was published
struct TmpGuard {
    path: PathBuf,
    published: bool,
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if !self.published {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::debug!("Failed to remove {}: {e}", self.path.display());
                }
            }
        }
    }
}

macro_rules! copy_typed {
    ($ty:ty, $src:expr, $dst:expr, $extents:expr) => {{
        let values = $src.get_values::<$ty, _>(..)?;
        $dst.put_values::<$ty, _>(&values, $extents)?;
    }};
}

fn copy_values(
    src: &Variable<'_>,
    dst: &mut VariableMut<'_>,
    extents: Extents,
) -> netcdf::Result<()> {
    match src.vartype() {
        NcVariableType::Int(IntType::U8) => copy_typed!(u8, src, dst, extents),
        NcVariableType::Int(IntType::U16) => copy_typed!(u16, src, dst, extents),
        NcVariableType::Int(IntType::U32) => copy_typed!(u32, src, dst, extents),
        NcVariableType::Int(IntType::U64) => copy_typed!(u64, src, dst, extents),
        NcVariableType::Int(IntType::I8) => copy_typed!(i8, src, dst, extents),
        NcVariableType::Int(IntType::I16) => copy_typed!(i16, src, dst, extents),
        NcVariableType::Int(IntType::I32) => copy_typed!(i32, src, dst, extents),
        NcVariableType::Int(IntType::I64) => copy_typed!(i64, src, dst, extents),
        NcVariableType::Float(FloatType::F32) => copy_typed!(f32, src, dst, extents),
        NcVariableType::Float(FloatType::F64) => copy_typed!(f64, src, dst, extents),
        // Rejected while planning
        _ => {}
    }
    Ok(())
}

fn define(out: &mut FileMut, first: &File, layout: &Layout, dimension: &str) -> netcdf::Result<()> {
    out.add_unlimited_dimension(dimension)?;
    for (name, len) in &layout.fixed_dims {
        out.add_dimension(name, *len)?;
    }
    for attr in first.attributes() {
        out.add_attribute(attr.name(), attr.value()?)?;
    }
    for var in &layout.variables {
        let dims: Vec<&str> = var.dims.iter().map(String::as_str).collect();
        let mut created = out.add_variable_with_type(&var.name, &dims, &var.vartype)?;
        if let Some(source) = first.variable(&var.name) {
            for attr in source.attributes() {
                created.put_attribute(attr.name(), attr.value()?)?;
            }
        }
    }
    Ok(())
}

fn append(
    out: &mut FileMut,
    input: &File,
    layout: &Layout,
    dimension: &str,
    offset: usize,
    first: bool,
) -> netcdf::Result<()> {
    for var in &layout.variables {
        let record = var.is_record(dimension);
        if !record && !first {
            continue;
        }
        let (Some(src), Some(mut dst)) = (input.variable(&var.name), out.variable_mut(&var.name))
        else {
            continue;
        };
        let shape: Vec<usize> = src.dimensions().iter().map(|d| d.len()).collect();
        if shape.contains(&0) {
            continue;
        }
        let extents = if record {
            let mut start = vec![0; shape.len()];
            start[0] = offset;
            Extents::try_from((start, shape))?
        } else {
            Extents::from(..)
        };
        copy_values(&src, &mut dst, extents)?;
    }
    Ok(())
}

impl ConcatEngine for NetcdfConcat {
    fn extension(&self) -> &str {
        "nc"
    }

    fn data_format(&self) -> &str {
        Self::FORMAT
    }

    fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<MergeStats, MergeError> {
        let start = Instant::now();

        if inputs.is_empty() {
            return Err(MergeError::NoInputs);
        }
        if let Some(missing) = inputs.iter().find(|p| !p.exists()) {
            return Err(MergeError::Missing(missing.clone()));
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        log::info!(
            "Merging {} artifacts along '{}' into {}",
            inputs.len(),
            self.dimension,
            output.display()
        );

        let (layout, offsets, records) = plan(inputs, &self.dimension)?;

        let mut guard = TmpGuard {
            path: tmp_path_for(output),
            published: false,
        };
        let write_err = |e: netcdf::Error| MergeError::Io(std::io::Error::other(e));

        let mut out = netcdf::create(&guard.path).map_err(write_err)?;
        let first = open(&inputs[0])?;
        define(&mut out, &first, &layout, &self.dimension).map_err(write_err)?;
        drop(first);

        for (index, (path, offset)) in inputs.iter().zip(&offsets).enumerate() {
            let input = open(path)?;
            append(&mut out, &input, &layout, &self.dimension, *offset, index == 0)
                .map_err(|e| corrupt(path, e))?;
        }
        out.close().map_err(write_err)?;
        fs::rename(&guard.path, output)?;
        guard.published = true;

        let stats = MergeStats {
            inputs: inputs.len(),
            rows: records,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Merged {} artifacts, {} records in {:.1}s",
            stats.inputs,
            stats.rows,
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UNITS: &str = "days since 1970-01-01";

    /// Daily SST grid of 2x3 cells for the given day numbers
    fn write_days(path: &Path, days: &[i32]) {
        let mut file = netcdf::create(path).unwrap();
        file.add_attribute("title", "SST L4").unwrap();
        file.add_unlimited_dimension("time").unwrap();
        file.add_dimension("lat", 2).unwrap();
        file.add_dimension("lon", 3).unwrap();

        let mut time = file.add_variable::<i32>("time", &["time"]).unwrap();
        time.put_attribute("units", UNITS).unwrap();
        time.put_values(days, Extents::try_from((vec![0], vec![days.len()])).unwrap())
            .unwrap();

        let mut lat = file.add_variable::<f32>("lat", &["lat"]).unwrap();
        lat.put_values(&[10.0_f32, 10.5][..], ..).unwrap();

        let mut sst = file
            .add_variable::<f32>("analysed_sst", &["time", "lat", "lon"])
            .unwrap();
        sst.put_attribute("units", "kelvin").unwrap();
        let values: Vec<f32> = days
            .iter()
            .flat_map(|&d| (0..6).map(move |cell| d as f32 + cell as f32 / 10.0))
            .collect();
        sst.put_values(
            &values,
            Extents::try_from((vec![0, 0, 0], vec![days.len(), 2, 3])).unwrap(),
        )
        .unwrap();
        file.close().unwrap();
    }

    fn read_time(path: &Path) -> Vec<i32> {
        let file = netcdf::open(path).unwrap();
        file.variable("time").unwrap().get_values::<i32, _>(..).unwrap()
    }

    #[test]
    fn concatenates_records_in_input_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("2021-01-01.nc");
        let b = dir.path().join("2021-01-11.nc");
        write_days(&a, &[18_628, 18_629, 18_630]);
        write_days(&b, &[18_631, 18_632]);
        let output = dir.path().join("sst.nc");

        let stats = NetcdfConcat::new("time").concat(&[a, b], &output).unwrap();

        assert_eq!(stats.inputs, 2);
        assert_eq!(stats.rows, 5);
        assert_eq!(read_time(&output), vec![18_628, 18_629, 18_630, 18_631, 18_632]);

        let file = netcdf::open(&output).unwrap();
        let sst = file.variable("analysed_sst").unwrap();
        let values = sst.get_values::<f32, _>(..).unwrap();
        assert_eq!(values.len(), 5 * 6);
        assert_eq!(values[3 * 6 + 2], 18_631.2);
        assert_eq!(
            sst.attribute_value("units").unwrap().unwrap(),
            AttributeValue::Str("kelvin".to_string())
        );
        let lat = file.variable("lat").unwrap().get_values::<f32, _>(..).unwrap();
        assert_eq!(lat, vec![10.0, 10.5]);
        assert!(file.attribute("title").is_some());
        assert!(!dir.path().join("sst.nc.tmp").exists());
    }

    #[test]
    fn rejects_overlap() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.nc");
        let b = dir.path().join("b.nc");
        write_days(&a, &[18_628, 18_629]);
        write_days(&b, &[18_629, 18_630]);
        let output = dir.path().join("sst.nc");

        let err = NetcdfConcat::new("time")
            .concat(&[a, b.clone()], &output)
            .unwrap_err();
        match err {
            MergeError::Overlap {
                path,
                previous_end,
                start,
            } => {
                assert_eq!(path, b);
                assert_eq!(previous_end, format!("18629 {UNITS}"));
                assert_eq!(start, previous_end);
            }
            other => panic!("expected Overlap, got {other}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn rejects_unsorted_time() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.nc");
        write_days(&a, &[18_630, 18_628, 18_629]);
        let err = NetcdfConcat::new("time")
            .concat(&[a], &dir.path().join("sst.nc"))
            .unwrap_err();
        assert!(matches!(err, MergeError::Corrupt { .. }));
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn missing_dimension() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.nc");
        write_days(&a, &[18_628]);
        let err = NetcdfConcat::new("valid_time")
            .concat(&[a], &dir.path().join("sst.nc"))
            .unwrap_err();
        assert!(matches!(err, MergeError::MissingDimension { ref dimension, .. } if dimension == "valid_time"));
    }

    #[test]
    fn grid_mismatch() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.nc");
        write_days(&a, &[18_628]);
        let b = dir.path().join("b.nc");
        let mut file = netcdf::create(&b).unwrap();
        file.add_unlimited_dimension("time").unwrap();
        file.add_dimension("lat", 4).unwrap();
        file.add_dimension("lon", 3).unwrap();
        let mut time = file.add_variable::<i32>("time", &["time"]).unwrap();
        time.put_attribute("units", UNITS).unwrap();
        time.put_values(&[18_629_i32][..], Extents::try_from((vec![0], vec![1])).unwrap())
            .unwrap();
        file.close().unwrap();

        let err = NetcdfConcat::new("time")
            .concat(&[a, b], &dir.path().join("sst.nc"))
            .unwrap_err();
        assert!(matches!(err, MergeError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("lat"));
    }

    #[test]
    fn corrupt_input_keeps_previous_output() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.nc");
        std::fs::write(&a, b"definitely not netcdf").unwrap();
        let output = dir.path().join("sst.nc");
        std::fs::write(&output, b"previous merge").unwrap();

        let err = NetcdfConcat::new("time")
            .concat(&[a], &output)
            .unwrap_err();
        assert!(matches!(err, MergeError::Corrupt { .. }));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous merge");
        assert!(!dir.path().join("sst.nc.tmp").exists());
    }

    #[test]
    fn extension_and_format() {
        let engine = NetcdfConcat::new("time");
        assert_eq!(engine.extension(), "nc");
        assert_eq!(engine.data_format(), "netcdf");
    }
}
