use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::array::{Array, RecordBatch};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::dimension::{self, Bounds};
use crate::error::MergeError;
use crate::sink::ParquetOutput;
use crate::{ConcatEngine, MergeStats};

/// Default zstd level of the merged file
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Concatenates Parquet artifacts along a time column.
///
/// Inputs are read one at a time, so peak memory is one partial artifact.
#[derive(Debug, Clone)]
pub struct ParquetConcat {
    dimension: String,
    zstd_level: i32,
}

impl ParquetConcat {
    /// `data_format` the archive is asked for when this engine merges
    pub const FORMAT: &'static str = "parquet";

    pub fn new(dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
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

fn unordered(
    path: &Path,
    dimension: &str,
    before: i64,
    after: i64,
    data_type: &DataType,
) -> MergeError {
    corrupt(
        path,
        format!(
            "'{dimension}' values not strictly increasing ({} then {})",
            dimension::render(before, data_type),
            dimension::render(after, data_type)
        ),
    )
}

fn read_artifact(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>), MergeError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| corrupt(path, e))?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(|e| corrupt(path, e))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt(path, e))?;
    Ok((schema, batches))
}

/// Fields must match exactly; schema-level metadata may differ
fn check_schema(expected: &Schema, found: &Schema, path: &Path) -> Result<(), MergeError> {
    if expected.fields() == found.fields() {
        return Ok(());
    }
    let message = match expected
        .fields()
        .iter()
        .zip(found.fields().iter())
        .find(|(a, b)| a != b)
    {
        Some((a, b)) => format!(
            "expected {}: {}, found {}: {}",
            a.name(),
            a.data_type(),
            b.name(),
            b.data_type()
        ),
        None => format!(
            "expected {} columns, found {}",
            expected.fields().len(),
            found.fields().len()
        ),
    };
    Err(MergeError::SchemaMismatch {
        path: path.to_path_buf(),
        message,
    })
}

impl ConcatEngine for ParquetConcat {
    fn extension(&self) -> &str {
        "parquet"
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

        let mut first_schema: Option<SchemaRef> = None;
        let mut out: Option<ParquetOutput> = None;
        let mut previous_end: Option<i64> = None;

        for path in inputs {
            let (schema, batches) = read_artifact(path)?;
            let expected = first_schema.get_or_insert_with(|| schema.clone()).clone();
            check_schema(&expected, &schema, path)?;

            let dim_idx = schema
                .index_of(&self.dimension)
                .map_err(|_| MergeError::MissingDimension {
                    path: path.clone(),
                    dimension: self.dimension.clone(),
                })?;
            let dim_type = schema.field(dim_idx).data_type();
            if !dimension::is_supported(dim_type) {
                return Err(corrupt(
                    path,
                    format!("'{}' has unsupported type {dim_type}", self.dimension),
                ));
            }

            // Values must strictly increase within the artifact, batches included
            let mut bounds: Option<Bounds> = None;
            for batch in &batches {
                let column = batch.column(dim_idx);
                if column.null_count() > 0 {
                    return Err(corrupt(
                        path,
                        format!("'{}' contains nulls", self.dimension),
                    ));
                }
                let batch_bounds = dimension::column_bounds(column.as_ref())
                    .map_err(|u| unordered(path, &self.dimension, u.before, u.after, dim_type))?;
                match (bounds, batch_bounds) {
                    (Some(acc), Some(b)) if b.min <= acc.max => {
                        return Err(unordered(path, &self.dimension, acc.max, b.min, dim_type));
                    }
                    (Some(acc), Some(b)) => {
                        bounds = Some(Bounds {
                            min: acc.min,
                            max: b.max,
                        });
                    }
                    (None, Some(b)) => bounds = Some(b),
                    (_, None) => {}
                }
            }

            match (previous_end, bounds) {
                (Some(prev), Some(cur)) if cur.min <= prev => {
                    return Err(MergeError::Overlap {
                        path: path.clone(),
                        previous_end: dimension::render(prev, dim_type),
                        start: dimension::render(cur.min, dim_type),
                    });
                }
                (_, Some(cur)) => previous_end = Some(cur.max),
                (_, None) => log::debug!("{}: no rows", path.display()),
            }

            if out.is_none() {
                out = Some(ParquetOutput::create(
                    output,
                    expected.clone(),
                    self.zstd_level,
                )?);
            }
            if let Some(sink) = out.as_mut() {
                for batch in batches {
                    // Re-tag with the output schema so metadata differences do not leak
                    let batch = RecordBatch::try_new(expected.clone(), batch.columns().to_vec())
                        .map_err(|e| corrupt(path, e))?;
                    sink.write_batch(&batch)?;
                }
            }
        }

        let rows = out.ok_or(MergeError::NoInputs)?.finalize()?;
        let stats = MergeStats {
            inputs: inputs.len(),
            rows,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Merged {} artifacts, {} rows in {:.1}s",
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
    use arrow::array::{AsArray, Date32Array, Float32Array, Int64Array};
    use arrow::datatypes::{DataType, Date32Type, Field};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// 2021-01-01 as days since the epoch
    const JAN_1_2021: i32 = 18_628;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("time", DataType::Date32, false),
            Field::new("analysed_sst", DataType::Float32, true),
        ]))
    }

    /// Daily rows for days `[first, last]` of January 2021
    fn write_days(path: &Path, first: i32, last: i32) {
        let days: Vec<i32> = (first..=last).map(|d| JAN_1_2021 + d - 1).collect();
        let sst: Vec<f32> = days.iter().map(|&d| 270.0 + (d % 10) as f32).collect();
        let batch = RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Date32Array::from(days)),
                Arc::new(Float32Array::from(sst)),
            ],
        )
        .unwrap();
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    /// One record batch per slice of January days
    fn write_batches(path: &Path, batches: &[&[i32]]) {
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema(), None).unwrap();
        for days in batches {
            let days: Vec<i32> = days.iter().map(|d| JAN_1_2021 + d - 1).collect();
            let sst = vec![Some(280.0_f32); days.len()];
            let batch = RecordBatch::try_new(
                schema(),
                vec![
                    Arc::new(Date32Array::from(days)),
                    Arc::new(Float32Array::from(sst)),
                ],
            )
            .unwrap();
            writer.write(&batch).unwrap();
            // One row group per slice
            writer.flush().unwrap();
        }
        writer.close().unwrap();
    }

    fn read_days(path: &Path) -> Vec<i32> {
        let (_, batches) = read_artifact(path).unwrap();
        batches
            .iter()
            .flat_map(|b| {
                b.column(0)
                    .as_primitive::<Date32Type>()
                    .values()
                    .iter()
                    .map(|d| d - JAN_1_2021 + 1)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn thirds(dir: &Path) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = ["2021-01-01", "2021-01-11", "2021-01-21"]
            .iter()
            .map(|s| dir.join(format!("{s}.parquet")))
            .collect();
        write_days(&paths[0], 1, 10);
        write_days(&paths[1], 11, 20);
        write_days(&paths[2], 21, 31);
        paths
    }

    #[test]
    fn concatenates_in_input_order() {
        let dir = TempDir::new().unwrap();
        let inputs = thirds(dir.path());
        let output = dir.path().join("sst.parquet");

        let stats = ParquetConcat::new("time").concat(&inputs, &output).unwrap();

        assert_eq!(stats.inputs, 3);
        assert_eq!(stats.rows, 31);
        assert_eq!(read_days(&output), (1..=31).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_overlap() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        let b = dir.path().join("b.parquet");
        write_days(&a, 1, 10);
        write_days(&b, 10, 20);
        let output = dir.path().join("sst.parquet");

        let err = ParquetConcat::new("time")
            .concat(&[a, b.clone()], &output)
            .unwrap_err();

        match err {
            MergeError::Overlap {
                path,
                previous_end,
                start,
            } => {
                assert_eq!(path, b);
                assert_eq!(previous_end, "2021-01-10");
                assert_eq!(start, "2021-01-10");
            }
            other => panic!("expected Overlap, got {other}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn rejects_reversed_inputs() {
        let dir = TempDir::new().unwrap();
        let mut inputs = thirds(dir.path());
        inputs.swap(0, 1);
        let err = ParquetConcat::new("time")
            .concat(&inputs, &dir.path().join("out.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::Overlap { .. }));
    }

    #[test]
    fn rejects_unsorted_artifact() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        let b = dir.path().join("b.parquet");
        write_days(&a, 1, 2);
        write_batches(&b, &[&[5, 3, 4]]);
        let output = dir.path().join("out.parquet");

        let err = ParquetConcat::new("time")
            .concat(&[a, b.clone()], &output)
            .unwrap_err();

        match err {
            MergeError::Corrupt { path, message } => {
                assert_eq!(path, b);
                assert!(message.contains("2021-01-05 then 2021-01-03"), "{message}");
            }
            other => panic!("expected Corrupt, got {other}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn rejects_repeated_time_values() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        write_batches(&a, &[&[1, 2, 2, 3]]);
        let err = ParquetConcat::new("time")
            .concat(&[a], &dir.path().join("out.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::Corrupt { .. }));
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn checks_order_across_batches() {
        let dir = TempDir::new().unwrap();
        let sorted = dir.path().join("sorted.parquet");
        write_batches(&sorted, &[&[1, 2, 3], &[4, 5]]);
        let stats = ParquetConcat::new("time")
            .concat(&[sorted], &dir.path().join("ok.parquet"))
            .unwrap();
        assert_eq!(stats.rows, 5);

        let interleaved = dir.path().join("interleaved.parquet");
        write_batches(&interleaved, &[&[1, 2, 3], &[2, 6]]);
        let err = ParquetConcat::new("time")
            .concat(&[interleaved], &dir.path().join("bad.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::Corrupt { .. }));
    }

    #[test]
    fn no_inputs() {
        let dir = TempDir::new().unwrap();
        let err = ParquetConcat::new("time")
            .concat(&[], &dir.path().join("out.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::NoInputs));
    }

    #[test]
    fn missing_input_checked_before_writing() {
        let dir = TempDir::new().unwrap();
        let mut inputs = thirds(dir.path());
        inputs.push(dir.path().join("2021-02-01.parquet"));
        let output = dir.path().join("out.parquet");

        let err = ParquetConcat::new("time")
            .concat(&inputs, &output)
            .unwrap_err();
        assert!(matches!(err, MergeError::Missing(ref p) if p.ends_with("2021-02-01.parquet")));
        assert!(!output.exists());
    }

    #[test]
    fn missing_dimension() {
        let dir = TempDir::new().unwrap();
        let inputs = thirds(dir.path());
        let err = ParquetConcat::new("valid_time")
            .concat(&inputs, &dir.path().join("out.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::MissingDimension { ref dimension, .. } if dimension == "valid_time"));
    }

    #[test]
    fn schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        write_days(&a, 1, 10);

        let other = Arc::new(Schema::new(vec![Field::new("time", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            other.clone(),
            vec![Arc::new(Int64Array::from(vec![100_i64]))],
        )
        .unwrap();
        let b = dir.path().join("b.parquet");
        let mut writer = ArrowWriter::try_new(File::create(&b).unwrap(), other, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let err = ParquetConcat::new("time")
            .concat(&[a, b], &dir.path().join("out.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("time"));
    }

    #[test]
    fn corrupt_input() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        std::fs::write(&a, b"definitely not parquet").unwrap();
        let err = ParquetConcat::new("time")
            .concat(&[a], &dir.path().join("out.parquet"))
            .unwrap_err();
        assert!(matches!(err, MergeError::Corrupt { .. }));
    }

    #[test]
    fn failure_keeps_previous_output() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        let b = dir.path().join("b.parquet");
        write_days(&a, 1, 10);
        write_days(&b, 5, 15);
        let output = dir.path().join("out.parquet");
        std::fs::write(&output, b"previous merge").unwrap();

        ParquetConcat::new("time")
            .concat(&[a, b], &output)
            .unwrap_err();

        assert_eq!(std::fs::read(&output).unwrap(), b"previous merge");
        assert!(!dir.path().join("out.parquet.tmp").exists());
    }

    #[test]
    fn extension_is_parquet() {
        assert_eq!(ParquetConcat::new("time").extension(), "parquet");
        assert_eq!(ParquetConcat::new("time").data_format(), "parquet");
    }
}
