use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{AsArray, Float32Array, RecordBatch, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit, TimestampMicrosecondType};
use geoslice_merge::{ConcatEngine, MergeError, ParquetConcat};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

const HOUR_US: i64 = 3_600_000_000;

fn schema(source: &str) -> SchemaRef {
    let metadata = HashMap::from([("source".to_string(), source.to_string())]);
    Arc::new(Schema::new_with_metadata(
        vec![
            Field::new(
                "time",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new("analysed_sst", DataType::Float32, true),
            Field::new("sea_ice_fraction", DataType::Float32, true),
        ],
        metadata,
    ))
}

/// One artifact holding `hours` rows starting at `first_hour`, split over two batches
fn write_artifact(path: &Path, first_hour: i64, hours: i64) {
    let schema = schema(&path.display().to_string());
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None).unwrap();
    let split = hours / 2;
    for (from, to) in [(0, split), (split, hours)] {
        let times: Vec<i64> = (from..to).map(|h| (first_hour + h) * HOUR_US).collect();
        let n = times.len();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(TimestampMicrosecondArray::from(times)),
                Arc::new(Float32Array::from(vec![Some(271.5_f32); n])),
                Arc::new(Float32Array::from(vec![None::<f32>; n])),
            ],
        )
        .unwrap();
        writer.write(&batch).unwrap();
    }
    writer.close().unwrap();
}

fn read_times(path: &Path) -> Vec<i64> {
    let file = File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    reader
        .flat_map(|b| {
            b.unwrap()
                .column(0)
                .as_primitive::<TimestampMicrosecondType>()
                .values()
                .to_vec()
        })
        .collect()
}

fn artifacts(dir: &Path, spans: &[(i64, i64)]) -> Vec<PathBuf> {
    spans
        .iter()
        .enumerate()
        .map(|(i, &(first, hours))| {
            let path = dir.join(format!("part_{i}.parquet"));
            write_artifact(&path, first, hours);
            path
        })
        .collect()
}

#[test]
fn merges_hourly_artifacts_with_differing_metadata() {
    let dir = TempDir::new().unwrap();
    let inputs = artifacts(dir.path(), &[(0, 240), (240, 240), (480, 264)]);
    let output = dir.path().join("merged").join("sst.parquet");

    let stats = ParquetConcat::new("time")
        .with_zstd_level(1)
        .concat(&inputs, &output)
        .unwrap();

    assert_eq!(stats.inputs, 3);
    assert_eq!(stats.rows, 744);
    let times = read_times(&output);
    assert_eq!(times.len(), 744);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(times[0], 0);
    assert_eq!(times[743], 743 * HOUR_US);
}

#[test]
fn merge_overwrites_previous_output() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("sst.parquet");

    let first = artifacts(dir.path(), &[(0, 4)]);
    ParquetConcat::new("time").concat(&first, &output).unwrap();
    assert_eq!(read_times(&output).len(), 4);

    let second = artifacts(dir.path(), &[(0, 4), (4, 6)]);
    ParquetConcat::new("time").concat(&second, &output).unwrap();
    assert_eq!(read_times(&output).len(), 10);
}

#[test]
fn touching_boundaries_overlap() {
    let dir = TempDir::new().unwrap();
    // Second artifact starts on the last hour of the first
    let inputs = artifacts(dir.path(), &[(0, 10), (9, 10)]);

    let err = ParquetConcat::new("time")
        .concat(&inputs, &dir.path().join("sst.parquet"))
        .unwrap_err();

    match err {
        MergeError::Overlap {
            previous_end,
            start,
            ..
        } => {
            assert_eq!(previous_end, "1970-01-01 09:00:00");
            assert_eq!(start, previous_end);
        }
        other => panic!("expected Overlap, got {other}"),
    }
}

#[test]
fn empty_artifact_is_carried() {
    let dir = TempDir::new().unwrap();
    let inputs = artifacts(dir.path(), &[(0, 4), (4, 0), (4, 4)]);
    let output = dir.path().join("sst.parquet");

    let stats = ParquetConcat::new("time").concat(&inputs, &output).unwrap();
    assert_eq!(stats.rows, 8);
}
