mod common;

use std::sync::Arc;

use anyhow::Result;
use datafusion::arrow::datatypes::Schema;
use futures_util::TryStreamExt;
use warehouse_scan::{PartitionReader, ScanErrorKind};

use common::{Harness, BATCHES_PER_SPLIT, HANDLE_ID, ROWS_PER_BATCH};

#[tokio::test]
async fn data_partition_streams_split_batches() -> Result<()> {
    let harness = Harness::new(4);
    let scan = harness.coordinator(&[]);
    let partitions = scan.emit_partitions().await?;
    assert_eq!(partitions.len(), 2);

    let mut total_rows = 0;
    for partition in &partitions {
        let reader = PartitionReader::open(partition, harness.engine.as_ref(), 16).await?;
        let batches = reader.into_stream().try_collect::<Vec<_>>().await?;
        assert_eq!(batches.len(), BATCHES_PER_SPLIT);
        total_rows += batches.iter().map(|batch| batch.num_rows()).sum::<usize>();
    }
    assert_eq!(total_rows, 2 * BATCHES_PER_SPLIT * ROWS_PER_BATCH);

    let opened = harness.engine.opened();
    assert_eq!(opened.len(), 2);
    for task in &opened {
        assert_eq!(task.schema_split.token(), b"schema");
        assert_eq!(task.plan_split.token(), b"plan-v1");
        assert_eq!(task.job.handle_id, HANDLE_ID);
        assert_eq!(task.buffer_max_bytes, i64::MAX as u64);
    }
    Ok(())
}

#[tokio::test]
async fn buffer_ceiling_reaches_reader_tasks() -> Result<()> {
    let harness = Harness::new(3);
    let scan = harness.coordinator(&[("buffer_max_bytes", "1048576")]);
    let partitions = scan.emit_partitions().await?;

    let mut reader = PartitionReader::open(&partitions[0], harness.engine.as_ref(), 16).await?;
    while reader.next_batch().await?.is_some() {}
    reader.close().await?;

    assert_eq!(harness.engine.opened()[0].buffer_max_bytes, 1_048_576);
    Ok(())
}

#[tokio::test]
async fn count_partitions_stream_owed_rows() -> Result<()> {
    let harness = Harness::new(4);
    harness.engine.set_count(1000);
    let scan = harness.coordinator(&[("count_batch_rows", "100")]);
    scan.prune_columns(Arc::new(Schema::empty())).await?;
    let partitions = scan.emit_partitions().await?;

    let mut total_rows = 0;
    for partition in &partitions {
        let reader = PartitionReader::open(
            partition,
            harness.engine.as_ref(),
            scan.request().count_batch_rows(),
        )
        .await?;
        let batches = reader.into_stream().try_collect::<Vec<_>>().await?;
        for batch in &batches {
            assert_eq!(batch.num_columns(), 0);
            assert!(batch.num_rows() <= 100);
        }
        total_rows += batches.iter().map(|batch| batch.num_rows()).sum::<usize>();
    }

    assert_eq!(total_rows, 1000);
    assert!(harness.engine.opened().is_empty());
    Ok(())
}

#[tokio::test]
async fn reading_after_release_fails() -> Result<()> {
    let harness = Harness::new(3);
    let scan = harness.coordinator(&[]);
    let partitions = scan.emit_partitions().await?;
    scan.close().await?;

    let err = PartitionReader::open(&partitions[0], harness.engine.as_ref(), 16)
        .await
        .err()
        .expect("released partition");

    assert_eq!(err.kind(), ScanErrorKind::Execution);
    assert!(harness.engine.opened().is_empty());
    Ok(())
}
