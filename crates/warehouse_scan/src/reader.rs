//! Worker-side readers built from partition descriptors.

use std::sync::Arc;

use datafusion::arrow::datatypes::Schema;
use datafusion::arrow::record_batch::{RecordBatch, RecordBatchOptions};
use futures_util::stream::{self, BoxStream};
use tracing::debug;

use crate::engine::{BatchReader, BatchSource};
use crate::error::{ScanError, ScanResult};
use crate::partition::{CountPartition, DataPartition, PartitionDescriptor};

/// Sequential batch reader for one partition.
pub enum PartitionReader {
    Data(DataPartitionReader),
    Count(CountPartitionReader),
}

impl PartitionReader {
    /// Opens the reader matching `partition`.
    ///
    /// `count_batch_rows` bounds the row count of batches emitted for count
    /// partitions; it is ignored for data partitions.
    pub async fn open(
        partition: &PartitionDescriptor,
        source: &dyn BatchSource,
        count_batch_rows: usize,
    ) -> ScanResult<Self> {
        match partition {
            PartitionDescriptor::Data(data) => {
                Ok(Self::Data(DataPartitionReader::open(data, source).await?))
            }
            PartitionDescriptor::Count(count) => {
                Ok(Self::Count(CountPartitionReader::new(*count, count_batch_rows)))
            }
        }
    }

    /// Returns the next batch, or `None` once the partition is exhausted.
    pub async fn next_batch(&mut self) -> ScanResult<Option<RecordBatch>> {
        match self {
            Self::Data(reader) => reader.next_batch().await,
            Self::Count(reader) => reader.next_batch(),
        }
    }

    /// Releases reader resources.
    pub async fn close(&mut self) -> ScanResult<()> {
        match self {
            Self::Data(reader) => reader.close().await,
            Self::Count(_) => Ok(()),
        }
    }

    /// Converts the reader into a stream that closes the reader at the end.
    pub fn into_stream(self) -> BoxStream<'static, ScanResult<RecordBatch>> {
        Box::pin(stream::try_unfold(self, |mut reader| async move {
            match reader.next_batch().await? {
                Some(batch) => Ok(Some((batch, reader))),
                None => {
                    reader.close().await?;
                    Ok::<_, ScanError>(None)
                }
            }
        }))
    }
}

/// Reads the batches of one data split through the engine's batch source.
pub struct DataPartitionReader {
    inner: Box<dyn BatchReader>,
    context: String,
    rows_read: u64,
}

impl DataPartitionReader {
    async fn open(partition: &DataPartition, source: &dyn BatchSource) -> ScanResult<Self> {
        let task = partition.task()?;
        let context = format!(
            "session={} handle={} query={}",
            task.job.session_id, task.job.handle_id, task.job.query
        );
        debug!(
            split = %hex::encode(&task.split.token()[..task.split.token().len().min(16)]),
            buffer_max_bytes = task.buffer_max_bytes,
            "opening data partition reader"
        );
        let inner = source
            .open(task)
            .await
            .map_err(|err| ScanError::execution(context.clone(), err.context("open split reader")))?;
        Ok(Self {
            inner,
            context,
            rows_read: 0,
        })
    }

    async fn next_batch(&mut self) -> ScanResult<Option<RecordBatch>> {
        let batch = self
            .inner
            .read_batch()
            .await
            .map_err(|err| ScanError::execution(self.context.clone(), err.context("read batch")))?;
        if let Some(batch) = batch.as_ref() {
            self.rows_read = self.rows_read.saturating_add(batch.num_rows() as u64);
        }
        Ok(batch)
    }

    async fn close(&mut self) -> ScanResult<()> {
        debug!(rows_read = self.rows_read, "closing data partition reader");
        self.inner
            .close()
            .await
            .map_err(|err| ScanError::execution(self.context.clone(), err.context("close split reader")))
    }
}

/// Emits column-less batches whose row counts add up to the owed count.
pub struct CountPartitionReader {
    remaining: u64,
    batch_rows: u64,
    schema: Arc<Schema>,
}

impl CountPartitionReader {
    pub fn new(partition: CountPartition, batch_rows: usize) -> Self {
        Self {
            remaining: partition.rows(),
            batch_rows: batch_rows.max(1) as u64,
            schema: Arc::new(Schema::empty()),
        }
    }

    fn next_batch(&mut self) -> ScanResult<Option<RecordBatch>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let rows = self.remaining.min(self.batch_rows);
        self.remaining -= rows;
        let options = RecordBatchOptions::new().with_row_count(Some(rows as usize));
        RecordBatch::try_new_with_options(Arc::clone(&self.schema), Vec::new(), &options)
            .map(Some)
            .map_err(|err| ScanError::execution("count partition batch", err.into()))
    }
}
