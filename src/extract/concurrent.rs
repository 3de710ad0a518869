//! Partition workers feeding one bounded record queue.
//!
//! # Overview
//!
//! [`ConcurrentFetcher::spawn`] starts one tokio task per [`Partition`]. Each
//! task drives its own [`CursorPaginator`] and pushes [`WorkerMessage`]s into a
//! bounded `mpsc` channel; the consumer reads them through a [`RecordStream`].
//!
//! - Records of one partition arrive in provider order; partitions interleave.
//! - The first `Failed` message ends the stream with that error and closes the
//!   channel, so the remaining workers stop at their next send.
//! - Dropping the [`RecordStream`] has the same effect. Requests already in
//!   flight complete and their pages are discarded.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clients::GraphqlClient;
use crate::config::ExtractConfig;
use crate::extract::bookmark::{BookmarkTracker, ResumeCursor};
use crate::extract::paginator::CursorPaginator;
use crate::extract::partition::Partition;
use crate::extract::stream::StreamDefinition;
use crate::extract::{ExtractError, FetchOutput, Record};

/// A message from a partition worker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// One record, in the partition's order.
    Record { partition: usize, record: Record },
    /// The partition was read to the end.
    Done { partition: usize },
    /// The partition failed; no further messages follow from it.
    Failed {
        partition: usize,
        error: ExtractError,
    },
}

/// Sending half handed to one worker.
#[derive(Debug)]
pub(crate) struct RecordSink {
    partition: usize,
    tx: mpsc::Sender<WorkerMessage>,
}

impl RecordSink {
    /// Queues a record. Returns `false` once the consumer is gone.
    pub(crate) async fn record(&self, record: Record) -> bool {
        self.tx
            .send(WorkerMessage::Record {
                partition: self.partition,
                record,
            })
            .await
            .is_ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) async fn done(self) {
        let _ = self
            .tx
            .send(WorkerMessage::Done {
                partition: self.partition,
            })
            .await;
    }

    pub(crate) async fn failed(self, error: ExtractError) {
        let _ = self
            .tx
            .send(WorkerMessage::Failed {
                partition: self.partition,
                error,
            })
            .await;
    }
}

/// Creates one sink per partition and the stream reading them.
pub(crate) fn record_channel(
    partitions: usize,
    capacity: usize,
    tracker: BookmarkTracker,
) -> (Vec<RecordSink>, RecordStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sinks = (0..partitions)
        .map(|partition| RecordSink {
            partition,
            tx: tx.clone(),
        })
        .collect();

    let stream = RecordStream {
        rx,
        outstanding: vec![true; partitions],
        tracker,
        finished: false,
    };
    (sinks, stream)
}

/// Records produced by an extraction, in arrival order.
///
/// Every record passes through a [`BookmarkTracker`] before it is returned.
/// Records within a partition are not ordered by replication key and
/// partitions interleave, so [`RecordStream::resume_cursor`] is only
/// available once every partition has finished.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<WorkerMessage>,
    outstanding: Vec<bool>,
    tracker: BookmarkTracker,
    finished: bool,
}

impl RecordStream {
    /// Returns the next record, `None` once every partition is done.
    ///
    /// After an error the stream is finished and only returns `None`.
    pub async fn next(&mut self) -> Option<Result<Record, ExtractError>> {
        if self.finished {
            return None;
        }

        loop {
            match self.rx.recv().await {
                Some(WorkerMessage::Record { mut record, .. }) => {
                    if let Err(error) = self.tracker.track(&mut record) {
                        self.abort();
                        return Some(Err(error));
                    }
                    return Some(Ok(record));
                }
                Some(WorkerMessage::Done { partition }) => {
                    if let Some(slot) = self.outstanding.get_mut(partition) {
                        *slot = false;
                    }
                    tracing::debug!(partition, "Partition finished");
                    if self.outstanding.iter().all(|pending| !pending) {
                        self.finished = true;
                        self.rx.close();
                        return None;
                    }
                }
                Some(WorkerMessage::Failed { partition, error }) => {
                    tracing::warn!(partition, %error, "Partition failed, stopping extraction");
                    self.abort();
                    return Some(Err(error));
                }
                None => {
                    self.finished = true;
                    let partition = self.outstanding.iter().position(|pending| *pending)?;
                    return Some(Err(ExtractError::WorkerAborted { partition }));
                }
            }
        }
    }

    /// The resume cursor, once every partition has reported `Done`.
    ///
    /// Returns `None` while any partition is still running or after a
    /// failure. A record not yet emitted may sort below values already seen,
    /// and resuming past it would skip it.
    #[must_use]
    pub fn resume_cursor(&self) -> Option<ResumeCursor> {
        if self.is_complete() {
            self.tracker.resume_cursor()
        } else {
            None
        }
    }

    /// Whether every partition finished without error.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outstanding.iter().all(|pending| !pending)
    }

    /// Drains the stream into memory.
    ///
    /// # Errors
    ///
    /// Returns the first error any partition reported.
    pub async fn collect(mut self) -> Result<FetchOutput, ExtractError> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record?);
        }
        Ok(FetchOutput {
            records,
            next_cursor: self.resume_cursor(),
        })
    }

    fn abort(&mut self) {
        self.finished = true;
        self.rx.close();
    }
}

/// Fetches planned partitions concurrently.
#[derive(Clone, Debug)]
pub struct ConcurrentFetcher {
    client: GraphqlClient,
    stream: Arc<StreamDefinition>,
    config: Arc<ExtractConfig>,
}

impl ConcurrentFetcher {
    /// Creates a fetcher for `stream`.
    #[must_use]
    pub fn new(
        client: GraphqlClient,
        stream: Arc<StreamDefinition>,
        config: Arc<ExtractConfig>,
    ) -> Self {
        Self {
            client,
            stream,
            config,
        }
    }

    /// Starts one worker per partition and returns the merged stream.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self, partitions: Vec<Partition>) -> RecordStream {
        let tracker = BookmarkTracker::new(
            self.stream.replication_key(),
            self.config.missing_key_policy(),
        );
        let (sinks, records) =
            record_channel(partitions.len(), self.config.queue_capacity(), tracker);

        tracing::debug!(
            stream = self.stream.name(),
            partitions = partitions.len(),
            "Starting partition workers"
        );
        for (partition, sink) in partitions.into_iter().zip(sinks) {
            let paginator = CursorPaginator::new(
                self.client.clone(),
                Arc::clone(&self.stream),
                Arc::clone(&self.config),
                partition,
            );
            tokio::spawn(run_partition(paginator, sink));
        }
        records
    }
}

async fn run_partition(mut paginator: CursorPaginator, sink: RecordSink) {
    loop {
        if sink.is_closed() {
            tracing::debug!(
                partition = paginator.partition().index,
                "Consumer gone, stopping partition"
            );
            return;
        }
        match paginator.next_page().await {
            Ok(Some(records)) => {
                for record in records {
                    if !sink.record(record).await {
                        tracing::debug!(
                            partition = paginator.partition().index,
                            "Consumer gone, discarding page"
                        );
                        return;
                    }
                }
            }
            Ok(None) => {
                sink.done().await;
                return;
            }
            Err(error) => {
                sink.failed(error).await;
                return;
            }
        }
    }
}
