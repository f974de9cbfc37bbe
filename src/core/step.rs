use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    chunk::{Chunk, ChunkStatus, ChunkTransaction},
    item::{ItemProcessor, ItemReader, ItemWriter},
    listener::StepExecutionListener,
};

/// Lifecycle status shared by steps and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Created, not yet running.
    Starting,
    /// Running.
    Started,
    /// Ran to the end of its data.
    Completed,
    /// Aborted by an error. Terminal.
    Failed,
    /// Stopped on request between two chunks.
    Stopped,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    /// Whether an execution ending with this status may be restarted.
    pub fn is_restartable(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }
}

/// State and counters of one run of a step.
///
/// Counters only reflect committed chunks: for every state observed between
/// two chunks, `read_count == write_count + filter_count + skip_count()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the executed step
    pub name: String,
    /// Run identifier of the owning job execution
    pub job_execution_id: i64,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Entries pulled from the reader, malformed ones included
    pub read_count: usize,
    /// Items persisted by the writer
    pub write_count: usize,
    /// Items the processor filtered out
    pub filter_count: usize,
    /// Malformed entries skipped
    pub read_skip_count: usize,
    /// Items rejected by the processor
    pub process_skip_count: usize,
    /// Items the writer could not persist and that were skipped
    pub write_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    /// Entries consumed by previous executions of the same step, skipped on open
    pub restart_position: usize,
    pub exit_message: Option<String>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_execution_id: 0,
            status: BatchStatus::Starting,
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            restart_position: 0,
            exit_message: None,
        }
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Position of the reader after the last committed chunk.
    pub fn committed_position(&self) -> usize {
        self.restart_position + self.read_count
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }

    fn apply(&mut self, contribution: &ChunkContribution) {
        self.read_count += contribution.read;
        self.write_count += contribution.write;
        self.filter_count += contribution.filter;
        self.read_skip_count += contribution.read_skip;
        self.process_skip_count += contribution.process_skip;
        self.write_skip_count += contribution.write_skip;
    }
}

/// Counters of the chunk in progress, applied to the step execution on commit.
#[derive(Default, Debug)]
struct ChunkContribution {
    read: usize,
    write: usize,
    filter: usize,
    read_skip: usize,
    process_skip: usize,
    write_skip: usize,
}

/// Decides whether a record-level error is skipped or fails the step.
///
/// - processor validation errors are always skipped and never count against the limit
/// - malformed entries are skipped while fewer than `skip_limit` entries were skipped
/// - write failures (`Persistence`, `Timeout`) are skipped the same way only when
///   `skip_write_failures` is enabled
/// - every other error fails the step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SkipPolicy {
    skip_limit: usize,
    skip_write_failures: bool,
}

impl SkipPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn skip_write_failures(mut self, yes: bool) -> Self {
        self.skip_write_failures = yes;
        self
    }

    /// `skip_count` is the number of entries already skipped against the limit.
    pub fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool {
        match error {
            BatchError::Validation(_) => true,
            BatchError::MalformedRecord { .. } => skip_count < self.skip_limit,
            error if error.is_write_failure() => {
                self.skip_write_failures && skip_count < self.skip_limit
            }
            _ => false,
        }
    }
}

/// A phase of a job.
pub trait Step {
    fn get_name(&self) -> &str;

    /// Executes the step, recording its progress in `step_execution`.
    ///
    /// # Returns
    /// - `Ok(())` when the step completed
    /// - `Err(BatchError::Step(_))` when it failed or was stopped; the final
    ///   status and the cause are recorded in `step_execution`
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Step reading, processing and writing items chunk by chunk.
///
/// Each chunk is one transaction of the writer: up to `chunk_size` entries are
/// read and processed, the resulting items written, then the transaction is
/// committed. Any error rolls the whole chunk back while the chunks committed
/// before stay committed.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    /// Number of entries read per transaction
    chunk_size: usize,
    skip_policy: SkipPolicy,
    listeners: Vec<&'a dyn StepExecutionListener>,
    cancellation_token: Option<CancellationToken>,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        step_execution.start_time = Some(Utc::now());
        step_execution.status = BatchStatus::Started;

        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        for listener in &self.listeners {
            listener.before_step(step_execution);
        }

        let result = self
            .open_streams(step_execution)
            .and_then(|()| self.run_chunks(step_execution));

        let result = match (result, self.close_streams()) {
            (Ok(status), Ok(())) => Ok(status),
            (Ok(_), Err(close_error)) => Err(close_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(close_error)) => {
                warn!("Error while closing step {}: {}", self.name, close_error);
                Err(error)
            }
        };

        match result {
            Ok(status) => step_execution.status = status,
            Err(error) => {
                error!("Step {} failed: {}", self.name, error);
                step_execution.status = BatchStatus::Failed;
                step_execution.exit_message = Some(error.to_string());
            }
        }

        step_execution.end_time = Some(Utc::now());

        for listener in &self.listeners {
            listener.after_step(step_execution);
        }

        info!(
            "End of step: {}, status: {:?}, read: {}, written: {}, filtered: {}, skipped: {}, commits: {}, rollbacks: {}",
            step_execution.name,
            step_execution.status,
            step_execution.read_count,
            step_execution.write_count,
            step_execution.filter_count,
            step_execution.skip_count(),
            step_execution.commit_count,
            step_execution.rollback_count
        );

        if step_execution.status == BatchStatus::Completed {
            Ok(())
        } else {
            Err(BatchError::Step(self.name.clone()))
        }
    }
}

impl<'a, I, O> ChunkOrientedStep<'a, I, O> {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn open_streams(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.reader.open()?;

        if step_execution.restart_position > 0 {
            info!(
                "Restarting step {} after {} entries already processed",
                self.name, step_execution.restart_position
            );
            self.reader.jump_to(step_execution.restart_position)?;
        }

        self.writer.open()
    }

    fn close_streams(&self) -> Result<(), BatchError> {
        let writer_result = self.writer.close();
        let reader_result = self.reader.close();
        writer_result.and(reader_result)
    }

    fn is_stop_requested(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn run_chunks(&self, step_execution: &mut StepExecution) -> Result<BatchStatus, BatchError> {
        loop {
            if self.is_stop_requested() {
                info!(
                    "Stop requested, step {} stops after {} commits",
                    self.name, step_execution.commit_count
                );
                return Ok(BatchStatus::Stopped);
            }

            if self.execute_chunk(step_execution)? == ChunkStatus::Finished {
                return Ok(BatchStatus::Completed);
            }
        }
    }

    /// Reads, processes and writes one chunk inside one transaction.
    fn execute_chunk(&self, step_execution: &mut StepExecution) -> Result<ChunkStatus, BatchError> {
        let mut contribution = ChunkContribution::default();

        let transaction = ChunkTransaction::begin(self.writer)?;

        let chunk = match self.read_chunk(step_execution, &mut contribution) {
            Ok(chunk) => chunk,
            Err(error) => {
                self.rollback(transaction, step_execution);
                return Err(error);
            }
        };

        let items = chunk.get_items();

        if !items.is_empty() {
            debug!("Writing chunk of {} items", items.len());
            if let Err(error) = self.writer.write(items) {
                self.rollback(transaction, step_execution);
                return self.recover_write_failure(step_execution, chunk, contribution, error);
            }
        }

        if let Err(error) = transaction.commit() {
            step_execution.rollback_count += 1;
            return self.recover_write_failure(step_execution, chunk, contribution, error);
        }

        contribution.write += items.len();
        step_execution.apply(&contribution);
        step_execution.commit_count += 1;

        debug!("Chunk committed: {:?}", contribution);

        Ok(chunk.get_status())
    }

    fn read_chunk(
        &self,
        step_execution: &StepExecution,
        contribution: &mut ChunkContribution,
    ) -> Result<Chunk<O>, BatchError> {
        debug!("Start reading chunk");

        let mut chunk = Chunk::new(self.chunk_size);

        while chunk.is_open() {
            match self.reader.read() {
                Ok(Some(item)) => {
                    contribution.read += 1;
                    chunk.consume();
                    self.process_item(&item, &mut chunk, contribution)?;
                }
                Ok(None) => {
                    debug!("End of data reached");
                    chunk.finish();
                }
                Err(error) => {
                    // a stalled source is never skipped, only the sink's failures are
                    if error.is_write_failure()
                        || !self
                            .skip_policy
                            .should_skip(&error, Self::skip_count(step_execution, contribution))
                    {
                        return Err(error);
                    }
                    warn!("Skipping entry: {}", error);
                    contribution.read += 1;
                    contribution.read_skip += 1;
                    chunk.consume();
                }
            }
        }

        Ok(chunk)
    }

    fn process_item(
        &self,
        item: &I,
        chunk: &mut Chunk<O>,
        contribution: &mut ChunkContribution,
    ) -> Result<(), BatchError> {
        match self.processor.process(item) {
            Ok(Some(output)) => chunk.add_item(output),
            Ok(None) => {
                debug!("Item filtered by processor");
                contribution.filter += 1;
            }
            Err(error @ BatchError::Validation(_)) => {
                warn!("Skipping invalid item: {}", error);
                contribution.process_skip += 1;
            }
            Err(error) => return Err(error),
        }
        Ok(())
    }

    /// Handles a chunk whose write or commit failed and was rolled back.
    ///
    /// When the policy skips write failures, the chunk is written again in a
    /// new transaction one item at a time. Items the writer rejects, alone or
    /// because they conflict with an item written before them, are skipped
    /// and the others become visible in a single commit.
    fn recover_write_failure(
        &self,
        step_execution: &mut StepExecution,
        chunk: Chunk<O>,
        mut contribution: ChunkContribution,
        error: BatchError,
    ) -> Result<ChunkStatus, BatchError> {
        warn!(
            "Chunk of {} items rolled back: {}",
            chunk.get_items().len(),
            error
        );

        if !self
            .skip_policy
            .should_skip(&error, Self::skip_count(step_execution, &contribution))
        {
            return Err(error);
        }

        let status = chunk.get_status();
        let items = chunk.into_items();

        info!("Scanning {} items one by one", items.len());

        let transaction = ChunkTransaction::begin(self.writer)?;

        for item in &items {
            match self.writer.write(std::slice::from_ref(item)) {
                Ok(()) => contribution.write += 1,
                Err(error) => {
                    if !self
                        .skip_policy
                        .should_skip(&error, Self::skip_count(step_execution, &contribution))
                    {
                        self.rollback(transaction, step_execution);
                        return Err(error);
                    }
                    warn!("Skipping item the writer rejected: {}", error);
                    contribution.write_skip += 1;
                }
            }
        }

        if let Err(error) = transaction.commit() {
            step_execution.rollback_count += 1;
            return Err(error);
        }

        step_execution.apply(&contribution);
        step_execution.commit_count += 1;

        Ok(status)
    }

    fn rollback(&self, transaction: ChunkTransaction<'_, O>, step_execution: &mut StepExecution) {
        step_execution.rollback_count += 1;
        if let Err(error) = transaction.rollback() {
            warn!("Unable to roll back chunk in step {}: {}", self.name, error);
        }
    }

    fn skip_count(step_execution: &StepExecution, contribution: &ChunkContribution) -> usize {
        step_execution.read_skip_count
            + step_execution.write_skip_count
            + contribution.read_skip
            + contribution.write_skip
    }
}

/// Entry point for building steps.
///
/// ```
/// use batch_etl::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult, PassThroughProcessor};
/// use batch_etl::core::step::{Step, StepBuilder, StepExecution, BatchStatus};
/// use std::cell::{Cell, RefCell};
///
/// struct Counter(Cell<u32>);
/// impl ItemReader<u32> for Counter {
///     fn read(&self) -> ItemReaderResult<u32> {
///         let next = self.0.get() + 1;
///         self.0.set(next);
///         Ok((next <= 5).then_some(next))
///     }
/// }
///
/// #[derive(Default)]
/// struct Collect(RefCell<Vec<u32>>);
/// impl ItemWriter<u32> for Collect {
///     fn write(&self, items: &[u32]) -> ItemWriterResult {
///         self.0.borrow_mut().extend_from_slice(items);
///         Ok(())
///     }
/// }
///
/// let reader = Counter(Cell::new(0));
/// let writer = Collect::default();
///
/// let step = StepBuilder::new("count")
///     .chunk(2)
///     .reader(&reader)
///     .processor(&PassThroughProcessor)
///     .writer(&writer)
///     .build()
///     .unwrap();
///
/// let mut execution = StepExecution::new(step.get_name());
/// step.execute(&mut execution).unwrap();
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// assert_eq!(execution.write_count, 5);
/// assert_eq!(execution.commit_count, 3);
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Step with a random name.
    pub fn unnamed() -> Self {
        Self { name: build_name() }
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    chunk_size: usize,
    skip_policy: SkipPolicy,
    listeners: Vec<&'a dyn StepExecutionListener>,
    cancellation_token: Option<CancellationToken>,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_policy: SkipPolicy::default(),
            listeners: Vec::new(),
            cancellation_token: None,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Number of malformed entries (and write failures, when enabled) tolerated.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_policy = self.skip_policy.skip_limit(skip_limit);
        self
    }

    pub fn skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Token checked between chunks; once cancelled the step ends as `Stopped`.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step {} must be at least 1",
                self.name
            )));
        }

        let missing = |component: &str| {
            BatchError::Configuration(format!(
                "{} is required for step {}",
                component, self.name
            ))
        };

        Ok(ChunkOrientedStep {
            reader: self.reader.ok_or_else(|| missing("reader"))?,
            processor: self.processor.ok_or_else(|| missing("processor"))?,
            writer: self.writer.ok_or_else(|| missing("writer"))?,
            chunk_size: self.chunk_size,
            skip_policy: self.skip_policy,
            listeners: self.listeners,
            cancellation_token: self.cancellation_token,
            name: self.name,
        })
    }
}
