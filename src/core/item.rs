use crate::error::BatchError;

/// Result of a single read: `Ok(None)` signals the end of the data.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of a writer operation.
pub type ItemWriterResult = Result<(), BatchError>;

/// Produces items one at a time from an underlying resource.
///
/// The resource is acquired in [`open`](ItemReader::open) and released in
/// [`close`](ItemReader::close). The step calls `close` on every exit path,
/// including after a failure in the middle of the data.
pub trait ItemReader<I> {
    /// Acquires the underlying resource.
    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    /// Reads the next item.
    ///
    /// # Returns
    /// - `Ok(Some(item))` when an item was read
    /// - `Ok(None)` when there are no more items
    /// - `Err(BatchError::MalformedRecord { .. })` when one entry could not be parsed;
    ///   the reader remains usable and the next call moves on to the next entry
    /// - `Err(_)` for any other failure
    fn read(&self) -> ItemReaderResult<I>;

    /// Moves the reader forward by `item_count` entries, used to resume a
    /// restarted step after the entries consumed by its committed chunks.
    ///
    /// The default implementation reads and discards items. Malformed entries
    /// are consumed like any other; other errors are propagated.
    fn jump_to(&self, item_count: usize) -> Result<(), BatchError> {
        for _ in 0..item_count {
            match self.read() {
                Ok(Some(_)) | Err(BatchError::MalformedRecord { .. }) => {}
                Ok(None) => break,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Releases the underlying resource.
    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Transforms one item into zero or one output item.
///
/// Implementations must not perform I/O against the step's reader or writer,
/// so they can be swapped and tested on their own.
pub trait ItemProcessor<I, O> {
    /// Processes an item.
    ///
    /// # Returns
    /// - `Ok(Some(output))` to hand the output to the writer
    /// - `Ok(None)` to filter the item out
    /// - `Err(BatchError::Validation(_))` to reject the item; it is skipped
    /// - `Err(_)` for any other failure, which fails the step
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Persists chunks of items.
///
/// A chunk is written between [`begin`](ItemWriter::begin) and
/// [`commit`](ItemWriter::commit) or [`rollback`](ItemWriter::rollback).
/// `write` must be atomic: either every item of the slice is stored, or none
/// is visible once the transaction is rolled back. A failed `write` leaves the
/// items written before it in the same transaction in place, so a chunk can be
/// written again item by item when one of its items is rejected.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Starts the transaction of a chunk.
    fn begin(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Makes everything written since [`begin`](ItemWriter::begin) durable.
    fn commit(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Discards everything written since [`begin`](ItemWriter::begin).
    fn rollback(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor handing every item to the writer unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}
