use log::{debug, warn};

use crate::core::item::{ItemWriter, ItemWriterResult};

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ChunkStatus {
    /// More items can be added, the reader has not reached the end.
    Continuable,
    /// The chunk holds `chunk_size` entries.
    Full,
    /// The reader reached the end of the data.
    Finished,
}

/// Items gathered for one transaction.
///
/// The capacity bounds how many entries the step pulls from the reader before
/// writing, so the memory held by a step is proportional to the chunk size.
/// Filtered and skipped entries count against the capacity like written ones.
pub struct Chunk<O> {
    items: Vec<O>,
    status: ChunkStatus,
    chunk_size: usize,
    consumed: usize,
}

impl<O> Chunk<O> {
    pub fn new(chunk_size: usize) -> Chunk<O> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            status: ChunkStatus::Continuable,
            chunk_size,
            consumed: 0,
        }
    }

    /// Records that one entry was pulled from the reader, whatever happened to it.
    pub fn consume(&mut self) {
        self.consumed += 1;
        if self.consumed >= self.chunk_size {
            self.status = ChunkStatus::Full;
        }
    }

    pub fn add_item(&mut self, item: O) {
        self.items.push(item);
    }

    pub fn finish(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    pub fn is_open(&self) -> bool {
        self.status == ChunkStatus::Continuable
    }

    pub fn get_items(&self) -> &[O] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn into_items(self) -> Vec<O> {
        self.items
    }
}

/// Transaction of one chunk, bound to the writer that owns the storage.
///
/// The transaction is rolled back when the guard is dropped without an
/// explicit [`commit`](ChunkTransaction::commit) or
/// [`rollback`](ChunkTransaction::rollback), so an early return never leaves
/// it open.
pub struct ChunkTransaction<'w, O> {
    writer: &'w dyn ItemWriter<O>,
    active: bool,
}

impl<'w, O> ChunkTransaction<'w, O> {
    pub fn begin(writer: &'w dyn ItemWriter<O>) -> Result<Self, crate::BatchError> {
        writer.begin()?;
        debug!("Chunk transaction started");
        Ok(Self {
            writer,
            active: true,
        })
    }

    /// Commits the chunk. A failed commit is rolled back before returning.
    pub fn commit(mut self) -> ItemWriterResult {
        self.writer.commit()?;
        self.active = false;
        debug!("Chunk transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) -> ItemWriterResult {
        self.active = false;
        self.writer.rollback()?;
        debug!("Chunk transaction rolled back");
        Ok(())
    }
}

impl<O> Drop for ChunkTransaction<'_, O> {
    fn drop(&mut self) {
        if self.active {
            if let Err(error) = self.writer.rollback() {
                warn!("Unable to roll back chunk transaction: {}", error);
            }
        }
    }
}
