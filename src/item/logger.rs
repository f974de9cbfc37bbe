use std::{cell::Cell, fmt::Debug};

use log::{debug, info};

use crate::{BatchError, core::item::ItemWriter};

/// Writer logging each item at info level instead of storing it.
///
/// Useful to try a reader and processor before a database is available.
/// Items are logged as they are written, so a rolled back chunk still shows
/// up in the log; the rollback itself is logged at debug level.
#[derive(Default)]
pub struct LoggerWriter {
    written: Cell<usize>,
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items written since the writer was created, rolled back ones included.
    pub fn written(&self) -> usize {
        self.written.get()
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        self.written.set(self.written.get() + items.len());
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        debug!("Chunk rolled back, logged records were not committed");
        Ok(())
    }
}
