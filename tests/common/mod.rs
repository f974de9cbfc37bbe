//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use batch_etl::{
    BatchError,
    core::item::{
        ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult, ItemWriter,
        ItemWriterResult,
    },
};
use mockall::mock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
}

impl Person {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn malformed(line: u64) -> BatchError {
    BatchError::MalformedRecord {
        line,
        content: "bad,row,extra-field".to_string(),
        reason: "expected 2 fields, found 3".to_string(),
    }
}

/// Reader replaying a list of read results, from the start on every `open`.
pub struct ListReader<T> {
    entries: RefCell<Vec<Result<T, BatchError>>>,
    position: Cell<usize>,
}

impl<T: Clone> ListReader<T> {
    pub fn new(entries: Vec<Result<T, BatchError>>) -> Self {
        Self {
            entries: RefCell::new(entries),
            position: Cell::new(0),
        }
    }

    pub fn of(items: Vec<T>) -> Self {
        Self::new(items.into_iter().map(Ok).collect())
    }

    /// Replaces one entry, as if the source had been fixed between two runs.
    pub fn replace(&self, index: usize, entry: Result<T, BatchError>) {
        self.entries.borrow_mut()[index] = entry;
    }
}

impl<T: Clone> ItemReader<T> for ListReader<T> {
    fn open(&self) -> Result<(), BatchError> {
        self.position.set(0);
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        let position = self.position.get();
        let entries = self.entries.borrow();
        match entries.get(position) {
            Some(entry) => {
                self.position.set(position + 1);
                entry.clone().map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Writer keeping written items in memory, staged until the transaction commits.
#[derive(Default)]
pub struct CollectingWriter<T> {
    staged: RefCell<Vec<T>>,
    pub committed: RefCell<Vec<T>>,
    pub commits: Cell<usize>,
}

impl<T: Clone> CollectingWriter<T> {
    pub fn committed(&self) -> Vec<T> {
        self.committed.borrow().clone()
    }
}

impl<T: Clone> ItemWriter<T> for CollectingWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.staged.borrow_mut().extend_from_slice(items);
        Ok(())
    }

    fn begin(&self) -> ItemWriterResult {
        self.staged.borrow_mut().clear();
        Ok(())
    }

    fn commit(&self) -> ItemWriterResult {
        let staged = self.staged.take();
        self.committed.borrow_mut().extend(staged);
        self.commits.set(self.commits.get() + 1);
        Ok(())
    }

    fn rollback(&self) -> ItemWriterResult {
        self.staged.borrow_mut().clear();
        Ok(())
    }
}

/// Uppercases the first name, rejecting people without one.
#[derive(Default)]
pub struct UpperCaseProcessor;

impl ItemProcessor<Person, Person> for UpperCaseProcessor {
    fn process(&self, item: &Person) -> ItemProcessorResult<Person> {
        if item.first_name.is_empty() {
            return Err(BatchError::Validation("first name is empty".to_string()));
        }
        Ok(Some(Person {
            first_name: item.first_name.to_uppercase(),
            last_name: item.last_name.clone(),
        }))
    }
}

mock! {
    pub Writer {}
    impl ItemWriter<Person> for Writer {
        fn write(&self, items: &[Person]) -> ItemWriterResult;
        fn open(&self) -> ItemWriterResult;
        fn begin(&self) -> ItemWriterResult;
        fn commit(&self) -> ItemWriterResult;
        fn rollback(&self) -> ItemWriterResult;
        fn close(&self) -> ItemWriterResult;
    }
}
