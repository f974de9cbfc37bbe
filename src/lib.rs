#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Batch ETL for Rust

 A chunked extract-transform-load engine: read records from a delimited text
 file, transform each record, and insert them into a relational table,
 committing in fixed-size chunks with skip and restart semantics and run
 metadata.

 ## Core Concepts

- **Job:** an ordered sequence of `Step`s, launched by a `JobLauncher` with a set of `JobParameters`.
- **Step:** a chunk-oriented phase reading, processing and writing items, one transaction per chunk.
- **ItemReader:** pulls input records one at a time, e.g. rows of a CSV file.
- **ItemProcessor:** transforms, filters or rejects each record.
- **ItemWriter:** persists a whole chunk of items atomically.
- **JobRepository:** stores job instances and executions so completed runs are not repeated
  and failed runs restart where they stopped.

 ## Features

| **Feature**   | **Description**                                              |
|---------------|--------------------------------------------------------------|
| csv           | Enables the CSV `ItemReader`                                 |
| rdbc-sqlite   | Enables the SQLite `ItemWriter`                              |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes |
| full          | Enables all available features                               |

 ## Getting Started

```rust
# use std::cell::{Cell, RefCell};
# use batch_etl::{
#     BatchError,
#     core::{
#         item::{ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
#         job::{JobBuilder, JobLauncher},
#         parameters::{JobParameters, RunIdIncrementer},
#         repository::InMemoryJobRepository,
#         step::{BatchStatus, StepBuilder},
#     },
# };
# struct Names { names: RefCell<Vec<&'static str>> }
# impl ItemReader<String> for Names {
#     fn read(&self) -> ItemReaderResult<String> {
#         Ok(self.names.borrow_mut().pop().map(String::from))
#     }
# }
# #[derive(Default)]
# struct Count { written: Cell<usize> }
# impl ItemWriter<String> for Count {
#     fn write(&self, items: &[String]) -> ItemWriterResult {
#         self.written.set(self.written.get() + items.len());
#         Ok(())
#     }
# }
struct UpperCaseProcessor;

impl ItemProcessor<String, String> for UpperCaseProcessor {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        Ok(Some(item.to_uppercase()))
    }
}

fn main() -> Result<(), BatchError> {
    let reader = Names { names: RefCell::new(vec!["jill", "joe", "justin", "jane", "john"]) };
    let writer = Count::default();

    let step = StepBuilder::new("step1")
        .chunk(2)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .build()?;

    let incrementer = RunIdIncrementer::new();
    let job = JobBuilder::new()
        .name("importUserJob")
        .incrementer(&incrementer)
        .start(&step)
        .build();

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.write_count(), 5);
    assert_eq!(writer.written.get(), 5);

    Ok(())
}
```

 See `demos/import_people.rs` for a CSV to SQLite import.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers and writers (CSV reader, SQLite writer, logger writer)
pub mod item;
