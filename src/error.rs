use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    /// A source line could not be parsed into a record.
    #[error("Malformed record at line {line}: {reason} (content: {content:?})")]
    MalformedRecord {
        /// 1-based line number in the source resource
        line: u64,
        /// Fields of the offending row, trimmed and written back as one CSV row
        content: String,
        /// Why parsing failed
        reason: String,
    },

    /// The processor rejected a record. Always skipped.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The sink could not durably persist a chunk.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// A resource did not answer within its configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An execution with the same identifying parameters already ran to completion,
    /// is still running, or cannot be restarted.
    #[error("Duplicate run of job {job_name} with parameters {{{parameters}}}: {reason}")]
    DuplicateRun {
        job_name: String,
        parameters: String,
        reason: String,
    },

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("Step {0} did not complete")]
    Step(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("JobRepository: {0}")]
    JobRepository(String),
}

impl BatchError {
    /// Errors raised by a sink while persisting a chunk.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, BatchError::Persistence(_) | BatchError::Timeout(_))
    }
}
