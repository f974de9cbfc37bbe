use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Terminator, Trim, WriterBuilder};
use log::debug;
use serde::de::DeserializeOwned;
use std::{
    cell::RefCell,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
    item::csv::timeout_reader::TimeoutReader,
};

const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the rows come from, until the reader is opened.
enum CsvResource<R> {
    /// Consumed by the first `open`.
    Reader(R),
    /// Opened again on every `open`.
    Path {
        path: PathBuf,
        open: fn(&Path) -> io::Result<R>,
    },
}

fn open_file(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// A CSV item reader that deserializes each row into `T`.
///
/// The underlying resource is only touched by [`open`](ItemReader::open):
/// reading before it is an error, and [`close`](ItemReader::close) releases
/// the resource. A reader built with `from_path` can be opened again after
/// being closed and starts over from the first row.
///
/// # Type Parameters
///
/// - `R`: The underlying reader type that implements `Read`
pub struct CsvItemReader<R> {
    resource: RefCell<Option<CsvResource<R>>>,
    /// Iterator over raw records, set while the reader is open
    records: RefCell<Option<StringRecordsIntoIter<R>>>,
    /// Field names used to deserialize records
    headers: RefCell<Option<StringRecord>>,
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
    names: Option<StringRecord>,
}

impl<R: Read> CsvItemReader<R> {
    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            // Field counts are checked per record so that a short row is a
            // skippable malformed record rather than a parse failure.
            .flexible(true);
        builder
    }

    fn open_resource(&self) -> Result<R, BatchError> {
        let mut resource = self.resource.borrow_mut();
        match resource.take() {
            Some(CsvResource::Reader(rdr)) => Ok(rdr),
            Some(CsvResource::Path { path, open }) => {
                let rdr = open(&path).map_err(|e| {
                    BatchError::ItemReader(format!("unable to open {}: {}", path.display(), e))
                });
                *resource = Some(CsvResource::Path { path, open });
                rdr
            }
            None => Err(BatchError::ItemReader(
                "CSV resource was already consumed by a previous open".to_string(),
            )),
        }
    }

    fn malformed(&self, record: &StringRecord, reason: String) -> BatchError {
        BatchError::MalformedRecord {
            line: record.position().map_or(0, |p| p.line()),
            content: self.render(record),
            reason,
        }
    }

    /// Writes the fields of `record` back as one CSV row, quoted where needed.
    fn render(&self, record: &StringRecord) -> String {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());
        let rendered = match writer.write_record(record) {
            Ok(()) => writer.into_inner().ok(),
            Err(_) => None,
        };

        match rendered {
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
            None => record
                .iter()
                .collect::<Vec<_>>()
                .join(&(self.delimiter as char).to_string()),
        }
    }

    fn map_csv_error(error: csv::Error) -> BatchError {
        if let csv::ErrorKind::Io(io_error) = error.kind() {
            if io_error.kind() == io::ErrorKind::TimedOut {
                return BatchError::Timeout(io_error.to_string());
            }
            return BatchError::ItemReader(error.to_string());
        }
        BatchError::MalformedRecord {
            line: error.position().map_or(0, |p| p.line()),
            content: String::new(),
            reason: error.to_string(),
        }
    }
}

impl<R: Read, T: DeserializeOwned> ItemReader<T> for CsvItemReader<R> {
    fn open(&self) -> Result<(), BatchError> {
        let mut rdr = self.reader_builder().from_reader(self.open_resource()?);

        let headers = match &self.names {
            Some(names) => Some(names.clone()),
            None if self.has_headers => Some(rdr.headers().map_err(Self::map_csv_error)?.clone()),
            None => None,
        };
        debug!("CSV reader opened with fields {:?}", headers);

        *self.headers.borrow_mut() = headers;
        *self.records.borrow_mut() = Some(rdr.into_records());
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        let mut records = self.records.borrow_mut();
        let records = records
            .as_mut()
            .ok_or_else(|| BatchError::ItemReader("CSV reader is not open".to_string()))?;

        let record = match records.next() {
            Some(result) => result.map_err(Self::map_csv_error)?,
            None => return Ok(None),
        };

        let headers = self.headers.borrow();
        if let Some(headers) = headers.as_ref() {
            if record.len() != headers.len() {
                return Err(self.malformed(
                    &record,
                    format!("expected {} fields, found {}", headers.len(), record.len()),
                ));
            }
        }

        record
            .deserialize(headers.as_ref())
            .map(Some)
            .map_err(|e| self.malformed(&record, e.to_string()))
    }

    /// Discards the next `item_count` rows without deserializing them.
    fn jump_to(&self, item_count: usize) -> Result<(), BatchError> {
        let mut records = self.records.borrow_mut();
        let records = records
            .as_mut()
            .ok_or_else(|| BatchError::ItemReader("CSV reader is not open".to_string()))?;

        for _ in 0..item_count {
            match records.next() {
                None => break,
                Some(Err(error)) if error.is_io_error() => {
                    return Err(Self::map_csv_error(error));
                }
                Some(_) => {}
            }
        }
        debug!("CSV reader skipped {} rows", item_count);
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.records.borrow_mut().take();
        self.headers.borrow_mut().take();
        Ok(())
    }
}

/// A builder for configuring CSV item reading.
///
/// Defaults: `,` delimiter, any line terminator, no header row, fields
/// trimmed of surrounding whitespace, 30 seconds timeout for stream sources.
pub struct CsvItemReaderBuilder {
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
    names: Option<StringRecord>,
    timeout: Duration,
}

impl Default for CsvItemReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
            names: None,
            timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Whether the first row holds field names.
    ///
    /// The header row is never returned as a record. Names set with
    /// [`names`](Self::names) take precedence over it.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    /// Declares the field names of each row, in column order.
    ///
    /// Rows holding a different number of fields are malformed.
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names = Some(names.into_iter().collect());
        self
    }

    /// Maximum time a read from a [`from_stream`](Self::from_stream) source may wait for data.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemReader<R> {
        self.build(CsvResource::Reader(rdr))
    }

    /// Creates a reader over a source that may stall, such as a pipe or a socket.
    ///
    /// Reads waiting longer than the configured [`timeout`](Self::timeout)
    /// fail with [`BatchError::Timeout`]. The source is read on a background
    /// thread and the reader must be used from a multi-threaded tokio runtime.
    pub fn from_stream<R: Read + Send + 'static>(self, rdr: R) -> CsvItemReader<TimeoutReader> {
        let timeout = self.timeout;
        self.build(CsvResource::Reader(TimeoutReader::new(rdr, timeout)))
    }

    /// Creates a reader over the file at `path`.
    ///
    /// The file is opened by `ItemReader::open`, which fails if it cannot be read.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> CsvItemReader<File> {
        self.build(CsvResource::Path {
            path: path.as_ref().to_path_buf(),
            open: open_file,
        })
    }

    fn build<R>(self, resource: CsvResource<R>) -> CsvItemReader<R> {
        CsvItemReader {
            resource: RefCell::new(Some(resource)),
            records: RefCell::new(None),
            headers: RefCell::new(None),
            delimiter: self.delimiter,
            terminator: self.terminator,
            has_headers: self.has_headers,
            names: self.names,
        }
    }
}
