/// CSV support for reading delimited text files.
///
/// [`CsvItemReader`](csv_reader::CsvItemReader) deserializes each row into a
/// Rust struct with serde. Field names come either from the header row of the
/// file or from the names declared on the builder, so header-less files can be
/// mapped onto named struct fields.
///
/// Rows that cannot be mapped, because they hold the wrong number of fields or
/// a value of the wrong type, are reported as
/// [`BatchError::MalformedRecord`](crate::BatchError::MalformedRecord) with
/// their line number and raw content. The reader stays usable afterwards, so
/// the step can skip them under its skip policy.
///
/// # Examples
///
/// ```
/// use batch_etl::item::csv::csv_reader::CsvItemReaderBuilder;
/// use batch_etl::core::item::ItemReader;
/// use batch_etl::BatchError;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// #[serde(rename_all = "camelCase")]
/// struct Person {
///     first_name: String,
///     last_name: String,
/// }
///
/// let csv_data = "\
/// Jill,Doe
/// Joe
/// Justin,Doe
/// ";
///
/// let reader = CsvItemReaderBuilder::new()
///     .names(["firstName", "lastName"])
///     .from_reader(csv_data.as_bytes());
/// ItemReader::<Person>::open(&reader).unwrap();
///
/// let jill: Option<Person> = reader.read().unwrap();
/// assert_eq!(jill.unwrap().first_name, "Jill");
///
/// let joe: Result<Option<Person>, BatchError> = reader.read();
/// assert!(matches!(joe, Err(BatchError::MalformedRecord { line: 2, .. })));
///
/// let justin: Option<Person> = reader.read().unwrap();
/// assert_eq!(justin.unwrap().first_name, "Justin");
///
/// let end: Option<Person> = reader.read().unwrap();
/// assert!(end.is_none());
/// ```

/// A module providing facilities for reading CSV data records.
pub mod csv_reader;

/// Timeout-bounded reads from stream sources.
pub mod timeout_reader;
