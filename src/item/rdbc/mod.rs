//! Relational database item writers.
//!
//! [`SqliteItemWriter`] inserts chunks of items into SQLite through `sqlx`.
//! It either builds multi-row `INSERT` statements from a table, a list of
//! columns and a [`DatabaseItemBinder`], or runs a SQL statement with
//! `:name` parameters bound from the serialized fields of each item.

use sqlx::{Database, query_builder::Separated};

/// Named parameter SQL statements.
pub mod named_parameter;

/// SQLite item writer.
pub mod sqlite_writer;

/// Binds the values of one item to a row of a multi-row `INSERT` statement.
///
/// Values must be pushed in the order the columns were declared on the writer.
///
/// # Example
///
/// ```
/// use batch_etl::item::rdbc::DatabaseItemBinder;
/// use sqlx::{Sqlite, query_builder::Separated};
///
/// struct Person {
///     first_name: String,
///     last_name: String,
/// }
///
/// struct PersonBinder;
///
/// impl DatabaseItemBinder<Person, Sqlite> for PersonBinder {
///     fn bind(&self, item: &Person, mut query_builder: Separated<Sqlite, &str>) {
///         query_builder.push_bind(item.first_name.clone());
///         query_builder.push_bind(item.last_name.clone());
///     }
/// }
/// ```
pub trait DatabaseItemBinder<O, DB: Database> {
    fn bind(&self, item: &O, query_builder: Separated<DB, &str>);
}

pub use named_parameter::NamedParameterStatement;
pub use sqlite_writer::{SqliteItemWriter, SqliteItemWriterBuilder};
