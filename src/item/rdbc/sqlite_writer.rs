use std::{
    future::Future,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use log::{debug, warn};
use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection, Transaction};

use crate::BatchError;
use crate::core::{
    blocking,
    item::{ItemWriter, ItemWriterResult},
};
use crate::item::rdbc::{DatabaseItemBinder, named_parameter::NamedParameterStatement};

// SQLite rejects statements with more bind variables than this
const BIND_LIMIT: usize = 32766;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn persistence(error: sqlx::Error) -> BatchError {
    BatchError::Persistence(error.to_string())
}

enum Statement<'a, O> {
    /// Multi-row `INSERT INTO table (columns) VALUES ...`
    Columns {
        table: String,
        columns: Vec<String>,
        binder: &'a dyn DatabaseItemBinder<O, Sqlite>,
    },
    /// One execution of the statement per item
    Named(NamedParameterStatement),
}

/// Writes chunks of items into a SQLite database.
///
/// Inside [`begin`](ItemWriter::begin) and [`commit`](ItemWriter::commit) all
/// writes share one database transaction, so a rolled back chunk leaves no
/// row behind. A `write` outside of a transaction runs in its own.
///
/// Database calls are driven with `tokio::task::block_in_place`, so the
/// writer must be used from a multi-threaded tokio runtime. Each call is
/// bounded by the configured timeout.
pub struct SqliteItemWriter<'a, O> {
    pool: &'a Pool<Sqlite>,
    statement: Statement<'a, O>,
    timeout: Duration,
    transaction: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl<O: Serialize> SqliteItemWriter<'_, O> {
    fn transaction(
        &self,
    ) -> Result<MutexGuard<'_, Option<Transaction<'static, Sqlite>>>, BatchError> {
        self.transaction
            .lock()
            .map_err(|e| BatchError::ItemWriter(format!("transaction lock poisoned: {}", e)))
    }

    fn block_on<T, F>(&self, operation: &str, future: F) -> Result<T, BatchError>
    where
        F: Future<Output = Result<T, BatchError>>,
    {
        blocking::block_on("SQLite writer", operation, self.timeout, future)
    }

    async fn execute(&self, conn: &mut SqliteConnection, items: &[O]) -> Result<u64, BatchError> {
        let mut rows = 0;

        match &self.statement {
            Statement::Columns {
                table,
                columns,
                binder,
            } => {
                for batch in items.chunks(BIND_LIMIT / columns.len()) {
                    let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO ");
                    query_builder.push(table);
                    query_builder.push(" (");
                    query_builder.push(columns.join(","));
                    query_builder.push(") ");
                    query_builder.push_values(batch, |b, item| binder.bind(item, b));

                    let result = query_builder
                        .build()
                        .execute(&mut *conn)
                        .await
                        .map_err(persistence)?;
                    rows += result.rows_affected();
                }
            }
            Statement::Named(statement) => {
                for item in items {
                    let result = statement
                        .bind(item)?
                        .execute(&mut *conn)
                        .await
                        .map_err(persistence)?;
                    rows += result.rows_affected();
                }
            }
        }

        Ok(rows)
    }
}

impl<O: Serialize> ItemWriter<O> for SqliteItemWriter<'_, O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        let mut transaction = self.transaction()?;
        let rows = match transaction.as_mut() {
            Some(tx) => self.block_on("write", self.execute(&mut **tx, items))?,
            None => self.block_on("write", async {
                let mut tx = self.pool.begin().await.map_err(persistence)?;
                let rows = self.execute(&mut *tx, items).await?;
                tx.commit().await.map_err(persistence)?;
                Ok(rows)
            })?,
        };

        debug!("Wrote {} items to SQLite ({} rows)", items.len(), rows);
        Ok(())
    }

    fn begin(&self) -> ItemWriterResult {
        let mut transaction = self.transaction()?;
        if transaction.is_some() {
            return Err(BatchError::ItemWriter(
                "a SQLite transaction is already active".to_string(),
            ));
        }

        let tx = self.block_on("begin", async {
            self.pool.begin().await.map_err(persistence)
        })?;
        *transaction = Some(tx);
        Ok(())
    }

    fn commit(&self) -> ItemWriterResult {
        let tx = self.transaction()?.take().ok_or_else(|| {
            BatchError::ItemWriter("no active SQLite transaction to commit".to_string())
        })?;

        self.block_on("commit", async { tx.commit().await.map_err(persistence) })
    }

    fn rollback(&self) -> ItemWriterResult {
        let Some(tx) = self.transaction()?.take() else {
            return Ok(());
        };

        self.block_on("rollback", async { tx.rollback().await.map_err(persistence) })
    }

    fn close(&self) -> ItemWriterResult {
        if self.transaction()?.is_some() {
            warn!("SQLite writer closed with an active transaction, rolling it back");
            return ItemWriter::<O>::rollback(self);
        }
        Ok(())
    }
}

/// Builder for [`SqliteItemWriter`].
///
/// Either a `sql` statement with `:name` parameters, or a `table` with its
/// columns and an item binder, must be configured.
///
/// # Example
///
/// ```no_run
/// use batch_etl::item::rdbc::SqliteItemWriterBuilder;
/// use serde::Serialize;
/// use sqlx::SqlitePool;
///
/// #[derive(Serialize)]
/// #[serde(rename_all = "camelCase")]
/// struct Person {
///     first_name: String,
///     last_name: String,
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = SqlitePool::connect("sqlite:people.db").await?;
/// let writer = SqliteItemWriterBuilder::<Person>::new()
///     .pool(&pool)
///     .sql("INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteItemWriterBuilder<'a, O> {
    pool: Option<&'a Pool<Sqlite>>,
    table: Option<String>,
    columns: Vec<String>,
    item_binder: Option<&'a dyn DatabaseItemBinder<O, Sqlite>>,
    sql: Option<String>,
    timeout: Duration,
}

impl<O> Default for SqliteItemWriterBuilder<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O> SqliteItemWriterBuilder<'a, O> {
    pub fn new() -> Self {
        Self {
            pool: None,
            table: None,
            columns: Vec::new(),
            item_binder: None,
            sql: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn pool(mut self, pool: &'a Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn add_column(mut self, column: &str) -> Self {
        self.columns.push(column.to_string());
        self
    }

    pub fn item_binder(mut self, item_binder: &'a dyn DatabaseItemBinder<O, Sqlite>) -> Self {
        self.item_binder = Some(item_binder);
        self
    }

    /// Statement executed once per item, with `:name` parameters bound from
    /// the fields the item serializes to.
    pub fn sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }

    /// Maximum duration of each database call (default 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SqliteItemWriter<'a, O>, BatchError> {
        let pool = self.pool.ok_or_else(|| {
            BatchError::Configuration("SQLite writer requires a connection pool".to_string())
        })?;

        let statement = match (self.sql, self.table, self.item_binder) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(BatchError::Configuration(
                    "SQLite writer takes either a SQL statement or a table with a binder, not both"
                        .to_string(),
                ));
            }
            (Some(sql), None, None) => Statement::Named(NamedParameterStatement::parse(&sql)?),
            (None, Some(table), Some(binder)) if !self.columns.is_empty() => Statement::Columns {
                table,
                columns: self.columns,
                binder,
            },
            _ => {
                return Err(BatchError::Configuration(
                    "SQLite writer requires a SQL statement, or a table with columns and a binder"
                        .to_string(),
                ));
            }
        };

        Ok(SqliteItemWriter {
            pool,
            statement,
            timeout: self.timeout,
            transaction: Mutex::new(None),
        })
    }
}
