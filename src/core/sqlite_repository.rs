//! Job metadata kept in a SQLite database.
//!
//! Job instances and executions live in two tables next to the application
//! data, so run identifiers keep increasing across processes and a failed
//! run can be restarted by a later invocation. Executions, with their step
//! executions, are stored as JSON.

use std::{future::Future, time::Duration};

use chrono::Utc;
use log::debug;
use sqlx::{Pool, Sqlite};

use crate::{
    BatchError,
    core::{
        blocking,
        job::JobExecution,
        parameters::JobParameters,
        repository::{JobInstance, JobRepository},
        step::StepExecution,
    },
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_INSTANCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS batch_job_instance (
    job_instance_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    UNIQUE (job_name, identity_key)
)
"#;

const CREATE_EXECUTION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS batch_job_execution (
    job_execution_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_instance_id INTEGER NOT NULL REFERENCES batch_job_instance (job_instance_id),
    job_name TEXT NOT NULL,
    status TEXT NOT NULL,
    execution TEXT NOT NULL
)
"#;

fn repository_error(error: sqlx::Error) -> BatchError {
    BatchError::JobRepository(error.to_string())
}

fn encode(execution: &JobExecution) -> Result<String, BatchError> {
    serde_json::to_string(execution)
        .map_err(|e| BatchError::JobRepository(format!("unable to encode execution: {}", e)))
}

fn decode(json: &str) -> Result<JobExecution, BatchError> {
    serde_json::from_str(json)
        .map_err(|e| BatchError::JobRepository(format!("unable to decode execution: {}", e)))
}

/// [`JobRepository`] persisting metadata in SQLite through `sqlx`.
///
/// Like the SQLite item writer, it must be used from a multi-threaded tokio
/// runtime.
///
/// # Example
///
/// ```no_run
/// use batch_etl::core::sqlite_repository::SqliteJobRepository;
/// use sqlx::SqlitePool;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = SqlitePool::connect("sqlite:people.db").await?;
/// let repository = SqliteJobRepository::new(&pool)?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteJobRepository<'a> {
    pool: &'a Pool<Sqlite>,
    timeout: Duration,
}

impl<'a> SqliteJobRepository<'a> {
    /// Creates the repository, creating its tables when they do not exist yet.
    pub fn new(pool: &'a Pool<Sqlite>) -> Result<Self, BatchError> {
        let repository = Self {
            pool,
            timeout: DEFAULT_TIMEOUT,
        };
        repository.block_on("schema creation", async {
            sqlx::query(CREATE_INSTANCE_TABLE)
                .execute(pool)
                .await
                .map_err(repository_error)?;
            sqlx::query(CREATE_EXECUTION_TABLE)
                .execute(pool)
                .await
                .map_err(repository_error)?;
            Ok(())
        })?;
        Ok(repository)
    }

    /// Maximum duration of each metadata query (default 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn block_on<T, F>(&self, operation: &str, future: F) -> Result<T, BatchError>
    where
        F: Future<Output = Result<T, BatchError>>,
    {
        blocking::block_on("SQLite job repository", operation, self.timeout, future)
    }

    /// All executions of `job_name`, oldest first.
    pub fn find_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, BatchError> {
        let rows: Vec<String> = self.block_on("query", async {
            sqlx::query_scalar(
                "SELECT execution FROM batch_job_execution WHERE job_name = ? ORDER BY job_execution_id",
            )
            .bind(job_name)
            .fetch_all(self.pool)
            .await
            .map_err(repository_error)
        })?;

        rows.iter().map(|json| decode(json)).collect()
    }
}

impl JobRepository for SqliteJobRepository<'_> {
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        let identity_key = parameters.identity_key()?;

        let id: Option<i64> = self.block_on("query", async {
            sqlx::query_scalar(
                "SELECT job_instance_id FROM batch_job_instance WHERE job_name = ? AND identity_key = ?",
            )
            .bind(job_name)
            .bind(&identity_key)
            .fetch_optional(self.pool)
            .await
            .map_err(repository_error)
        })?;

        Ok(id.map(|id| JobInstance {
            id,
            job_name: job_name.to_string(),
            identity_key,
        }))
    }

    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, BatchError> {
        let identity_key = parameters.identity_key()?;

        let id = self.block_on("insert", async {
            sqlx::query("INSERT INTO batch_job_instance (job_name, identity_key) VALUES (?, ?)")
                .bind(job_name)
                .bind(&identity_key)
                .execute(self.pool)
                .await
                .map(|result| result.last_insert_rowid())
                .map_err(repository_error)
        })?;

        debug!("Created instance {} of job {}", id, job_name);
        Ok(JobInstance {
            id,
            job_name: job_name.to_string(),
            identity_key,
        })
    }

    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        self.block_on("insert", async {
            let mut tx = self.pool.begin().await.map_err(repository_error)?;

            let id = sqlx::query(
                "INSERT INTO batch_job_execution (job_instance_id, job_name, status, execution) VALUES (?, ?, '', '')",
            )
            .bind(instance.id)
            .bind(&instance.job_name)
            .execute(&mut *tx)
            .await
            .map_err(repository_error)?
            .last_insert_rowid();

            let execution = JobExecution::new(id, instance, parameters.clone(), Utc::now());

            sqlx::query(
                "UPDATE batch_job_execution SET status = ?, execution = ? WHERE job_execution_id = ?",
            )
            .bind(format!("{:?}", execution.status))
            .bind(encode(&execution)?)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(repository_error)?;

            tx.commit().await.map_err(repository_error)?;
            Ok(execution)
        })
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        let json = encode(execution)?;

        let updated = self.block_on("update", async {
            sqlx::query(
                "UPDATE batch_job_execution SET status = ?, execution = ? WHERE job_execution_id = ?",
            )
            .bind(format!("{:?}", execution.status))
            .bind(&json)
            .bind(execution.id)
            .execute(self.pool)
            .await
            .map(|result| result.rows_affected())
            .map_err(repository_error)
        })?;

        if updated == 0 {
            return Err(BatchError::JobRepository(format!(
                "unknown job execution {}",
                execution.id
            )));
        }
        Ok(())
    }

    fn get_last_job_execution(
        &self,
        job_instance_id: i64,
    ) -> Result<Option<JobExecution>, BatchError> {
        let json: Option<String> = self.block_on("query", async {
            sqlx::query_scalar(
                "SELECT execution FROM batch_job_execution WHERE job_instance_id = ? ORDER BY job_execution_id DESC LIMIT 1",
            )
            .bind(job_instance_id)
            .fetch_optional(self.pool)
            .await
            .map_err(repository_error)
        })?;

        json.as_deref().map(decode).transpose()
    }

    fn get_last_job_execution_by_name(
        &self,
        job_name: &str,
    ) -> Result<Option<JobExecution>, BatchError> {
        let json: Option<String> = self.block_on("query", async {
            sqlx::query_scalar(
                "SELECT execution FROM batch_job_execution WHERE job_name = ? ORDER BY job_execution_id DESC LIMIT 1",
            )
            .bind(job_name)
            .fetch_optional(self.pool)
            .await
            .map_err(repository_error)
        })?;

        json.as_deref().map(decode).transpose()
    }

    fn get_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        let rows: Vec<String> = self.block_on("query", async {
            sqlx::query_scalar(
                "SELECT execution FROM batch_job_execution WHERE job_instance_id = ? ORDER BY job_execution_id DESC",
            )
            .bind(job_instance_id)
            .fetch_all(self.pool)
            .await
            .map_err(repository_error)
        })?;

        for json in &rows {
            let execution = decode(json)?;
            if let Some(step_execution) = execution.get_step_execution(step_name) {
                return Ok(Some(step_execution.clone()));
            }
        }
        Ok(None)
    }
}
