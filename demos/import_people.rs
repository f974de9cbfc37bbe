//! Imports people from a CSV file into a SQLite `people` table.
//!
//! ```sh
//! cargo run --example import_people --features csv,rdbc-sqlite -- \
//!     input=demos/data/sample-data.csv database=sqlite://people.db
//! ```
//!
//! Arguments are job parameters (`key=value`, `key(long)=5`, `-key=value` for
//! a non-identifying one). Job metadata is kept in the same database, so each
//! launch gets a new `run.id`, unless the last run failed, in which case it is
//! restarted after its last committed chunk.

use std::{fmt, process::ExitCode};

use anyhow::Context;
use batch_etl::{
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        job::{JobBuilder, JobExecution, JobLauncher},
        listener::JobExecutionListener,
        parameters::{JobParameters, RunIdIncrementer},
        sqlite_repository::SqliteJobRepository,
        step::{BatchStatus, StepBuilder},
    },
    item::{csv::csv_reader::CsvItemReaderBuilder, rdbc::SqliteItemWriterBuilder},
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

const DEFAULT_INPUT: &str = "demos/data/sample-data.csv";
const DEFAULT_DATABASE: &str = "sqlite://people.db";

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct Person {
    first_name: String,
    last_name: String,
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "firstName: {}, lastName: {}",
            self.first_name, self.last_name
        )
    }
}

struct PersonItemProcessor;

impl ItemProcessor<Person, Person> for PersonItemProcessor {
    fn process(&self, item: &Person) -> ItemProcessorResult<Person> {
        let transformed = Person {
            first_name: item.first_name.to_uppercase(),
            last_name: item.last_name.to_uppercase(),
        };
        info!("Converting ({}) into ({})", item, transformed);
        Ok(Some(transformed))
    }
}

/// Logs the content of the `people` table once the job completed.
struct JobCompletionNotificationListener<'a> {
    pool: &'a SqlitePool,
}

impl JobExecutionListener for JobCompletionNotificationListener<'_> {
    fn after_job(&self, job_execution: &JobExecution) {
        if job_execution.status != BatchStatus::Completed {
            return;
        }
        info!("!!! JOB FINISHED! Time to verify the results");

        let people = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(
                sqlx::query_as::<_, (String, String)>(
                    "SELECT first_name, last_name FROM people ORDER BY person_id",
                )
                .fetch_all(self.pool),
            )
        });

        match people {
            Ok(people) => people.iter().for_each(|(first_name, last_name)| {
                info!("Found <firstName: {first_name}, lastName: {last_name}> in the database.")
            }),
            Err(e) => error!("Unable to read imported people: {}", e),
        }
    }
}

async fn connect(url: &str) -> anyhow::Result<SqlitePool> {
    let options: SqliteConnectOptions = url
        .parse()
        .with_context(|| format!("invalid database url {}", url))?;
    let pool = SqlitePoolOptions::new()
        .connect_with(options.create_if_missing(true))
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS people (
            person_id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT,
            last_name TEXT
        )",
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let parameters = JobParameters::from_args(std::env::args().skip(1))?;
    let input = parameters
        .get_string("input")
        .unwrap_or(DEFAULT_INPUT)
        .to_string();
    let database = parameters
        .get_string("database")
        .unwrap_or(DEFAULT_DATABASE)
        .to_string();

    let pool = connect(&database).await?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&input);
    let processor = PersonItemProcessor;
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql("INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)")
        .build()?;

    let step = StepBuilder::new("step1")
        .chunk(10)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;

    let incrementer = RunIdIncrementer::new();
    let listener = JobCompletionNotificationListener { pool: &pool };
    let job = JobBuilder::new()
        .name("importUserJob")
        .incrementer(&incrementer)
        .listener(&listener)
        .start(&step)
        .build();

    let repository = SqliteJobRepository::new(&pool)?;
    let execution = JobLauncher::new(&repository).run(&job, parameters)?;

    info!(
        "Job {} run {} finished with status {:?} ({} read, {} written, {} skipped)",
        execution.job_name,
        execution.id,
        execution.status,
        execution.read_count(),
        execution.write_count(),
        execution.skip_count()
    );

    Ok(ExitCode::from(execution.exit_code() as u8))
}
