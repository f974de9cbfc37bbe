mod common;

use std::{fs, path::Path, time::Duration};

use batch_etl::{
    core::{
        job::{JobBuilder, JobLauncher},
        parameters::{JobParameters, RunIdIncrementer},
        repository::InMemoryJobRepository,
        sqlite_repository::SqliteJobRepository,
        step::{BatchStatus, SkipPolicy, StepBuilder},
    },
    item::{csv::csv_reader::CsvItemReaderBuilder, rdbc::SqliteItemWriterBuilder},
};
use common::{Person, UpperCaseProcessor};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::TempDir;

const INSERT_PERSON: &str =
    "INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)";

async fn setup_db(dir: &TempDir) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("people.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    sqlx::query(
        r#"
        CREATE TABLE people (
            person_id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL UNIQUE CHECK (first_name <> 'POISON'),
            last_name TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

async fn stored_people(pool: &SqlitePool) -> Result<Vec<(i64, String, String)>, sqlx::Error> {
    sqlx::query_as("SELECT person_id, first_name, last_name FROM people ORDER BY person_id")
        .fetch_all(pool)
        .await
}

fn write_csv(path: &Path, rows: &[&str]) -> std::io::Result<()> {
    fs::write(path, rows.join("\n") + "\n")
}

#[tokio::test(flavor = "multi_thread")]
async fn twenty_five_rows_are_committed_in_three_chunks() -> anyhow::Result<()> {
    common::init_logger();
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    let rows: Vec<String> = (0..25).map(|i| format!("first{},last{}", i, i)).collect();
    write_csv(
        &csv_path,
        &rows.iter().map(String::as_str).collect::<Vec<_>>(),
    )?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .build()?;
    let step = StepBuilder::new("step1")
        .chunk(10)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .build()?;
    let job = JobBuilder::new().name("importUserJob").start(&step).build();
    let repository = InMemoryJobRepository::new();

    let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = execution.get_step_execution("step1").unwrap();
    assert_eq!(step_execution.read_count, 25);
    assert_eq!(step_execution.write_count, 25);
    assert_eq!(step_execution.commit_count, 3);

    let stored = stored_people(&pool).await?;
    assert_eq!(stored.len(), 25);
    assert_eq!(stored[0], (1, "FIRST0".to_string(), "last0".to_string()));
    assert_eq!(stored[24], (25, "FIRST24".to_string(), "last24".to_string()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_row_is_skipped_when_allowed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    write_csv(&csv_path, &["Jane,Doe", "John,Smith", "bad,row,extra-field"])?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .build()?;
    let step = StepBuilder::new("step1")
        .chunk(2)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .skip_limit(1)
        .build()?;
    let job = JobBuilder::new().name("importUserJob").start(&step).build();
    let repository = InMemoryJobRepository::new();

    let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.write_count(), 2);
    assert_eq!(execution.skip_count(), 1);
    assert_eq!(
        stored_people(&pool).await?,
        vec![
            (1, "JANE".to_string(), "Doe".to_string()),
            (2, "JOHN".to_string(), "Smith".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_row_aborts_by_default() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    write_csv(&csv_path, &["Jane,Doe", "John,Smith", "bad,row,extra-field"])?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .build()?;
    let step = StepBuilder::new("step1")
        .chunk(2)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .build()?;
    let job = JobBuilder::new().name("importUserJob").start(&step).build();
    let repository = InMemoryJobRepository::new();

    let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.exit_code(), 1);
    assert!(
        execution
            .exit_message
            .as_deref()
            .is_some_and(|m| m.contains("step1"))
    );
    let step_execution = execution.get_step_execution("step1").unwrap();
    assert!(
        step_execution
            .exit_message
            .as_deref()
            .is_some_and(|m| m.contains("line 3"))
    );
    assert_eq!(stored_people(&pool).await?.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_chunk_leaves_no_rows_and_restart_completes() -> anyhow::Result<()> {
    common::init_logger();
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    let mut rows = vec!["a,1", "b,2", "c,3", "d,4", "poison,5", "f,6", "g,7"];
    write_csv(&csv_path, &rows)?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .build()?;
    let step = StepBuilder::new("step1")
        .chunk(3)
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
    let launcher = JobLauncher::new(&repository);

    let failed = launcher.run(&job, JobParameters::new())?;

    assert_eq!(failed.status, BatchStatus::Failed);
    let names: Vec<String> = stored_people(&pool)
        .await?
        .into_iter()
        .map(|(_, first_name, _)| first_name)
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    let step_execution = failed.get_step_execution("step1").unwrap();
    assert_eq!(step_execution.write_count, 3);
    assert_eq!(step_execution.rollback_count, 1);

    rows[4] = "e,5";
    write_csv(&csv_path, &rows)?;
    let restarted = launcher.run(&job, JobParameters::new())?;

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.parameters.get_long("run.id"), Some(1));
    assert_eq!(restarted.job_instance_id, failed.job_instance_id);
    assert_eq!(restarted.write_count(), 4);
    let names: Vec<String> = stored_people(&pool)
        .await?
        .into_iter()
        .map(|(_, first_name, _)| first_name)
        .collect();
    assert_eq!(names, vec!["A", "B", "C", "D", "E", "F", "G"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_conflicting_within_a_chunk_are_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    write_csv(&csv_path, &["a,1", "dup,2", "dup,3", "b,4"])?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .build()?;
    let step = StepBuilder::new("step1")
        .chunk(10)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .skip_policy(SkipPolicy::new().skip_limit(5).skip_write_failures(true))
        .build()?;
    let job = JobBuilder::new().name("importUserJob").start(&step).build();
    let repository = InMemoryJobRepository::new();

    let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = execution.get_step_execution("step1").unwrap();
    assert_eq!(step_execution.write_count, 3);
    assert_eq!(step_execution.write_skip_count, 1);
    assert_eq!(step_execution.commit_count, 1);
    assert_eq!(
        stored_people(&pool).await?,
        vec![
            (1, "A".to_string(), "1".to_string()),
            (2, "DUP".to_string(), "2".to_string()),
            (3, "B".to_string(), "4".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn locked_database_fails_the_step_with_a_timeout() -> anyhow::Result<()> {
    common::init_logger();
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    write_csv(&csv_path, &["Jane,Doe", "John,Smith"])?;

    let mut holder = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .timeout(Duration::from_millis(50))
        .build()?;
    let step = StepBuilder::new("step1")
        .chunk(10)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .build()?;
    let job = JobBuilder::new().name("importUserJob").start(&step).build();
    let repository = InMemoryJobRepository::new();

    let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Failed);
    let step_execution = execution.get_step_execution("step1").unwrap();
    assert!(
        step_execution
            .exit_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Timeout"))
    );
    assert_eq!(step_execution.write_count, 0);
    assert_eq!(step_execution.rollback_count, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM people")
        .fetch_one(&mut *holder)
        .await?;
    assert_eq!(count, 0);
    sqlx::query("ROLLBACK").execute(&mut *holder).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_run_is_restarted_by_a_later_invocation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = setup_db(&dir).await?;
    let csv_path = dir.path().join("sample-data.csv");
    let mut rows = vec!["a,1", "b,2", "poison,3", "d,4"];
    write_csv(&csv_path, &rows)?;

    let reader = CsvItemReaderBuilder::new()
        .names(["firstName", "lastName"])
        .from_path(&csv_path);
    let writer = SqliteItemWriterBuilder::<Person>::new()
        .pool(&pool)
        .sql(INSERT_PERSON)
        .build()?;
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

    let failed = {
        let repository = SqliteJobRepository::new(&pool)?;
        JobLauncher::new(&repository).run(&job, JobParameters::new())?
    };
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(failed.write_count(), 2);

    rows[2] = "c,3";
    write_csv(&csv_path, &rows)?;

    let repository = SqliteJobRepository::new(&pool)?;
    let restarted = JobLauncher::new(&repository).run(&job, JobParameters::new())?;

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert!(restarted.id > failed.id);
    assert_eq!(restarted.job_instance_id, failed.job_instance_id);
    assert_eq!(restarted.parameters.get_long("run.id"), Some(1));
    assert_eq!(
        restarted.get_step_execution("step1").unwrap().restart_position,
        2
    );

    assert_eq!(repository.find_job_executions("importUserJob")?.len(), 2);

    let names: Vec<String> = stored_people(&pool)
        .await?
        .into_iter()
        .map(|(_, first_name, _)| first_name)
        .collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
    Ok(())
}
