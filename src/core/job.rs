use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    listener::JobExecutionListener,
    parameters::{JobParameters, JobParametersIncrementer},
    repository::{JobInstance, JobRepository},
    step::{BatchStatus, Step, StepExecution},
};

/// Type alias for job execution results.
///
/// A `JobResult` is a `Result` that contains either:
/// - A `JobExecution` with execution details, whatever its final status
/// - A `BatchError` when the job could not be launched
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job is a named, ordered sequence of steps. It is launched through a
/// [`JobLauncher`], which resolves its parameters, checks the job repository
/// for previous runs and hands a fresh [`JobExecution`] to
/// [`execute`](Job::execute).
pub trait Job {
    fn get_name(&self) -> &str;

    /// Whether a failed or stopped execution may be launched again with the same parameters.
    fn is_restartable(&self) -> bool {
        true
    }

    /// Incrementer deriving the parameters of the next run from the previous one.
    fn get_incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        None
    }

    /// Runs the steps of the job, recording their outcome in `job_execution`.
    ///
    /// Step failures are recorded in `job_execution` rather than returned.
    ///
    /// # Returns
    /// - `Ok(())` once the execution reached its final status
    /// - `Err(BatchError)` when the job repository could not be read or updated
    fn execute(
        &self,
        job_execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<()>;
}

/// Represents one run of a job.
///
/// Its `id` is the run identifier: unique within a job repository and
/// increasing with each launch, restarts included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub job_instance_id: i64,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    /// Executions of the steps run by this execution, in order
    pub step_executions: Vec<StepExecution>,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_message: Option<String>,
}

impl JobExecution {
    pub fn new(
        id: i64,
        instance: &JobInstance,
        parameters: JobParameters,
        create_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_instance_id: instance.id,
            job_name: instance.job_name.clone(),
            parameters,
            status: BatchStatus::Starting,
            step_executions: Vec::new(),
            create_time,
            start_time: None,
            end_time: None,
            exit_message: None,
        }
    }

    pub fn get_step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.name == step_name)
    }

    pub fn read_count(&self) -> usize {
        self.step_executions.iter().map(|s| s.read_count).sum()
    }

    pub fn write_count(&self) -> usize {
        self.step_executions.iter().map(|s| s.write_count).sum()
    }

    pub fn skip_count(&self) -> usize {
        self.step_executions.iter().map(StepExecution::skip_count).sum()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }

    /// Process exit code for this execution: 0 when it completed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.status == BatchStatus::Completed {
            0
        } else {
            1
        }
    }
}

/// Job running its steps one after the other.
///
/// A step that fails or stops ends the job: the remaining steps are not run.
/// When an instance is restarted, steps that completed in a previous
/// execution are not run again and a failed step resumes after the entries
/// its committed chunks consumed.
pub struct SimpleJob<'a> {
    /// Unique identifier for this job definition, reported in logs
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    listeners: Vec<&'a dyn JobExecutionListener>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    restartable: bool,
}

impl Job for SimpleJob<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn get_incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer
    }

    fn execute(
        &self,
        job_execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<()> {
        job_execution.start_time = Some(Utc::now());
        job_execution.status = BatchStatus::Started;
        repository.update_job_execution(job_execution)?;

        info!(
            "Start of job: {}, id: {}, run: {}, parameters: [{}]",
            self.name, self.id, job_execution.id, job_execution.parameters
        );

        for listener in &self.listeners {
            listener.before_job(job_execution);
        }

        let result = self.execute_steps(job_execution, repository);

        job_execution.end_time = Some(Utc::now());

        match &result {
            Ok(status) => job_execution.status = *status,
            Err(error) => {
                error!("Job {} aborted: {}", self.name, error);
                job_execution.status = BatchStatus::Failed;
                job_execution.exit_message = Some(error.to_string());
            }
        }

        for listener in &self.listeners {
            listener.after_job(job_execution);
        }

        info!(
            "End of job: {}, id: {}, run: {}, status: {:?}, read: {}, written: {}, skipped: {}",
            self.name,
            self.id,
            job_execution.id,
            job_execution.status,
            job_execution.read_count(),
            job_execution.write_count(),
            job_execution.skip_count()
        );

        result.map(|_| ())
    }
}

impl SimpleJob<'_> {
    fn execute_steps(
        &self,
        job_execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<BatchStatus> {
        for step in &self.steps {
            let previous =
                repository.get_last_step_execution(job_execution.job_instance_id, step.get_name())?;

            let mut step_execution = StepExecution::new(step.get_name());
            step_execution.job_execution_id = job_execution.id;

            match previous {
                Some(previous) if previous.status == BatchStatus::Completed => {
                    info!(
                        "Step {} already completed in run {}, not executed again",
                        previous.name, previous.job_execution_id
                    );
                    continue;
                }
                Some(previous) => step_execution.restart_position = previous.committed_position(),
                None => {}
            }

            let result = step.execute(&mut step_execution);
            let step_status = step_execution.status;
            job_execution.step_executions.push(step_execution);
            repository.update_job_execution(job_execution)?;

            if let Err(error) = result {
                warn!("Job {} ends after step failure: {}", self.name, error);
                job_execution.exit_message = Some(error.to_string());
                return Ok(if step_status == BatchStatus::Stopped {
                    BatchStatus::Stopped
                } else {
                    BatchStatus::Failed
                });
            }
        }

        Ok(BatchStatus::Completed)
    }
}

/// Builder for creating a job.
///
/// # Example
///
/// ```
/// use batch_etl::core::job::JobBuilder;
/// use batch_etl::core::parameters::RunIdIncrementer;
///
/// let incrementer = RunIdIncrementer::new();
/// let job = JobBuilder::new()
///     .name("importUserJob")
///     .incrementer(&incrementer)
///     .build();
/// ```
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
    listeners: Vec<&'a dyn JobExecutionListener>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    restartable: bool,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            listeners: Vec::new(),
            incrementer: None,
            restartable: true,
        }
    }

    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    ///
    /// Identical to `next()`, reads better for the initial step.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job. Steps run in the order they are added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Registers a listener notified before and after each execution.
    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> JobBuilder<'a> {
        self.listeners.push(listener);
        self
    }

    pub fn incrementer(mut self, incrementer: &'a dyn JobParametersIncrementer) -> JobBuilder<'a> {
        self.incrementer = Some(incrementer);
        self
    }

    pub fn restartable(mut self, restartable: bool) -> JobBuilder<'a> {
        self.restartable = restartable;
        self
    }

    pub fn build(self) -> SimpleJob<'a> {
        SimpleJob {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            listeners: self.listeners,
            incrementer: self.incrementer,
            restartable: self.restartable,
        }
    }
}

impl Default for JobBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Launches jobs against a job repository.
///
/// Launching a job:
/// 1. resolves the parameters, applying the job's incrementer if it has one
/// 2. finds or creates the job instance identified by the job name and the
///    identifying parameters
/// 3. rejects the launch with [`BatchError::DuplicateRun`] when that instance
///    already completed, is running, or failed and the job is not restartable
/// 4. creates a new execution with a fresh run identifier and executes the job
///
/// The returned execution carries the final status and counts, including when
/// a step failed.
pub struct JobLauncher<'r> {
    repository: &'r dyn JobRepository,
}

impl<'r> JobLauncher<'r> {
    pub fn new(repository: &'r dyn JobRepository) -> Self {
        Self { repository }
    }

    pub fn run(&self, job: &dyn Job, parameters: JobParameters) -> JobResult<JobExecution> {
        let parameters = self.resolve_parameters(job, parameters)?;

        let instance = match self.repository.get_job_instance(job.get_name(), &parameters)? {
            Some(instance) => {
                self.check_restart(job, &instance, &parameters)?;
                instance
            }
            None => self
                .repository
                .create_job_instance(job.get_name(), &parameters)?,
        };

        let mut execution = self.repository.create_job_execution(&instance, &parameters)?;

        let result = job.execute(&mut execution, self.repository);
        self.repository.update_job_execution(&execution)?;
        result?;

        Ok(execution)
    }

    fn resolve_parameters(
        &self,
        job: &dyn Job,
        parameters: JobParameters,
    ) -> JobResult<JobParameters> {
        let Some(incrementer) = job.get_incrementer() else {
            return Ok(parameters);
        };

        let last = self
            .repository
            .get_last_job_execution_by_name(job.get_name())?;

        match last {
            Some(last)
                if job.is_restartable()
                    && last.status.is_restartable()
                    && last.parameters.contains_identifying(&parameters) =>
            {
                info!(
                    "Last run {} of job {} ended {:?}, restarting it",
                    last.id,
                    job.get_name(),
                    last.status
                );
                Ok(last.parameters.merge(&parameters))
            }
            last => Ok(incrementer
                .next(last.as_ref().map(|e| &e.parameters))
                .merge(&parameters)),
        }
    }

    fn check_restart(
        &self,
        job: &dyn Job,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> JobResult<()> {
        let Some(last) = self.repository.get_last_job_execution(instance.id)? else {
            return Ok(());
        };

        let reason = if last.status == BatchStatus::Completed {
            "a previous run already completed"
        } else if last.status.is_running() {
            "a run is already in progress"
        } else if !job.is_restartable() {
            "the job is not restartable"
        } else {
            info!(
                "Restarting job {} after run {} ended {:?}",
                job.get_name(),
                last.id,
                last.status
            );
            return Ok(());
        };

        Err(BatchError::DuplicateRun {
            job_name: job.get_name().to_string(),
            parameters: parameters.identifying().to_string(),
            reason: reason.to_string(),
        })
    }
}
