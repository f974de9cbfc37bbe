//! Job metadata storage.
//!
//! [`JobRepository`] records job instances and their executions so the
//! launcher can reject duplicate runs and restart failed ones where they
//! stopped.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    BatchError,
    core::{job::JobExecution, parameters::JobParameters, step::StepExecution},
};

/// A job launched with a given set of identifying parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    /// Canonical form of the identifying parameters, see [`JobParameters::identity_key`]
    pub identity_key: String,
}

/// Storage contract for job metadata.
pub trait JobRepository {
    /// Finds the instance of `job_name` identified by `parameters`.
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError>;

    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, BatchError>;

    /// Creates a new execution of `instance` with a fresh run identifier.
    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError>;

    /// Stores the current state of an execution created by this repository.
    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError>;

    fn get_last_job_execution(
        &self,
        job_instance_id: i64,
    ) -> Result<Option<JobExecution>, BatchError>;

    /// Most recent execution of any instance of `job_name`.
    fn get_last_job_execution_by_name(
        &self,
        job_name: &str,
    ) -> Result<Option<JobExecution>, BatchError>;

    /// Most recent execution of step `step_name` within the executions of an instance.
    fn get_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;
}

#[derive(Default)]
struct RepositoryState {
    instances: Vec<JobInstance>,
    executions: Vec<JobExecution>,
    last_instance_id: i64,
    last_execution_id: i64,
}

/// [`JobRepository`] keeping metadata in memory for the life of the process.
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, RepositoryState>, BatchError> {
        self.state
            .lock()
            .map_err(|e| BatchError::JobRepository(format!("state lock poisoned: {}", e)))
    }

    /// All executions of `job_name`, oldest first.
    pub fn find_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, BatchError> {
        Ok(self
            .state()?
            .executions
            .iter()
            .filter(|e| e.job_name == job_name)
            .cloned()
            .collect())
    }
}

impl JobRepository for InMemoryJobRepository {
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        let identity_key = parameters.identity_key()?;
        Ok(self
            .state()?
            .instances
            .iter()
            .find(|i| i.job_name == job_name && i.identity_key == identity_key)
            .cloned())
    }

    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, BatchError> {
        let mut state = self.state()?;
        let identity_key = parameters.identity_key()?;

        if state
            .instances
            .iter()
            .any(|i| i.job_name == job_name && i.identity_key == identity_key)
        {
            return Err(BatchError::JobRepository(format!(
                "instance of job {} with parameters {{{}}} already exists",
                job_name, identity_key
            )));
        }

        state.last_instance_id += 1;
        let instance = JobInstance {
            id: state.last_instance_id,
            job_name: job_name.to_string(),
            identity_key,
        };
        state.instances.push(instance.clone());
        Ok(instance)
    }

    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let mut state = self.state()?;
        state.last_execution_id += 1;

        let execution = JobExecution::new(
            state.last_execution_id,
            instance,
            parameters.clone(),
            Utc::now(),
        );
        state.executions.push(execution.clone());
        Ok(execution)
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        let mut state = self.state()?;
        match state.executions.iter_mut().find(|e| e.id == execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(BatchError::JobRepository(format!(
                "unknown job execution {}",
                execution.id
            ))),
        }
    }

    fn get_last_job_execution(
        &self,
        job_instance_id: i64,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(self
            .state()?
            .executions
            .iter()
            .rev()
            .find(|e| e.job_instance_id == job_instance_id)
            .cloned())
    }

    fn get_last_job_execution_by_name(
        &self,
        job_name: &str,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(self
            .state()?
            .executions
            .iter()
            .rev()
            .find(|e| e.job_name == job_name)
            .cloned())
    }

    fn get_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        Ok(self
            .state()?
            .executions
            .iter()
            .rev()
            .filter(|e| e.job_instance_id == job_instance_id)
            .find_map(|e| e.get_step_execution(step_name))
            .cloned())
    }
}
