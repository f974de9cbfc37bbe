use crate::core::{job::JobExecution, step::StepExecution};

/// Callbacks around a job execution.
///
/// `after_job` is invoked exactly once per execution with its final state,
/// whether the job completed, failed or was stopped.
pub trait JobExecutionListener {
    fn before_job(&self, _job_execution: &JobExecution) {}

    fn after_job(&self, _job_execution: &JobExecution) {}
}

/// Callbacks around a step execution.
pub trait StepExecutionListener {
    fn before_step(&self, _step_execution: &StepExecution) {}

    fn after_step(&self, _step_execution: &StepExecution) {}
}
