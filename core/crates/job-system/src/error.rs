use thiserror::Error;

use super::job::JobId;

#[derive(Debug, Error)]
pub enum JobSystemError {
	#[error("job not found: <id='{0}'>")]
	NotFound(JobId),
	#[error("job manager runner is not running anymore")]
	RunnerUnavailable,
}
