use std::{error::Error, fmt, future::Future};

use mk_task_system::Interrupter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::warn;

use super::progress::{Progress, ProgressReporter};

/// Sequential job identifier, unique for the lifetime of a [`JobManager`](crate::JobManager)
pub type JobId = u64;

pub type JobError = Box<dyn Error + Send + Sync>;
pub type JobResult = Result<(), JobError>;

/// Lifecycle of a job: `Ready -> Running -> {Finished, Cancelled}`.
///
/// `Cancelling` is the transient state of a running job that was asked to stop and is winding
/// down. Transitions only move forward and terminal states never change again.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
	Ready,
	Running,
	Cancelling,
	Cancelled,
	Finished,
}

impl Status {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Cancelled | Self::Finished)
	}

	const fn rank(self) -> u8 {
		match self {
			Self::Ready => 0,
			Self::Running => 1,
			Self::Cancelling => 2,
			Self::Cancelled | Self::Finished => 3,
		}
	}

	#[must_use]
	pub const fn can_transition_to(self, next: Self) -> bool {
		!self.is_terminal() && next.rank() > self.rank()
	}
}

/// Snapshot of a job, as exposed to subscribers and queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
	pub id: JobId,
	pub description: String,
	pub status: Status,
	/// Descriptions of the tasks currently executing on behalf of this job
	pub sub_tasks: Vec<String>,
	/// `0.0..=1.0`, `None` while the amount of work is still unknown
	pub progress: Option<f64>,
	pub added_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub ended_at: Option<DateTime<Utc>>,
	pub error: Option<String>,
}

impl fmt::Display for Job {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Job <id='{}', description='{}'> {}",
			self.id, self.description, self.status
		)
	}
}

impl Job {
	pub(crate) fn new(id: JobId, description: String) -> Self {
		Self {
			id,
			description,
			status: Status::Ready,
			sub_tasks: Vec::new(),
			progress: None,
			added_at: Utc::now(),
			started_at: None,
			ended_at: None,
			error: None,
		}
	}

	/// Returns whether the status actually changed
	pub(crate) fn transition(&mut self, next: Status) -> bool {
		if !self.status.can_transition_to(next) {
			if self.status != next {
				warn!(job_id = self.id, from = %self.status, to = %next, "Ignoring invalid job status transition");
			}
			return false;
		}

		let now = Utc::now();
		match next {
			Status::Running => self.started_at = Some(now),
			Status::Cancelled | Status::Finished => {
				self.ended_at = Some(now);
				self.sub_tasks.clear();
			}
			Status::Ready | Status::Cancelling => {}
		}

		self.status = next;
		true
	}

	pub(crate) fn apply_progress(&mut self, progress: &Progress) {
		self.progress = progress.percent();
		self.sub_tasks = progress.current_tasks().map(ToString::to_string).collect();
	}
}

/// Everything a job body gets to work with
#[derive(Debug, Clone)]
pub struct JobContext {
	id: JobId,
	interrupter: Interrupter,
	progress: ProgressReporter,
}

impl JobContext {
	pub(crate) const fn new(id: JobId, interrupter: Interrupter, progress: ProgressReporter) -> Self {
		Self {
			id,
			interrupter,
			progress,
		}
	}

	#[must_use]
	pub const fn id(&self) -> JobId {
		self.id
	}

	#[must_use]
	pub const fn interrupter(&self) -> &Interrupter {
		&self.interrupter
	}

	#[must_use]
	pub const fn progress(&self) -> &ProgressReporter {
		&self.progress
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.interrupter.is_cancelled()
	}
}

/// The body of a job. Returning `Ok(())` after observing cancellation ends the job as `Cancelled`.
#[async_trait]
pub trait JobExec: Send + 'static {
	async fn execute(self: Box<Self>, ctx: JobContext) -> JobResult;
}

#[async_trait]
impl<F, Fut> JobExec for F
where
	F: FnOnce(JobContext) -> Fut + Send + 'static,
	Fut: Future<Output = JobResult> + Send + 'static,
{
	async fn execute(self: Box<Self>, ctx: JobContext) -> JobResult {
		(*self)(ctx).await
	}
}
