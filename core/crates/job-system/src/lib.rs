#![recursion_limit = "256"]
#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::{
	sync::{atomic::AtomicU64, Arc},
	time::Duration,
};

use async_channel as chan;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{spawn, sync::oneshot, task::JoinHandle};
use tracing::{error, info, instrument, trace, warn};

mod error;
pub mod job;
pub mod progress;
mod runner;
pub mod subscription;

pub use error::JobSystemError;
pub use job::{Job, JobContext, JobError, JobExec, JobId, JobResult, Status};
pub use progress::{Progress, ProgressReporter};
pub use subscription::{JobEvent, Subscription};

use runner::{run, JobManagerRunner, RunnerMessage};

const PROGRESS_CHANNEL_CAPACITY: usize = 1024;
const NOTICES_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobManagerConfig {
	/// How long finished jobs stay queryable after completion
	#[serde(with = "duration_millis")]
	pub retention: Duration,
	/// Minimum interval between two `UpdatedJob` progress events of the same job
	#[serde(with = "duration_millis")]
	pub update_throttle: Duration,
	/// Buffered events per subscriber before intermediate updates start being dropped
	pub subscriber_capacity: usize,
}

impl Default for JobManagerConfig {
	fn default() -> Self {
		Self {
			retention: Duration::from_secs(60),
			update_throttle: Duration::from_millis(100),
			subscriber_capacity: 100,
		}
	}
}

mod duration_millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// The central unit that runs every job of the engine.
///
/// Each job body is spawned on its own tokio task, there is no limit on how many run at the same
/// time. All the bookkeeping happens on a single runner task fed through bounded channels, so
/// callers and job bodies never share mutable state with it.
pub struct JobManager {
	msgs_tx: chan::Sender<RunnerMessage>,
	runner_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
	/// Spawn the job manager, must be called from within a tokio runtime
	#[must_use]
	pub fn new(config: JobManagerConfig) -> Self {
		let (msgs_tx, msgs_rx) = chan::bounded(8);
		let (notices_tx, notices_rx) = chan::bounded(NOTICES_CHANNEL_CAPACITY);
		let (progress_tx, progress_rx) = chan::bounded(PROGRESS_CHANNEL_CAPACITY);

		let next_id = Arc::new(AtomicU64::new(1));
		let tick_interval = config.update_throttle.max(Duration::from_millis(10));

		let runner_handle = spawn(async move {
			trace!("Job Manager Runner starting...");
			// keep trying to spawn the job manager (tokio) task until succeed
			while let Err(e) = spawn({
				let next_id = Arc::clone(&next_id);
				let msgs_rx = msgs_rx.clone();
				let notices_tx = notices_tx.clone();
				let notices_rx = notices_rx.clone();
				let progress_tx = progress_tx.clone();
				let progress_rx = progress_rx.clone();

				async move {
					run(
						JobManagerRunner::new(config, next_id, notices_tx, progress_tx),
						msgs_rx,
						notices_rx,
						progress_rx,
						tick_interval,
					)
					.await;
				}
			})
			.await
			{
				if e.is_panic() {
					error!(?e, "Job manager panicked;");
				} else {
					trace!("JobManagerRunner received shutdown signal and will exit...");
					break;
				}
				trace!("Restarting JobManagerRunner processing task...");
			}

			info!("JobManagerRunner gracefully shutdown");
		});

		Self {
			msgs_tx,
			runner_handle: Mutex::new(Some(runner_handle)),
		}
	}

	async fn request<T>(
		&self,
		msg: impl FnOnce(oneshot::Sender<T>) -> RunnerMessage,
	) -> Result<T, JobSystemError> {
		let (ack_tx, ack_rx) = oneshot::channel();

		self.msgs_tx
			.send(msg(ack_tx))
			.await
			.map_err(|_| JobSystemError::RunnerUnavailable)?;

		ack_rx.await.map_err(|_| JobSystemError::RunnerUnavailable)
	}

	/// Submit a new job, its body starts running right away
	#[instrument(skip_all, err)]
	pub async fn add(
		&self,
		description: impl Into<String> + Send,
		exec: impl JobExec,
	) -> Result<JobId, JobSystemError> {
		let description = description.into();
		let exec = Box::new(exec);

		self.request(|ack_tx| RunnerMessage::NewJob {
			description,
			exec,
			ack_tx,
		})
		.await
	}

	/// Signals the job to stop. Returns once the signal is delivered, the job itself winds down
	/// on its own and reports `Cancelled` when done.
	#[instrument(skip(self), err)]
	pub async fn cancel_job(&self, id: JobId) -> Result<(), JobSystemError> {
		self.request(|ack_tx| RunnerMessage::Cancel { id, ack_tx })
			.await?
	}

	pub async fn cancel_all(&self) -> Result<(), JobSystemError> {
		self.request(|ack_tx| RunnerMessage::CancelAll { ack_tx })
			.await
	}

	/// Active jobs and those finished within the retention window
	pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobSystemError> {
		self.request(|ack_tx| RunnerMessage::GetJob { id, ack_tx })
			.await
	}

	/// Every job not yet finished, in submission order
	pub async fn get_queue(&self) -> Result<Vec<Job>, JobSystemError> {
		self.request(|ack_tx| RunnerMessage::GetQueue { ack_tx })
			.await
	}

	pub async fn subscribe(&self) -> Result<Subscription, JobSystemError> {
		self.request(|ack_tx| RunnerMessage::Subscribe { ack_tx })
			.await
	}

	/// Waits for the job to reach a terminal state and returns its final snapshot, `None` if the
	/// job isn't known anymore
	pub async fn wait_for(&self, id: JobId) -> Result<Option<Job>, JobSystemError> {
		let subscription = self.subscribe().await?;

		match self.get_job(id).await? {
			Some(job) if job.status.is_terminal() => return Ok(Some(job)),
			None => return Ok(None),
			Some(_) => {}
		}

		while let Some(event) = subscription.recv().await {
			if let JobEvent::RemovedJob(job) = event {
				if job.id == id {
					return Ok(Some(job));
				}
			}
		}

		// Manager shut down before the job reported back
		self.get_job(id).await.or(Ok(None))
	}

	/// Cancels every job, waits for them to wind down and stops the runner
	pub async fn shutdown(&self) {
		let handle = self.runner_handle.lock().take();

		if let Some(handle) = handle {
			if self.msgs_tx.send(RunnerMessage::Shutdown).await.is_err() {
				warn!("Job manager runner already gone at shutdown");
			}

			if let Err(e) = handle.await {
				if e.is_panic() {
					error!(?e, "JobManager panicked while shutting down;");
				}
			}
		} else {
			warn!("Trying to shutdown job manager that was already shutdown");
		}
	}
}
