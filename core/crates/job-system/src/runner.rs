use std::{
	collections::BTreeMap,
	panic::AssertUnwindSafe,
	pin::pin,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use mk_task_system::Interrupter;

use async_channel as chan;
use futures::{FutureExt, StreamExt};
use futures_concurrency::stream::Merge;
use tokio::{
	spawn,
	sync::oneshot,
	time::{interval_at, Instant},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

use super::{
	error::JobSystemError,
	job::{Job, JobContext, JobExec, JobId, Status},
	progress::ProgressReporter,
	subscription::{JobEvent, Subscribers, Subscription},
	JobManagerConfig,
};

pub(super) enum RunnerMessage {
	NewJob {
		description: String,
		exec: Box<dyn JobExec>,
		ack_tx: oneshot::Sender<JobId>,
	},
	Cancel {
		id: JobId,
		ack_tx: oneshot::Sender<Result<(), JobSystemError>>,
	},
	CancelAll {
		ack_tx: oneshot::Sender<()>,
	},
	GetJob {
		id: JobId,
		ack_tx: oneshot::Sender<Option<Job>>,
	},
	GetQueue {
		ack_tx: oneshot::Sender<Vec<Job>>,
	},
	Subscribe {
		ack_tx: oneshot::Sender<Subscription>,
	},
	Shutdown,
}

/// Sent by the spawned job bodies back to the runner
pub(super) enum JobNotice {
	Started(JobId),
	Finished(JobId, Option<String>),
}

struct ActiveJob {
	job: Job,
	interrupter: Interrupter,
	progress: ProgressReporter,
	last_update: Option<Instant>,
}

pub(super) struct JobManagerRunner {
	config: JobManagerConfig,
	next_id: Arc<AtomicU64>,
	active: BTreeMap<JobId, ActiveJob>,
	graveyard: BTreeMap<JobId, (Job, Instant)>,
	subscribers: Subscribers,
	notices_tx: chan::Sender<JobNotice>,
	progress_tx: chan::Sender<JobId>,
}

impl JobManagerRunner {
	pub(super) fn new(
		config: JobManagerConfig,
		next_id: Arc<AtomicU64>,
		notices_tx: chan::Sender<JobNotice>,
		progress_tx: chan::Sender<JobId>,
	) -> Self {
		Self {
			config,
			next_id,
			active: BTreeMap::new(),
			graveyard: BTreeMap::new(),
			subscribers: Subscribers::default(),
			notices_tx,
			progress_tx,
		}
	}

	fn publish(&mut self, event: JobEvent) {
		self.subscribers.publish(&event);
	}

	#[instrument(skip(self, exec))]
	fn new_job(&mut self, description: String, exec: Box<dyn JobExec>) -> JobId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);

		let job = Job::new(id, description);
		let interrupter = Interrupter::new();
		let progress = ProgressReporter::new(id, self.progress_tx.clone());

		let ctx = JobContext::new(id, interrupter.clone(), progress.clone());

		spawn(
			execute(id, exec, ctx, self.notices_tx.clone())
				.instrument(info_span!("job", id, description = %job.description)),
		);

		debug!(%job, "New job dispatched;");

		self.publish(JobEvent::NewJob(job.clone()));
		self.active.insert(
			id,
			ActiveJob {
				job,
				interrupter,
				progress,
				last_update: None,
			},
		);

		id
	}

	fn job_started(&mut self, id: JobId) {
		let Some(active) = self.active.get_mut(&id) else {
			return;
		};

		// Cancelled before it had the chance to run, it will report back shortly
		if active.interrupter.is_cancelled() {
			return;
		}

		if active.job.transition(Status::Running) {
			active.last_update = Some(Instant::now());
			let event = JobEvent::UpdatedJob(active.job.clone());
			self.publish(event);
		}
	}

	fn cancel(&mut self, id: JobId) -> Result<(), JobSystemError> {
		let Some(active) = self.active.get_mut(&id) else {
			return if self.graveyard.contains_key(&id) {
				trace!(id, "Job already finished, nothing to cancel");
				Ok(())
			} else {
				Err(JobSystemError::NotFound(id))
			};
		};

		active.interrupter.cancel();

		if active.job.status == Status::Running && active.job.transition(Status::Cancelling) {
			info!(job = %active.job, "Cancelling job;");
			let event = JobEvent::UpdatedJob(active.job.clone());
			self.publish(event);
		}

		Ok(())
	}

	fn cancel_all(&mut self) {
		let ids = self.active.keys().copied().collect::<Vec<_>>();
		for id in ids {
			// Only active ids here, can't fail
			let _ = self.cancel(id);
		}
	}

	fn job_finished(&mut self, id: JobId, failure: Option<String>) {
		let Some(ActiveJob {
			mut job,
			interrupter,
			progress,
			..
		}) = self.active.remove(&id)
		else {
			warn!(id, "Received finish notice of an unknown job");
			return;
		};

		job.apply_progress(&progress.snapshot());

		let status = if failure.is_some() {
			Status::Finished
		} else if interrupter.is_cancelled() {
			Status::Cancelled
		} else {
			Status::Finished
		};

		job.error = failure;
		job.transition(status);

		if let Some(e) = &job.error {
			error!(%job, %e, "Job failed;");
		} else {
			info!(%job, "Job done;");
		}

		self.publish(JobEvent::RemovedJob(job.clone()));
		self.graveyard.insert(id, (job, Instant::now()));
	}

	fn progress_changed(&mut self, id: JobId) {
		let throttle = self.config.update_throttle;
		let Some(active) = self.active.get_mut(&id) else {
			return;
		};

		if active
			.last_update
			.is_some_and(|last| last.elapsed() < throttle)
		{
			// Stays dirty, the next tick picks it up
			return;
		}

		if let Some(progress) = active.progress.take_dirty() {
			active.job.apply_progress(&progress);
			active.last_update = Some(Instant::now());
			let event = JobEvent::UpdatedJob(active.job.clone());
			self.publish(event);
		}
	}

	fn tick(&mut self) {
		let ids = self.active.keys().copied().collect::<Vec<_>>();
		for id in ids {
			self.progress_changed(id);
		}

		let retention = self.config.retention;
		self.graveyard
			.retain(|_, (_, finished_at)| finished_at.elapsed() < retention);
	}

	fn get_job(&self, id: JobId) -> Option<Job> {
		self.active.get(&id).map_or_else(
			|| self.graveyard.get(&id).map(|(job, _)| job.clone()),
			|active| Some(active.job.clone()),
		)
	}

	fn get_queue(&self) -> Vec<Job> {
		self.active
			.values()
			.map(|active| active.job.clone())
			.collect()
	}

	fn is_empty(&self) -> bool {
		self.active.is_empty()
	}
}

async fn execute(
	id: JobId,
	exec: Box<dyn JobExec>,
	ctx: JobContext,
	notices_tx: chan::Sender<JobNotice>,
) {
	if notices_tx.send(JobNotice::Started(id)).await.is_err() {
		error!("Job manager runner is gone, dropping job");
		return;
	}

	let failure = if ctx.is_cancelled() {
		trace!("Job cancelled before starting");
		None
	} else {
		match AssertUnwindSafe(exec.execute(ctx)).catch_unwind().await {
			Ok(Ok(())) => None,
			Ok(Err(e)) => Some(e.to_string()),
			Err(panic) => Some(
				panic
					.downcast_ref::<&str>()
					.map(ToString::to_string)
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.map_or_else(|| "job panicked".to_string(), |msg| format!("job panicked: {msg}")),
			),
		}
	};

	if notices_tx
		.send(JobNotice::Finished(id, failure))
		.await
		.is_err()
	{
		error!("Job manager runner is gone, couldn't report job completion");
	}
}

fn ack<T>(ack_tx: oneshot::Sender<T>, value: T) {
	if ack_tx.send(value).is_err() {
		warn!("Job manager caller dropped before receiving its response");
	}
}

pub(super) async fn run(
	mut runner: JobManagerRunner,
	msgs_rx: chan::Receiver<RunnerMessage>,
	notices_rx: chan::Receiver<JobNotice>,
	progress_rx: chan::Receiver<JobId>,
	tick_interval: Duration,
) {
	enum StreamMessage {
		Notice(JobNotice),
		Progress(JobId),
		RunnerMessage(RunnerMessage),
		Tick,
	}

	let notices_rx_to_shutdown = notices_rx.clone();

	let mut msg_stream = pin!((
		msgs_rx.map(StreamMessage::RunnerMessage),
		notices_rx.map(StreamMessage::Notice),
		progress_rx.map(StreamMessage::Progress),
		IntervalStream::new(interval_at(Instant::now() + tick_interval, tick_interval))
			.map(|_| StreamMessage::Tick),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Notice(JobNotice::Started(id)) => runner.job_started(id),

			StreamMessage::Notice(JobNotice::Finished(id, failure)) => {
				runner.job_finished(id, failure);
			}

			StreamMessage::Progress(id) => runner.progress_changed(id),

			StreamMessage::Tick => runner.tick(),

			StreamMessage::RunnerMessage(RunnerMessage::NewJob {
				description,
				exec,
				ack_tx,
			}) => ack(ack_tx, runner.new_job(description, exec)),

			StreamMessage::RunnerMessage(RunnerMessage::Cancel { id, ack_tx }) => {
				ack(ack_tx, runner.cancel(id));
			}

			StreamMessage::RunnerMessage(RunnerMessage::CancelAll { ack_tx }) => {
				runner.cancel_all();
				ack(ack_tx, ());
			}

			StreamMessage::RunnerMessage(RunnerMessage::GetJob { id, ack_tx }) => {
				ack(ack_tx, runner.get_job(id));
			}

			StreamMessage::RunnerMessage(RunnerMessage::GetQueue { ack_tx }) => {
				ack(ack_tx, runner.get_queue());
			}

			StreamMessage::RunnerMessage(RunnerMessage::Subscribe { ack_tx }) => {
				let subscription = runner
					.subscribers
					.subscribe(runner.config.subscriber_capacity);
				ack(ack_tx, subscription);
			}

			StreamMessage::RunnerMessage(RunnerMessage::Shutdown) => {
				runner.cancel_all();

				// Wait for every job body to wind down so subscribers see their terminal events
				while !runner.is_empty() {
					match notices_rx_to_shutdown.recv().await {
						Ok(JobNotice::Started(id)) => runner.job_started(id),
						Ok(JobNotice::Finished(id, failure)) => runner.job_finished(id, failure),
						Err(chan::RecvError) => break,
					}
				}

				runner.subscribers.close();
				break;
			}
		}
	}
}
