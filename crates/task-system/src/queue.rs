use std::{
	fmt,
	mem,
	panic::AssertUnwindSafe,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	thread::available_parallelism,
};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::future::{Join, Race};
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, error, instrument, trace, warn, Instrument};

use super::{
	error::{RunError, SystemError},
	task::{ExecStatus, Interrupter, IntoTask, Task, TaskId},
};

/// Large enough to absorb a whole library scan without the producer stalling most of the time
pub const DEFAULT_QUEUE_CAPACITY: usize = 200_000;

/// Hooks called by the queue as tasks move through it, used to feed job progress
pub trait QueueObserver: Send + Sync + 'static {
	fn task_queued(&self, _id: TaskId) {}
	fn task_started(&self, _id: TaskId, _description: &str) {}
	fn task_finished(&self, _id: TaskId) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl QueueObserver for NoopObserver {}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
	/// Number of workers; `0` means one per available CPU
	pub workers: usize,
	pub capacity: usize,
	/// Run every dispatched task inline on the producer instead of on the worker pool
	pub sequential: bool,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			workers: 0,
			capacity: DEFAULT_QUEUE_CAPACITY,
			sequential: false,
		}
	}
}

impl QueueConfig {
	#[must_use]
	pub fn resolved_workers(&self) -> usize {
		if self.workers > 0 {
			return self.workers;
		}

		available_parallelism().map_or_else(
			|e| {
				error!(?e, "Failed to get available parallelism, using a single worker");
				1
			},
			std::num::NonZeroUsize::get,
		)
	}
}

/// What happened to a task handed to [`TaskQueue::dispatch`] or [`TaskQueue::run_inline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
	Queued,
	RanInline(ExecStatus),
	/// Inline task returned an error or panicked, it was recorded on the summary
	FailedInline,
	NotRequired,
	/// Cancellation was requested before the task could be handed to a worker
	Discarded,
}

/// Final accounting returned by [`TaskQueue::close`]
pub struct QueueSummary<E> {
	pub completed: u64,
	pub canceled: u64,
	pub not_required: u64,
	pub discarded: u64,
	pub errors: Vec<(TaskId, E)>,
	pub panicked: Vec<TaskId>,
	pub peak_concurrency: usize,
}

impl<E> Default for QueueSummary<E> {
	fn default() -> Self {
		Self {
			completed: 0,
			canceled: 0,
			not_required: 0,
			discarded: 0,
			errors: Vec::new(),
			panicked: Vec::new(),
			peak_concurrency: 0,
		}
	}
}

impl<E: fmt::Debug> fmt::Debug for QueueSummary<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("QueueSummary")
			.field("completed", &self.completed)
			.field("canceled", &self.canceled)
			.field("not_required", &self.not_required)
			.field("discarded", &self.discarded)
			.field("errors", &self.errors)
			.field("panicked", &self.panicked)
			.field("peak_concurrency", &self.peak_concurrency)
			.finish()
	}
}

struct Shared<E> {
	summary: Mutex<QueueSummary<E>>,
	running: AtomicUsize,
	peak: AtomicUsize,
	observer: Arc<dyn QueueObserver>,
}

/// Bounded task queue drained by a fixed size worker pool.
///
/// There's a single producer by convention (the job body). Producers block when the queue is
/// full, workers block when it's empty. Cancelling the interrupter stops workers from taking new
/// tasks, whatever is still queued gets discarded while running tasks are left to finish.
pub struct TaskQueue<E: RunError> {
	tasks_tx: chan::Sender<Box<dyn Task<E>>>,
	tasks_rx: chan::Receiver<Box<dyn Task<E>>>,
	interrupter: Interrupter,
	workers: Vec<JoinHandle<()>>,
	sequential: bool,
	shared: Arc<Shared<E>>,
}

impl<E: RunError> TaskQueue<E> {
	pub fn new(
		config: QueueConfig,
		interrupter: Interrupter,
		observer: Arc<dyn QueueObserver>,
	) -> Result<Self, SystemError> {
		if config.capacity == 0 {
			return Err(SystemError::ZeroCapacity);
		}

		let runtime = Handle::try_current()?;
		let workers_count = config.resolved_workers();

		let (tasks_tx, tasks_rx) = chan::bounded(config.capacity);

		let shared = Arc::new(Shared {
			summary: Mutex::new(QueueSummary::default()),
			running: AtomicUsize::new(0),
			peak: AtomicUsize::new(0),
			observer,
		});

		let workers = (0..workers_count)
			.map(|worker_id| {
				runtime.spawn(
					work(
						worker_id,
						tasks_rx.clone(),
						interrupter.clone(),
						Arc::clone(&shared),
					)
					.in_current_span(),
				)
			})
			.collect();

		debug!(
			workers_count,
			capacity = config.capacity,
			sequential = config.sequential,
			"Task queue started;"
		);

		Ok(Self {
			tasks_tx,
			tasks_rx,
			interrupter,
			workers,
			sequential: config.sequential,
			shared,
		})
	}

	#[must_use]
	pub fn workers_count(&self) -> usize {
		self.workers.len()
	}

	#[must_use]
	pub const fn interrupter(&self) -> &Interrupter {
		&self.interrupter
	}

	/// Tasks currently waiting for a worker
	#[must_use]
	pub fn pending(&self) -> usize {
		self.tasks_tx.len()
	}

	/// Hands a task to the worker pool, or runs it inline when the queue is sequential.
	///
	/// Blocks while the queue is full. Tasks reporting they aren't [`required`](Task::required)
	/// are dropped without being counted as work.
	pub async fn dispatch(&self, task: impl IntoTask<E>) -> Result<Dispatched, SystemError> {
		if self.sequential {
			return Ok(self.run_inline(task).await);
		}

		let task = task.into_task();

		if self.interrupter.is_cancelled() {
			self.shared.summary.lock().discarded += 1;
			return Ok(Dispatched::Discarded);
		}

		if !task.required().await {
			trace!(task_id = %task.id(), "Task not required, skipping;");
			self.shared.summary.lock().not_required += 1;
			return Ok(Dispatched::NotRequired);
		}

		let task_id = task.id();

		enum Outcome {
			Sent(Result<(), SystemError>),
			Cancelled,
		}

		let outcome = (
			async {
				Outcome::Sent(
					self.tasks_tx
						.send(task)
						.await
						.map_err(|_| SystemError::QueueClosed),
				)
			},
			async {
				(&self.interrupter).await;
				Outcome::Cancelled
			},
		)
			.race()
			.await;

		match outcome {
			Outcome::Sent(Ok(())) => {
				self.shared.observer.task_queued(task_id);
				Ok(Dispatched::Queued)
			}
			Outcome::Sent(Err(e)) => Err(e),
			Outcome::Cancelled => {
				self.shared.summary.lock().discarded += 1;
				Ok(Dispatched::Discarded)
			}
		}
	}

	/// Runs a cheap task right here on the producer, still honoring [`Task::required`]
	pub async fn run_inline(&self, task: impl IntoTask<E>) -> Dispatched {
		let task = task.into_task();

		if self.interrupter.is_cancelled() {
			self.shared.summary.lock().discarded += 1;
			return Dispatched::Discarded;
		}

		if !task.required().await {
			self.shared.summary.lock().not_required += 1;
			return Dispatched::NotRequired;
		}

		self.shared.observer.task_queued(task.id());

		execute(task, &self.interrupter, &self.shared)
			.await
			.map_or(Dispatched::FailedInline, Dispatched::RanInline)
	}

	/// Stops accepting tasks, waits for the workers to drain the queue and returns the accounting
	#[instrument(skip(self), fields(workers = self.workers.len()))]
	pub async fn close(self) -> QueueSummary<E> {
		let Self {
			tasks_tx,
			tasks_rx,
			workers,
			shared,
			..
		} = self;

		tasks_tx.close();

		for res in workers.join().await {
			if let Err(e) = res {
				error!(?e, "Task queue worker failed to join;");
			}
		}

		let mut leftover = 0;
		while tasks_rx.try_recv().is_ok() {
			leftover += 1;
		}

		let mut summary = mem::take(&mut *shared.summary.lock());
		summary.discarded += leftover;
		summary.peak_concurrency = shared.peak.load(Ordering::Acquire);

		debug!(?summary.completed, ?summary.discarded, "Task queue closed;");

		summary
	}
}

async fn work<E: RunError>(
	worker_id: usize,
	tasks_rx: chan::Receiver<Box<dyn Task<E>>>,
	interrupter: Interrupter,
	shared: Arc<Shared<E>>,
) {
	enum Next<E: RunError> {
		Task(Box<dyn Task<E>>),
		Closed,
		Cancelled,
	}

	trace!(worker_id, "Task queue worker started");

	loop {
		if interrupter.is_cancelled() {
			break;
		}

		let next = (
			async {
				tasks_rx
					.recv()
					.await
					.map_or(Next::Closed, Next::Task)
			},
			async {
				(&interrupter).await;
				Next::Cancelled
			},
		)
			.race()
			.await;

		match next {
			Next::Task(task) if interrupter.is_cancelled() => {
				trace!(worker_id, task_id = %task.id(), "Discarding task received after cancellation");
				shared.summary.lock().discarded += 1;
				break;
			}
			Next::Task(task) => {
				// Failures are already recorded on the summary
				let _ = execute(task, &interrupter, &shared).await;
			}
			Next::Closed => {
				trace!(worker_id, "Task queue closed, worker exiting");
				return;
			}
			Next::Cancelled => break,
		}
	}

	let mut discarded = 0;
	while tasks_rx.try_recv().is_ok() {
		discarded += 1;
	}

	if discarded > 0 {
		debug!(worker_id, discarded, "Discarded queued tasks after cancellation;");
		shared.summary.lock().discarded += discarded;
	}
}

#[instrument(skip_all, fields(task_id = %task.id()))]
async fn execute<E: RunError>(
	mut task: Box<dyn Task<E>>,
	interrupter: &Interrupter,
	shared: &Shared<E>,
) -> Option<ExecStatus> {
	let task_id = task.id();
	let description = task.description();

	let running = shared.running.fetch_add(1, Ordering::AcqRel) + 1;
	shared.peak.fetch_max(running, Ordering::AcqRel);
	shared.observer.task_started(task_id, &description);

	let res = AssertUnwindSafe(task.run(interrupter))
		.catch_unwind()
		.await;

	shared.running.fetch_sub(1, Ordering::AcqRel);

	let out = {
		let mut summary = shared.summary.lock();
		match res {
			Ok(Ok(ExecStatus::Done)) => {
				summary.completed += 1;
				Some(ExecStatus::Done)
			}
			Ok(Ok(ExecStatus::Canceled)) => {
				summary.canceled += 1;
				Some(ExecStatus::Canceled)
			}
			Ok(Err(e)) => {
				warn!(%description, ?e, "Task failed;");
				summary.errors.push((task_id, e));
				None
			}
			Err(_) => {
				error!(%description, "Task panicked;");
				summary.panicked.push(task_id);
				None
			}
		}
	};

	shared.observer.task_finished(task_id);

	out
}
