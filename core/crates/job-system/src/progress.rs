use std::{
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use mk_task_system::{QueueObserver, TaskId};

use async_channel as chan;
use parking_lot::Mutex;

use super::job::JobId;

/// Work accounting of a single job.
///
/// The total may keep growing while the job discovers more work, and stays unknown until the
/// job sets or adds to it for the first time.
#[derive(Debug, Default, Clone)]
pub struct Progress {
	total: Option<u64>,
	processed: u64,
	current_tasks: HashMap<TaskId, String>,
}

impl Progress {
	#[must_use]
	pub const fn total(&self) -> Option<u64> {
		self.total
	}

	#[must_use]
	pub const fn processed(&self) -> u64 {
		self.processed
	}

	pub fn current_tasks(&self) -> impl Iterator<Item = &str> + '_ {
		self.current_tasks.values().map(String::as_str)
	}

	/// `None` while indeterminate
	#[must_use]
	pub fn percent(&self) -> Option<f64> {
		match self.total {
			Some(total) if total > 0 => {
				#[allow(clippy::cast_precision_loss)]
				let percent = self.processed as f64 / total as f64;
				Some(percent.min(1.0))
			}
			_ => None,
		}
	}
}

struct Shared {
	progress: Mutex<Progress>,
	dirty: AtomicBool,
}

/// Handle used by a job (and its task queues) to report progress.
///
/// Updates never block: the state lives behind a mutex and the manager is poked through a bounded
/// channel, dropping the poke when the channel is full since the manager also sweeps dirty jobs
/// periodically.
#[derive(Clone)]
pub struct ProgressReporter {
	job_id: JobId,
	shared: Arc<Shared>,
	changed_tx: chan::Sender<JobId>,
}

impl fmt::Debug for ProgressReporter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProgressReporter")
			.field("job_id", &self.job_id)
			.field("progress", &*self.shared.progress.lock())
			.finish()
	}
}

impl ProgressReporter {
	pub(crate) fn new(job_id: JobId, changed_tx: chan::Sender<JobId>) -> Self {
		Self {
			job_id,
			shared: Arc::new(Shared {
				progress: Mutex::new(Progress::default()),
				dirty: AtomicBool::new(false),
			}),
			changed_tx,
		}
	}

	fn update(&self, f: impl FnOnce(&mut Progress)) {
		f(&mut self.shared.progress.lock());
		self.shared.dirty.store(true, Ordering::Release);
		// Full channel means the manager is busy, it will catch up on its next sweep
		let _ = self.changed_tx.try_send(self.job_id);
	}

	pub fn set_total(&self, total: u64) {
		self.update(|progress| progress.total = Some(total));
	}

	pub fn add_total(&self, amount: u64) {
		self.update(|progress| progress.total = Some(progress.total.unwrap_or(0) + amount));
	}

	/// Back to the unknown amount of work state
	pub fn set_indeterminate(&self) {
		self.update(|progress| progress.total = None);
	}

	pub fn increment(&self) {
		self.add_processed(1);
	}

	pub fn add_processed(&self, amount: u64) {
		self.update(|progress| progress.processed += amount);
	}

	pub fn start_task(&self, id: TaskId, description: impl Into<String>) {
		let description = description.into();
		self.update(|progress| {
			progress.current_tasks.insert(id, description);
		});
	}

	pub fn finish_task(&self, id: TaskId) {
		self.update(|progress| {
			progress.current_tasks.remove(&id);
			progress.processed += 1;
		});
	}

	#[must_use]
	pub fn snapshot(&self) -> Progress {
		self.shared.progress.lock().clone()
	}

	/// Returns the current progress if it changed since the last call
	pub(crate) fn take_dirty(&self) -> Option<Progress> {
		self.shared
			.dirty
			.swap(false, Ordering::AcqRel)
			.then(|| self.snapshot())
	}
}

/// Every task dispatched to a queue counts as one unit of work of the job
impl QueueObserver for ProgressReporter {
	fn task_queued(&self, _id: TaskId) {
		self.add_total(1);
	}

	fn task_started(&self, id: TaskId, description: &str) {
		self.start_task(id, description);
	}

	fn task_finished(&self, id: TaskId) {
		self.finish_task(id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn percent_is_indeterminate_until_total_is_known() {
		let (tx, _rx) = chan::bounded(8);
		let reporter = ProgressReporter::new(1, tx);

		assert_eq!(reporter.snapshot().percent(), None);

		reporter.add_total(4);
		reporter.increment();
		assert_eq!(reporter.snapshot().percent(), Some(0.25));

		// More work discovered later
		reporter.add_total(4);
		assert_eq!(reporter.snapshot().percent(), Some(0.125));

		reporter.add_processed(100);
		assert_eq!(reporter.snapshot().percent(), Some(1.0));

		reporter.set_indeterminate();
		assert_eq!(reporter.snapshot().percent(), None);
	}

	#[test]
	fn tasks_are_tracked_while_running() {
		let (tx, rx) = chan::bounded(1);
		let reporter = ProgressReporter::new(9, tx);
		let task_id = TaskId::new_v4();

		reporter.task_queued(task_id);
		reporter.task_started(task_id, "generating cover");
		assert_eq!(
			reporter.snapshot().current_tasks().collect::<Vec<_>>(),
			vec!["generating cover"]
		);

		reporter.task_finished(task_id);
		let progress = reporter.take_dirty().unwrap();
		assert_eq!(progress.current_tasks().count(), 0);
		assert_eq!(progress.percent(), Some(1.0));
		assert!(reporter.take_dirty().is_none());

		// Pokes beyond the channel capacity are dropped, not blocked on
		assert_eq!(rx.try_recv().unwrap(), 9);
		assert!(rx.try_recv().is_err());
	}
}
