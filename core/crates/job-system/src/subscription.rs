use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
};

use futures::{stream, Stream};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::trace;

use super::job::Job;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobEvent {
	NewJob(Job),
	/// Progress or status change of an active job
	UpdatedJob(Job),
	/// Terminal, carries the final snapshot with timestamps and the captured failure if any
	RemovedJob(Job),
}

impl JobEvent {
	#[must_use]
	pub const fn job(&self) -> &Job {
		match self {
			Self::NewJob(job) | Self::UpdatedJob(job) | Self::RemovedJob(job) => job,
		}
	}
}

struct Buffer {
	events: Mutex<VecDeque<JobEvent>>,
	notify: Notify,
	closed: AtomicBool,
	dropped: AtomicU64,
	capacity: usize,
}

impl Buffer {
	/// When full, the oldest `UpdatedJob` makes room. `NewJob` and `RemovedJob` are never dropped,
	/// so the buffer only grows past its capacity with lifecycle events.
	fn push(&self, event: JobEvent) {
		{
			let mut events = self.events.lock();

			if events.len() >= self.capacity {
				if let Some(idx) = events
					.iter()
					.position(|event| matches!(event, JobEvent::UpdatedJob(_)))
				{
					events.remove(idx);
					self.dropped.fetch_add(1, Ordering::Relaxed);
				} else if matches!(event, JobEvent::UpdatedJob(_)) {
					self.dropped.fetch_add(1, Ordering::Relaxed);
					return;
				}
			}

			events.push_back(event);
		}

		self.notify.notify_one();
	}

	fn close(&self) {
		self.closed.store(true, Ordering::Release);
		self.notify.notify_one();
	}
}

/// Receiving end of the job lifecycle events, each one with its own bounded buffer
pub struct Subscription {
	buffer: Arc<Buffer>,
}

impl Subscription {
	/// Next event in emission order, `None` once the manager shut down and the buffer is drained
	pub async fn recv(&self) -> Option<JobEvent> {
		loop {
			if let Some(event) = self.try_recv() {
				return Some(event);
			}

			if self.buffer.closed.load(Ordering::Acquire) {
				return None;
			}

			self.buffer.notify.notified().await;
		}
	}

	#[must_use]
	pub fn try_recv(&self) -> Option<JobEvent> {
		self.buffer.events.lock().pop_front()
	}

	/// How many `UpdatedJob` events were dropped because this subscriber fell behind
	#[must_use]
	pub fn dropped(&self) -> u64 {
		self.buffer.dropped.load(Ordering::Relaxed)
	}

	pub fn into_stream(self) -> impl Stream<Item = JobEvent> {
		stream::unfold(self, |subscription| async move {
			subscription
				.recv()
				.await
				.map(|event| (event, subscription))
		})
	}
}

/// Publisher side, owned by the manager runner
#[derive(Default)]
pub(crate) struct Subscribers {
	buffers: Vec<Arc<Buffer>>,
}

impl Subscribers {
	pub(crate) fn subscribe(&mut self, capacity: usize) -> Subscription {
		let buffer = Arc::new(Buffer {
			events: Mutex::new(VecDeque::with_capacity(capacity)),
			notify: Notify::new(),
			closed: AtomicBool::new(false),
			dropped: AtomicU64::new(0),
			capacity: capacity.max(1),
		});

		self.buffers.push(Arc::clone(&buffer));

		Subscription { buffer }
	}

	pub(crate) fn publish(&mut self, event: &JobEvent) {
		// Subscriptions dropped by their owners only have our reference left
		self.buffers.retain(|buffer| {
			let alive = Arc::strong_count(buffer) > 1;
			if !alive {
				trace!("Pruning dropped job subscription");
			}
			alive
		});

		for buffer in &self.buffers {
			buffer.push(event.clone());
		}
	}

	pub(crate) fn close(&mut self) {
		for buffer in self.buffers.drain(..) {
			buffer.close();
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn job(id: u64) -> Job {
		Job::new(id, format!("job {id}"))
	}

	#[test]
	fn slow_subscriber_loses_updates_but_never_lifecycle_events() {
		let mut subscribers = Subscribers::default();
		let subscription = subscribers.subscribe(2);
		let job = job(1);

		subscribers.publish(&JobEvent::NewJob(job.clone()));
		for _ in 0..10 {
			subscribers.publish(&JobEvent::UpdatedJob(job.clone()));
		}
		subscribers.publish(&JobEvent::RemovedJob(job.clone()));

		let received = std::iter::from_fn(|| subscription.try_recv()).collect::<Vec<_>>();

		assert_eq!(
			received,
			vec![JobEvent::NewJob(job.clone()), JobEvent::RemovedJob(job)]
		);
		assert_eq!(subscription.dropped(), 10);
	}

	#[test]
	fn dropped_subscriptions_are_pruned() {
		let mut subscribers = Subscribers::default();
		let kept = subscribers.subscribe(4);
		drop(subscribers.subscribe(4));

		subscribers.publish(&JobEvent::NewJob(job(1)));

		assert_eq!(subscribers.buffers.len(), 1);
		assert!(kept.try_recv().is_some());
	}

	#[tokio::test]
	async fn recv_ends_after_close() {
		let mut subscribers = Subscribers::default();
		let subscription = subscribers.subscribe(4);

		subscribers.publish(&JobEvent::NewJob(job(1)));
		subscribers.close();

		assert!(subscription.recv().await.is_some());
		assert!(subscription.recv().await.is_none());
	}
}
