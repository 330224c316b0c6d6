use std::{
	fmt,
	future::{Future, IntoFuture},
	pin::Pin,
	task::{Context, Poll},
};

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::error::RunError;

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// Represents whether the current [`Task::run`] method on a task finished successfully or was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	Canceled,
}

/// A helper trait to convert any type that implements [`Task<E>`] into a [`Box<dyn Task<E>>`], boxing it.
pub trait IntoTask<E>: Send {
	fn into_task(self) -> Box<dyn Task<E>>;
}

/// Blanket implementation for all types that implements [`Task<E>`] and `'static`
impl<T: Task<E> + 'static, E: RunError> IntoTask<E> for T {
	fn into_task(self) -> Box<dyn Task<E>> {
		Box::new(self)
	}
}

/// Boxed tasks are tasks too, so they go through the blanket [`IntoTask`] impl above.
#[async_trait]
impl<E: RunError> Task<E> for Box<dyn Task<E>> {
	fn id(&self) -> TaskId {
		(**self).id()
	}

	fn description(&self) -> String {
		(**self).description()
	}

	async fn required(&self) -> bool {
		(**self).required().await
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E> {
		(**self).run(interrupter).await
	}
}

/// The main trait that represents a task that can be dispatched to a [`TaskQueue`](crate::TaskQueue).
///
/// All tasks on a queue must return the same generic error type, so we can have a unified
/// error handling.
///
/// We're currently using the [`async_trait`](https://docs.rs/async-trait) crate to allow dyn async traits,
/// due to a limitation in the Rust language.
#[async_trait]
pub trait Task<E: RunError>: Send + Sync + 'static {
	/// An unique identifier for the task, used on logs and progress reports.
	fn id(&self) -> TaskId;

	/// Human readable description, shown while the task is executing.
	fn description(&self) -> String;

	/// Idempotence check: is the artifact this task produces still missing (or being overwritten)?
	///
	/// Queues never run a task that reports `false` here, so a re-run over an unchanged library
	/// dispatches nothing. Must only look at the task inputs and the presence of artifact files.
	async fn required(&self) -> bool {
		true
	}

	/// The work itself, called once by a worker.
	///
	/// The [`interrupter`](Interrupter) can be polled between steps so long tasks can bail out
	/// at a consistent point. Cancellation is never forced on a running task.
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

impl<E: RunError> fmt::Debug for Box<dyn Task<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task id='{}'>", self.id())
	}
}

pin_project_lite::pin_project! {
	/// Waits until the cancellation is requested.
	#[must_use = "`InterrupterFuture` does nothing unless polled"]
	pub struct InterrupterFuture<'token> {
		#[pin]
		fut: WaitForCancellationFuture<'token>,
	}
}

impl Future for InterrupterFuture<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.project().fut.poll(cx)
	}
}

/// We use an [`IntoFuture`] implementation to allow the user to use the `await` syntax on the [`Interrupter`] object.
impl<'token> IntoFuture for &'token Interrupter {
	type Output = ();

	type IntoFuture = InterrupterFuture<'token>;

	fn into_future(self) -> Self::IntoFuture {
		InterrupterFuture {
			fut: self.token.cancelled(),
		}
	}
}

/// Cooperative cancellation signal shared by a job, its task queue and every task it runs.
///
/// It is best effort: nothing is ever preempted, code must check the signal at its own
/// yield points, usually with [`check_interruption!`](crate::check_interruption).
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
	token: CancellationToken,
}

impl Interrupter {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// An interrupter that is cancelled with `self` but can also be cancelled alone
	#[must_use]
	pub fn child(&self) -> Self {
		Self {
			token: self.token.child_token(),
		}
	}

	pub fn cancel(&self) {
		self.token.cancel();
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	#[must_use]
	pub const fn token(&self) -> &CancellationToken {
		&self.token
	}
}

impl From<CancellationToken> for Interrupter {
	fn from(token: CancellationToken) -> Self {
		Self { token }
	}
}

/// Returns `Ok(ExecStatus::Canceled)` from the enclosing function when the interrupter fired.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		if interrupter.is_cancelled() {
			::tracing::trace!("Task was canceled by the user");
			return Ok($crate::ExecStatus::Canceled);
		}
	};
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::time::timeout;

	use super::*;

	#[tokio::test]
	async fn child_follows_parent_but_not_the_other_way_around() {
		let parent = Interrupter::new();
		let child = parent.child();

		child.cancel();
		assert!(child.is_cancelled());
		assert!(!parent.is_cancelled());

		let other_child = parent.child();
		parent.cancel();
		assert!(other_child.is_cancelled());

		timeout(Duration::from_secs(1), (&other_child).into_future())
			.await
			.expect("awaiting a cancelled interrupter must resolve");
	}
}
