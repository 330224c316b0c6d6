//!
//! # Task System
//!
//! A bounded task queue drained by a fixed size pool of tokio workers, used by jobs to run
//! generation work in parallel. Features:
//! - Bounded capacity with backpressure on the producer;
//! - Worker count set explicitly or from the available CPU parallelism;
//! - Cooperative cancellation through a shared [`Interrupter`], checked before each dequeue;
//! - Idempotence checks, tasks that aren't [`required`](Task::required) never reach a worker;
//! - A sequential mode running cheap tasks inline on the producer;
//!
//! ## Basic example
//!
//! ```
//! use std::sync::Arc;
//!
//! use mk_task_system::{
//! 	ExecStatus, Interrupter, NoopObserver, QueueConfig, Task, TaskId, TaskQueue,
//! };
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum SampleError {
//! 	#[error("Sample error")]
//! 	SampleError,
//! }
//!
//! #[derive(Debug)]
//! pub struct ReadyTask {
//! 	id: TaskId,
//! }
//!
//! #[async_trait]
//! impl Task<SampleError> for ReadyTask {
//! 	fn id(&self) -> TaskId {
//! 		self.id
//! 	}
//!
//! 	fn description(&self) -> String {
//! 		"ready".to_string()
//! 	}
//!
//! 	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
//! 		Ok(ExecStatus::Done)
//! 	}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//! 	let queue = TaskQueue::<SampleError>::new(
//! 		QueueConfig::default(),
//! 		Interrupter::new(),
//! 		Arc::new(NoopObserver),
//! 	)
//! 	.unwrap();
//!
//! 	queue.dispatch(ReadyTask { id: TaskId::new_v4() }).await.unwrap();
//!
//! 	let summary = queue.close().await;
//! 	assert_eq!(summary.completed, 1);
//! }
//! ```

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

mod error;
mod queue;
mod task;

pub use error::{RunError, SystemError as TaskSystemError};
pub use queue::{
	Dispatched, NoopObserver, QueueConfig, QueueObserver, QueueSummary, TaskQueue,
	DEFAULT_QUEUE_CAPACITY,
};
pub use task::{ExecStatus, Interrupter, InterrupterFuture, IntoTask, Task, TaskId};
