use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use mk_task_system::{ExecStatus, Interrupter, Task, TaskId};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::Semaphore, time::sleep};
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("Sample error")]
	SampleError,
}

#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
}

impl Default for ReadyTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		"ready task".to_string()
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done)
	}
}

/// Artifact already present, must never reach a worker
#[derive(Debug)]
pub struct AlreadyDoneTask {
	id: TaskId,
	pub ran: Arc<AtomicUsize>,
}

impl AlreadyDoneTask {
	pub fn new(ran: Arc<AtomicUsize>) -> Self {
		Self {
			id: TaskId::new_v4(),
			ran,
		}
	}
}

#[async_trait]
impl Task<SampleError> for AlreadyDoneTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		"already done".to_string()
	}

	async fn required(&self) -> bool {
		false
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		self.ran.fetch_add(1, Ordering::SeqCst);
		Ok(ExecStatus::Done)
	}
}

#[derive(Debug)]
pub struct NeverTask {
	id: TaskId,
}

impl Default for NeverTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		"never task".to_string()
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		interrupter.await;
		info!("Canceling NeverTask <id='{}'>", self.id);
		Ok(ExecStatus::Canceled)
	}
}

#[derive(Debug)]
pub struct BrokenTask {
	id: TaskId,
}

impl Default for BrokenTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for BrokenTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		"broken task".to_string()
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

#[derive(Debug)]
pub struct PanicTask {
	id: TaskId,
}

impl Default for PanicTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for PanicTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		"panic task".to_string()
	}

	#[allow(clippy::panic)]
	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		panic!("this task always panics");
	}
}

/// Sleeps while tracking how many of its siblings are running at the same time
#[derive(Debug)]
pub struct SleepTask {
	id: TaskId,
	duration: Duration,
	running: Arc<AtomicUsize>,
	max_seen: Arc<AtomicUsize>,
}

impl SleepTask {
	pub fn new(duration: Duration, running: Arc<AtomicUsize>, max_seen: Arc<AtomicUsize>) -> Self {
		Self {
			id: TaskId::new_v4(),
			duration,
			running,
			max_seen,
		}
	}
}

#[async_trait]
impl Task<SampleError> for SleepTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("sleeping for {:?}", self.duration)
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_seen.fetch_max(now_running, Ordering::SeqCst);

		sleep(self.duration).await;

		self.running.fetch_sub(1, Ordering::SeqCst);
		Ok(ExecStatus::Done)
	}
}

/// Blocks until a permit shows up, ignoring the interrupter on purpose
#[derive(Debug)]
pub struct WaitSignalTask {
	id: TaskId,
	started: Arc<AtomicUsize>,
	signal: Arc<Semaphore>,
}

impl WaitSignalTask {
	pub fn new(started: Arc<AtomicUsize>, signal: Arc<Semaphore>) -> Self {
		Self {
			id: TaskId::new_v4(),
			started,
			signal,
		}
	}
}

#[async_trait]
impl Task<SampleError> for WaitSignalTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		"waiting for signal".to_string()
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		self.started.fetch_add(1, Ordering::SeqCst);

		self.signal
			.acquire()
			.await
			.map_err(|_| SampleError::SampleError)?
			.forget();

		Ok(ExecStatus::Done)
	}
}
