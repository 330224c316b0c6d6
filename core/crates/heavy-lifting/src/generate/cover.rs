use crate::{encoder::Args, model::File};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{GenerateError, Generator};

const SCREENSHOT_QUALITY: u32 = 2;

/// Fraction of the duration the cover frame is taken at
const COVER_POSITION: f64 = 0.2;

/// Screenshot of a video used as its scene cover
#[derive(Debug)]
pub struct CoverTask {
	id: TaskId,
	generator: Generator,
	file: File,
	hash: String,
}

impl CoverTask {
	#[must_use]
	pub fn new(generator: Generator, file: File, hash: String) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
			hash,
		}
	}
}

#[async_trait]
impl Task<GenerateError> for CoverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating cover for {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		self.generator
			.needs(&self.generator.paths.cover(&self.hash))
			.await
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		let duration = self.file.video().map_or(0.0, |video| video.duration);
		let lease = self.generator.lease(&self.file.path, interrupter);

		debug!("Creating cover screenshot");

		self.generator
			.encode_file(
				&lease,
				&Args::screenshot(
					&self.file.path,
					duration * COVER_POSITION,
					None,
					SCREENSHOT_QUALITY,
				),
				&self.generator.paths.cover(&self.hash),
			)
			.await?;

		Ok(ExecStatus::Done)
	}
}
