use crate::{encoder::Args, model::File, paths::DEFAULT_THUMBNAIL_WIDTH};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};

use async_trait::async_trait;
use tracing::instrument;

use super::{GenerateError, Generator};

/// Seconds of the clip kept in its preview
const CLIP_PREVIEW_DURATION: f64 = 30.0;

/// Looping webm preview of an image backed by a video file
#[derive(Debug)]
pub struct ClipPreviewTask {
	id: TaskId,
	generator: Generator,
	file: File,
	checksum: String,
}

impl ClipPreviewTask {
	#[must_use]
	pub fn new(generator: Generator, file: File, checksum: String) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
			checksum,
		}
	}
}

#[async_trait]
impl Task<GenerateError> for ClipPreviewTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating preview for image clip {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		self.file.video().is_some()
			&& self
				.generator
				.needs(
					&self
						.generator
						.paths
						.clip_preview(&self.checksum, DEFAULT_THUMBNAIL_WIDTH),
				)
				.await
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		let lease = self.generator.lease(&self.file.path, interrupter);

		self.generator
			.encode_file(
				&lease,
				&Args::clip_preview(
					&self.file.path,
					CLIP_PREVIEW_DURATION,
					self.generator
						.max_clip_preview_size
						.unwrap_or(DEFAULT_THUMBNAIL_WIDTH),
				),
				&self
					.generator
					.paths
					.clip_preview(&self.checksum, DEFAULT_THUMBNAIL_WIDTH),
			)
			.await?;

		Ok(ExecStatus::Done)
	}
}
