use crate::{
	encoder::Args,
	model::{File, VideoInfo},
};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{GenerateError, Generator};

const STREAMABLE_VIDEO_CODECS: [&str; 4] = ["h264", "vp8", "vp9", "av1"];
const STREAMABLE_CONTAINERS: [&str; 4] = ["mov", "mp4", "webm", "matroska"];

/// Whether browsers can play the file directly
#[must_use]
pub fn is_streamable(video: &VideoInfo) -> bool {
	STREAMABLE_VIDEO_CODECS.contains(&video.video_codec.as_str())
		&& STREAMABLE_CONTAINERS.contains(&video.format.as_str())
}

/// Browser friendly mp4 of a video that can't be streamed as is
#[derive(Debug)]
pub struct TranscodeTask {
	id: TaskId,
	generator: Generator,
	file: File,
	hash: String,
	/// Transcode even streamable files
	force: bool,
}

impl TranscodeTask {
	#[must_use]
	pub fn new(generator: Generator, file: File, hash: String, force: bool) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
			hash,
			force,
		}
	}
}

#[async_trait]
impl Task<GenerateError> for TranscodeTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating transcode for {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		let Some(video) = self.file.video() else {
			return false;
		};

		self.generator
			.needs(&self.generator.paths.transcode(&self.hash))
			.await
			&& (self.force || !is_streamable(video))
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		let max_height = self.generator.max_transcode_size;
		let lease = self.generator.lease(&self.file.path, interrupter);

		debug!(?max_height, "Transcoding");

		self.generator
			.encode_file(
				&lease,
				&Args::transcode(&self.file.path, max_height),
				&self.generator.paths.transcode(&self.hash),
			)
			.await?;

		Ok(ExecStatus::Done)
	}
}
