use crate::{
	config::PreviewOptions,
	encoder::{Args, EncoderError},
	model::File,
};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};
use mk_utils::error::FileIOError;

use std::{fmt::Write as _, path::PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument, warn};

use super::{encoder_error, file_exists, remove_scratch, GenerateError, Generator};

/// `(start, duration)` of every preview segment, in seconds
#[must_use]
pub fn segment_times(video_duration: f64, options: &PreviewOptions) -> Vec<(f64, f64)> {
	let start = video_duration * options.exclude_start / 100.0;
	let end = video_duration * (1.0 - options.exclude_end / 100.0);
	let usable = end - start;

	let segments = options.segments.max(1);
	let wanted = f64::from(segments) * options.segment_duration;

	// Too short to be worth splitting, the whole video becomes the preview
	if usable <= wanted || usable <= 0.0 {
		return vec![(0.0, video_duration)];
	}

	let step = usable / f64::from(segments);
	(0..segments)
		.map(|i| (start + f64::from(i) * step, options.segment_duration))
		.collect()
}

/// Short looping mp4 of a video, optionally followed by an animated webp made from it
#[derive(Debug)]
pub struct PreviewTask {
	id: TaskId,
	generator: Generator,
	file: File,
	hash: String,
	image_preview: bool,
}

impl PreviewTask {
	#[must_use]
	pub fn new(generator: Generator, file: File, hash: String, image_preview: bool) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
			hash,
			image_preview,
		}
	}

	async fn video_preview(&self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		match self.encode_preview(interrupter, false).await {
			Err(e) if retries_with_fallback(&e) && !interrupter.is_cancelled() => {
				warn!(?e, "Failed generating preview, trying fallback;");
				self.encode_preview(interrupter, true).await
			}
			res => res,
		}
	}

	async fn encode_preview(
		&self,
		interrupter: &Interrupter,
		fallback: bool,
	) -> Result<ExecStatus, GenerateError> {
		let mut scratch = Vec::new();

		let res = self.encode_segments(interrupter, fallback, &mut scratch).await;

		for path in &scratch {
			remove_scratch(path).await;
		}

		res
	}

	/// Every intermediate file is pushed to `scratch` for the caller to clean up
	async fn encode_segments(
		&self,
		interrupter: &Interrupter,
		fallback: bool,
		scratch: &mut Vec<PathBuf>,
	) -> Result<ExecStatus, GenerateError> {
		let duration = self.file.video().map_or(0.0, |video| video.duration);
		let lease = self.generator.lease(&self.file.path, interrupter);

		let mut list = String::new();

		for (at, length) in segment_times(duration, &self.generator.preview) {
			check_interruption!(interrupter);

			let segment = self.generator.paths.tmp_file("mp4");
			scratch.push(segment.clone());

			self.generator
				.encoder
				.generate(
					&lease,
					&Args::preview_segment(
						&self.file.path,
						at,
						length,
						&self.generator.preview.preset,
						fallback,
					),
					&segment,
				)
				.await
				.map_err(|e| encoder_error(e, &lease))?;

			let _ = writeln!(list, "file '{}'", segment.display());
		}

		let list_file = self.generator.paths.tmp_file("txt");
		scratch.push(list_file.clone());

		fs::write(&list_file, list)
			.await
			.map_err(|e| FileIOError::from((&list_file, e, "Failed to write concat list")))?;

		self.generator
			.encode_file(
				&lease,
				&Args::concat(&list_file),
				&self.generator.paths.video_preview(&self.hash),
			)
			.await?;

		Ok(ExecStatus::Done)
	}
}

/// Only the encoder rejecting its input is worth a second attempt, kills are cancellations
fn retries_with_fallback(e: &GenerateError) -> bool {
	matches!(e, GenerateError::Encoder(EncoderError::Failed { .. }))
}

#[async_trait]
impl Task<GenerateError> for PreviewTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating preview for {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		let paths = &self.generator.paths;

		self.generator.needs(&paths.video_preview(&self.hash)).await
			|| (self.image_preview && self.generator.needs(&paths.webp_preview(&self.hash)).await)
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		let video_preview = self.generator.paths.video_preview(&self.hash);

		if self.generator.needs(&video_preview).await {
			debug!("Generating video preview");
			if self.video_preview(interrupter).await? == ExecStatus::Canceled {
				return Ok(ExecStatus::Canceled);
			}
		}

		check_interruption!(interrupter);

		let webp_preview = self.generator.paths.webp_preview(&self.hash);

		if self.image_preview
			&& file_exists(&video_preview).await
			&& self.generator.needs(&webp_preview).await
		{
			debug!("Generating image preview");
			let lease = self.generator.lease(&video_preview, interrupter);
			self.generator
				.encode_file(&lease, &Args::webp_preview(&video_preview), &webp_preview)
				.await?;
		}

		Ok(ExecStatus::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn segments_are_spread_over_the_usable_range() {
		let options = PreviewOptions {
			segments: 4,
			segment_duration: 1.0,
			exclude_start: 10.0,
			exclude_end: 10.0,
			..Default::default()
		};

		assert_eq!(
			segment_times(100.0, &options),
			vec![(10.0, 1.0), (30.0, 1.0), (50.0, 1.0), (70.0, 1.0)]
		);
	}

	#[test]
	fn short_videos_are_a_single_segment() {
		assert_eq!(
			segment_times(5.0, &PreviewOptions::default()),
			vec![(0.0, 5.0)]
		);
	}
}
