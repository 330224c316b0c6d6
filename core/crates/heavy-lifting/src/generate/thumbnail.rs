use crate::{encoder::Args, model::File, paths::DEFAULT_THUMBNAIL_WIDTH};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};
use mk_utils::{error::FileIOError, lowercase_extension};

use std::{io::Cursor, path::Path};

use async_trait::async_trait;
use image::{codecs::gif::GifDecoder, imageops::FilterType, AnimationDecoder, DynamicImage};
use tokio::{fs, task::spawn_blocking};
use tracing::{debug, instrument};

use super::{file_exists, GenerateError, Generator};

/// Animated WebP files carry a `VP8X` chunk with the animation flag set
fn is_animated_webp(bytes: &[u8]) -> bool {
	bytes.len() > 20
		&& &bytes[0..4] == b"RIFF"
		&& &bytes[8..12] == b"WEBP"
		&& &bytes[12..16] == b"VP8X"
		&& bytes[20] & 0x02 != 0
}

fn is_animated_gif(bytes: &[u8]) -> bool {
	GifDecoder::new(Cursor::new(bytes))
		.map(|decoder| decoder.into_frames().take(2).count() > 1)
		.unwrap_or(false)
}

/// Whether an encoded image has more than one frame, those aren't thumbnailed
#[must_use]
pub fn is_animated(path: &Path, bytes: &[u8]) -> bool {
	match lowercase_extension(path).as_deref() {
		Some("gif") => is_animated_gif(bytes),
		Some("webp") => is_animated_webp(bytes),
		_ => false,
	}
}

/// Scales an image to fit in a `width` square, keeping its aspect ratio
fn shrink(path: &Path, bytes: &[u8], width: u32) -> Result<DynamicImage, GenerateError> {
	let image = image::load_from_memory(bytes).map_err(|source| GenerateError::Image {
		path: path.to_path_buf(),
		source,
	})?;

	Ok(image.resize(width, width, FilterType::Lanczos3))
}

/// Scaled down JPEG of a large image, named after the image checksum
#[derive(Debug)]
pub struct ThumbnailTask {
	id: TaskId,
	generator: Generator,
	file: File,
	checksum: String,
}

impl ThumbnailTask {
	#[must_use]
	pub fn new(generator: Generator, file: File, checksum: String) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
			checksum,
		}
	}

	fn dimensions(&self) -> Option<(u32, u32)> {
		self.file
			.image()
			.map(|image| (image.width, image.height))
			.or_else(|| self.file.video().map(|video| (video.width, video.height)))
	}

	async fn thumbnail_from_video(
		&self,
		interrupter: &Interrupter,
		output: &Path,
	) -> Result<(), GenerateError> {
		let lease = self.generator.lease(&self.file.path, interrupter);

		let bytes = self
			.generator
			.encode_bytes(
				&lease,
				&Args::screenshot_to_pipe(&self.file.path, 0.0, Some(DEFAULT_THUMBNAIL_WIDTH)),
			)
			.await?;

		self.generator.write_file(output, &bytes).await
	}

	async fn thumbnail_from_image(&self, output: &Path) -> Result<(), GenerateError> {
		let bytes = fs::read(&self.file.path)
			.await
			.map_err(|e| FileIOError::from((&self.file.path, e, "Failed to read image")))?;

		let path = self.file.path.clone();
		let thumbnail = spawn_blocking(move || {
			if is_animated(&path, &bytes) {
				return Err(GenerateError::UnsupportedFormat(path));
			}

			shrink(&path, &bytes, DEFAULT_THUMBNAIL_WIDTH)
		})
		.await??;

		self.generator.save_image(output, thumbnail).await
	}
}

#[async_trait]
impl Task<GenerateError> for ThumbnailTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating thumbnail for {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		let Some((width, height)) = self.dimensions() else {
			return false;
		};

		// Small images are served as they are
		(width > DEFAULT_THUMBNAIL_WIDTH || height > DEFAULT_THUMBNAIL_WIDTH)
			&& !file_exists(
				&self
					.generator
					.paths
					.image_thumbnail(&self.checksum, DEFAULT_THUMBNAIL_WIDTH),
			)
			.await
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		let output = self
			.generator
			.paths
			.image_thumbnail(&self.checksum, DEFAULT_THUMBNAIL_WIDTH);

		debug!("Generating thumbnail");

		if self.file.video().is_some() {
			self.thumbnail_from_video(interrupter, &output).await?;
		} else {
			self.thumbnail_from_image(&output).await?;
		}

		Ok(ExecStatus::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use image::{ImageOutputFormat, RgbImage};

	fn png(width: u32, height: u32) -> Vec<u8> {
		let mut bytes = Vec::new();
		DynamicImage::ImageRgb8(RgbImage::new(width, height))
			.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
			.unwrap();
		bytes
	}

	#[test]
	fn shrink_keeps_aspect_ratio() {
		let thumbnail = shrink(Path::new("a.png"), &png(1280, 640), 640).unwrap();
		assert_eq!((thumbnail.width(), thumbnail.height()), (640, 320));
	}

	#[test]
	fn animated_webp_flag() {
		let mut header = Vec::new();
		header.extend_from_slice(b"RIFF");
		header.extend_from_slice(&[0; 4]);
		header.extend_from_slice(b"WEBPVP8X");
		header.extend_from_slice(&[0; 4]);
		header.push(0x02);
		header.extend_from_slice(&[0; 9]);

		assert!(is_animated(Path::new("a.WEBP"), &header));

		header[20] = 0;
		assert!(!is_animated(Path::new("a.webp"), &header));
		assert!(!is_animated(Path::new("a.png"), &png(2, 2)));
	}
}
