use crate::{encoder::Args, model::File};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};

use std::{fmt::Write as _, path::Path};

use async_trait::async_trait;
use image::{imageops, DynamicImage, RgbImage};
use tokio::task::spawn_blocking;
use tracing::{debug, instrument, warn};

use super::{GenerateError, Generator};

const SPRITE_WIDTH: u32 = 160;
const SPRITE_ROWS: u32 = 9;
const SPRITE_COLS: u32 = 9;
const SPRITE_CHUNKS: u32 = SPRITE_ROWS * SPRITE_COLS;

/// Videos shorter than this are sampled by frame number instead of seeking
const SLOW_SEEK_DURATION: f64 = 5.0;

/// Grid of evenly spaced thumbnails plus the WebVTT file mapping playback time to each cell
#[derive(Debug)]
pub struct SpriteTask {
	id: TaskId,
	generator: Generator,
	file: File,
	hash: String,
}

impl SpriteTask {
	#[must_use]
	pub fn new(generator: Generator, file: File, hash: String) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
			hash,
		}
	}

	fn use_slow_seek(&self) -> bool {
		self.file.video().is_some_and(|video| {
			video.duration < SLOW_SEEK_DURATION
				|| (video.frame_count > 0 && video.frame_count <= u64::from(SPRITE_CHUNKS))
		})
	}

	fn frame_args(&self, index: u32) -> Args {
		let (duration, frame_count) = self
			.file
			.video()
			.map_or((0.0, 0), |video| (video.duration, video.frame_count));

		if self.use_slow_seek() {
			let frame = u64::from(index) * frame_count.saturating_sub(1) / u64::from(SPRITE_CHUNKS);
			Args::frame_by_number(&self.file.path, frame, SPRITE_WIDTH)
		} else {
			let at = f64::from(index) * duration / f64::from(SPRITE_CHUNKS);
			Args::screenshot(&self.file.path, at, Some(SPRITE_WIDTH), 2)
		}
	}

	async fn sprite_image(&self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		let lease = self.generator.lease(&self.file.path, interrupter);

		let mut frames = Vec::with_capacity(SPRITE_CHUNKS as usize);
		for index in 0..SPRITE_CHUNKS {
			check_interruption!(interrupter);

			frames.push(self.generator.grab_frame(&lease, &self.frame_args(index)).await?);
		}

		let montage = spawn_blocking(move || montage(&frames)).await?;

		self.generator
			.save_image(&self.generator.paths.sprite_image(&self.hash), montage)
			.await?;

		Ok(ExecStatus::Done)
	}

	async fn sprite_vtt(&self) -> Result<(), GenerateError> {
		let sprite_path = self.generator.paths.sprite_image(&self.hash);

		let (width, height) = image::image_dimensions(&sprite_path).map_err(|source| {
			GenerateError::Image {
				path: sprite_path.clone(),
				source,
			}
		})?;

		let duration = self.file.video().map_or(0.0, |video| video.duration);

		let vtt = render_vtt(
			&sprite_path,
			duration,
			width / SPRITE_COLS,
			height / SPRITE_ROWS,
		);

		self.generator
			.write_file(&self.generator.paths.sprite_vtt(&self.hash), vtt.as_bytes())
			.await
	}
}

/// Pastes the frames in rows of [`SPRITE_COLS`], every cell sized after the first frame
fn montage(frames: &[DynamicImage]) -> DynamicImage {
	let Some(first) = frames.first() else {
		return DynamicImage::new_rgb8(0, 0);
	};

	let (width, height) = (first.width(), first.height());
	let mut canvas = RgbImage::new(width * SPRITE_COLS, height * SPRITE_ROWS);

	for (index, frame) in (0u32..).zip(frames) {
		let x = width * (index % SPRITE_COLS);
		let y = height * (index / SPRITE_COLS);
		imageops::replace(&mut canvas, &frame.to_rgb8(), i64::from(x), i64::from(y));
	}

	DynamicImage::ImageRgb8(canvas)
}

/// `HH:MM:SS.mmm`
fn vtt_timestamp(seconds: f64) -> String {
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	let millis = (seconds.max(0.0) * 1000.0).round() as u64;

	format!(
		"{:02}:{:02}:{:02}.{:03}",
		millis / 3_600_000,
		millis / 60_000 % 60,
		millis / 1000 % 60,
		millis % 1000
	)
}

fn render_vtt(sprite_path: &Path, duration: f64, cell_width: u32, cell_height: u32) -> String {
	let sprite_name = sprite_path
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default();

	let step = duration / f64::from(SPRITE_CHUNKS);

	let mut vtt = String::from("WEBVTT\n\n");
	for index in 0..SPRITE_CHUNKS {
		let x = cell_width * (index % SPRITE_COLS);
		let y = cell_height * (index / SPRITE_COLS);
		let start = f64::from(index) * step;

		let _ = write!(
			vtt,
			"{} --> {}\n{sprite_name}#xywh={x},{y},{cell_width},{cell_height}\n\n",
			vtt_timestamp(start),
			vtt_timestamp(start + step),
		);
	}

	vtt
}

#[async_trait]
impl Task<GenerateError> for SpriteTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating sprites for {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		let paths = &self.generator.paths;

		self.generator.needs(&paths.sprite_image(&self.hash)).await
			|| self.generator.needs(&paths.sprite_vtt(&self.hash)).await
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		if self.file.video().map_or(true, |video| video.duration <= 0.0) {
			warn!("Video has no duration, skipping sprites;");
			return Err(GenerateError::UnsupportedFormat(self.file.path.clone()));
		}

		if self.use_slow_seek() {
			debug!("Very short video, sampling sprite frames by number");
		}

		if self
			.generator
			.needs(&self.generator.paths.sprite_image(&self.hash))
			.await && self.sprite_image(interrupter).await? == ExecStatus::Canceled
		{
			return Ok(ExecStatus::Canceled);
		}

		check_interruption!(interrupter);

		if self
			.generator
			.needs(&self.generator.paths.sprite_vtt(&self.hash))
			.await
		{
			self.sprite_vtt().await?;
		}

		Ok(ExecStatus::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn timestamps() {
		assert_eq!(vtt_timestamp(0.0), "00:00:00.000");
		assert_eq!(vtt_timestamp(3723.5), "01:02:03.500");
	}

	#[test]
	fn vtt_cells_follow_the_grid() {
		let vtt = render_vtt(Path::new("/gen/vtt/abc_sprite.jpg"), 81.0, 160, 90);

		let mut cues = vtt.strip_prefix("WEBVTT\n\n").unwrap().split("\n\n");

		assert_eq!(
			cues.next().unwrap(),
			"00:00:00.000 --> 00:00:01.000\nabc_sprite.jpg#xywh=0,0,160,90"
		);
		assert_eq!(
			cues.nth(9).unwrap(),
			"00:00:10.000 --> 00:00:11.000\nabc_sprite.jpg#xywh=160,90,160,90"
		);
	}

	#[test]
	fn montage_places_frames_row_by_row() {
		let frames = (0..SPRITE_CHUNKS)
			.map(|i| {
				#[allow(clippy::cast_possible_truncation)]
				let shade = i as u8;
				DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, image::Rgb([shade, 0, 0])))
			})
			.collect::<Vec<_>>();

		let canvas = montage(&frames).to_rgb8();

		assert_eq!(canvas.dimensions(), (36, 18));
		assert_eq!(canvas.get_pixel(4, 0).0[0], 1);
		assert_eq!(canvas.get_pixel(0, 2).0[0], 9);
		assert_eq!(canvas.get_pixel(35, 17).0[0], 80);
	}
}
