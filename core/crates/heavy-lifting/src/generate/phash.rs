use crate::{
	encoder::Args,
	model::{File, Fingerprint},
	repository::RepositoryError,
};

use mk_phash::PerceptualHash;
use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};

use async_trait::async_trait;
use image::{imageops, DynamicImage, RgbImage};
use tokio::task::spawn_blocking;
use tracing::{debug, instrument};

use super::{GenerateError, Generator};

const FRAME_WIDTH: u32 = 160;
const GRID_SIZE: u32 = 5;
const FRAME_COUNT: u32 = GRID_SIZE * GRID_SIZE;

/// Perceptual hash of a video computed over a 5x5 grid of frames, stored as a file fingerprint
#[derive(Debug)]
pub struct PhashTask {
	id: TaskId,
	generator: Generator,
	file: File,
}

impl PhashTask {
	#[must_use]
	pub fn new(generator: Generator, file: File) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			file,
		}
	}

	async fn store(&self, phash: PerceptualHash) -> Result<(), GenerateError> {
		let mut tx = self.generator.repository.begin().await?;

		let mut file = tx
			.find_file(self.file.id)
			.await?
			.ok_or(RepositoryError::NotFound {
				kind: "file",
				id: self.file.id,
			})?;

		file.fingerprints.set(Fingerprint::Phash(phash));
		tx.update_file(&file).await?;

		tx.commit().await?;

		Ok(())
	}
}

/// Seek positions of the sampled frames, the first and last 5% of the video are skipped
fn frame_times(duration: f64) -> impl Iterator<Item = f64> {
	let offset = 0.05 * duration;
	let step = (0.9 * duration) / f64::from(FRAME_COUNT);

	(0..FRAME_COUNT).map(move |i| offset + f64::from(i) * step)
}

fn grid(frames: &[DynamicImage]) -> DynamicImage {
	let Some(first) = frames.first() else {
		return DynamicImage::new_rgb8(0, 0);
	};

	let (width, height) = (first.width(), first.height());
	let mut canvas = RgbImage::new(width * GRID_SIZE, height * GRID_SIZE);

	for (index, frame) in (0u32..).zip(frames) {
		imageops::replace(
			&mut canvas,
			&frame.to_rgb8(),
			i64::from(width * (index % GRID_SIZE)),
			i64::from(height * (index / GRID_SIZE)),
		);
	}

	DynamicImage::ImageRgb8(canvas)
}

#[async_trait]
impl Task<GenerateError> for PhashTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!("Generating phash for {}", self.file.path.display())
	}

	async fn required(&self) -> bool {
		self.generator.overwrite || self.file.fingerprints.phash().is_none()
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		let duration = self.file.video().map_or(0.0, |video| video.duration);
		if duration <= 0.0 {
			return Err(GenerateError::UnsupportedFormat(self.file.path.clone()));
		}

		let lease = self.generator.lease(&self.file.path, interrupter);

		let mut frames = Vec::with_capacity(FRAME_COUNT as usize);
		for at in frame_times(duration) {
			check_interruption!(interrupter);

			frames.push(
				self.generator
					.grab_frame(
						&lease,
						&Args::screenshot(&self.file.path, at, Some(FRAME_WIDTH), 2),
					)
					.await?,
			);
		}

		let phash = spawn_blocking(move || PerceptualHash::from_image(&grid(&frames))).await?;

		check_interruption!(interrupter);

		debug!(%phash, "Computed perceptual hash;");

		self.store(phash).await?;

		Ok(ExecStatus::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frames_skip_both_ends() {
		let times = frame_times(100.0).collect::<Vec<_>>();

		assert_eq!(times.len(), 25);
		assert!((times[0] - 5.0).abs() < f64::EPSILON);
		assert!((times[24] - (5.0 + 24.0 * 3.6)).abs() < 1e-9);
		assert!(times[24] < 95.0);
	}
}
