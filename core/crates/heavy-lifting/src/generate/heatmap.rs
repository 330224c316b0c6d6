use crate::{
	model::{File, SceneId},
	repository::RepositoryError,
};

use mk_task_system::{check_interruption, ExecStatus, Interrupter, Task, TaskId};
use mk_utils::error::FileIOError;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use tokio::{fs, task::spawn_blocking};
use tracing::{debug, instrument, warn};

use super::{
	file_exists,
	funscript::{funscript_path, median_speed, Funscript, Stroke},
	GenerateError, Generator,
};

const SEGMENTS: usize = 600;
const WIDTH: u32 = 1280;
const HEIGHT: u32 = 60;

/// Positions averaged to draw the stroke range
const RANGE_WINDOW: usize = 15;
/// Empty segments repeat the previous one when it is closer than this, in milliseconds
const BACKFILL_THRESHOLD_MS: i64 = 500;
const TICK_MS: i64 = 10 * 60 * 1000;

/// Intensity covered by each color band
const BAND: f64 = 60.0;

const BACKGROUND: [u8; 3] = [0x30, 0x40, 0x4d];
const BLUE: [u8; 3] = [0x1e, 0x90, 0xff];
const GREEN: [u8; 3] = [0x22, 0x8b, 0x22];
const GOLD: [u8; 3] = [0xff, 0xd7, 0x00];
const CRIMSON: [u8; 3] = [0xdc, 0x14, 0x3c];
const PURPLE: [u8; 3] = [0x80, 0x00, 0x80];
const NEAR_BLACK: [u8; 3] = [0x0f, 0x00, 0x1e];

#[derive(Debug, Clone, Copy, Default)]
struct Segment {
	count: u32,
	intensity: i64,
	/// Average of the top and bottom halves of the recent positions, in percent
	range: (f64, f64),
	at: i64,
}

#[derive(Debug, Clone, Copy)]
struct Stop {
	color: [u8; 3],
	range: (f64, f64),
}

fn blend(from: [u8; 3], to: [u8; 3], t: f64) -> [u8; 3] {
	let t = t.clamp(0.0, 1.0);
	let mut out = [0; 3];
	for ((out, from), to) in out.iter_mut().zip(from).zip(to) {
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		{
			*out = (f64::from(from) + (f64::from(to) - f64::from(from)) * t).round() as u8;
		}
	}
	out
}

fn segment_color(intensity: f64) -> [u8; 3] {
	match intensity {
		i if i <= 0.001 => BACKGROUND,
		i if i <= BAND => blend(BLUE, GREEN, i / BAND),
		i if i <= 2.0 * BAND => blend(GREEN, GOLD, (i - BAND) / BAND),
		i if i <= 3.0 * BAND => blend(GOLD, CRIMSON, (i - 2.0 * BAND) / BAND),
		i if i <= 4.0 * BAND => blend(CRIMSON, PURPLE, (i - 3.0 * BAND) / BAND),
		i => blend(PURPLE, NEAR_BLACK, (i - 4.0 * BAND) / (5.0 * BAND)),
	}
}

fn range_of(window: &[i32]) -> (f64, f64) {
	let mut sorted = window.to_vec();
	sorted.sort_unstable();

	let (bottom, top) = sorted.split_at(sorted.len() / 2);

	#[allow(clippy::cast_precision_loss)]
	let average = |half: &[i32]| {
		if half.is_empty() {
			0.0
		} else {
			half.iter().map(|&p| f64::from(p)).sum::<f64>() / half.len() as f64
		}
	};

	(average(top), average(bottom))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn gradient(strokes: &[Stroke], duration_ms: i64) -> Vec<Stop> {
	let mut segments = [Segment::default(); SEGMENTS];
	let mut window = Vec::with_capacity(RANGE_WINDOW + 1);

	for stroke in strokes {
		window.push(stroke.pos);
		if window.len() > RANGE_WINDOW {
			window.remove(0);
		}

		let index = ((stroke.at as f64 / (duration_ms + 1) as f64 * SEGMENTS as f64) as usize)
			.min(SEGMENTS - 1);

		let segment = &mut segments[index];
		segment.at = stroke.at;
		segment.count += 1;
		segment.intensity += stroke.intensity;
		segment.range = range_of(&window);
	}

	let mut last = segments[0];
	for (i, segment) in segments.iter_mut().enumerate() {
		let segment_ts = i as i64 * (duration_ms + 1) / SEGMENTS as i64;

		if segment.count == 0 {
			if last.count > 0 && segment_ts - last.at < BACKFILL_THRESHOLD_MS {
				*segment = Segment {
					at: segment.at,
					..last
				};
			}
		} else {
			last = *segment;
		}
	}

	segments
		.iter()
		.map(|segment| Stop {
			color: if segment.count > 0 {
				segment_color(segment.intensity as f64 / f64::from(segment.count))
			} else {
				segment_color(0.0)
			},
			range: segment.range,
		})
		.collect()
}

/// Color and stroke range at `t`, between 0 and 1
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample(stops: &[Stop], t: f64) -> ([u8; 3], (f64, f64)) {
	let last = stops.len() - 1;
	let position = t.clamp(0.0, 1.0) * last as f64;
	let index = (position.floor() as usize).min(last);

	if index == last {
		return (stops[last].color, stops[last].range);
	}

	let (from, to) = (stops[index], stops[index + 1]);
	(blend(from.color, to.color, position - index as f64), from.range)
}

/// Renders the heatmap of a script, `strokes` must not be empty
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn render(strokes: &[Stroke], duration_ms: i64, draw_range: bool) -> RgbImage {
	let stops = gradient(strokes, duration_ms);
	let mut img = RgbImage::new(WIDTH, HEIGHT);

	for x in 0..WIDTH {
		let (color, (top, bottom)) = sample(&stops, f64::from(x) / f64::from(WIDTH));

		let (y0, y1) = if draw_range {
			let to_px = |percent: f64| (percent / 100.0 * f64::from(HEIGHT)) as u32;
			(
				HEIGHT.saturating_sub(to_px(top)),
				HEIGHT.saturating_sub(to_px(bottom)),
			)
		} else {
			(0, HEIGHT)
		};

		for y in y0..y1.min(HEIGHT) {
			img.put_pixel(x, y, Rgb(color));
		}
	}

	let mut ts = TICK_MS;
	while ts < duration_ms {
		let x = (ts as f64 / duration_ms as f64 * f64::from(WIDTH)) as u32;
		for tick_x in x.saturating_sub(1)..(x + 1).min(WIDTH) {
			for y in HEIGHT / 2..HEIGHT {
				img.put_pixel(tick_x, y, Rgb([0, 0, 0]));
			}
		}
		ts += TICK_MS;
	}

	img
}

/// Speed heatmap of an interactive video's funscript, also stores the median stroke speed on
/// the scene
#[derive(Debug)]
pub struct HeatmapTask {
	id: TaskId,
	generator: Generator,
	scene_id: SceneId,
	interactive_speed: Option<u32>,
	file: File,
	hash: String,
}

impl HeatmapTask {
	#[must_use]
	pub fn new(
		generator: Generator,
		scene_id: SceneId,
		interactive_speed: Option<u32>,
		file: File,
		hash: String,
	) -> Self {
		Self {
			id: TaskId::new_v4(),
			generator,
			scene_id,
			interactive_speed,
			file,
			hash,
		}
	}

	async fn store_speed(&self, speed: u32) -> Result<(), GenerateError> {
		let mut tx = self.generator.repository.begin().await?;

		let mut scene = tx
			.find_scene(self.scene_id)
			.await?
			.ok_or(RepositoryError::NotFound {
				kind: "scene",
				id: self.scene_id,
			})?;

		scene.interactive_speed = Some(speed);
		tx.update_scene(&scene).await?;

		tx.commit().await?;

		Ok(())
	}
}

#[async_trait]
impl Task<GenerateError> for HeatmapTask {
	fn id(&self) -> TaskId {
		self.id
	}

	fn description(&self) -> String {
		format!(
			"Generating heatmap and interactive speed for {}",
			self.file.path.display()
		)
	}

	async fn required(&self) -> bool {
		if !self.file.video().is_some_and(|video| video.interactive) {
			return false;
		}

		self.generator.overwrite
			|| self.interactive_speed.is_none()
			|| !file_exists(&self.generator.paths.interactive_heatmap(&self.hash)).await
	}

	#[instrument(skip_all, fields(task_id = %self.id, path = %self.file.path.display()), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, GenerateError> {
		check_interruption!(interrupter);

		let script_path = funscript_path(&self.file.path);

		let raw = fs::read(&script_path)
			.await
			.map_err(|e| FileIOError::from((&script_path, e, "Failed to read funscript")))?;

		let mut script = Funscript::parse(&raw).map_err(|e| GenerateError::Funscript {
			path: script_path.clone(),
			reason: e.to_string(),
		})?;

		#[allow(clippy::cast_possible_truncation)]
		let duration_ms = (self.file.video().map_or(0.0, |video| video.duration) * 1000.0) as i64;

		let dropped = script.retain_within(duration_ms);
		if dropped > 0 {
			warn!(dropped, "Ignoring funscript actions outside of the video duration;");
		}

		if script.actions.is_empty() {
			return Err(GenerateError::Funscript {
				path: script_path,
				reason: "no valid actions".to_string(),
			});
		}

		let strokes = script.strokes();
		let speed = median_speed(&strokes);

		check_interruption!(interrupter);

		let draw_range = self.generator.draw_heatmap_range;
		let heatmap = spawn_blocking(move || render(&strokes, duration_ms, draw_range)).await?;

		self.generator
			.save_image(
				&self.generator.paths.interactive_heatmap(&self.hash),
				DynamicImage::ImageRgb8(heatmap),
			)
			.await?;

		debug!(speed, "Heatmap generated;");

		self.store_speed(speed).await?;

		Ok(ExecStatus::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::generate::funscript::Action;

	use pretty_assertions::assert_eq;

	fn strokes(actions: &[(i64, i32)]) -> Vec<Stroke> {
		Funscript {
			actions: actions
				.iter()
				.map(|&(at, pos)| Action { at, pos })
				.collect(),
			..Default::default()
		}
		.strokes()
	}

	#[test]
	fn colors_follow_intensity_bands() {
		assert_eq!(segment_color(0.0), BACKGROUND);
		assert_eq!(segment_color(BAND), GREEN);
		assert_eq!(segment_color(2.0 * BAND), GOLD);
		assert_eq!(segment_color(4.0 * BAND), PURPLE);
		assert_eq!(segment_color(1000.0), NEAR_BLACK);
	}

	#[test]
	fn quiet_stretches_keep_the_background() {
		// Active first second of a 20 minute video
		let strokes = strokes(&[(0, 0), (250, 100), (500, 0), (750, 100), (1000, 0)]);
		let img = render(&strokes, 20 * 60 * 1000, false);

		assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
		assert_ne!(img.get_pixel(0, 0).0, BACKGROUND);
		assert_eq!(img.get_pixel(WIDTH / 4, 0).0, BACKGROUND);

		// Tick at the 10 minute mark
		assert_eq!(img.get_pixel(WIDTH / 2, HEIGHT - 1).0, [0, 0, 0]);
		assert_eq!(img.get_pixel(WIDTH / 2, 0).0, BACKGROUND);
	}

	#[test]
	fn stroke_range_uses_the_recent_positions() {
		assert_eq!(range_of(&[10, 90, 20, 80]), (85.0, 15.0));
		assert_eq!(range_of(&[50]), (50.0, 0.0));
	}
}
