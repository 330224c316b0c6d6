//! Interactive device scripts stored next to their video as `<name>.funscript`

use mk_utils::sidecar_path;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const FUNSCRIPT_EXTENSION: &str = "funscript";

/// Sidecar script path of a video, its extension replaced by `.funscript`
#[must_use]
pub fn funscript_path(video: &Path) -> PathBuf {
	sidecar_path(video, FUNSCRIPT_EXTENSION)
}

/// A move at a specific time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
	/// Milliseconds since the start of the video
	pub at: i64,
	/// Position to move to, in percent
	pub pos: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Funscript {
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub inverted: bool,
	#[serde(default)]
	pub range: i32,
	pub actions: Vec<Action>,
}

/// Derived from an action and the one preceding it
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stroke {
	pub at: i64,
	pub pos: i32,
	pub intensity: i64,
	/// Position change per second
	pub speed: f64,
}

impl Funscript {
	/// Parses a script, actions end up sorted by time
	pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
		let mut script = serde_json::from_slice::<Self>(raw)?;
		script.actions.sort_by_key(|action| action.at);
		Ok(script)
	}

	/// Drops actions outside `[0, duration_ms)`, returns how many were dropped
	pub fn retain_within(&mut self, duration_ms: i64) -> usize {
		let before = self.actions.len();
		self.actions
			.retain(|action| (0..duration_ms).contains(&action.at));
		before - self.actions.len()
	}

	/// One stroke per action, the first one standing still
	#[must_use]
	pub fn strokes(&self) -> Vec<Stroke> {
		let mut strokes = Vec::with_capacity(self.actions.len());

		for (i, action) in self.actions.iter().enumerate() {
			let mut stroke = Stroke {
				at: action.at,
				pos: action.pos,
				..Default::default()
			};

			if let Some(previous) = i.checked_sub(1).map(|p| self.actions[p]) {
				#[allow(clippy::cast_precision_loss)]
				let dt = (action.at - previous.at) as f64;
				let dp = f64::from((action.pos - previous.pos).abs());

				// Actions sharing a timestamp would divide by zero
				if dt > 0.0 {
					let slope = (1.0 / (2.0 * dt / 1000.0)).clamp(0.0, 20.0);

					#[allow(clippy::cast_possible_truncation)]
					{
						stroke.intensity = (slope * dp) as i64;
					}
					stroke.speed = dp / dt * 1000.0;
				}
			}

			strokes.push(stroke);
		}

		strokes
	}
}

/// Median stroke speed, truncated like the speeds it is computed from
#[must_use]
pub fn median_speed(strokes: &[Stroke]) -> u32 {
	if strokes.is_empty() {
		return 0;
	}

	let mut speeds = strokes.iter().map(|stroke| stroke.speed).collect::<Vec<_>>();
	speeds.sort_by(f64::total_cmp);

	let middle = speeds.len() / 2;
	let median = if speeds.len() % 2 == 0 {
		(speeds[middle - 1] + speeds[middle]) / 2.0
	} else {
		speeds[middle]
	};

	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	{
		median.max(0.0) as u32
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn actions_are_sorted_on_parse() {
		let script = Funscript::parse(
			br#"{"version": "1.0", "actions": [{"at": 500, "pos": 90}, {"at": 0, "pos": 10}]}"#,
		)
		.unwrap();

		assert_eq!(
			script.actions,
			vec![Action { at: 0, pos: 10 }, Action { at: 500, pos: 90 }]
		);
	}

	#[test]
	fn stroke_speed_and_intensity() {
		let script = Funscript {
			actions: vec![
				Action { at: 0, pos: 0 },
				Action { at: 500, pos: 100 },
				Action { at: 1500, pos: 50 },
			],
			..Default::default()
		};

		let strokes = script.strokes();

		assert_eq!(strokes[0].speed, 0.0);
		// 100 positions in half a second
		assert_eq!(strokes[1].speed, 200.0);
		assert_eq!(strokes[1].intensity, 100);
		assert_eq!(strokes[2].speed, 50.0);
		assert_eq!(strokes[2].intensity, 25);

		assert_eq!(median_speed(&strokes), 50);
	}

	#[test]
	fn out_of_range_actions_are_dropped() {
		let mut script = Funscript {
			actions: vec![
				Action { at: -10, pos: 0 },
				Action { at: 0, pos: 0 },
				Action { at: 999, pos: 0 },
				Action { at: 1000, pos: 0 },
			],
			..Default::default()
		};

		assert_eq!(script.retain_within(1000), 2);
		assert_eq!(script.actions.len(), 2);
	}

	#[test]
	fn funscript_sits_next_to_the_video() {
		assert_eq!(
			funscript_path(Path::new("/media/a.b.mp4")),
			PathBuf::from("/media/a.b.funscript")
		);
	}
}
