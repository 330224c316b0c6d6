//! Argument lists for the encoder, the output path is appended by the [`Encoder`](super::Encoder)

use std::{
	fmt,
	path::{Path, PathBuf},
};

/// Command line of one encoder invocation, without its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
	input: PathBuf,
	args: Vec<String>,
}

impl fmt::Display for Args {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.args.join(" "))
	}
}

impl Args {
	fn new(input: &Path) -> Self {
		Self {
			input: input.to_path_buf(),
			args: vec!["-v".to_string(), "error".to_string(), "-y".to_string()],
		}
	}

	#[must_use]
	pub fn input(&self) -> &Path {
		&self.input
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
		self.args.iter().map(String::as_str)
	}

	#[must_use]
	pub fn contains(&self, arg: &str) -> bool {
		self.args.iter().any(|a| a == arg)
	}

	fn arg(mut self, arg: impl ToString) -> Self {
		self.args.push(arg.to_string());
		self
	}

	fn pair(self, flag: &str, value: impl ToString) -> Self {
		self.arg(flag).arg(value)
	}

	fn seek(self, at: f64) -> Self {
		self.pair("-ss", format!("{at:.3}"))
	}

	fn with_input(self) -> Self {
		let input = self.input.to_string_lossy().into_owned();
		self.pair("-i", input)
	}

	/// Single JPEG frame at `at` seconds; `width` keeps the aspect ratio, `None` keeps the size
	#[must_use]
	pub fn screenshot(input: &Path, at: f64, width: Option<u32>, quality: u32) -> Self {
		let mut args = Self::new(input)
			.seek(at)
			.with_input()
			.pair("-frames:v", 1)
			.pair("-q:v", quality);

		if let Some(width) = width {
			args = args.pair("-vf", format!("scale={width}:-2"));
		}

		args.pair("-f", "image2")
	}

	/// Same as [`screenshot`](Self::screenshot) written to standard output
	#[must_use]
	pub fn screenshot_to_pipe(input: &Path, at: f64, width: Option<u32>) -> Self {
		let mut args = Self::new(input).seek(at).with_input().pair("-frames:v", 1);

		if let Some(width) = width {
			args = args.pair("-vf", format!("scale={width}:-2"));
		}

		args.pair("-c:v", "mjpeg").pair("-f", "image2pipe")
	}

	/// One frame found by decoding instead of seeking, accurate on short or broken videos
	#[must_use]
	pub fn frame_by_number(input: &Path, frame: u64, width: u32) -> Self {
		Self::new(input)
			.with_input()
			.pair("-vf", format!("select=eq(n\\,{frame}),scale={width}:-2"))
			.pair("-frames:v", 1)
			.pair("-q:v", 2)
			.pair("-f", "image2")
	}

	/// Short x264 chunk of the preview
	///
	/// The fallback decodes up to `at` instead of seeking the input, slower but it copes with
	/// broken indexes and timestamps.
	#[must_use]
	pub fn preview_segment(
		input: &Path,
		at: f64,
		duration: f64,
		preset: &str,
		fallback: bool,
	) -> Self {
		let args = if fallback {
			Self::new(input).with_input().seek(at)
		} else {
			Self::new(input).seek(at).with_input()
		};

		args.pair("-t", format!("{duration:.3}"))
			.pair("-max_muxing_queue_size", 1024)
			.pair("-c:v", "libx264")
			.pair("-pix_fmt", "yuv420p")
			.pair("-profile:v", "high")
			.pair("-level", "4.2")
			.pair("-preset", preset)
			.pair("-crf", 21)
			.pair("-threads", 4)
			.pair("-vf", "scale=640:-2")
			.pair("-c:a", "aac")
			.pair("-b:a", "128k")
			.pair("-strict", "-2")
			.pair("-f", "mp4")
	}

	/// Joins the segments listed in `list_file` (ffmpeg concat demuxer format)
	#[must_use]
	pub fn concat(list_file: &Path) -> Self {
		Self::new(list_file)
			.pair("-f", "concat")
			.pair("-safe", 0)
			.with_input()
			.pair("-c", "copy")
			.pair("-f", "mp4")
	}

	/// Animated webp made from the video preview
	#[must_use]
	pub fn webp_preview(input: &Path) -> Self {
		Self::new(input)
			.with_input()
			.pair("-c:v", "libwebp")
			.pair("-lossless", 1)
			.pair("-q:v", 70)
			.pair("-compression_level", 6)
			.pair("-preset", "default")
			.pair("-loop", 0)
			.pair("-threads", 4)
			.pair("-vf", "scale=640:-2,fps=12")
			.arg("-an")
			.pair("-f", "webp")
	}

	/// Full transcode to h264, capped to `max_height`
	#[must_use]
	pub fn transcode(input: &Path, max_height: Option<u32>) -> Self {
		let mut args = Self::new(input)
			.with_input()
			.pair("-c:v", "libx264")
			.pair("-pix_fmt", "yuv420p")
			.pair("-profile:v", "high")
			.pair("-level", "4.2")
			.pair("-preset", "superfast")
			.pair("-crf", 23);

		if let Some(height) = max_height {
			args = args.pair("-vf", format!("scale=-2:'min({height},ih)'"));
		}

		args.pair("-c:a", "aac").pair("-strict", "-2").pair("-f", "mp4")
	}

	/// Silent VP9 loop of the first `duration` seconds, scaled to fit `max_size`
	#[must_use]
	pub fn clip_preview(input: &Path, duration: f64, max_size: u32) -> Self {
		Self::new(input)
			.with_input()
			.pair("-t", format!("{duration:.3}"))
			.pair(
				"-vf",
				format!(
					"scale='if(gt(iw,ih),min({max_size},iw),-2)':'if(gt(iw,ih),-2,min({max_size},ih))'"
				),
			)
			.pair("-c:v", "libvpx-vp9")
			.pair("-b:v", "2M")
			.pair("-crf", 30)
			.pair("-deadline", "realtime")
			.arg("-an")
			.pair("-f", "webm")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn screenshot_seeks_before_input() {
		let args = Args::screenshot(Path::new("/media/a.mp4"), 12.5, Some(160), 2);
		let rendered = args.to_string();

		assert!(rendered.starts_with("-v error -y -ss 12.500 -i /media/a.mp4"));
		assert!(rendered.ends_with("-vf scale=160:-2 -f image2"));
		assert_eq!(args.input(), Path::new("/media/a.mp4"));
	}

	#[test]
	fn preview_fallback_seeks_after_input() {
		let input = Path::new("/media/a.mp4");

		let fast: Vec<_> = Args::preview_segment(input, 30.0, 0.75, "slow", false)
			.iter()
			.map(str::to_string)
			.collect();
		let fallback: Vec<_> = Args::preview_segment(input, 30.0, 0.75, "slow", true)
			.iter()
			.map(str::to_string)
			.collect();

		let position = |args: &[String], flag: &str| args.iter().position(|a| a == flag).unwrap();

		assert!(position(&fast, "-ss") < position(&fast, "-i"));
		assert!(position(&fallback, "-i") < position(&fallback, "-ss"));
		assert_eq!(fast.len(), fallback.len());
	}
}
