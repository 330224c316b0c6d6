use crate::model::VideoInfo;

use mk_read_lock::ReadLease;

use std::{
	path::{Path, PathBuf},
	process::{Output, Stdio},
};

use async_trait::async_trait;
use futures_concurrency::future::Race;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use super::{Args, Encoder, EncoderError};

const INVALID_INPUT_MARKER: &str = "Invalid data found when processing input";

/// [`Encoder`] running the `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
	ffmpeg: PathBuf,
	ffprobe: PathBuf,
}

impl Default for FfmpegEncoder {
	fn default() -> Self {
		Self::new("ffmpeg", "ffprobe")
	}
}

impl FfmpegEncoder {
	pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
		Self {
			ffmpeg: ffmpeg.into(),
			ffprobe: ffprobe.into(),
		}
	}

	async fn run(
		&self,
		lease: &ReadLease,
		args: &Args,
		output: Option<&Path>,
	) -> Result<Vec<u8>, EncoderError> {
		let mut cmd = Command::new(&self.ffmpeg);
		cmd.args(args.iter())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			// Dropping the child when the lease is cancelled kills the process
			.kill_on_drop(true);

		match output {
			Some(path) => cmd.arg(path),
			None => cmd.arg("-"),
		};

		trace!(%args, "Running ffmpeg");

		let child = cmd.spawn().map_err(|source| EncoderError::Spawn {
			binary: self.ffmpeg.clone(),
			source,
		})?;

		enum Outcome {
			Exited(std::io::Result<Output>),
			Cancelled,
		}

		let outcome = (
			async { Outcome::Exited(child.wait_with_output().await) },
			async {
				lease.cancelled().await;
				Outcome::Cancelled
			},
		)
			.race()
			.await;

		let output = match outcome {
			Outcome::Exited(res) => res.map_err(|source| EncoderError::Spawn {
				binary: self.ffmpeg.clone(),
				source,
			})?,
			Outcome::Cancelled => {
				debug!(path = %lease.path().display(), "Killed ffmpeg, read lease cancelled;");
				return Err(EncoderError::Killed(lease.path().to_path_buf()));
			}
		};

		if output.status.success() {
			return Ok(output.stdout);
		}

		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		if stderr.contains(INVALID_INPUT_MARKER) {
			return Err(EncoderError::UnsupportedFormat);
		}

		Err(EncoderError::Failed {
			status: output.status.to_string(),
			stderr,
		})
	}
}

#[async_trait]
impl Encoder for FfmpegEncoder {
	#[instrument(skip(self), fields(path = %path.display()), err)]
	async fn probe(&self, path: &Path) -> Result<VideoInfo, EncoderError> {
		let output = Command::new(&self.ffprobe)
			.args([
				"-v",
				"quiet",
				"-print_format",
				"json",
				"-show_format",
				"-show_streams",
				"-show_error",
			])
			.arg(path)
			.stdin(Stdio::null())
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|source| EncoderError::Spawn {
				binary: self.ffprobe.clone(),
				source,
			})?;

		if !output.status.success() {
			return Err(EncoderError::Failed {
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		parse_probe(path, &output.stdout)
	}

	async fn generate(
		&self,
		lease: &ReadLease,
		args: &Args,
		output: &Path,
	) -> Result<(), EncoderError> {
		self.run(lease, args, Some(output)).await.map(|_| ())
	}

	async fn generate_output(
		&self,
		lease: &ReadLease,
		args: &Args,
	) -> Result<Vec<u8>, EncoderError> {
		self.run(lease, args, None).await
	}
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
	#[serde(default)]
	streams: Vec<ProbeStream>,
	format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
	codec_type: Option<String>,
	codec_name: Option<String>,
	width: Option<u32>,
	height: Option<u32>,
	avg_frame_rate: Option<String>,
	r_frame_rate: Option<String>,
	nb_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
	format_name: Option<String>,
	duration: Option<String>,
	bit_rate: Option<String>,
}

/// `30000/1001` or `25`
fn parse_rate(rate: &str) -> Option<f64> {
	match rate.split_once('/') {
		Some((num, den)) => {
			let num = num.parse::<f64>().ok()?;
			let den = den.parse::<f64>().ok()?;
			(den != 0.0).then(|| num / den)
		}
		None => rate.parse().ok(),
	}
}

fn parse_probe(path: &Path, raw: &[u8]) -> Result<VideoInfo, EncoderError> {
	let probe = serde_json::from_slice::<ProbeOutput>(raw).map_err(|e| EncoderError::Probe {
		path: path.to_path_buf(),
		reason: e.to_string(),
	})?;

	let format = probe.format.ok_or_else(|| EncoderError::Probe {
		path: path.to_path_buf(),
		reason: "missing format section".to_string(),
	})?;

	let video = probe
		.streams
		.iter()
		.find(|stream| stream.codec_type.as_deref() == Some("video"));
	let audio = probe
		.streams
		.iter()
		.find(|stream| stream.codec_type.as_deref() == Some("audio"));

	let Some(video) = video else {
		return Err(EncoderError::UnsupportedFormat);
	};

	let duration = format
		.duration
		.as_deref()
		.and_then(|d| d.parse::<f64>().ok())
		.unwrap_or_default();

	let frame_rate = video
		.avg_frame_rate
		.as_deref()
		.and_then(parse_rate)
		.filter(|rate| *rate > 0.0)
		.or_else(|| video.r_frame_rate.as_deref().and_then(parse_rate))
		.unwrap_or_default();

	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	let frame_count = video
		.nb_frames
		.as_deref()
		.and_then(|n| n.parse::<u64>().ok())
		.unwrap_or_else(|| (duration * frame_rate).round() as u64);

	Ok(VideoInfo {
		// "mov,mp4,m4a,3gp,3g2,mj2" -> "mov"
		format: format
			.format_name
			.as_deref()
			.and_then(|name| name.split(',').next())
			.unwrap_or_default()
			.to_string(),
		duration,
		video_codec: video.codec_name.clone().unwrap_or_default(),
		audio_codec: audio
			.and_then(|stream| stream.codec_name.clone())
			.unwrap_or_default(),
		width: video.width.unwrap_or_default(),
		height: video.height.unwrap_or_default(),
		frame_rate,
		frame_count,
		bit_rate: format
			.bit_rate
			.as_deref()
			.and_then(|b| b.parse().ok())
			.unwrap_or_default(),
		interactive: false,
		captions: Vec::new(),
	})
}
