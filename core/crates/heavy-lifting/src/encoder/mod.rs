use crate::model::VideoInfo;

use mk_read_lock::ReadLease;
use mk_utils::error::FileIOError;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub mod args;
mod ffmpeg;

pub use args::Args;
pub use ffmpeg::FfmpegEncoder;

#[derive(Debug, Error)]
pub enum EncoderError {
	#[error("input format not supported")]
	UnsupportedFormat,
	#[error("encoder exited with <status='{status}'>: {stderr}")]
	Failed { status: String, stderr: String },
	#[error("encoder killed, read lease on '{}' was cancelled", .0.display())]
	Killed(PathBuf),
	#[error("failed to start '{}': {source}", .binary.display())]
	Spawn {
		binary: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse probe output of '{}': {reason}", .path.display())]
	Probe { path: PathBuf, reason: String },
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// External encoder process.
///
/// Every invocation is bound to the [`ReadLease`] held on its input: cancelling the lease kills
/// the process and the call returns [`EncoderError::Killed`].
#[async_trait]
pub trait Encoder: Send + Sync + 'static {
	/// Container and stream metadata of a video
	async fn probe(&self, path: &Path) -> Result<VideoInfo, EncoderError>;

	/// Runs the encoder writing its result to `output`
	async fn generate(
		&self,
		lease: &ReadLease,
		args: &Args,
		output: &Path,
	) -> Result<(), EncoderError>;

	/// Runs the encoder returning whatever it writes to its standard output
	async fn generate_output(&self, lease: &ReadLease, args: &Args)
		-> Result<Vec<u8>, EncoderError>;
}
