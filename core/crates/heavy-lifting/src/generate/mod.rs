use crate::{
	config::{GenerateOptions, PreviewOptions},
	encoder::{Args, Encoder, EncoderError},
	model::{File, FileId, HashAlgorithm, Scene},
	paths::GeneratedPaths,
	repository::{Repository, RepositoryError},
};

use mk_read_lock::{ReadLease, ReadLockManager};
use mk_task_system::{Interrupter, Task};
use mk_utils::error::FileIOError;

use std::{
	fmt,
	path::{Path, PathBuf},
	sync::Arc,
};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tokio::{fs, task::spawn_blocking};
use tracing::{trace, warn};

pub mod clip_preview;
pub mod cover;
pub mod funscript;
pub mod heatmap;
pub mod phash;
pub mod preview;
pub mod sprite;
pub mod thumbnail;
pub mod transcode;

pub use clip_preview::ClipPreviewTask;
pub use cover::CoverTask;
pub use heatmap::HeatmapTask;
pub use phash::PhashTask;
pub use preview::PreviewTask;
pub use sprite::SpriteTask;
pub use thumbnail::ThumbnailTask;
pub use transcode::TranscodeTask;

#[derive(Debug, Error)]
pub enum GenerateError {
	#[error("format not supported: {}", .0.display())]
	UnsupportedFormat(PathBuf),
	#[error("encoder produced an empty output for '{}'", .0.display())]
	EmptyOutput(PathBuf),
	#[error("file <id={0}> has no hash to name its artifacts")]
	MissingHash(FileId),
	#[error("failed to process image '{}': {source}", .path.display())]
	Image {
		path: PathBuf,
		#[source]
		source: image::ImageError,
	},
	#[error("invalid funscript '{}': {reason}", .path.display())]
	Funscript { path: PathBuf, reason: String },
	#[error("blocking task failed: {0}")]
	Blocking(#[from] tokio::task::JoinError),

	#[error(transparent)]
	Encoder(#[from] EncoderError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	Repository(#[from] RepositoryError),
}

/// Recorded on the job instead of aborting it
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NonCriticalGenerateError {
	#[error("failed to generate <task='{task}'>: {reason}")]
	Task { task: String, reason: String },
}

/// Kinds of generated artifacts, one task type each
#[derive(
	Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
	Cover,
	Preview,
	Sprite,
	Phash,
	Heatmap,
	Transcode,
	Thumbnail,
	ClipPreview,
}

pub type ArtifactTask = (Artifact, Box<dyn Task<GenerateError>>);

/// Shared state of every generation task: where outputs go, how inputs are read and encoded.
///
/// Outputs are always produced in a scratch file first and moved into place once complete, so a
/// cancelled or failed generation never leaves a partial artifact behind.
#[derive(Clone)]
pub struct Generator {
	pub(crate) encoder: Arc<dyn Encoder>,
	pub(crate) locks: ReadLockManager,
	pub(crate) paths: Arc<GeneratedPaths>,
	pub(crate) repository: Arc<dyn Repository>,
	pub(crate) preview: PreviewOptions,
	pub(crate) max_transcode_size: Option<u32>,
	pub(crate) max_clip_preview_size: Option<u32>,
	pub(crate) draw_heatmap_range: bool,
	pub(crate) overwrite: bool,
}

impl fmt::Debug for Generator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Generator")
			.field("paths", &self.paths)
			.field("overwrite", &self.overwrite)
			.finish_non_exhaustive()
	}
}

impl Generator {
	pub fn new(
		encoder: Arc<dyn Encoder>,
		locks: ReadLockManager,
		paths: Arc<GeneratedPaths>,
		repository: Arc<dyn Repository>,
	) -> Self {
		Self {
			encoder,
			locks,
			paths,
			repository,
			preview: PreviewOptions::default(),
			max_transcode_size: None,
			max_clip_preview_size: None,
			draw_heatmap_range: false,
			overwrite: false,
		}
	}

	#[must_use]
	pub fn with_preview_options(mut self, preview: PreviewOptions) -> Self {
		self.preview = preview;
		self
	}

	#[must_use]
	pub const fn with_limits(
		mut self,
		max_transcode_size: Option<u32>,
		max_clip_preview_size: Option<u32>,
	) -> Self {
		self.max_transcode_size = max_transcode_size;
		self.max_clip_preview_size = max_clip_preview_size;
		self
	}

	#[must_use]
	pub const fn with_heatmap_range(mut self, draw_heatmap_range: bool) -> Self {
		self.draw_heatmap_range = draw_heatmap_range;
		self
	}

	#[must_use]
	pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
		self.overwrite = overwrite;
		self
	}

	#[must_use]
	pub fn paths(&self) -> &GeneratedPaths {
		&self.paths
	}

	/// Tasks producing the artifacts of a scene selected by `options`, named after `hash`.
	///
	/// Transcodes are only forced when `force_transcode` is set, otherwise streamable videos are
	/// left alone by the task itself.
	#[must_use]
	pub fn scene_tasks(
		&self,
		options: &GenerateOptions,
		scene: &Scene,
		file: &File,
		hash: &str,
		force_transcode: bool,
	) -> Vec<ArtifactTask> {
		let mut tasks: Vec<ArtifactTask> = Vec::new();
		let hash = hash.to_string();

		if options.covers {
			tasks.push((
				Artifact::Cover,
				Box::new(CoverTask::new(self.clone(), file.clone(), hash.clone())),
			));
		}
		if options.previews {
			tasks.push((
				Artifact::Preview,
				Box::new(PreviewTask::new(
					self.clone(),
					file.clone(),
					hash.clone(),
					options.image_previews,
				)),
			));
		}
		if options.sprites {
			tasks.push((
				Artifact::Sprite,
				Box::new(SpriteTask::new(self.clone(), file.clone(), hash.clone())),
			));
		}
		if options.phashes {
			tasks.push((
				Artifact::Phash,
				Box::new(PhashTask::new(self.clone(), file.clone())),
			));
		}
		if options.interactive_heatmaps {
			tasks.push((
				Artifact::Heatmap,
				Box::new(HeatmapTask::new(
					self.clone(),
					scene.id,
					scene.interactive_speed,
					file.clone(),
					hash.clone(),
				)),
			));
		}
		if options.transcodes {
			tasks.push((
				Artifact::Transcode,
				Box::new(TranscodeTask::new(
					self.clone(),
					file.clone(),
					hash,
					force_transcode,
				)),
			));
		}

		tasks
	}

	/// Tasks producing the artifacts of an image file, named after its `md5`
	#[must_use]
	pub fn image_tasks(
		&self,
		options: &GenerateOptions,
		file: &File,
		checksum: &str,
	) -> Vec<ArtifactTask> {
		let mut tasks: Vec<ArtifactTask> = Vec::new();

		if options.thumbnails {
			tasks.push((
				Artifact::Thumbnail,
				Box::new(ThumbnailTask::new(
					self.clone(),
					file.clone(),
					checksum.to_string(),
				)),
			));
		}
		if options.clip_previews && file.video().is_some() {
			tasks.push((
				Artifact::ClipPreview,
				Box::new(ClipPreviewTask::new(
					self.clone(),
					file.clone(),
					checksum.to_string(),
				)),
			));
		}

		tasks
	}

	/// Read lease on a task input, cancelled along with the job
	pub(crate) fn lease(&self, path: &Path, interrupter: &Interrupter) -> ReadLease {
		self.locks
			.acquire_read_with_parent(path, interrupter.token())
	}

	/// Whether an artifact has to be produced, honoring `overwrite`
	pub(crate) async fn needs(&self, output: &Path) -> bool {
		self.overwrite || !file_exists(output).await
	}

	/// Runs the encoder into a scratch file then moves it to `output`
	pub(crate) async fn encode_file(
		&self,
		lease: &ReadLease,
		args: &Args,
		output: &Path,
	) -> Result<(), GenerateError> {
		let tmp = self.scratch_for(output);

		if let Err(e) = self.encoder.generate(lease, args, &tmp).await {
			remove_scratch(&tmp).await;
			return Err(encoder_error(e, lease));
		}

		self.move_into_place(&tmp, output).await
	}

	/// Runs the encoder and returns its output bytes, never empty
	pub(crate) async fn encode_bytes(
		&self,
		lease: &ReadLease,
		args: &Args,
	) -> Result<Vec<u8>, GenerateError> {
		let bytes = self
			.encoder
			.generate_output(lease, args)
			.await
			.map_err(|e| encoder_error(e, lease))?;

		if bytes.is_empty() {
			return Err(GenerateError::EmptyOutput(args.input().to_path_buf()));
		}

		Ok(bytes)
	}

	/// Decodes a single frame grabbed by the encoder
	pub(crate) async fn grab_frame(
		&self,
		lease: &ReadLease,
		args: &Args,
	) -> Result<DynamicImage, GenerateError> {
		let tmp = self.paths.tmp_file("jpg");

		if let Err(e) = self.encoder.generate(lease, args, &tmp).await {
			remove_scratch(&tmp).await;
			return Err(encoder_error(e, lease));
		}

		let frame = decode_image(tmp.clone()).await;
		remove_scratch(&tmp).await;

		frame
	}

	/// Writes `bytes` through a scratch file
	pub(crate) async fn write_file(&self, output: &Path, bytes: &[u8]) -> Result<(), GenerateError> {
		let tmp = self.scratch_for(output);

		fs::write(&tmp, bytes)
			.await
			.map_err(|e| FileIOError::from((&tmp, e, "Failed to write generated file")))?;

		self.move_into_place(&tmp, output).await
	}

	/// Encodes an image through a scratch file, the format follows the extension of `output`
	pub(crate) async fn save_image(
		&self,
		output: &Path,
		image: DynamicImage,
	) -> Result<(), GenerateError> {
		let tmp = self.scratch_for(output);

		let res = spawn_blocking({
			let tmp = tmp.clone();
			move || image.to_rgb8().save(&tmp).map_err(|source| (tmp, source))
		})
		.await?;

		if let Err((path, source)) = res {
			remove_scratch(&path).await;
			return Err(GenerateError::Image { path, source });
		}

		self.move_into_place(&tmp, output).await
	}

	fn scratch_for(&self, output: &Path) -> PathBuf {
		let extension = output
			.extension()
			.map_or_else(|| "tmp".to_string(), |ext| ext.to_string_lossy().into_owned());
		self.paths.tmp_file(&extension)
	}

	async fn move_into_place(&self, tmp: &Path, output: &Path) -> Result<(), GenerateError> {
		let metadata = fs::metadata(tmp)
			.await
			.map_err(|e| FileIOError::from((tmp, e, "Failed to read generated file metadata")))?;

		if metadata.len() == 0 {
			remove_scratch(tmp).await;
			return Err(GenerateError::EmptyOutput(output.to_path_buf()));
		}

		if let Some(parent) = output.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e, "Failed to create artifact directory")))?;
		}

		fs::rename(tmp, output)
			.await
			.map_err(|e| FileIOError::from((output, e, "Failed to move generated file into place")))?;

		trace!(output = %output.display(), "Generated file moved into place");

		Ok(())
	}
}

/// Artifacts of a video are named after this hash
pub fn artifact_hash(file: &File, algorithm: HashAlgorithm) -> Result<String, GenerateError> {
	file.hash_for(algorithm)
		.map(ToString::to_string)
		.ok_or(GenerateError::MissingHash(file.id))
}

pub(crate) async fn file_exists(path: &Path) -> bool {
	fs::try_exists(path).await.unwrap_or(false)
}

/// Inputs the encoder cannot read are skipped rather than reported
pub(crate) fn encoder_error(e: EncoderError, lease: &ReadLease) -> GenerateError {
	match e {
		EncoderError::UnsupportedFormat => {
			GenerateError::UnsupportedFormat(lease.path().to_path_buf())
		}
		e => e.into(),
	}
}

async fn remove_scratch(path: &Path) {
	if let Err(e) = fs::remove_file(path).await {
		if e.kind() != std::io::ErrorKind::NotFound {
			warn!(path = %path.display(), ?e, "Failed to remove scratch file;");
		}
	}
}

pub(crate) async fn decode_image(path: PathBuf) -> Result<DynamicImage, GenerateError> {
	spawn_blocking(move || image::open(&path).map_err(|source| GenerateError::Image { path, source }))
		.await?
}
