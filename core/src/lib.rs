//! The media library engine: owns the configuration, the job manager and the read locks, and
//! submits the library jobs with a configuration snapshot taken at submission time.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use mk_core_heavy_lifting::{
	config::{GenerateOptions, ScanConfig, ScanInput},
	duplicates::{find_scene_duplicates, DuplicatesError},
	jobs::{
		CleanJob, CleanOutput, GenerateJob, GenerateOutput, GenerateSelection, LibraryChange,
		MigrateHashJob, MigrateHashOutput, ScanJob, ScanNotifier, ScanOutput,
	},
	model::SceneId,
	repository::{Reader, Repository, RepositoryError},
	scanner::filter::PathFilter,
	Encoder, FfmpegEncoder, GeneratedPaths, Generator,
};
use mk_core_job_system::{Job, JobId, JobManager, JobSystemError, Subscription};
use mk_phash::Tolerance;
use mk_read_lock::{ByteRange, LeasedStream, ReadLockError, ReadLockManager};
use mk_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, instrument};

pub mod config;

pub use config::{ConfigError, EngineConfig};

#[derive(Error, Debug)]
pub enum Error {
	#[error("scene <id={0}> not found")]
	SceneNotFound(SceneId),
	#[error("scene <id={0}> has no file to stream")]
	NothingToStream(SceneId),

	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	JobSystem(#[from] JobSystemError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	Repository(#[from] RepositoryError),
	#[error(transparent)]
	Duplicates(#[from] DuplicatesError),
	#[error(transparent)]
	ReadLock(#[from] ReadLockError),
}

/// A generation run over stored scenes and images
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
	pub options: GenerateOptions,
	/// Every scene and image when not given
	pub selection: Option<GenerateSelection>,
	/// Regenerate artifacts that already exist
	pub overwrite: bool,
	/// Transcode even videos that could be streamed as they are
	pub force_transcodes: bool,
}

/// A submitted job along with the receiver of its output, which only resolves if the job body
/// ran to its end
pub type Submitted<T> = (JobId, oneshot::Receiver<T>);

pub struct Engine {
	data_dir: PathBuf,
	config: RwLock<EngineConfig>,
	repository: Arc<dyn Repository>,
	encoder: Arc<dyn Encoder>,
	locks: ReadLockManager,
	paths: RwLock<Arc<GeneratedPaths>>,
	jobs: JobManager,
	notifier: ScanNotifier,
}

impl Engine {
	/// Engine running the `ffmpeg` binaries named in the configuration of `data_dir`
	pub async fn new(
		data_dir: impl AsRef<Path> + Send,
		repository: Arc<dyn Repository>,
	) -> Result<Self, Error> {
		let config = EngineConfig::load(data_dir.as_ref()).await?;
		let encoder = Arc::new(FfmpegEncoder::new(
			config.ffmpeg_path.clone(),
			config.ffprobe_path.clone(),
		));

		Self::start(data_dir.as_ref().to_path_buf(), config, repository, encoder).await
	}

	pub async fn with_encoder(
		data_dir: impl AsRef<Path> + Send,
		repository: Arc<dyn Repository>,
		encoder: Arc<dyn Encoder>,
	) -> Result<Self, Error> {
		let config = EngineConfig::load(data_dir.as_ref()).await?;

		Self::start(data_dir.as_ref().to_path_buf(), config, repository, encoder).await
	}

	async fn start(
		data_dir: PathBuf,
		config: EngineConfig,
		repository: Arc<dyn Repository>,
		encoder: Arc<dyn Encoder>,
	) -> Result<Self, Error> {
		let paths = GeneratedPaths::new(config.generated_dir(&data_dir));
		paths.ensure_dirs().await?;

		info!(
			data_dir = %data_dir.display(),
			generated = %paths.root().display(),
			libraries = config.libraries.len(),
			"Starting engine;"
		);

		Ok(Self {
			jobs: JobManager::new(config.jobs),
			data_dir,
			config: RwLock::new(config),
			repository,
			encoder,
			locks: ReadLockManager::new(),
			paths: RwLock::new(Arc::new(paths)),
			notifier: ScanNotifier::new(),
		})
	}

	#[must_use]
	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	#[must_use]
	pub fn config(&self) -> EngineConfig {
		self.config.read().clone()
	}

	/// Edits and saves the configuration. Running jobs keep the snapshot they started with.
	pub async fn update_config(
		&self,
		update: impl FnOnce(&mut EngineConfig) + Send,
	) -> Result<(), Error> {
		let mut config = self.config();
		update(&mut config);
		config.save(&self.data_dir).await?;

		let generated = config.generated_dir(&self.data_dir);
		if generated != self.generated_paths().root() {
			let paths = GeneratedPaths::new(generated);
			paths.ensure_dirs().await?;
			info!(generated = %paths.root().display(), "Generated path changed;");
			*self.paths.write() = Arc::new(paths);
		}

		*self.config.write() = config;

		Ok(())
	}

	#[must_use]
	pub fn repository(&self) -> &Arc<dyn Repository> {
		&self.repository
	}

	#[must_use]
	pub const fn locks(&self) -> &ReadLockManager {
		&self.locks
	}

	#[must_use]
	pub const fn jobs(&self) -> &JobManager {
		&self.jobs
	}

	#[must_use]
	pub fn generated_paths(&self) -> Arc<GeneratedPaths> {
		Arc::clone(&self.paths.read())
	}

	fn scan_config(&self) -> ScanConfig {
		self.config.read().scan_config(&self.data_dir)
	}

	fn generator(&self, config: &ScanConfig) -> Generator {
		Generator::new(
			Arc::clone(&self.encoder),
			self.locks.clone(),
			self.generated_paths(),
			Arc::clone(&self.repository),
		)
		.with_preview_options(config.preview.clone())
		.with_limits(config.max_transcode_size, config.max_clip_preview_size)
		.with_heatmap_range(config.draw_heatmap_range)
	}

	/// Scans `input.paths`, or every library when empty, generating what `input.generate` asks
	/// for the files it creates or updates
	#[instrument(skip_all, fields(paths = input.paths.len()), err)]
	pub async fn scan(&self, input: ScanInput) -> Result<Submitted<ScanOutput>, Error> {
		let config = self.scan_config();
		let description = if input.paths.is_empty() {
			"Scanning library".to_string()
		} else {
			format!("Scanning {} paths", input.paths.len())
		};

		let (job, output_rx) = ScanJob::new(
			input,
			config.clone(),
			self.generator(&config),
			self.notifier.clone(),
		);

		let id = self.jobs.add(description, job).await?;
		debug!(job_id = id, "Scan submitted;");

		Ok((id, output_rx))
	}

	#[instrument(skip_all, fields(overwrite = request.overwrite), err)]
	pub async fn generate(&self, request: GenerateRequest) -> Result<Submitted<GenerateOutput>, Error> {
		let config = self.scan_config();
		let GenerateRequest {
			options,
			selection,
			overwrite,
			force_transcodes,
		} = request;

		let generator = self.generator(&config).with_overwrite(overwrite);
		let (job, output_rx) = GenerateJob::new(options, &config, generator);
		let mut job = job.with_forced_transcodes(force_transcodes);
		if let Some(selection) = selection {
			job = job.with_selection(selection);
		}

		let id = self.jobs.add("Generating artifacts", job).await?;

		Ok((id, output_rx))
	}

	/// Drops files that vanished or are now excluded, along with their generated artifacts
	#[instrument(skip(self), err)]
	pub async fn clean(&self, dry_run: bool) -> Result<Submitted<CleanOutput>, Error> {
		let config = self.scan_config();
		let generator = self.generator(&config);

		let (job, output_rx) = CleanJob::new(
			PathFilter::new(config, None),
			generator,
			dry_run,
			self.notifier.clone(),
		);

		let id = self.jobs.add("Cleaning library", job).await?;

		Ok((id, output_rx))
	}

	/// Renames artifacts to the configured naming algorithm
	#[instrument(skip(self), err)]
	pub async fn migrate_hash(&self) -> Result<Submitted<MigrateHashOutput>, Error> {
		let config = self.scan_config();

		let (job, output_rx) = MigrateHashJob::new(self.generator(&config), config.naming_algorithm);

		let id = self.jobs.add("Migrating artifact names", job).await?;

		Ok((id, output_rx))
	}

	/// Notified every time a scan or clean job completes
	#[must_use]
	pub fn scan_subscribe(&self) -> broadcast::Receiver<LibraryChange> {
		self.notifier.subscribe()
	}

	/// Ends every stream reading the files of a scene, before they get moved or deleted
	pub async fn kill_running_streams(&self, scene_id: SceneId) -> Result<usize, Error> {
		let config = self.scan_config();

		mk_core_heavy_lifting::streams::kill_running_streams(
			&self.generator(&config),
			config.naming_algorithm,
			scene_id,
		)
		.await
		.map_err(Into::into)
	}

	/// Streams a scene, from its transcode when there is one, until its streams get killed
	#[instrument(skip(self), err)]
	pub async fn open_scene_stream(
		&self,
		scene_id: SceneId,
		range: Option<ByteRange>,
	) -> Result<LeasedStream, Error> {
		let scene = self
			.repository
			.find_scene(scene_id)
			.await?
			.ok_or(Error::SceneNotFound(scene_id))?;

		let file = match scene.primary_file_id() {
			Some(file_id) => self.repository.find_file(file_id).await?,
			None => None,
		}
		.ok_or(Error::NothingToStream(scene_id))?;

		let naming = self.config.read().naming_algorithm;
		let path = match file.hash_for(naming) {
			Some(hash) => self.generated_paths().stream_path(&file.path, hash).await,
			None => file.path.clone(),
		};

		self.locks.open_stream(path, range).await.map_err(Into::into)
	}

	/// Groups of scenes whose perceptual hashes are at most `distance` bits apart, with durations
	/// at most `duration_diff` seconds apart (negative ignores durations)
	pub async fn find_duplicates(
		&self,
		distance: u32,
		duration_diff: f64,
	) -> Result<Vec<Vec<SceneId>>, Error> {
		find_scene_duplicates(
			&*self.repository,
			Tolerance {
				distance,
				duration_diff,
			},
		)
		.await
		.map_err(Into::into)
	}

	pub async fn cancel_job(&self, id: JobId) -> Result<(), Error> {
		self.jobs.cancel_job(id).await.map_err(Into::into)
	}

	pub async fn cancel_all(&self) -> Result<(), Error> {
		self.jobs.cancel_all().await.map_err(Into::into)
	}

	pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, Error> {
		self.jobs.get_job(id).await.map_err(Into::into)
	}

	pub async fn get_queue(&self) -> Result<Vec<Job>, Error> {
		self.jobs.get_queue().await.map_err(Into::into)
	}

	pub async fn subscribe(&self) -> Result<Subscription, Error> {
		self.jobs.subscribe().await.map_err(Into::into)
	}

	/// The job once it reached a terminal state, `None` if it's unknown or was already forgotten
	pub async fn wait_for(&self, id: JobId) -> Result<Option<Job>, Error> {
		self.jobs.wait_for(id).await.map_err(Into::into)
	}

	/// Cancels every running job and waits for them to wind down
	pub async fn shutdown(&self) {
		info!("Shutting down engine;");
		self.jobs.shutdown().await;
	}
}
