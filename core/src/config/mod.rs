//! Engine configuration, persisted as `mediakeep.json` in the data directory.
//!
//! Jobs never read it directly: they get a [`ScanConfig`] snapshot taken when they are submitted,
//! so editing the configuration never changes a running job.

use mk_core_heavy_lifting::{
	config::{Library, PreviewOptions, ScanConfig},
	model::HashAlgorithm,
};
use mk_core_job_system::JobManagerConfig;
use mk_utils::error::FileIOError;

use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

mod migration;

pub use migration::Migrate;

pub const CONFIG_FILE_NAME: &str = "mediakeep.json";

const CONFIG_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to parse config file '{}': {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
	#[error("failed to serialize config: {0}")]
	Serialize(#[source] serde_json::Error),
	#[error("unknown config version: {0}")]
	UnknownVersion(u32),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Files written before versioning have none and start from `0`
	#[serde(default)]
	pub version: u32,

	pub libraries: Vec<Library>,
	/// Relative paths are resolved against the data directory
	pub generated_path: PathBuf,

	pub video_extensions: Vec<String>,
	pub image_extensions: Vec<String>,
	pub gallery_extensions: Vec<String>,
	/// Regexes excluding video files
	pub excludes: Vec<String>,
	/// Regexes excluding image and archive files
	pub image_excludes: Vec<String>,

	/// Workers per task queue, `0` means one per CPU
	pub parallel_tasks: usize,
	pub sequential_scanning: bool,

	pub naming_algorithm: HashAlgorithm,
	pub calculate_md5: bool,
	pub create_galleries_from_folders: bool,
	pub create_image_clips_from_videos: bool,

	pub preview: PreviewOptions,
	pub max_transcode_size: Option<u32>,
	pub max_clip_preview_size: Option<u32>,
	pub draw_heatmap_range: bool,

	pub ffmpeg_path: PathBuf,
	pub ffprobe_path: PathBuf,

	pub jobs: JobManagerConfig,
}

impl Default for EngineConfig {
	fn default() -> Self {
		let scan = ScanConfig::default();

		Self {
			version: CONFIG_VERSION,
			libraries: scan.libraries,
			generated_path: scan.generated_path,
			video_extensions: scan.video_extensions,
			image_extensions: scan.image_extensions,
			gallery_extensions: scan.gallery_extensions,
			excludes: scan.excludes,
			image_excludes: scan.image_excludes,
			parallel_tasks: scan.parallel_tasks,
			sequential_scanning: scan.sequential_scanning,
			naming_algorithm: scan.naming_algorithm,
			calculate_md5: scan.calculate_md5,
			create_galleries_from_folders: scan.create_galleries_from_folders,
			create_image_clips_from_videos: scan.create_image_clips_from_videos,
			preview: scan.preview,
			max_transcode_size: scan.max_transcode_size,
			max_clip_preview_size: scan.max_clip_preview_size,
			draw_heatmap_range: scan.draw_heatmap_range,
			ffmpeg_path: PathBuf::from("ffmpeg"),
			ffprobe_path: PathBuf::from("ffprobe"),
			jobs: JobManagerConfig::default(),
		}
	}
}

impl EngineConfig {
	#[must_use]
	pub fn path(data_dir: impl AsRef<Path>) -> PathBuf {
		data_dir.as_ref().join(CONFIG_FILE_NAME)
	}

	/// Loads the configuration of `data_dir`, writing a default one when there is none yet.
	///
	/// Outdated files are migrated and saved back.
	#[instrument(skip_all, fields(data_dir = %data_dir.as_ref().display()), err)]
	pub async fn load(data_dir: impl AsRef<Path> + Send) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();
		let path = Self::path(data_dir);

		let bytes = match fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => {
				warn!(path = %path.display(), "No config found, creating default;");
				let config = Self::default();
				config.save(data_dir).await?;
				return Ok(config);
			}
			Err(e) => return Err(FileIOError::from((&path, e, "Failed to read config file")).into()),
		};

		let mut config = serde_json::from_slice::<Self>(&bytes)
			.map_err(|source| ConfigError::Parse { path, source })?;

		if config.current_version() != Self::target_version() {
			info!(
				from = config.version,
				to = Self::target_version(),
				"Migrating config;"
			);
			config.migrate()?;
			config.save(data_dir).await?;
		}

		Ok(config)
	}

	pub async fn save(&self, data_dir: impl AsRef<Path> + Send) -> Result<(), ConfigError> {
		let data_dir = data_dir.as_ref();

		fs::create_dir_all(data_dir)
			.await
			.map_err(|e| FileIOError::from((data_dir, e, "Failed to create data directory")))?;

		let path = Self::path(data_dir);
		let json = serde_json::to_vec_pretty(self).map_err(ConfigError::Serialize)?;

		fs::write(&path, json)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to write config file")))?;

		info!(path = %path.display(), "Saved config;");

		Ok(())
	}

	/// Where generated artifacts go for a data directory
	#[must_use]
	pub fn generated_dir(&self, data_dir: impl AsRef<Path>) -> PathBuf {
		if self.generated_path.is_absolute() {
			self.generated_path.clone()
		} else {
			data_dir.as_ref().join(&self.generated_path)
		}
	}

	/// Read-only snapshot handed to jobs
	#[must_use]
	pub fn scan_config(&self, data_dir: impl AsRef<Path>) -> ScanConfig {
		ScanConfig {
			libraries: self.libraries.clone(),
			video_extensions: self.video_extensions.clone(),
			image_extensions: self.image_extensions.clone(),
			gallery_extensions: self.gallery_extensions.clone(),
			excludes: self.excludes.clone(),
			image_excludes: self.image_excludes.clone(),
			generated_path: self.generated_dir(data_dir),
			parallel_tasks: self.parallel_tasks,
			naming_algorithm: self.naming_algorithm,
			calculate_md5: self.calculate_md5,
			create_galleries_from_folders: self.create_galleries_from_folders,
			create_image_clips_from_videos: self.create_image_clips_from_videos,
			sequential_scanning: self.sequential_scanning,
			preview: self.preview.clone(),
			max_transcode_size: self.max_transcode_size,
			max_clip_preview_size: self.max_clip_preview_size,
			draw_heatmap_range: self.draw_heatmap_range,
		}
	}
}

impl Migrate for EngineConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		CONFIG_VERSION
	}

	fn migrate(&mut self) -> Result<(), ConfigError> {
		match self.version {
			0 => {
				self.version = 1;
				self.migrate()
			}
			1 => {
				// Artifacts used to be named after the md5 only, keep finding them
				self.naming_algorithm = HashAlgorithm::Md5;
				self.calculate_md5 = true;
				self.version = 2;
				Ok(())
			}
			CONFIG_VERSION => Ok(()),
			v => Err(ConfigError::UnknownVersion(v)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn missing_config_is_created() {
		let dir = tempfile::tempdir().unwrap();

		let config = EngineConfig::load(dir.path()).await.unwrap();

		assert_eq!(config, EngineConfig::default());
		assert!(EngineConfig::path(dir.path()).exists());
	}

	#[tokio::test]
	async fn saved_config_is_loaded_back() {
		let dir = tempfile::tempdir().unwrap();

		let config = EngineConfig {
			libraries: vec![Library::new("/media/videos")],
			parallel_tasks: 4,
			excludes: vec!["/trash/".to_string()],
			..Default::default()
		};
		config.save(dir.path()).await.unwrap();

		assert_eq!(EngineConfig::load(dir.path()).await.unwrap(), config);
	}

	#[tokio::test]
	async fn unversioned_config_is_migrated_to_md5_naming() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(
			EngineConfig::path(dir.path()),
			r#"{ "libraries": [{ "path": "/media/videos" }], "parallel_tasks": 2 }"#,
		)
		.unwrap();

		let config = EngineConfig::load(dir.path()).await.unwrap();

		assert_eq!(config.version, CONFIG_VERSION);
		assert_eq!(config.naming_algorithm, HashAlgorithm::Md5);
		assert!(config.calculate_md5);
		assert_eq!(config.parallel_tasks, 2);
		assert_eq!(config.libraries, vec![Library::new("/media/videos")]);

		let saved = std::fs::read_to_string(EngineConfig::path(dir.path())).unwrap();
		assert!(saved.contains(r#""naming_algorithm": "md5""#));
	}

	#[tokio::test]
	async fn future_versions_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(EngineConfig::path(dir.path()), r#"{ "version": 99 }"#).unwrap();

		assert!(matches!(
			EngineConfig::load(dir.path()).await,
			Err(ConfigError::UnknownVersion(99))
		));
	}

	#[test]
	fn generated_path_is_resolved_against_the_data_dir() {
		let config = EngineConfig::default();
		assert_eq!(
			config.scan_config("/data").generated_path,
			PathBuf::from("/data/generated")
		);

		let config = EngineConfig {
			generated_path: PathBuf::from("/elsewhere"),
			..Default::default()
		};
		assert_eq!(
			config.scan_config("/data").generated_path,
			PathBuf::from("/elsewhere")
		);
	}
}
