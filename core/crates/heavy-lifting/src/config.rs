use super::model::HashAlgorithm;

use mk_utils::find_containing_dir;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured root directory of media files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
	pub path: PathBuf,
	#[serde(default)]
	pub exclude_video: bool,
	#[serde(default)]
	pub exclude_image: bool,
}

impl AsRef<Path> for Library {
	fn as_ref(&self) -> &Path {
		&self.path
	}
}

impl Library {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			exclude_video: false,
			exclude_image: false,
		}
	}
}

/// Which artifacts to produce for the scenes and images a job touches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
	pub covers: bool,
	pub previews: bool,
	/// Animated webp next to the video preview, only with `previews`
	pub image_previews: bool,
	pub sprites: bool,
	pub phashes: bool,
	pub interactive_heatmaps: bool,
	pub clip_previews: bool,
	pub thumbnails: bool,
	pub transcodes: bool,
}

impl GenerateOptions {
	#[must_use]
	pub const fn any(&self) -> bool {
		self.covers
			|| self.previews
			|| self.sprites
			|| self.phashes
			|| self.interactive_heatmaps
			|| self.clip_previews
			|| self.thumbnails
			|| self.transcodes
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewOptions {
	pub segments: u32,
	/// Seconds per segment
	pub segment_duration: f64,
	/// Percent of the video skipped at the start
	pub exclude_start: f64,
	/// Percent of the video skipped at the end
	pub exclude_end: f64,
	/// x264 preset
	pub preset: String,
}

impl Default for PreviewOptions {
	fn default() -> Self {
		Self {
			segments: 12,
			segment_duration: 0.75,
			exclude_start: 0.0,
			exclude_end: 0.0,
			preset: "slow".to_string(),
		}
	}
}

/// Read-only view of the engine configuration taken when a job starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
	pub libraries: Vec<Library>,
	pub video_extensions: Vec<String>,
	pub image_extensions: Vec<String>,
	pub gallery_extensions: Vec<String>,
	/// Regexes excluding video files
	pub excludes: Vec<String>,
	/// Regexes excluding image and archive files
	pub image_excludes: Vec<String>,
	pub generated_path: PathBuf,
	/// Workers per task queue, `0` means one per CPU
	pub parallel_tasks: usize,
	pub naming_algorithm: HashAlgorithm,
	pub calculate_md5: bool,
	pub create_galleries_from_folders: bool,
	/// Video files in libraries excluding video are imported as images instead
	pub create_image_clips_from_videos: bool,
	pub sequential_scanning: bool,
	pub preview: PreviewOptions,
	/// Transcodes are capped to this height
	pub max_transcode_size: Option<u32>,
	pub max_clip_preview_size: Option<u32>,
	pub draw_heatmap_range: bool,
}

impl Default for ScanConfig {
	fn default() -> Self {
		Self {
			libraries: Vec::new(),
			video_extensions: [
				"m4v", "mp4", "mov", "wmv", "avi", "mpg", "mpeg", "rmvb", "rm", "flv", "asf",
				"mkv", "webm", "f4v",
			]
			.into_iter()
			.map(String::from)
			.collect(),
			image_extensions: ["png", "jpg", "jpeg", "gif", "webp", "avif"]
				.into_iter()
				.map(String::from)
				.collect(),
			gallery_extensions: vec!["zip".to_string(), "cbz".to_string()],
			excludes: Vec::new(),
			image_excludes: Vec::new(),
			generated_path: PathBuf::from("generated"),
			parallel_tasks: 1,
			naming_algorithm: HashAlgorithm::Oshash,
			calculate_md5: false,
			create_galleries_from_folders: false,
			create_image_clips_from_videos: false,
			sequential_scanning: false,
			preview: PreviewOptions::default(),
			max_transcode_size: None,
			max_clip_preview_size: None,
			draw_heatmap_range: false,
		}
	}
}

/// How a path is going to be imported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
	Video,
	Image,
	/// Archive of images imported as a gallery
	Gallery,
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
	mk_utils::lowercase_extension(path)
		.is_some_and(|ext| extensions.iter().any(|candidate| candidate.eq_ignore_ascii_case(&ext)))
}

impl ScanConfig {
	/// Library owning `path`
	#[must_use]
	pub fn library_for(&self, path: impl AsRef<Path>) -> Option<&Library> {
		find_containing_dir(&self.libraries, path)
	}

	#[must_use]
	pub fn is_video(&self, path: impl AsRef<Path>) -> bool {
		matches_extension(path.as_ref(), &self.video_extensions)
	}

	#[must_use]
	pub fn is_image(&self, path: impl AsRef<Path>) -> bool {
		matches_extension(path.as_ref(), &self.image_extensions)
	}

	#[must_use]
	pub fn is_gallery_archive(&self, path: impl AsRef<Path>) -> bool {
		matches_extension(path.as_ref(), &self.gallery_extensions)
	}

	/// Video files of a library excluding videos become image clips when enabled
	fn video_as_image_clip(&self, path: &Path) -> bool {
		self.create_image_clips_from_videos
			&& self.library_for(path).is_some_and(|lib| lib.exclude_video)
	}

	/// Classifies `path` by its extension, `None` for files the engine doesn't import
	#[must_use]
	pub fn media_kind(&self, path: impl AsRef<Path>) -> Option<MediaKind> {
		let path = path.as_ref();

		if self.is_video(path) {
			if self.video_as_image_clip(path) {
				Some(MediaKind::Image)
			} else {
				Some(MediaKind::Video)
			}
		} else if self.is_image(path) {
			Some(MediaKind::Image)
		} else if self.is_gallery_archive(path) {
			Some(MediaKind::Gallery)
		} else {
			None
		}
	}
}

/// Input of a scan job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanInput {
	/// Library sub-paths to scan, empty means every library
	pub paths: Vec<PathBuf>,
	/// Artifacts generated for new or changed files
	pub generate: GenerateOptions,
	/// Files untouched since then are ignored
	pub min_mod_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn media_kind_follows_extensions_and_libraries() {
		let config = ScanConfig {
			libraries: vec![
				Library::new("/media/videos"),
				Library {
					path: PathBuf::from("/media/clips"),
					exclude_video: true,
					exclude_image: false,
				},
			],
			create_image_clips_from_videos: true,
			..Default::default()
		};

		assert_eq!(config.media_kind("/media/videos/a.MP4"), Some(MediaKind::Video));
		assert_eq!(config.media_kind("/media/clips/a.mp4"), Some(MediaKind::Image));
		assert_eq!(config.media_kind("/media/videos/a.jpg"), Some(MediaKind::Image));
		assert_eq!(config.media_kind("/media/videos/a.cbz"), Some(MediaKind::Gallery));
		assert_eq!(config.media_kind("/media/videos/a.txt"), None);
	}
}
