use std::path::{Path, PathBuf};

use mk_utils::error::FileIOError;

use tokio::fs;
use uuid::Uuid;

// Directory names inside the generated path
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const VTT_DIR: &str = "vtt";
pub const TRANSCODES_DIR: &str = "transcodes";
pub const HEATMAPS_DIR: &str = "interactive_heatmaps";
pub const THUMBNAILS_DIR: &str = "thumbnails";
pub const TMP_DIR: &str = "tmp";

/// Width of image thumbnails, images already smaller than this are served as is
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 640;

/// Where every generated artifact lives.
///
/// Video artifacts are named after the file hash selected by the naming algorithm, image
/// artifacts after the image `md5` sharded in two levels of two hex characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPaths {
	root: PathBuf,
}

impl GeneratedPaths {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Creates every artifact directory
	pub async fn ensure_dirs(&self) -> Result<(), FileIOError> {
		for dir in [
			SCREENSHOTS_DIR,
			VTT_DIR,
			TRANSCODES_DIR,
			HEATMAPS_DIR,
			THUMBNAILS_DIR,
			TMP_DIR,
		] {
			let path = self.root.join(dir);
			fs::create_dir_all(&path)
				.await
				.map_err(|e| FileIOError::from((&path, e, "Failed to create generated directory")))?;
		}

		Ok(())
	}

	#[must_use]
	pub fn cover(&self, hash: &str) -> PathBuf {
		self.root.join(SCREENSHOTS_DIR).join(format!("{hash}.jpg"))
	}

	#[must_use]
	pub fn video_preview(&self, hash: &str) -> PathBuf {
		self.root.join(SCREENSHOTS_DIR).join(format!("{hash}.mp4"))
	}

	#[must_use]
	pub fn webp_preview(&self, hash: &str) -> PathBuf {
		self.root.join(SCREENSHOTS_DIR).join(format!("{hash}.webp"))
	}

	#[must_use]
	pub fn sprite_image(&self, hash: &str) -> PathBuf {
		self.root.join(VTT_DIR).join(format!("{hash}_sprite.jpg"))
	}

	#[must_use]
	pub fn sprite_vtt(&self, hash: &str) -> PathBuf {
		self.root.join(VTT_DIR).join(format!("{hash}_thumbs.vtt"))
	}

	#[must_use]
	pub fn transcode(&self, hash: &str) -> PathBuf {
		self.root.join(TRANSCODES_DIR).join(format!("{hash}.mp4"))
	}

	#[must_use]
	pub fn interactive_heatmap(&self, hash: &str) -> PathBuf {
		self.root.join(HEATMAPS_DIR).join(format!("{hash}.png"))
	}

	fn sharded_thumbnail_dir(&self, checksum: &str) -> PathBuf {
		let mut dir = self.root.join(THUMBNAILS_DIR);
		if checksum.len() >= 4 && checksum.is_char_boundary(2) && checksum.is_char_boundary(4) {
			dir = dir.join(&checksum[0..2]).join(&checksum[2..4]);
		}
		dir
	}

	#[must_use]
	pub fn image_thumbnail(&self, checksum: &str, width: u32) -> PathBuf {
		self.sharded_thumbnail_dir(checksum)
			.join(format!("{checksum}_{width}.jpg"))
	}

	#[must_use]
	pub fn clip_preview(&self, checksum: &str, width: u32) -> PathBuf {
		self.sharded_thumbnail_dir(checksum)
			.join(format!("{checksum}_{width}.webm"))
	}

	/// Unique scratch file, `extension` without the dot
	#[must_use]
	pub fn tmp_file(&self, extension: &str) -> PathBuf {
		self.root
			.join(TMP_DIR)
			.join(format!("{}.{extension}", Uuid::new_v4()))
	}

	/// Every artifact of a video named after `hash`
	#[must_use]
	pub fn video_artifacts(&self, hash: &str) -> [PathBuf; 7] {
		[
			self.cover(hash),
			self.video_preview(hash),
			self.webp_preview(hash),
			self.sprite_image(hash),
			self.sprite_vtt(hash),
			self.transcode(hash),
			self.interactive_heatmap(hash),
		]
	}

	/// Transcode when there's one, the source file otherwise
	pub async fn stream_path(&self, source: &Path, hash: &str) -> PathBuf {
		let transcode = self.transcode(hash);
		if fs::try_exists(&transcode).await.unwrap_or(false) {
			transcode
		} else {
			source.to_path_buf()
		}
	}

	/// Generated artifacts must never be scanned as library media
	#[must_use]
	pub fn contains(&self, path: impl AsRef<Path>) -> bool {
		path.as_ref().starts_with(&self.root)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn artifact_names() {
		let paths = GeneratedPaths::new("/gen");

		assert_eq!(paths.cover("abc"), PathBuf::from("/gen/screenshots/abc.jpg"));
		assert_eq!(
			paths.sprite_vtt("abc"),
			PathBuf::from("/gen/vtt/abc_thumbs.vtt")
		);
		assert_eq!(
			paths.image_thumbnail("0123456789", DEFAULT_THUMBNAIL_WIDTH),
			PathBuf::from("/gen/thumbnails/01/23/0123456789_640.jpg")
		);
		assert!(paths.contains("/gen/tmp/x.jpg"));
		assert!(!paths.contains("/generated/x.jpg"));
	}
}
