use crate::{
	config::ScanConfig,
	encoder::Encoder,
	generate::funscript::funscript_path,
	model::{ImageInfo, MediaInfo},
};

use mk_utils::lowercase_extension;

use std::path::Path;

use tokio::{fs, task::spawn_blocking};
use tracing::trace;

use super::ScanError;

/// Metadata probes, each one only applies to the files it recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decorator {
	/// Container, codecs and duration from the encoder, plus sidecar detection
	Video,
	/// Dimensions read from the image header
	Image,
	/// Archives carry no metadata of their own
	Gallery,
}

impl Decorator {
	/// Picked from the file contents rather than how it's imported, so video clips imported as
	/// images are still probed as videos
	#[must_use]
	pub fn for_path(path: &Path, config: &ScanConfig) -> Option<Self> {
		if config.is_video(path) {
			Some(Self::Video)
		} else if config.is_image(path) {
			Some(Self::Image)
		} else if config.is_gallery_archive(path) {
			Some(Self::Gallery)
		} else {
			None
		}
	}

	/// `previous` is the metadata stored before, captions survive re-probing
	pub async fn decorate(
		self,
		encoder: &dyn Encoder,
		path: &Path,
		previous: Option<&MediaInfo>,
	) -> Result<Option<MediaInfo>, ScanError> {
		match self {
			Self::Video => {
				let mut info = encoder.probe(path).await?;

				info.interactive = fs::try_exists(funscript_path(path))
					.await
					.unwrap_or(false);

				if let Some(MediaInfo::Video(previous)) = previous {
					info.captions.clone_from(&previous.captions);
				}

				trace!(path = %path.display(), duration = info.duration, "Probed video;");

				Ok(Some(MediaInfo::Video(info)))
			}

			Self::Image => {
				let path_buf = path.to_path_buf();
				let (width, height) = spawn_blocking(move || image::image_dimensions(&path_buf))
					.await?
					.map_err(|e| ScanError::Decode {
						path: path.to_path_buf(),
						reason: e.to_string(),
					})?;

				Ok(Some(MediaInfo::Image(ImageInfo {
					format: lowercase_extension(path).unwrap_or_default(),
					width,
					height,
				})))
			}

			Self::Gallery => Ok(None),
		}
	}
}

/// Whether an already stored file lacks the metadata its decorator would give it
#[must_use]
pub fn needs_decoration(path: &Path, media: Option<&MediaInfo>, config: &ScanConfig) -> bool {
	matches!(
		(Decorator::for_path(path, config), media),
		(Some(Decorator::Video | Decorator::Image), None)
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::config::Library;

	use std::path::PathBuf;

	#[test]
	fn clips_are_probed_as_videos() {
		let config = ScanConfig {
			libraries: vec![Library {
				path: PathBuf::from("/clips"),
				exclude_video: true,
				exclude_image: false,
			}],
			create_image_clips_from_videos: true,
			..Default::default()
		};

		assert_eq!(
			Decorator::for_path(Path::new("/clips/a.mp4"), &config),
			Some(Decorator::Video)
		);
		assert_eq!(
			Decorator::for_path(Path::new("/clips/a.zip"), &config),
			Some(Decorator::Gallery)
		);
		assert!(needs_decoration(Path::new("/clips/a.png"), None, &config));
		assert!(!needs_decoration(Path::new("/clips/a.zip"), None, &config));
	}
}
