//! Caption sidecars: `movie.srt` or `movie.en.vtt` next to `movie.mp4`.
//!
//! Captions never become files of their own, they are recorded on the video they belong to.

use crate::{
	config::ScanConfig,
	model::{Caption, CaptionType, File, MediaInfo},
	repository::Repository,
};

use mk_utils::lowercase_extension;

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, trace};

use super::ScanError;

/// Language code of captions without one
pub const UNKNOWN_LANGUAGE: &str = "00";

#[must_use]
pub fn is_caption(extension: &str) -> bool {
	caption_type(extension).is_some()
}

fn caption_type(extension: &str) -> Option<CaptionType> {
	match extension {
		"vtt" => Some(CaptionType::Vtt),
		"srt" => Some(CaptionType::Srt),
		_ => None,
	}
}

fn is_language_code(candidate: &str) -> bool {
	(2..=3).contains(&candidate.len()) && candidate.chars().all(|c| c.is_ascii_alphabetic())
}

/// A caption file and the path prefix of the video it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionFile {
	/// `/media/movie.` for `/media/movie.en.srt`, followed by a video extension
	pub video_prefix: String,
	pub caption: Caption,
}

impl CaptionFile {
	#[must_use]
	pub fn parse(path: &Path) -> Option<Self> {
		let caption_type = lowercase_extension(path).and_then(|ext| caption_type(&ext))?;
		let filename = path.file_name()?.to_string_lossy().into_owned();

		let stem = path.with_extension("");
		let (base, language_code) = match stem.extension().and_then(|ext| ext.to_str()) {
			Some(code) if is_language_code(code) => (stem.with_extension(""), code.to_string()),
			_ => (stem, UNKNOWN_LANGUAGE.to_string()),
		};

		Some(Self {
			video_prefix: format!("{}.", base.to_string_lossy()),
			caption: Caption {
				filename,
				language_code,
				caption_type,
			},
		})
	}

	/// Every path the captioned video could have
	pub fn video_candidates<'a>(
		&'a self,
		config: &'a ScanConfig,
	) -> impl Iterator<Item = PathBuf> + 'a {
		config
			.video_extensions
			.iter()
			.map(|ext| PathBuf::from(format!("{}{ext}", self.video_prefix)))
	}
}

/// Records the caption on its video, returns whether a video was found and updated
pub async fn associate(
	repository: &dyn Repository,
	config: &ScanConfig,
	path: &Path,
) -> Result<bool, ScanError> {
	let Some(caption_file) = CaptionFile::parse(path) else {
		return Ok(false);
	};

	for candidate in caption_file.video_candidates(config) {
		let Some(file) = repository.find_file_by_path(&candidate).await? else {
			continue;
		};

		let mut tx = repository.begin().await?;

		// Read again inside the transaction, the scan may have updated it meanwhile
		let Some(mut file) = tx.find_file(file.id).await? else {
			return Ok(false);
		};

		let Some(MediaInfo::Video(video)) = &mut file.media else {
			return Ok(false);
		};

		if video.captions.contains(&caption_file.caption) {
			trace!(path = %path.display(), "Caption already associated");
			return Ok(true);
		}

		video.captions.push(caption_file.caption.clone());
		tx.update_file(&file).await?;
		tx.commit().await?;

		debug!(
			caption = %path.display(),
			video = %file.path.display(),
			"Associated caption with video;"
		);

		return Ok(true);
	}

	Ok(false)
}

/// Drops the captions whose file is gone, returns whether any was dropped
pub async fn clean(file: &mut File) -> bool {
	let Some(dir) = file.path.parent().map(Path::to_path_buf) else {
		return false;
	};

	let Some(MediaInfo::Video(video)) = &mut file.media else {
		return false;
	};

	let before = video.captions.len();
	let mut kept = Vec::with_capacity(before);

	for caption in video.captions.drain(..) {
		if fs::try_exists(dir.join(&caption.filename))
			.await
			.unwrap_or(false)
		{
			kept.push(caption);
		} else {
			debug!(video = %file.path.display(), caption = %caption.filename, "Removing stale caption;");
		}
	}

	video.captions = kept;
	video.captions.len() != before
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn language_code_is_optional() {
		let with_code = CaptionFile::parse(Path::new("/media/movie.en.srt")).unwrap();
		assert_eq!(with_code.video_prefix, "/media/movie.");
		assert_eq!(with_code.caption.language_code, "en");
		assert_eq!(with_code.caption.caption_type, CaptionType::Srt);
		assert_eq!(with_code.caption.filename, "movie.en.srt");

		let without = CaptionFile::parse(Path::new("/media/movie.part1.VTT")).unwrap();
		assert_eq!(without.video_prefix, "/media/movie.part1.");
		assert_eq!(without.caption.language_code, UNKNOWN_LANGUAGE);
		assert_eq!(without.caption.caption_type, CaptionType::Vtt);

		assert_eq!(CaptionFile::parse(Path::new("/media/movie.mp4")), None);
	}

	#[test]
	fn candidates_use_video_extensions() {
		let config = ScanConfig {
			video_extensions: vec!["mp4".to_string(), "mkv".to_string()],
			..Default::default()
		};

		let caption = CaptionFile::parse(Path::new("/media/movie.en.srt")).unwrap();

		assert_eq!(
			caption.video_candidates(&config).collect::<Vec<_>>(),
			vec![
				PathBuf::from("/media/movie.mp4"),
				PathBuf::from("/media/movie.mkv")
			]
		);
	}
}
