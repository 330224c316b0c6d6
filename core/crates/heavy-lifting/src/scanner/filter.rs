//! Decides which walked paths become files of the library

use crate::config::{MediaKind, ScanConfig};

use mk_utils::{lowercase_extension, with_trailing_separator};

use std::{fs::Metadata, path::Path};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use strum::Display;
use tracing::warn;

use super::captions::is_caption;

/// What the walker knows about a path when filtering it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
	pub is_dir: bool,
	pub size: u64,
	pub mod_time: DateTime<Utc>,
}

impl From<&Metadata> for EntryInfo {
	fn from(metadata: &Metadata) -> Self {
		Self {
			is_dir: metadata.is_dir(),
			size: metadata.len(),
			mod_time: metadata
				.modified()
				.map(DateTime::<Utc>::from)
				.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
	Generated,
	OlderThanCutoff,
	UnknownExtension,
	Empty,
	OutsideLibraries,
	ExcludedDirectory,
	Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Descend,
	Accept(MediaKind),
	/// Caption sidecars are associated with their video once the walk is done
	Caption,
	Reject(Rejection),
}

fn compile(patterns: &[String]) -> Vec<Regex> {
	patterns
		.iter()
		.filter_map(|pattern| {
			RegexBuilder::new(pattern)
				.case_insensitive(true)
				.build()
				.map_err(|e| warn!(%pattern, ?e, "Ignoring invalid exclude pattern;"))
				.ok()
		})
		.collect()
}

fn matches_any(regexes: &[Regex], path: &str) -> bool {
	regexes.iter().any(|regex| regex.is_match(path))
}

/// Filter chain over the scan configuration, applied to every walked entry
#[derive(Debug, Clone)]
pub struct PathFilter {
	config: ScanConfig,
	video_excludes: Vec<Regex>,
	image_excludes: Vec<Regex>,
	min_mod_time: Option<DateTime<Utc>>,
}

impl PathFilter {
	#[must_use]
	pub fn new(config: ScanConfig, min_mod_time: Option<DateTime<Utc>>) -> Self {
		Self {
			video_excludes: compile(&config.excludes),
			image_excludes: compile(&config.image_excludes),
			config,
			min_mod_time,
		}
	}

	#[must_use]
	pub const fn config(&self) -> &ScanConfig {
		&self.config
	}

	pub fn check(&self, path: &Path, entry: EntryInfo) -> Verdict {
		if path.starts_with(&self.config.generated_path) {
			return Verdict::Reject(Rejection::Generated);
		}

		if !entry.is_dir && self.min_mod_time.is_some_and(|cutoff| entry.mod_time < cutoff) {
			return Verdict::Reject(Rejection::OlderThanCutoff);
		}

		if !entry.is_dir && lowercase_extension(path).is_some_and(|ext| is_caption(&ext)) {
			return Verdict::Caption;
		}

		let kind = if entry.is_dir {
			None
		} else {
			self.config.media_kind(path)
		};

		if !entry.is_dir && kind.is_none() {
			return Verdict::Reject(Rejection::UnknownExtension);
		}

		if !entry.is_dir && entry.size == 0 {
			return Verdict::Reject(Rejection::Empty);
		}

		match self.excluded(path, kind) {
			Some(rejection) => Verdict::Reject(rejection),
			None => kind.map_or(Verdict::Descend, Verdict::Accept),
		}
	}

	/// Library and exclude pattern checks, shared with the clean job
	fn excluded(&self, path: &Path, kind: Option<MediaKind>) -> Option<Rejection> {
		let Some(library) = self.config.library_for(path) else {
			return Some(Rejection::OutsideLibraries);
		};

		// Trailing separator so patterns like `/trash/` also match the directory itself
		let as_dir = with_trailing_separator(path);
		if matches_any(&self.video_excludes, &as_dir)
			&& (library.exclude_image || matches_any(&self.image_excludes, &as_dir))
		{
			return Some(Rejection::ExcludedDirectory);
		}

		let rendered = path.to_string_lossy();
		let excluded = match kind {
			Some(MediaKind::Video) => {
				library.exclude_video || matches_any(&self.video_excludes, &rendered)
			}
			Some(MediaKind::Image | MediaKind::Gallery) => {
				library.exclude_image || matches_any(&self.image_excludes, &rendered)
			}
			None => false,
		};

		excluded.then_some(Rejection::Excluded)
	}

	/// Whether a stored file would still be accepted, used to find files to clean up.
	///
	/// Only looks at the path, the file is not expected to exist anymore.
	pub fn keeps(&self, path: &Path) -> bool {
		if path.starts_with(&self.config.generated_path) {
			return false;
		}

		let kind = self.config.media_kind(path);
		kind.is_some() && self.excluded(path, kind).is_none()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::config::Library;

	use std::path::PathBuf;

	use chrono::TimeZone;
	use pretty_assertions::assert_eq;

	fn filter() -> PathFilter {
		PathFilter::new(
			ScanConfig {
				libraries: vec![
					Library::new("/media/videos"),
					Library {
						path: PathBuf::from("/media/pics"),
						exclude_video: true,
						exclude_image: false,
					},
				],
				excludes: vec!["/trash/".to_string(), r"\.sample\.".to_string()],
				image_excludes: vec!["/trash/".to_string(), "^INVALID(".to_string()],
				generated_path: PathBuf::from("/media/videos/.generated"),
				..Default::default()
			},
			None,
		)
	}

	fn file(size: u64) -> EntryInfo {
		EntryInfo {
			is_dir: false,
			size,
			mod_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
		}
	}

	fn dir() -> EntryInfo {
		EntryInfo {
			is_dir: true,
			..file(0)
		}
	}

	#[test]
	fn accepts_media_in_libraries() {
		let filter = filter();

		assert_eq!(
			filter.check(Path::new("/media/videos/a.mp4"), file(10)),
			Verdict::Accept(MediaKind::Video)
		);
		assert_eq!(
			filter.check(Path::new("/media/pics/a.JPG"), file(10)),
			Verdict::Accept(MediaKind::Image)
		);
		assert_eq!(
			filter.check(Path::new("/media/videos/sub"), dir()),
			Verdict::Descend
		);
	}

	#[test]
	fn rejections() {
		let filter = filter();

		for (path, entry, expected) in [
			("/media/videos/.generated/x.jpg", file(10), Rejection::Generated),
			("/media/videos/notes.txt", file(10), Rejection::UnknownExtension),
			("/media/videos/empty.mp4", file(0), Rejection::Empty),
			("/elsewhere/a.mp4", file(10), Rejection::OutsideLibraries),
			("/media/videos/trash", dir(), Rejection::ExcludedDirectory),
			("/media/videos/a.SAMPLE.mp4", file(10), Rejection::Excluded),
			("/media/pics/a.mp4", file(10), Rejection::Excluded),
		] {
			assert_eq!(
				filter.check(Path::new(path), entry),
				Verdict::Reject(expected),
				"{path}"
			);
		}
	}

	#[test]
	fn captions_are_diverted() {
		assert_eq!(
			filter().check(Path::new("/media/videos/a.en.srt"), file(10)),
			Verdict::Caption
		);
	}

	#[test]
	fn cutoff_skips_old_files_but_not_directories() {
		let filter = PathFilter::new(
			filter().config().clone(),
			Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
		);

		assert_eq!(
			filter.check(Path::new("/media/videos/a.mp4"), file(10)),
			Verdict::Reject(Rejection::OlderThanCutoff)
		);
		assert_eq!(
			filter.check(Path::new("/media/videos/sub"), dir()),
			Verdict::Descend
		);
	}

	#[test]
	fn clean_filter() {
		let filter = filter();

		assert!(filter.keeps(Path::new("/media/videos/a.mp4")));
		assert!(!filter.keeps(Path::new("/media/videos/trash/a.mp4")));
		assert!(!filter.keeps(Path::new("/elsewhere/a.mp4")));
	}
}
