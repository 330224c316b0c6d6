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

use std::{
	ffi::OsStr,
	path::{Path, PathBuf, MAIN_SEPARATOR},
};

pub mod error;

/// Returns the first of `dirs` that contains `path` (or is `path` itself)
pub fn find_containing_dir<'d, D: AsRef<Path>>(
	dirs: &'d [D],
	path: impl AsRef<Path>,
) -> Option<&'d D> {
	let path = path.as_ref();
	dirs.iter().find(|dir| path.starts_with(dir.as_ref()))
}

/// Renders `path` with a trailing separator, so directory patterns like `/trash/$` can match it
#[must_use]
pub fn with_trailing_separator(path: impl AsRef<Path>) -> String {
	let mut rendered = path.as_ref().to_string_lossy().into_owned();
	if !rendered.ends_with(MAIN_SEPARATOR) {
		rendered.push(MAIN_SEPARATOR);
	}
	rendered
}

/// Lowercased extension without the leading dot
#[must_use]
pub fn lowercase_extension(path: impl AsRef<Path>) -> Option<String> {
	path.as_ref()
		.extension()
		.and_then(OsStr::to_str)
		.map(str::to_ascii_lowercase)
}

/// `/a/b/movie.mp4` + `funscript` -> `/a/b/movie.funscript`
#[must_use]
pub fn sidecar_path(path: impl AsRef<Path>, extension: &str) -> PathBuf {
	path.as_ref().with_extension(extension)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn containing_dir_is_component_aware() {
		let dirs = [PathBuf::from("/media/videos"), PathBuf::from("/media/pics")];

		assert_eq!(
			find_containing_dir(&dirs, "/media/pics/a.jpg"),
			Some(&dirs[1])
		);
		assert!(find_containing_dir(&dirs, "/media/videos").is_some());
		assert!(find_containing_dir(&dirs, "/media/videos2/a.mp4").is_none());
	}

	#[test]
	fn trailing_separator_is_added_once() {
		let with = with_trailing_separator(format!("/a/b{MAIN_SEPARATOR}"));
		let without = with_trailing_separator("/a/b");
		assert_eq!(with, without);
		assert!(without.ends_with(MAIN_SEPARATOR));
	}

	#[test]
	fn extension_helpers() {
		assert_eq!(lowercase_extension("/x/Movie.MP4").as_deref(), Some("mp4"));
		assert_eq!(lowercase_extension("/x/README"), None);
		assert_eq!(
			sidecar_path("/x/movie.mp4", "funscript"),
			PathBuf::from("/x/movie.funscript")
		);
	}
}
