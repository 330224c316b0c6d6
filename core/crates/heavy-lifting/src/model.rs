use std::path::{Path, PathBuf};

use mk_phash::PerceptualHash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub type FileId = u64;
pub type FolderId = u64;
pub type SceneId = u64;
pub type ImageId = u64;
pub type GalleryId = u64;

#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FingerprintType {
	/// Fast hash of the file size plus its first and last 64KiB
	Oshash,
	/// Whole file hash, kept for legacy artifact naming
	Md5,
	Phash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Fingerprint {
	Oshash(String),
	Md5(String),
	Phash(PerceptualHash),
}

impl Fingerprint {
	#[must_use]
	pub const fn kind(&self) -> FingerprintType {
		match self {
			Self::Oshash(_) => FingerprintType::Oshash,
			Self::Md5(_) => FingerprintType::Md5,
			Self::Phash(_) => FingerprintType::Phash,
		}
	}
}

/// At most one fingerprint per [`FingerprintType`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints(Vec<Fingerprint>);

impl Fingerprints {
	#[must_use]
	pub fn get(&self, kind: FingerprintType) -> Option<&Fingerprint> {
		self.0.iter().find(|fp| fp.kind() == kind)
	}

	/// Replaces any fingerprint of the same type
	pub fn set(&mut self, fingerprint: Fingerprint) {
		let kind = fingerprint.kind();
		if let Some(existing) = self.0.iter_mut().find(|fp| fp.kind() == kind) {
			*existing = fingerprint;
		} else {
			self.0.push(fingerprint);
		}
	}

	/// Adds the ones whose type is still missing, returns whether anything was added
	pub fn append_missing(&mut self, other: impl IntoIterator<Item = Fingerprint>) -> bool {
		let mut changed = false;
		for fingerprint in other {
			if self.get(fingerprint.kind()).is_none() {
				self.0.push(fingerprint);
				changed = true;
			}
		}
		changed
	}

	pub fn remove(&mut self, kind: FingerprintType) {
		self.0.retain(|fp| fp.kind() != kind);
	}

	#[must_use]
	pub fn oshash(&self) -> Option<&str> {
		match self.get(FingerprintType::Oshash) {
			Some(Fingerprint::Oshash(hash)) => Some(hash),
			_ => None,
		}
	}

	#[must_use]
	pub fn md5(&self) -> Option<&str> {
		match self.get(FingerprintType::Md5) {
			Some(Fingerprint::Md5(hash)) => Some(hash),
			_ => None,
		}
	}

	#[must_use]
	pub fn phash(&self) -> Option<PerceptualHash> {
		match self.get(FingerprintType::Phash) {
			Some(Fingerprint::Phash(hash)) => Some(*hash),
			_ => None,
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> + '_ {
		self.0.iter()
	}
}

impl FromIterator<Fingerprint> for Fingerprints {
	fn from_iter<T: IntoIterator<Item = Fingerprint>>(iter: T) -> Self {
		let mut fingerprints = Self::default();
		for fingerprint in iter {
			fingerprints.set(fingerprint);
		}
		fingerprints
	}
}

/// Which hash names the generated artifacts of a video
#[derive(Debug, Display, EnumString, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
	#[default]
	Oshash,
	Md5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionType {
	Vtt,
	Srt,
}

/// A subtitle sidecar associated to a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
	/// File name only, it lives next to the video
	pub filename: String,
	/// `en` in `movie.en.srt`, `00` when unknown
	pub language_code: String,
	pub caption_type: CaptionType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
	pub format: String,
	/// Seconds
	pub duration: f64,
	pub video_codec: String,
	pub audio_codec: String,
	pub width: u32,
	pub height: u32,
	pub frame_rate: f64,
	pub frame_count: u64,
	pub bit_rate: u64,
	/// Has a `.funscript` sidecar
	pub interactive: bool,
	pub captions: Vec<Caption>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
	pub format: String,
	pub width: u32,
	pub height: u32,
}

/// Metadata attached by the decorators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaInfo {
	Video(VideoInfo),
	Image(ImageInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
	pub id: FileId,
	pub path: PathBuf,
	pub parent_folder_id: FolderId,
	pub size: u64,
	pub mod_time: DateTime<Utc>,
	pub fingerprints: Fingerprints,
	pub media: Option<MediaInfo>,
}

impl File {
	#[must_use]
	pub fn basename(&self) -> String {
		self.path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default()
	}

	#[must_use]
	pub const fn video(&self) -> Option<&VideoInfo> {
		match &self.media {
			Some(MediaInfo::Video(info)) => Some(info),
			_ => None,
		}
	}

	#[must_use]
	pub const fn image(&self) -> Option<&ImageInfo> {
		match &self.media {
			Some(MediaInfo::Image(info)) => Some(info),
			_ => None,
		}
	}

	/// The hash naming this file's artifacts, `None` while it wasn't computed
	#[must_use]
	pub fn hash_for(&self, algorithm: HashAlgorithm) -> Option<&str> {
		match algorithm {
			HashAlgorithm::Oshash => self.fingerprints.oshash(),
			HashAlgorithm::Md5 => self.fingerprints.md5(),
		}
	}

	/// Same size and modification time as what is on disk
	#[must_use]
	pub fn is_unchanged(&self, size: u64, mod_time: DateTime<Utc>) -> bool {
		self.size == size && self.mod_time == mod_time
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
	pub id: FolderId,
	pub path: PathBuf,
	pub parent_folder_id: Option<FolderId>,
	pub mod_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
	pub id: SceneId,
	pub title: String,
	/// The first one is the primary file
	pub file_ids: Vec<FileId>,
	/// Median stroke speed of the funscript, set by the heatmap task
	pub interactive_speed: Option<u32>,
	pub updated_at: DateTime<Utc>,
}

impl Scene {
	#[must_use]
	pub fn primary_file_id(&self) -> Option<FileId> {
		self.file_ids.first().copied()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
	pub id: ImageId,
	pub title: String,
	pub file_ids: Vec<FileId>,
	pub gallery_ids: Vec<GalleryId>,
	pub updated_at: DateTime<Utc>,
}

impl Image {
	#[must_use]
	pub fn primary_file_id(&self) -> Option<FileId> {
		self.file_ids.first().copied()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gallery {
	pub id: GalleryId,
	pub title: String,
	/// Set for galleries created from a folder of images
	pub folder_id: Option<FolderId>,
	/// Set for galleries backed by an archive file
	pub file_ids: Vec<FileId>,
	pub updated_at: DateTime<Utc>,
}

/// Title derived from a path, the file name without its extension
#[must_use]
pub fn title_from_path(path: &Path) -> String {
	path.file_stem()
		.or_else(|| path.file_name())
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default()
}
