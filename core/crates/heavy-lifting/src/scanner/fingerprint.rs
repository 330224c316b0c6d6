use crate::{
	config::{MediaKind, ScanConfig},
	model::{Fingerprint, Fingerprints, HashAlgorithm},
};

use mk_utils::error::FileIOError;

use std::{
	fs,
	io::{self, Read, Seek, SeekFrom},
	path::{Path, PathBuf},
};

use md5::{Digest, Md5};
use tokio::task::spawn_blocking;
use tracing::{instrument, trace};

use super::ScanError;

/// Bytes read at both ends of the file for the `oshash`
const OSHASH_CHUNK_SIZE: u64 = 64 * 1024;

const MD5_BUFFER_SIZE: usize = 64 * 1024;

fn sum_words(chunk: &[u8]) -> u64 {
	chunk
		.chunks_exact(8)
		.map(|word| {
			let mut bytes = [0; 8];
			bytes.copy_from_slice(word);
			u64::from_le_bytes(bytes)
		})
		.fold(0, u64::wrapping_add)
}

/// File size plus the little endian words of its first and last 64KiB, as 16 hex digits
pub fn oshash(path: &Path) -> Result<String, FileIOError> {
	fn inner(path: &Path) -> io::Result<String> {
		let mut file = fs::File::open(path)?;
		let size = file.metadata()?.len();

		let chunk_size = OSHASH_CHUNK_SIZE.min(size);
		#[allow(clippy::cast_possible_truncation)]
		let mut chunk = vec![0; chunk_size as usize];

		file.read_exact(&mut chunk)?;
		let head = sum_words(&chunk);

		file.seek(SeekFrom::Start(size - chunk_size))?;
		file.read_exact(&mut chunk)?;
		let tail = sum_words(&chunk);

		Ok(format!(
			"{:016x}",
			size.wrapping_add(head).wrapping_add(tail)
		))
	}

	inner(path).map_err(|e| FileIOError::from((path, e, "Failed to compute oshash")))
}

pub fn md5(path: &Path) -> Result<String, FileIOError> {
	fn inner(path: &Path) -> io::Result<String> {
		let mut file = fs::File::open(path)?;
		let mut hasher = Md5::new();
		let mut buffer = vec![0; MD5_BUFFER_SIZE];

		loop {
			let read = file.read(&mut buffer)?;
			if read == 0 {
				break;
			}
			hasher.update(&buffer[..read]);
		}

		Ok(hasher
			.finalize()
			.iter()
			.map(|byte| format!("{byte:02x}"))
			.collect())
	}

	inner(path).map_err(|e| FileIOError::from((path, e, "Failed to compute md5")))
}

/// Which fingerprints a file of `kind` gets during a scan
#[must_use]
pub fn wanted(kind: MediaKind, config: &ScanConfig) -> (bool, bool) {
	match kind {
		MediaKind::Video => (
			true,
			config.calculate_md5 || config.naming_algorithm == HashAlgorithm::Md5,
		),
		MediaKind::Image | MediaKind::Gallery => (false, true),
	}
}

/// Computes the content fingerprints of a file on the blocking pool
#[instrument(skip(config), err)]
pub async fn calculate(
	path: PathBuf,
	kind: MediaKind,
	config: &ScanConfig,
) -> Result<Fingerprints, ScanError> {
	let (want_oshash, want_md5) = wanted(kind, config);

	let fingerprints = spawn_blocking(move || -> Result<Fingerprints, FileIOError> {
		let mut fingerprints = Fingerprints::default();

		if want_oshash {
			fingerprints.set(Fingerprint::Oshash(oshash(&path)?));
		}

		if want_md5 {
			fingerprints.set(Fingerprint::Md5(md5(&path)?));
		}

		Ok(fingerprints)
	})
	.await??;

	trace!(?fingerprints, "Fingerprints computed;");

	Ok(fingerprints)
}
