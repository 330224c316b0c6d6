//!
//! # Read Lock Manager
//!
//! A path keyed registry of reader leases. Any number of readers can hold a lease on the same
//! path at once, there's no exclusive mode. Code that is about to delete, move or re-hash a file
//! calls [`ReadLockManager::cancel`] first, which signals every lease on that path and returns
//! right away. Streamed readers observe the signal as an end of stream and external processes
//! bound to a lease get killed.
//!
//! `cancel` never waits for the readers to actually go away, so there's a short window where a
//! reader may still be touching the file while the destructive operation starts. This is a known
//! limitation, callers must not add blocking on top of it.

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
	collections::HashMap,
	fmt,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Weak,
	},
};

use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

mod error;
mod stream;

pub use error::ReadLockError;
pub use stream::{ByteRange, LeasedReader, LeasedStream};

pub type LeaseId = u64;

#[derive(Default)]
struct Inner {
	leases: Mutex<HashMap<PathBuf, HashMap<LeaseId, CancellationToken>>>,
	next_id: AtomicU64,
}

/// Cheap to clone, every clone shares the same registry
#[derive(Clone, Default)]
pub struct ReadLockManager {
	inner: Arc<Inner>,
}

impl fmt::Debug for ReadLockManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReadLockManager")
			.field("locked_paths", &self.inner.leases.lock().len())
			.finish()
	}
}

impl ReadLockManager {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new reader on `path`, always granted
	pub fn acquire_read(&self, path: impl AsRef<Path>) -> ReadLease {
		self.register(path.as_ref(), CancellationToken::new())
	}

	/// Same as [`acquire_read`](Self::acquire_read) but the lease is also cancelled with `parent`,
	/// so a job cancellation reaches the readers it opened
	pub fn acquire_read_with_parent(
		&self,
		path: impl AsRef<Path>,
		parent: &CancellationToken,
	) -> ReadLease {
		self.register(path.as_ref(), parent.child_token())
	}

	fn register(&self, path: &Path, token: CancellationToken) -> ReadLease {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

		self.inner
			.leases
			.lock()
			.entry(path.to_path_buf())
			.or_default()
			.insert(id, token.clone());

		trace!(lease_id = id, path = %path.display(), "Read lease acquired");

		ReadLease {
			id,
			path: path.to_path_buf(),
			token,
			manager: Arc::downgrade(&self.inner),
		}
	}

	/// Signals every lease on `path` and forgets them, returning how many were signalled.
	///
	/// Fire and forget: it doesn't wait for the readers to stop.
	pub fn cancel(&self, path: impl AsRef<Path>) -> usize {
		let path = path.as_ref();

		let Some(leases) = self.inner.leases.lock().remove(path) else {
			return 0;
		};

		for token in leases.values() {
			token.cancel();
		}

		debug!(path = %path.display(), count = leases.len(), "Cancelled read leases;");

		leases.len()
	}

	#[must_use]
	pub fn active_leases(&self, path: impl AsRef<Path>) -> usize {
		self.inner
			.leases
			.lock()
			.get(path.as_ref())
			.map_or(0, HashMap::len)
	}
}

/// A reader's claim on a path, released on drop
pub struct ReadLease {
	id: LeaseId,
	path: PathBuf,
	token: CancellationToken,
	manager: Weak<Inner>,
}

impl fmt::Debug for ReadLease {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReadLease")
			.field("id", &self.id)
			.field("path", &self.path)
			.field("cancelled", &self.token.is_cancelled())
			.finish()
	}
}

impl ReadLease {
	#[must_use]
	pub const fn id(&self) -> LeaseId {
		self.id
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves once the lease is cancelled
	pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
		self.token.cancelled()
	}

	#[must_use]
	pub const fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Binds a reader to this lease, it reports end of file once the lease is cancelled
	pub fn reader<R>(self, reader: R) -> LeasedReader<R> {
		LeasedReader::new(reader, self)
	}
}

impl Drop for ReadLease {
	fn drop(&mut self) {
		let Some(inner) = self.manager.upgrade() else {
			return;
		};

		let mut leases = inner.leases.lock();
		if let Some(path_leases) = leases.get_mut(&self.path) {
			path_leases.remove(&self.id);
			if path_leases.is_empty() {
				leases.remove(&self.path);
			}
		}

		trace!(lease_id = self.id, "Read lease released");
	}
}
