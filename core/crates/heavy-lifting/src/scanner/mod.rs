//! Library scan: walks the configured roots, filters what it finds, identifies new and changed
//! files and hands each one to the handler of its kind, queueing generation work on the way.

use crate::{
	config::{GenerateOptions, MediaKind, ScanConfig},
	encoder::EncoderError,
	generate::{artifact_hash, Artifact, GenerateError, Generator},
	model::{File, Folder, FolderId, MediaInfo, Scene},
	repository::{Repository, RepositoryError, Transaction},
};

use mk_core_job_system::ProgressReporter;
use mk_task_system::{Dispatched, Interrupter, TaskQueue, TaskSystemError};
use mk_utils::error::FileIOError;

use std::{
	collections::{HashSet, VecDeque},
	path::{Path, PathBuf},
	sync::atomic::{AtomicU64, Ordering},
	thread::available_parallelism,
};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, task::JoinError};
use tokio_stream::wrappers::ReadDirStream;
use tracing::{debug, info, instrument, trace, warn};

pub mod captions;
pub mod decorator;
pub mod filter;
pub mod fingerprint;
pub mod handler;

use decorator::{needs_decoration, Decorator};
use filter::{EntryInfo, PathFilter, Verdict};
use handler::{FolderCache, Handled, Handler};

#[derive(Debug, Error)]
pub enum ScanError {
	#[error("failed to decode '{}': {reason}", .path.display())]
	Decode { path: PathBuf, reason: String },
	#[error("no folder could be registered for '{}'", .0.display())]
	MissingFolder(PathBuf),
	#[error("blocking task failed: {0}")]
	Blocking(#[from] JoinError),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	Repository(#[from] RepositoryError),
	#[error(transparent)]
	Encoder(#[from] EncoderError),
	#[error(transparent)]
	TaskSystem(#[from] TaskSystemError),
}

/// Per path failures, recorded on the scan output while the scan moves on
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NonCriticalScanError {
	#[error("failed to walk '{}': {reason}", .path.display())]
	Walk { path: PathBuf, reason: String },
	#[error("failed to scan file '{}': {reason}", .path.display())]
	File { path: PathBuf, reason: String },
	#[error("failed to read metadata of '{}': {reason}", .path.display())]
	Decorate { path: PathBuf, reason: String },
	#[error("failed to associate caption '{}': {reason}", .path.display())]
	Caption { path: PathBuf, reason: String },
	#[error("skipped generation for '{}': {reason}", .path.display())]
	Generate { path: PathBuf, reason: String },
}

/// Accepted file found by the walker
#[derive(Debug, Clone)]
pub struct WalkedFile {
	pub path: PathBuf,
	pub kind: MediaKind,
	pub entry: EntryInfo,
}

#[derive(Debug, Default)]
struct Walked {
	files: Vec<WalkedFile>,
	captions: Vec<PathBuf>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScanReport {
	pub walked: u64,
	pub rejected: u64,
	pub created: u64,
	pub updated: u64,
	pub unchanged: u64,
	/// Handler invocations, unchanged files only count when the handler was forced
	pub handled: u64,
	pub captions: u64,
	/// Generation tasks that were queued or ran inline
	pub tasks_queued: u64,
	pub non_critical_errors: Vec<NonCriticalScanError>,
}

#[derive(Debug, Default)]
struct Counters {
	walked: AtomicU64,
	rejected: AtomicU64,
	created: AtomicU64,
	updated: AtomicU64,
	unchanged: AtomicU64,
	handled: AtomicU64,
	captions: AtomicU64,
	tasks_queued: AtomicU64,
}

fn bump(counter: &AtomicU64) {
	counter.fetch_add(1, Ordering::Relaxed);
}

/// A single scan over a fixed configuration snapshot
#[derive(Debug)]
pub struct Scanner {
	filter: PathFilter,
	generator: Generator,
	generate: GenerateOptions,
	parallelism: usize,
	folders: FolderCache,
	counters: Counters,
	errors: Mutex<Vec<NonCriticalScanError>>,
}

impl Scanner {
	#[must_use]
	pub fn new(filter: PathFilter, generator: Generator, mut generate: GenerateOptions) -> Self {
		// Transcodes are only produced by the generate job
		generate.transcodes = false;

		let parallelism = match filter.config().parallel_tasks {
			0 => available_parallelism().map_or(1, std::num::NonZeroUsize::get),
			n => n,
		};

		Self {
			filter,
			generator,
			generate,
			parallelism,
			folders: FolderCache::new(2 * parallelism),
			counters: Counters::default(),
			errors: Mutex::new(Vec::new()),
		}
	}

	fn config(&self) -> &ScanConfig {
		self.filter.config()
	}

	fn repository(&self) -> &dyn Repository {
		&*self.generator.repository
	}

	fn non_critical(&self, error: NonCriticalScanError) {
		warn!(%error, "Non critical scan error;");
		self.errors.lock().push(error);
	}

	/// Walks `roots` then scans every accepted file, `parallel_tasks` files at a time.
	///
	/// Generation tasks go to `queue`, the caller closes it once the scan returns. Cancellation
	/// through the queue interrupter stops the walk and the file loop at their next step, the
	/// report then covers whatever was done.
	#[instrument(skip_all, fields(roots = roots.len(), parallelism = self.parallelism), err)]
	pub async fn run(
		&self,
		roots: &[PathBuf],
		queue: &TaskQueue<GenerateError>,
		progress: &ProgressReporter,
	) -> Result<ScanReport, ScanError> {
		let interrupter = queue.interrupter();

		progress.set_indeterminate();

		let Walked {
			files,
			captions: caption_paths,
		} = self.walk(roots, interrupter).await;

		if interrupter.is_cancelled() {
			debug!("Scan cancelled while walking;");
			return Ok(self.report());
		}

		progress.set_total(files.len() as u64);

		info!(files = files.len(), "Walk finished, scanning files;");

		stream::iter(files)
			.for_each_concurrent(self.parallelism, |walked| async move {
				if interrupter.is_cancelled() {
					return;
				}

				let path = walked.path.clone();
				if let Err(e) = self.scan_file(walked, queue).await {
					self.non_critical(NonCriticalScanError::File {
						path,
						reason: e.to_string(),
					});
				}

				progress.increment();
			})
			.await;

		for path in caption_paths {
			if interrupter.is_cancelled() {
				break;
			}

			match captions::associate(self.repository(), self.config(), &path).await {
				Ok(true) => bump(&self.counters.captions),
				Ok(false) => trace!(path = %path.display(), "Caption without a known video"),
				Err(e) => self.non_critical(NonCriticalScanError::Caption {
					path,
					reason: e.to_string(),
				}),
			}
		}

		let report = self.report();

		info!(
			created = report.created,
			updated = report.updated,
			unchanged = report.unchanged,
			rejected = report.rejected,
			tasks_queued = report.tasks_queued,
			errors = report.non_critical_errors.len(),
			"Scan finished;"
		);

		Ok(report)
	}

	fn report(&self) -> ScanReport {
		let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

		ScanReport {
			walked: load(&self.counters.walked),
			rejected: load(&self.counters.rejected),
			created: load(&self.counters.created),
			updated: load(&self.counters.updated),
			unchanged: load(&self.counters.unchanged),
			handled: load(&self.counters.handled),
			captions: load(&self.counters.captions),
			tasks_queued: load(&self.counters.tasks_queued),
			non_critical_errors: self.errors.lock().clone(),
		}
	}

	async fn walk(&self, roots: &[PathBuf], interrupter: &Interrupter) -> Walked {
		let mut walked = Walked::default();
		let mut to_walk = VecDeque::new();
		let mut visited = HashSet::new();

		for root in roots {
			match fs::metadata(root).await {
				Ok(metadata) => self.visit(root.clone(), &metadata, &mut walked, &mut to_walk),
				Err(e) => self.non_critical(NonCriticalScanError::Walk {
					path: root.clone(),
					reason: e.to_string(),
				}),
			}
		}

		while let Some(dir) = to_walk.pop_front() {
			if interrupter.is_cancelled() {
				break;
			}

			// Symlinked directories can loop back on themselves
			let canonical = fs::canonicalize(&dir).await.unwrap_or_else(|_| dir.clone());
			if !visited.insert(canonical) {
				trace!(dir = %dir.display(), "Directory already walked");
				continue;
			}

			let mut entries = match fs::read_dir(&dir).await {
				Ok(read_dir) => ReadDirStream::new(read_dir),
				Err(e) => {
					self.non_critical(NonCriticalScanError::Walk {
						path: dir,
						reason: e.to_string(),
					});
					continue;
				}
			};

			while let Some(entry) = entries.next().await {
				let path = match entry {
					Ok(entry) => entry.path(),
					Err(e) => {
						self.non_critical(NonCriticalScanError::Walk {
							path: dir.clone(),
							reason: e.to_string(),
						});
						continue;
					}
				};

				// Follows symlinks, broken ones are skipped here
				match fs::metadata(&path).await {
					Ok(metadata) => self.visit(path, &metadata, &mut walked, &mut to_walk),
					Err(e) => debug!(path = %path.display(), ?e, "Skipping unreadable entry;"),
				}
			}
		}

		walked
	}

	fn visit(
		&self,
		path: PathBuf,
		metadata: &std::fs::Metadata,
		walked: &mut Walked,
		to_walk: &mut VecDeque<PathBuf>,
	) {
		let entry = EntryInfo::from(metadata);

		match self.filter.check(&path, entry) {
			Verdict::Descend => to_walk.push_back(path),
			Verdict::Accept(kind) => {
				bump(&self.counters.walked);
				walked.files.push(WalkedFile { path, kind, entry });
			}
			Verdict::Caption => walked.captions.push(path),
			Verdict::Reject(rejection) => {
				trace!(path = %path.display(), %rejection, "Path rejected");
				bump(&self.counters.rejected);
			}
		}
	}

	#[instrument(skip_all, fields(path = %walked.path.display()), err)]
	async fn scan_file(
		&self,
		walked: WalkedFile,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		let handler = Handler::for_kind(walked.kind, self.config());

		match self.repository().find_file_by_path(&walked.path).await? {
			None => self.create(walked, handler, queue).await,
			Some(file) if file.is_unchanged(walked.entry.size, walked.entry.mod_time) => {
				self.revisit(file, handler, queue).await
			}
			Some(file) => self.update(file, walked, handler, queue).await,
		}
	}

	/// Metadata of the file, or `None` along with a recorded error when it can't be read.
	///
	/// The boolean is `false` when decoration failed, generation is skipped for such files.
	async fn decorate(&self, path: &Path, previous: Option<&MediaInfo>) -> (Option<MediaInfo>, bool) {
		let Some(decorator) = Decorator::for_path(path, self.config()) else {
			return (previous.cloned(), true);
		};

		match decorator
			.decorate(&*self.generator.encoder, path, previous)
			.await
		{
			Ok(media) => (media, true),
			Err(e) => {
				self.non_critical(NonCriticalScanError::Decorate {
					path: path.to_path_buf(),
					reason: e.to_string(),
				});
				(None, false)
			}
		}
	}

	async fn create(
		&self,
		walked: WalkedFile,
		handler: Handler,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		let WalkedFile { path, kind, entry } = walked;

		let fingerprints = fingerprint::calculate(path.clone(), kind, self.config()).await?;
		let (media, decorated) = self.decorate(&path, None).await;

		let mut tx = self.repository().begin().await?;

		let parent_folder_id = ensure_folders(&mut *tx, &path, self.config()).await?;
		let file = tx
			.create_file(File {
				id: 0,
				path,
				parent_folder_id,
				size: entry.size,
				mod_time: entry.mod_time,
				fingerprints,
				media,
			})
			.await?;
		let handled = handler.handle(&mut *tx, &file).await?;

		tx.commit().await?;

		debug!(file_id = file.id, "New file;");
		bump(&self.counters.created);
		bump(&self.counters.handled);

		if decorated {
			self.queue_generation(&file, &handled, queue).await?;
		}

		Ok(())
	}

	async fn update(
		&self,
		mut file: File,
		walked: WalkedFile,
		handler: Handler,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		let fingerprints =
			fingerprint::calculate(walked.path.clone(), walked.kind, self.config()).await?;
		let (media, decorated) = self.decorate(&file.path, file.media.as_ref()).await;

		debug!(
			file_id = file.id,
			old_size = file.size,
			new_size = walked.entry.size,
			"File changed;"
		);

		// A stale phash is dropped with the rest, it is generated again lazily
		file.fingerprints = fingerprints;
		file.size = walked.entry.size;
		file.mod_time = walked.entry.mod_time;
		file.media = media;

		let mut tx = self.repository().begin().await?;
		tx.update_file(&file).await?;
		let handled = handler.handle(&mut *tx, &file).await?;
		tx.commit().await?;

		bump(&self.counters.updated);
		bump(&self.counters.handled);

		if decorated {
			self.queue_generation(&file, &handled, queue).await?;
		}

		Ok(())
	}

	/// Unchanged file: only fills metadata gaps, and runs the handler when forced
	async fn revisit(
		&self,
		mut file: File,
		handler: Handler,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		bump(&self.counters.unchanged);

		let mut changed = false;
		let mut decorated = true;

		if needs_decoration(&file.path, file.media.as_ref(), self.config()) {
			let (media, ok) = self.decorate(&file.path, None).await;
			decorated = ok;
			changed = media.is_some();
			file.media = media;
		}

		changed |= captions::clean(&mut file).await;

		let forced = self.handler_required(&file, handler).await?;

		if !changed && !forced {
			trace!(file_id = file.id, "File unchanged");
			return Ok(());
		}

		let mut tx = self.repository().begin().await?;
		if changed {
			tx.update_file(&file).await?;
		}
		let handled = if forced {
			Some(handler.handle(&mut *tx, &file).await?)
		} else {
			None
		};
		tx.commit().await?;

		if let Some(handled) = handled {
			debug!(file_id = file.id, "Handler forced on unchanged file;");
			bump(&self.counters.handled);

			if decorated {
				self.queue_generation(&file, &handled, queue).await?;
			}
		}

		Ok(())
	}

	async fn handler_required(&self, file: &File, handler: Handler) -> Result<bool, ScanError> {
		if self
			.repository()
			.count_by_file(handler.object_kind(), file.id)
			.await? == 0
		{
			return Ok(true);
		}

		// Only the first worker reaching a folder checks its gallery
		if let Handler::Image {
			folder_galleries: true,
		} = handler
		{
			if self.folders.first_visit(file.parent_folder_id) {
				return Ok(self
					.repository()
					.find_galleries_by_folder(file.parent_folder_id)
					.await?
					.is_empty());
			}
		}

		Ok(false)
	}

	async fn queue_generation(
		&self,
		file: &File,
		handled: &Handled,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		if !self.generate.any() {
			return Ok(());
		}

		match handled {
			Handled::Scenes(scenes) => {
				for scene in scenes {
					self.queue_scene(scene, file, queue).await?;
				}
			}
			Handled::Images(images) if !images.is_empty() => {
				self.queue_image(file, queue).await?;
			}
			Handled::Images(_) | Handled::Galleries(_) => {}
		}

		Ok(())
	}

	async fn queue_scene(
		&self,
		scene: &Scene,
		file: &File,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		let hash = match artifact_hash(file, self.config().naming_algorithm) {
			Ok(hash) => hash,
			Err(e) => {
				self.non_critical(NonCriticalScanError::Generate {
					path: file.path.clone(),
					reason: e.to_string(),
				});
				return Ok(());
			}
		};

		for (_, task) in self
			.generator
			.scene_tasks(&self.generate, scene, file, &hash, false)
		{
			let dispatched = queue.dispatch(task).await?;
			self.count(dispatched);
		}

		Ok(())
	}

	async fn queue_image(
		&self,
		file: &File,
		queue: &TaskQueue<GenerateError>,
	) -> Result<(), ScanError> {
		let Some(checksum) = file.fingerprints.md5() else {
			self.non_critical(NonCriticalScanError::Generate {
				path: file.path.clone(),
				reason: "image has no md5 checksum".to_string(),
			});
			return Ok(());
		};

		for (artifact, task) in self.generator.image_tasks(&self.generate, file, checksum) {
			// Thumbnails are cheap enough to block the file on
			let dispatched = if artifact == Artifact::Thumbnail {
				queue.run_inline(task).await
			} else {
				queue.dispatch(task).await?
			};
			self.count(dispatched);
		}

		Ok(())
	}

	fn count(&self, dispatched: Dispatched) {
		match dispatched {
			Dispatched::Queued | Dispatched::RanInline(_) | Dispatched::FailedInline => {
				bump(&self.counters.tasks_queued);
			}
			Dispatched::NotRequired | Dispatched::Discarded => {}
		}
	}
}

/// Registers the folder chain of `path` up to its library root, returns the parent folder id
async fn ensure_folders(
	tx: &mut dyn Transaction,
	path: &Path,
	config: &ScanConfig,
) -> Result<FolderId, ScanError> {
	let Some(dir) = path.parent() else {
		return Err(ScanError::MissingFolder(path.to_path_buf()));
	};

	let root = config.library_for(path).map(|library| library.path.as_path());

	let mut missing = Vec::new();
	let mut known = None;
	let mut current = Some(dir);

	while let Some(dir) = current {
		if let Some(folder) = tx.find_folder_by_path(dir).await? {
			known = Some(folder.id);
			break;
		}

		missing.push(dir.to_path_buf());

		if root.map_or(true, |root| dir == root || !dir.starts_with(root)) {
			break;
		}
		current = dir.parent();
	}

	let mut parent_folder_id = known;

	for dir in missing.into_iter().rev() {
		let mod_time = fs::metadata(&dir)
			.await
			.ok()
			.and_then(|metadata| metadata.modified().ok())
			.map(DateTime::<Utc>::from)
			.unwrap_or_default();

		let folder = tx
			.create_folder(Folder {
				id: 0,
				path: dir,
				parent_folder_id,
				mod_time,
			})
			.await?;

		trace!(folder_id = folder.id, path = %folder.path.display(), "Created folder");

		parent_folder_id = Some(folder.id);
	}

	parent_folder_id.ok_or_else(|| ScanError::MissingFolder(path.to_path_buf()))
}
