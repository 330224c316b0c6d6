use crate::{
	config::MediaKind,
	generate::{file_exists, Generator},
	model::{File, FolderId, Gallery, GalleryId, HashAlgorithm},
	paths::DEFAULT_THUMBNAIL_WIDTH,
	repository::{Repository, RepositoryError},
	scanner::filter::PathFilter,
};

use mk_core_job_system::{JobContext, JobExec, JobResult};

use std::{
	cmp::Reverse,
	collections::{HashMap, HashSet},
	io::ErrorKind,
	path::PathBuf,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::oneshot};
use tracing::{debug, info, instrument, warn};

use super::{deliver, LibraryChange, NonCriticalJobError, ScanNotifier};

/// Removes every folder gallery without images, one transaction each.
///
/// Returns the galleries removed, or that would be on a `dry_run`.
pub async fn remove_empty_galleries(
	repository: &dyn Repository,
	dry_run: bool,
) -> Result<Vec<Gallery>, RepositoryError> {
	let mut removed = Vec::new();

	for gallery in repository.all_galleries().await? {
		// Archive galleries are removed along with their file
		if gallery.folder_id.is_none() || !gallery.file_ids.is_empty() {
			continue;
		}

		if repository.count_images_in_gallery(gallery.id).await? > 0 {
			continue;
		}

		if dry_run {
			info!(gallery_id = gallery.id, title = %gallery.title, "Would remove empty gallery;");
		} else {
			let mut tx = repository.begin().await?;

			// An image may have joined since the check above
			if tx.count_images_in_gallery(gallery.id).await? > 0 {
				continue;
			}

			tx.destroy_gallery(gallery.id).await?;
			tx.commit().await?;

			info!(gallery_id = gallery.id, title = %gallery.title, "Removed empty gallery;");
		}

		removed.push(gallery);
	}

	Ok(removed)
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CleanOutput {
	pub dry_run: bool,
	pub removed_files: Vec<PathBuf>,
	pub removed_folders: Vec<PathBuf>,
	pub removed_artifacts: u64,
	pub removed_galleries: Vec<GalleryId>,
	pub non_critical_errors: Vec<NonCriticalJobError>,
}

/// Drops the files whose path vanished or is now filtered out, along with their artifacts
pub struct CleanJob {
	filter: PathFilter,
	generator: Generator,
	dry_run: bool,
	notifier: ScanNotifier,
	output_tx: oneshot::Sender<CleanOutput>,
}

impl CleanJob {
	#[must_use]
	pub fn new(
		filter: PathFilter,
		generator: Generator,
		dry_run: bool,
		notifier: ScanNotifier,
	) -> (Self, oneshot::Receiver<CleanOutput>) {
		let (output_tx, output_rx) = oneshot::channel();

		(
			Self {
				filter,
				generator,
				dry_run,
				notifier,
				output_tx,
			},
			output_rx,
		)
	}

	fn repository(&self) -> &dyn Repository {
		&*self.generator.repository
	}

	/// Every artifact a file may have, under both naming algorithms for videos
	fn artifacts_of(&self, file: &File) -> Vec<PathBuf> {
		let paths = self.generator.paths();

		match self.filter.config().media_kind(&file.path) {
			Some(MediaKind::Video) => {
				let mut hashes = [HashAlgorithm::Oshash, HashAlgorithm::Md5]
					.into_iter()
					.filter_map(|algorithm| file.hash_for(algorithm))
					.collect::<Vec<_>>();
				hashes.dedup();

				hashes
					.into_iter()
					.flat_map(|hash| paths.video_artifacts(hash))
					.collect()
			}
			Some(MediaKind::Image) => file
				.fingerprints
				.md5()
				.map(|checksum| {
					vec![
						paths.image_thumbnail(checksum, DEFAULT_THUMBNAIL_WIDTH),
						paths.clip_preview(checksum, DEFAULT_THUMBNAIL_WIDTH),
					]
				})
				.unwrap_or_default(),
			Some(MediaKind::Gallery) | None => Vec::new(),
		}
	}

	/// Destroys the file and the objects it was the only file of
	async fn destroy(&self, file: &File) -> Result<(), RepositoryError> {
		let mut tx = self.repository().begin().await?;

		let scenes = tx.find_scenes_by_file(file.id).await?;
		let images = tx.find_images_by_file(file.id).await?;
		let galleries = tx.find_galleries_by_file(file.id).await?;

		tx.destroy_file(file.id).await?;

		for scene in scenes.iter().filter(|scene| scene.file_ids == [file.id]) {
			debug!(scene_id = scene.id, "Destroying scene left without files;");
			tx.destroy_scene(scene.id).await?;
		}
		for image in images.iter().filter(|image| image.file_ids == [file.id]) {
			debug!(image_id = image.id, "Destroying image left without files;");
			tx.destroy_image(image.id).await?;
		}
		for gallery in galleries
			.iter()
			.filter(|gallery| gallery.file_ids == [file.id])
		{
			debug!(gallery_id = gallery.id, "Destroying archive gallery;");
			tx.destroy_gallery(gallery.id).await?;
		}

		tx.commit().await
	}

	async fn remove_artifacts(&self, file: &File, output: &mut CleanOutput) {
		// Streams of the file itself get cut off too, it's gone from the library
		self.generator.locks.cancel(&file.path);

		for path in self.artifacts_of(file) {
			self.generator.locks.cancel(&path);

			match fs::remove_file(&path).await {
				Ok(()) => {
					debug!(path = %path.display(), "Removed artifact;");
					output.removed_artifacts += 1;
				}
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => output.non_critical_errors.push(NonCriticalJobError::RemoveArtifact {
					path,
					reason: e.to_string(),
				}),
			}
		}
	}

	async fn clean_files(&self, ctx: &JobContext, output: &mut CleanOutput) -> JobResult {
		let files = self.repository().all_files().await?;
		ctx.progress().set_total(files.len() as u64);

		for file in files {
			if ctx.is_cancelled() {
				break;
			}

			let reason = if !file_exists(&file.path).await {
				"missing"
			} else if !self.filter.keeps(&file.path) {
				"excluded"
			} else {
				ctx.progress().increment();
				continue;
			};

			info!(path = %file.path.display(), %reason, dry_run = self.dry_run, "Cleaning file;");

			if !self.dry_run {
				if let Err(e) = self.destroy(&file).await {
					warn!(path = %file.path.display(), ?e, "Failed to remove file;");
					output.non_critical_errors.push(NonCriticalJobError::RemoveFile {
						path: file.path,
						reason: e.to_string(),
					});
					ctx.progress().increment();
					continue;
				}

				self.remove_artifacts(&file, output).await;
			}

			output.removed_files.push(file.path);
			ctx.progress().increment();
		}

		Ok(())
	}

	/// Folders that vanished or left the libraries, once nothing references them, deepest first
	async fn clean_folders(&self, ctx: &JobContext, output: &mut CleanOutput) -> JobResult {
		let in_use = self
			.repository()
			.all_files()
			.await?
			.into_iter()
			.map(|file| file.parent_folder_id)
			.collect::<HashSet<_>>();

		let mut folders = self.repository().all_folders().await?;
		folders.sort_by_key(|folder| Reverse(folder.path.components().count()));

		let mut children = HashMap::<FolderId, usize>::new();
		for parent_id in folders.iter().filter_map(|folder| folder.parent_folder_id) {
			*children.entry(parent_id).or_default() += 1;
		}

		for folder in folders {
			if ctx.is_cancelled() {
				break;
			}

			if in_use.contains(&folder.id) || children.get(&folder.id).is_some_and(|n| *n > 0) {
				continue;
			}

			if file_exists(&folder.path).await
				&& self.filter.config().library_for(&folder.path).is_some()
			{
				continue;
			}

			if !self.dry_run {
				let res = async {
					let mut tx = self.repository().begin().await?;
					tx.destroy_folder(folder.id).await?;
					tx.commit().await
				}
				.await;

				if let Err(e) = res {
					output.non_critical_errors.push(NonCriticalJobError::RemoveFolder {
						path: folder.path,
						reason: e.to_string(),
					});
					continue;
				}
			}

			debug!(path = %folder.path.display(), dry_run = self.dry_run, "Removed folder;");

			if let Some(parent_id) = folder.parent_folder_id {
				if let Some(count) = children.get_mut(&parent_id) {
					*count = count.saturating_sub(1);
				}
			}

			output.removed_folders.push(folder.path);
		}

		Ok(())
	}
}

#[async_trait]
impl JobExec for CleanJob {
	#[instrument(skip_all, fields(job_id = ctx.id(), dry_run = self.dry_run), err)]
	async fn execute(self: Box<Self>, ctx: JobContext) -> JobResult {
		let mut output = CleanOutput {
			dry_run: self.dry_run,
			..Default::default()
		};

		self.clean_files(&ctx, &mut output).await?;
		self.clean_folders(&ctx, &mut output).await?;

		if !ctx.is_cancelled() {
			match remove_empty_galleries(self.repository(), self.dry_run).await {
				Ok(removed) => {
					output.removed_galleries =
						removed.into_iter().map(|gallery| gallery.id).collect();
				}
				Err(e) => warn!(?e, "Failed to remove empty galleries;"),
			}

			self.notifier.notify(LibraryChange::Clean);
		}

		info!(
			files = output.removed_files.len(),
			folders = output.removed_folders.len(),
			artifacts = output.removed_artifacts,
			galleries = output.removed_galleries.len(),
			"Clean finished;"
		);

		let Self { output_tx, .. } = *self;
		deliver(output_tx, output);

		Ok(())
	}
}
