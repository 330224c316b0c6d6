use crate::model::{
	File, FileId, Folder, FolderId, Gallery, GalleryId, Image, ImageId, Scene, SceneId,
};

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use super::{Reader, Repository, RepositoryError, Transaction};

#[derive(Debug, Default)]
struct State {
	folders: BTreeMap<FolderId, Folder>,
	folder_paths: HashMap<PathBuf, FolderId>,
	files: BTreeMap<FileId, File>,
	file_paths: HashMap<PathBuf, FileId>,
	scenes: BTreeMap<SceneId, Scene>,
	images: BTreeMap<ImageId, Image>,
	galleries: BTreeMap<GalleryId, Gallery>,
}

/// Previous value of a row, `None` when the row didn't exist
#[derive(Debug)]
enum Undo {
	Folder(FolderId, Option<Folder>),
	File(FileId, Option<File>),
	Scene(SceneId, Option<Scene>),
	Image(ImageId, Option<Image>),
	Gallery(GalleryId, Option<Gallery>),
}

impl State {
	fn put_folder(&mut self, id: FolderId, value: Option<Folder>) -> Option<Folder> {
		let previous = self.folders.remove(&id);
		if let Some(prev) = &previous {
			if self.folder_paths.get(&prev.path) == Some(&id) {
				self.folder_paths.remove(&prev.path);
			}
		}
		if let Some(folder) = value {
			self.folder_paths.insert(folder.path.clone(), id);
			self.folders.insert(id, folder);
		}
		previous
	}

	fn put_file(&mut self, id: FileId, value: Option<File>) -> Option<File> {
		let previous = self.files.remove(&id);
		if let Some(prev) = &previous {
			if self.file_paths.get(&prev.path) == Some(&id) {
				self.file_paths.remove(&prev.path);
			}
		}
		if let Some(file) = value {
			self.file_paths.insert(file.path.clone(), id);
			self.files.insert(id, file);
		}
		previous
	}

	fn put_scene(&mut self, id: SceneId, value: Option<Scene>) -> Option<Scene> {
		match value {
			Some(scene) => self.scenes.insert(id, scene),
			None => self.scenes.remove(&id),
		}
	}

	fn put_image(&mut self, id: ImageId, value: Option<Image>) -> Option<Image> {
		match value {
			Some(image) => self.images.insert(id, image),
			None => self.images.remove(&id),
		}
	}

	fn put_gallery(&mut self, id: GalleryId, value: Option<Gallery>) -> Option<Gallery> {
		match value {
			Some(gallery) => self.galleries.insert(id, gallery),
			None => self.galleries.remove(&id),
		}
	}

	fn revert(&mut self, undo: Undo) {
		match undo {
			Undo::Folder(id, value) => {
				self.put_folder(id, value);
			}
			Undo::File(id, value) => {
				self.put_file(id, value);
			}
			Undo::Scene(id, value) => {
				self.put_scene(id, value);
			}
			Undo::Image(id, value) => {
				self.put_image(id, value);
			}
			Undo::Gallery(id, value) => {
				self.put_gallery(id, value);
			}
		}
	}
}

#[derive(Debug, Default)]
struct Inner {
	state: RwLock<State>,
	next_id: AtomicU64,
	poisoned: Mutex<HashSet<PathBuf>>,
}

/// Repository kept in memory, used by tests and by the command line front-end.
///
/// Transactions are serialized: [`begin`](Repository::begin) waits until the current writer
/// commits or rolls back. Writes are applied right away and undone on rollback, so plain reads
/// outside of a transaction may observe uncommitted data.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
	inner: Arc<Inner>,
	writer: Arc<AsyncMutex<()>>,
}

impl Default for MemoryRepository {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryRepository {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				next_id: AtomicU64::new(1),
				..Default::default()
			}),
			writer: Arc::new(AsyncMutex::new(())),
		}
	}

	/// Makes every file write on `path` fail with a backend error, to exercise rollbacks
	pub fn poison_path(&self, path: impl Into<PathBuf>) {
		self.inner.poisoned.lock().insert(path.into());
	}

	fn state(&self) -> RwLockReadGuard<'_, State> {
		self.inner.state.read()
	}
}

pub struct MemoryTransaction {
	inner: Arc<Inner>,
	undo: Vec<Undo>,
	committed: bool,
	_writer: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
	fn state(&self) -> RwLockReadGuard<'_, State> {
		self.inner.state.read()
	}

	fn next_id(&self) -> u64 {
		self.inner.next_id.fetch_add(1, Ordering::Relaxed)
	}

	fn check_poisoned(&self, path: &Path) -> Result<(), RepositoryError> {
		if self.inner.poisoned.lock().contains(path) {
			return Err(RepositoryError::Backend(format!(
				"write rejected for '{}'",
				path.display()
			)));
		}
		Ok(())
	}
}

impl Drop for MemoryTransaction {
	fn drop(&mut self) {
		if self.committed || self.undo.is_empty() {
			return;
		}

		trace!(writes = self.undo.len(), "Rolling back transaction");

		let mut state = self.inner.state.write();
		while let Some(undo) = self.undo.pop() {
			state.revert(undo);
		}
	}
}

macro_rules! impl_reader {
	($($ty:ty),+) => {
		$(
			#[async_trait]
			impl Reader for $ty {
				async fn find_folder(&self, id: FolderId) -> Result<Option<Folder>, RepositoryError> {
					Ok(self.state().folders.get(&id).cloned())
				}

				async fn find_folder_by_path(&self, path: &Path) -> Result<Option<Folder>, RepositoryError> {
					let state = self.state();
					Ok(state
						.folder_paths
						.get(path)
						.and_then(|id| state.folders.get(id))
						.cloned())
				}

				async fn all_folders(&self) -> Result<Vec<Folder>, RepositoryError> {
					Ok(self.state().folders.values().cloned().collect())
				}

				async fn find_file(&self, id: FileId) -> Result<Option<File>, RepositoryError> {
					Ok(self.state().files.get(&id).cloned())
				}

				async fn find_file_by_path(&self, path: &Path) -> Result<Option<File>, RepositoryError> {
					let state = self.state();
					Ok(state
						.file_paths
						.get(path)
						.and_then(|id| state.files.get(id))
						.cloned())
				}

				async fn all_files(&self) -> Result<Vec<File>, RepositoryError> {
					Ok(self.state().files.values().cloned().collect())
				}

				async fn find_scene(&self, id: SceneId) -> Result<Option<Scene>, RepositoryError> {
					Ok(self.state().scenes.get(&id).cloned())
				}

				async fn find_scenes_by_file(&self, file_id: FileId) -> Result<Vec<Scene>, RepositoryError> {
					Ok(self
						.state()
						.scenes
						.values()
						.filter(|scene| scene.file_ids.contains(&file_id))
						.cloned()
						.collect())
				}

				async fn all_scenes(&self) -> Result<Vec<Scene>, RepositoryError> {
					Ok(self.state().scenes.values().cloned().collect())
				}

				async fn find_image(&self, id: ImageId) -> Result<Option<Image>, RepositoryError> {
					Ok(self.state().images.get(&id).cloned())
				}

				async fn find_images_by_file(&self, file_id: FileId) -> Result<Vec<Image>, RepositoryError> {
					Ok(self
						.state()
						.images
						.values()
						.filter(|image| image.file_ids.contains(&file_id))
						.cloned()
						.collect())
				}

				async fn all_images(&self) -> Result<Vec<Image>, RepositoryError> {
					Ok(self.state().images.values().cloned().collect())
				}

				async fn count_images_in_gallery(&self, id: GalleryId) -> Result<usize, RepositoryError> {
					Ok(self
						.state()
						.images
						.values()
						.filter(|image| image.gallery_ids.contains(&id))
						.count())
				}

				async fn find_gallery(&self, id: GalleryId) -> Result<Option<Gallery>, RepositoryError> {
					Ok(self.state().galleries.get(&id).cloned())
				}

				async fn find_galleries_by_file(&self, file_id: FileId) -> Result<Vec<Gallery>, RepositoryError> {
					Ok(self
						.state()
						.galleries
						.values()
						.filter(|gallery| gallery.file_ids.contains(&file_id))
						.cloned()
						.collect())
				}

				async fn find_galleries_by_folder(
					&self,
					folder_id: FolderId,
				) -> Result<Vec<Gallery>, RepositoryError> {
					Ok(self
						.state()
						.galleries
						.values()
						.filter(|gallery| gallery.folder_id == Some(folder_id))
						.cloned()
						.collect())
				}

				async fn all_galleries(&self) -> Result<Vec<Gallery>, RepositoryError> {
					Ok(self.state().galleries.values().cloned().collect())
				}
			}
		)+
	};
}

impl_reader!(MemoryRepository, MemoryTransaction);

#[async_trait]
impl Repository for MemoryRepository {
	async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError> {
		let writer = Arc::clone(&self.writer).lock_owned().await;

		Ok(Box::new(MemoryTransaction {
			inner: Arc::clone(&self.inner),
			undo: Vec::new(),
			committed: false,
			_writer: writer,
		}))
	}
}

fn not_found(kind: &'static str, id: u64) -> RepositoryError {
	RepositoryError::NotFound { kind, id }
}

#[async_trait]
impl Transaction for MemoryTransaction {
	async fn create_folder(&mut self, mut folder: Folder) -> Result<Folder, RepositoryError> {
		if self.state().folder_paths.contains_key(&folder.path) {
			return Err(RepositoryError::DuplicatePath(folder.path));
		}

		folder.id = self.next_id();
		let previous = self
			.inner
			.state
			.write()
			.put_folder(folder.id, Some(folder.clone()));
		self.undo.push(Undo::Folder(folder.id, previous));

		Ok(folder)
	}

	async fn destroy_folder(&mut self, id: FolderId) -> Result<(), RepositoryError> {
		let previous = self.inner.state.write().put_folder(id, None);
		if previous.is_none() {
			return Err(not_found("folder", id));
		}
		self.undo.push(Undo::Folder(id, previous));
		Ok(())
	}

	async fn create_file(&mut self, mut file: File) -> Result<File, RepositoryError> {
		self.check_poisoned(&file.path)?;

		if self.state().file_paths.contains_key(&file.path) {
			return Err(RepositoryError::DuplicatePath(file.path));
		}

		file.id = self.next_id();
		let previous = self
			.inner
			.state
			.write()
			.put_file(file.id, Some(file.clone()));
		self.undo.push(Undo::File(file.id, previous));

		Ok(file)
	}

	async fn update_file(&mut self, file: &File) -> Result<(), RepositoryError> {
		self.check_poisoned(&file.path)?;

		let mut state = self.inner.state.write();
		if !state.files.contains_key(&file.id) {
			return Err(not_found("file", file.id));
		}
		let previous = state.put_file(file.id, Some(file.clone()));
		drop(state);

		self.undo.push(Undo::File(file.id, previous));
		Ok(())
	}

	/// Also unlinks the file from every object referencing it
	async fn destroy_file(&mut self, id: FileId) -> Result<(), RepositoryError> {
		let mut state = self.inner.state.write();

		let Some(previous) = state.put_file(id, None) else {
			return Err(not_found("file", id));
		};
		let mut undo = vec![Undo::File(id, Some(previous))];

		let scenes = state
			.scenes
			.values()
			.filter(|scene| scene.file_ids.contains(&id))
			.cloned()
			.collect::<Vec<_>>();
		for mut scene in scenes {
			scene.file_ids.retain(|file_id| *file_id != id);
			let scene_id = scene.id;
			undo.push(Undo::Scene(scene_id, state.put_scene(scene_id, Some(scene))));
		}

		let images = state
			.images
			.values()
			.filter(|image| image.file_ids.contains(&id))
			.cloned()
			.collect::<Vec<_>>();
		for mut image in images {
			image.file_ids.retain(|file_id| *file_id != id);
			let image_id = image.id;
			undo.push(Undo::Image(image_id, state.put_image(image_id, Some(image))));
		}

		let galleries = state
			.galleries
			.values()
			.filter(|gallery| gallery.file_ids.contains(&id))
			.cloned()
			.collect::<Vec<_>>();
		for mut gallery in galleries {
			gallery.file_ids.retain(|file_id| *file_id != id);
			let gallery_id = gallery.id;
			undo.push(Undo::Gallery(
				gallery_id,
				state.put_gallery(gallery_id, Some(gallery)),
			));
		}

		drop(state);
		self.undo.extend(undo);
		Ok(())
	}

	async fn create_scene(&mut self, mut scene: Scene) -> Result<Scene, RepositoryError> {
		scene.id = self.next_id();
		let previous = self
			.inner
			.state
			.write()
			.put_scene(scene.id, Some(scene.clone()));
		self.undo.push(Undo::Scene(scene.id, previous));
		Ok(scene)
	}

	async fn update_scene(&mut self, scene: &Scene) -> Result<(), RepositoryError> {
		let mut state = self.inner.state.write();
		if !state.scenes.contains_key(&scene.id) {
			return Err(not_found("scene", scene.id));
		}
		let previous = state.put_scene(scene.id, Some(scene.clone()));
		drop(state);

		self.undo.push(Undo::Scene(scene.id, previous));
		Ok(())
	}

	async fn destroy_scene(&mut self, id: SceneId) -> Result<(), RepositoryError> {
		let previous = self.inner.state.write().put_scene(id, None);
		if previous.is_none() {
			return Err(not_found("scene", id));
		}
		self.undo.push(Undo::Scene(id, previous));
		Ok(())
	}

	async fn create_image(&mut self, mut image: Image) -> Result<Image, RepositoryError> {
		image.id = self.next_id();
		let previous = self
			.inner
			.state
			.write()
			.put_image(image.id, Some(image.clone()));
		self.undo.push(Undo::Image(image.id, previous));
		Ok(image)
	}

	async fn update_image(&mut self, image: &Image) -> Result<(), RepositoryError> {
		let mut state = self.inner.state.write();
		if !state.images.contains_key(&image.id) {
			return Err(not_found("image", image.id));
		}
		let previous = state.put_image(image.id, Some(image.clone()));
		drop(state);

		self.undo.push(Undo::Image(image.id, previous));
		Ok(())
	}

	async fn destroy_image(&mut self, id: ImageId) -> Result<(), RepositoryError> {
		let previous = self.inner.state.write().put_image(id, None);
		if previous.is_none() {
			return Err(not_found("image", id));
		}
		self.undo.push(Undo::Image(id, previous));
		Ok(())
	}

	async fn create_gallery(&mut self, mut gallery: Gallery) -> Result<Gallery, RepositoryError> {
		gallery.id = self.next_id();
		let previous = self
			.inner
			.state
			.write()
			.put_gallery(gallery.id, Some(gallery.clone()));
		self.undo.push(Undo::Gallery(gallery.id, previous));
		Ok(gallery)
	}

	async fn update_gallery(&mut self, gallery: &Gallery) -> Result<(), RepositoryError> {
		let mut state = self.inner.state.write();
		if !state.galleries.contains_key(&gallery.id) {
			return Err(not_found("gallery", gallery.id));
		}
		let previous = state.put_gallery(gallery.id, Some(gallery.clone()));
		drop(state);

		self.undo.push(Undo::Gallery(gallery.id, previous));
		Ok(())
	}

	/// Also removes the gallery from its images
	async fn destroy_gallery(&mut self, id: GalleryId) -> Result<(), RepositoryError> {
		let mut state = self.inner.state.write();

		let Some(previous) = state.put_gallery(id, None) else {
			return Err(not_found("gallery", id));
		};
		let mut undo = vec![Undo::Gallery(id, Some(previous))];

		let images = state
			.images
			.values()
			.filter(|image| image.gallery_ids.contains(&id))
			.cloned()
			.collect::<Vec<_>>();
		for mut image in images {
			image.gallery_ids.retain(|gallery_id| *gallery_id != id);
			let image_id = image.id;
			undo.push(Undo::Image(image_id, state.put_image(image_id, Some(image))));
		}

		drop(state);
		self.undo.extend(undo);
		Ok(())
	}

	async fn commit(mut self: Box<Self>) -> Result<(), RepositoryError> {
		trace!(writes = self.undo.len(), "Committing transaction");
		self.committed = true;
		Ok(())
	}
}
