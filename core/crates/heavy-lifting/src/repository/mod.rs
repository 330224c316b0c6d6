//! Persistence boundary of the engine.
//!
//! Every write happens inside a [`Transaction`], scan handlers open one per file so a failure only
//! loses the work done for that file. Dropping a transaction without committing it rolls it back.

use super::model::{
	File, FileId, Folder, FolderId, Gallery, GalleryId, Image, ImageId, Scene, SceneId,
};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use strum::Display;
use thiserror::Error;

mod memory;

pub use memory::MemoryRepository;

/// Domain objects that reference files
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum ObjectKind {
	Scene,
	Image,
	Gallery,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("{kind} <id={id}> not found")]
	NotFound { kind: &'static str, id: u64 },
	#[error("path already registered: {}", .0.display())]
	DuplicatePath(PathBuf),
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// Read operations, available on the repository itself and inside transactions (where they also
/// see the transaction's own writes)
#[async_trait]
pub trait Reader: Send + Sync {
	async fn find_folder(&self, id: FolderId) -> Result<Option<Folder>, RepositoryError>;
	async fn find_folder_by_path(&self, path: &Path) -> Result<Option<Folder>, RepositoryError>;
	async fn all_folders(&self) -> Result<Vec<Folder>, RepositoryError>;

	async fn find_file(&self, id: FileId) -> Result<Option<File>, RepositoryError>;
	async fn find_file_by_path(&self, path: &Path) -> Result<Option<File>, RepositoryError>;
	async fn all_files(&self) -> Result<Vec<File>, RepositoryError>;

	async fn find_scene(&self, id: SceneId) -> Result<Option<Scene>, RepositoryError>;
	async fn find_scenes_by_file(&self, file_id: FileId) -> Result<Vec<Scene>, RepositoryError>;
	async fn all_scenes(&self) -> Result<Vec<Scene>, RepositoryError>;

	async fn find_image(&self, id: ImageId) -> Result<Option<Image>, RepositoryError>;
	async fn find_images_by_file(&self, file_id: FileId) -> Result<Vec<Image>, RepositoryError>;
	async fn all_images(&self) -> Result<Vec<Image>, RepositoryError>;
	async fn count_images_in_gallery(&self, id: GalleryId) -> Result<usize, RepositoryError>;

	async fn find_gallery(&self, id: GalleryId) -> Result<Option<Gallery>, RepositoryError>;
	async fn find_galleries_by_file(&self, file_id: FileId)
		-> Result<Vec<Gallery>, RepositoryError>;
	async fn find_galleries_by_folder(
		&self,
		folder_id: FolderId,
	) -> Result<Vec<Gallery>, RepositoryError>;
	async fn all_galleries(&self) -> Result<Vec<Gallery>, RepositoryError>;

	/// How many objects of `kind` reference the file
	async fn count_by_file(&self, kind: ObjectKind, file_id: FileId) -> Result<usize, RepositoryError> {
		Ok(match kind {
			ObjectKind::Scene => self.find_scenes_by_file(file_id).await?.len(),
			ObjectKind::Image => self.find_images_by_file(file_id).await?.len(),
			ObjectKind::Gallery => self.find_galleries_by_file(file_id).await?.len(),
		})
	}
}

#[async_trait]
pub trait Repository: Reader + 'static {
	async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError>;
}

/// A unit of writes. Ids passed to `create_*` calls are ignored, the stored object (with its new
/// id) is returned.
#[async_trait]
pub trait Transaction: Reader {
	async fn create_folder(&mut self, folder: Folder) -> Result<Folder, RepositoryError>;
	async fn destroy_folder(&mut self, id: FolderId) -> Result<(), RepositoryError>;

	async fn create_file(&mut self, file: File) -> Result<File, RepositoryError>;
	async fn update_file(&mut self, file: &File) -> Result<(), RepositoryError>;
	async fn destroy_file(&mut self, id: FileId) -> Result<(), RepositoryError>;

	async fn create_scene(&mut self, scene: Scene) -> Result<Scene, RepositoryError>;
	async fn update_scene(&mut self, scene: &Scene) -> Result<(), RepositoryError>;
	async fn destroy_scene(&mut self, id: SceneId) -> Result<(), RepositoryError>;

	async fn create_image(&mut self, image: Image) -> Result<Image, RepositoryError>;
	async fn update_image(&mut self, image: &Image) -> Result<(), RepositoryError>;
	async fn destroy_image(&mut self, id: ImageId) -> Result<(), RepositoryError>;

	async fn create_gallery(&mut self, gallery: Gallery) -> Result<Gallery, RepositoryError>;
	async fn update_gallery(&mut self, gallery: &Gallery) -> Result<(), RepositoryError>;
	async fn destroy_gallery(&mut self, id: GalleryId) -> Result<(), RepositoryError>;

	async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}
