use crate::{
	config::{MediaKind, ScanConfig},
	model::{title_from_path, File, FolderId, Gallery, GalleryId, Image, Scene},
	repository::{ObjectKind, RepositoryError, Transaction},
};

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

/// Domain objects referencing a handled file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
	Scenes(Vec<Scene>),
	Images(Vec<Image>),
	Galleries(Vec<Gallery>),
}

/// Creates the domain object of a file kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
	Scene,
	Image {
		/// Every image joins the gallery of its parent folder
		folder_galleries: bool,
	},
	Gallery,
}

impl Handler {
	#[must_use]
	pub const fn for_kind(kind: MediaKind, config: &ScanConfig) -> Self {
		match kind {
			MediaKind::Video => Self::Scene,
			MediaKind::Image => Self::Image {
				folder_galleries: config.create_galleries_from_folders,
			},
			MediaKind::Gallery => Self::Gallery,
		}
	}

	#[must_use]
	pub const fn object_kind(self) -> ObjectKind {
		match self {
			Self::Scene => ObjectKind::Scene,
			Self::Image { .. } => ObjectKind::Image,
			Self::Gallery => ObjectKind::Gallery,
		}
	}

	/// Makes sure the file is referenced by a domain object, inside the file's transaction
	pub async fn handle(
		self,
		tx: &mut dyn Transaction,
		file: &File,
	) -> Result<Handled, RepositoryError> {
		match self {
			Self::Scene => handle_scene(tx, file).await.map(Handled::Scenes),
			Self::Image { folder_galleries } => handle_image(tx, file, folder_galleries)
				.await
				.map(Handled::Images),
			Self::Gallery => handle_gallery(tx, file).await.map(Handled::Galleries),
		}
	}
}

async fn handle_scene(tx: &mut dyn Transaction, file: &File) -> Result<Vec<Scene>, RepositoryError> {
	let scenes = tx.find_scenes_by_file(file.id).await?;
	if !scenes.is_empty() {
		return Ok(scenes);
	}

	let scene = tx
		.create_scene(Scene {
			id: 0,
			title: title_from_path(&file.path),
			file_ids: vec![file.id],
			interactive_speed: None,
			updated_at: Utc::now(),
		})
		.await?;

	debug!(scene_id = scene.id, path = %file.path.display(), "Created scene;");

	Ok(vec![scene])
}

/// Gallery of the folder, created on first use
async fn folder_gallery(
	tx: &mut dyn Transaction,
	folder_id: FolderId,
) -> Result<GalleryId, RepositoryError> {
	if let Some(gallery) = tx.find_galleries_by_folder(folder_id).await?.first() {
		return Ok(gallery.id);
	}

	let folder = tx
		.find_folder(folder_id)
		.await?
		.ok_or(RepositoryError::NotFound {
			kind: "folder",
			id: folder_id,
		})?;

	let gallery = tx
		.create_gallery(Gallery {
			id: 0,
			title: folder
				.path
				.file_name()
				.map(|name| name.to_string_lossy().into_owned())
				.unwrap_or_default(),
			folder_id: Some(folder_id),
			file_ids: Vec::new(),
			updated_at: Utc::now(),
		})
		.await?;

	debug!(gallery_id = gallery.id, folder = %folder.path.display(), "Created folder gallery;");

	Ok(gallery.id)
}

async fn handle_image(
	tx: &mut dyn Transaction,
	file: &File,
	folder_galleries: bool,
) -> Result<Vec<Image>, RepositoryError> {
	let gallery_id = if folder_galleries {
		Some(folder_gallery(tx, file.parent_folder_id).await?)
	} else {
		None
	};

	let mut images = tx.find_images_by_file(file.id).await?;

	if images.is_empty() {
		let image = tx
			.create_image(Image {
				id: 0,
				title: title_from_path(&file.path),
				file_ids: vec![file.id],
				gallery_ids: gallery_id.into_iter().collect(),
				updated_at: Utc::now(),
			})
			.await?;

		debug!(image_id = image.id, path = %file.path.display(), "Created image;");

		return Ok(vec![image]);
	}

	if let Some(gallery_id) = gallery_id {
		for image in images
			.iter_mut()
			.filter(|image| !image.gallery_ids.contains(&gallery_id))
		{
			image.gallery_ids.push(gallery_id);
			image.updated_at = Utc::now();
			tx.update_image(image).await?;
		}
	}

	Ok(images)
}

async fn handle_gallery(
	tx: &mut dyn Transaction,
	file: &File,
) -> Result<Vec<Gallery>, RepositoryError> {
	let galleries = tx.find_galleries_by_file(file.id).await?;
	if !galleries.is_empty() {
		return Ok(galleries);
	}

	let gallery = tx
		.create_gallery(Gallery {
			id: 0,
			title: title_from_path(&file.path),
			folder_id: None,
			file_ids: vec![file.id],
			updated_at: Utc::now(),
		})
		.await?;

	debug!(gallery_id = gallery.id, path = %file.path.display(), "Created archive gallery;");

	Ok(vec![gallery])
}

/// Remembers the last folders whose gallery was checked, so concurrent workers scanning siblings
/// of the same folder only check it once
#[derive(Debug)]
pub struct FolderCache {
	capacity: usize,
	folders: Mutex<VecDeque<FolderId>>,
}

impl FolderCache {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			capacity,
			folders: Mutex::new(VecDeque::with_capacity(capacity)),
		}
	}

	/// `true` only for the first caller asking about a folder while it is cached
	pub fn first_visit(&self, folder_id: FolderId) -> bool {
		let mut folders = self.folders.lock();

		if let Some(position) = folders.iter().position(|id| *id == folder_id) {
			// Refresh recency
			folders.remove(position);
			folders.push_back(folder_id);
			return false;
		}

		if folders.len() == self.capacity {
			folders.pop_front();
		}
		folders.push_back(folder_id);

		true
	}
}
