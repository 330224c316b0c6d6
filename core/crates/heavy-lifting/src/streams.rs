use crate::{
	generate::Generator,
	model::{HashAlgorithm, SceneId},
	repository::RepositoryError,
};

use tracing::{debug, instrument};

/// Cuts off every reader of a scene: its source files and their transcodes.
///
/// Returns the number of leases signalled, readers go away on their own shortly after.
#[instrument(skip(generator), err)]
pub async fn kill_running_streams(
	generator: &Generator,
	naming: HashAlgorithm,
	scene_id: SceneId,
) -> Result<usize, RepositoryError> {
	let repository = &generator.repository;

	let scene = repository
		.find_scene(scene_id)
		.await?
		.ok_or(RepositoryError::NotFound {
			kind: "scene",
			id: scene_id,
		})?;

	let mut cancelled = 0;

	for file_id in &scene.file_ids {
		let Some(file) = repository.find_file(*file_id).await? else {
			continue;
		};

		cancelled += generator.locks.cancel(&file.path);

		if let Some(hash) = file.hash_for(naming) {
			cancelled += generator.locks.cancel(generator.paths().transcode(hash));
		}
	}

	debug!(cancelled, "Killed running streams;");

	Ok(cancelled)
}
