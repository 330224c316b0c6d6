//! Near duplicate scenes, from the perceptual hashes stored on their primary files

use crate::{
	model::SceneId,
	repository::{Repository, RepositoryError},
};

use mk_phash::{find_duplicates, Candidate, Tolerance};

use thiserror::Error;
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum DuplicatesError {
	#[error("duplicate search failed: {0}")]
	Blocking(#[from] JoinError),

	#[error(transparent)]
	Repository(#[from] RepositoryError),
}

/// Hashed scenes as duplicate candidates, scenes without a phash are left out
pub async fn scene_candidates(
	repository: &dyn Repository,
) -> Result<Vec<Candidate<SceneId>>, RepositoryError> {
	let mut candidates = Vec::new();

	for scene in repository.all_scenes().await? {
		let Some(file_id) = scene.primary_file_id() else {
			continue;
		};

		let Some(file) = repository.find_file(file_id).await? else {
			continue;
		};

		if let Some(phash) = file.fingerprints.phash() {
			candidates.push(Candidate {
				id: scene.id,
				phash,
				duration: file.video().map_or(0.0, |video| video.duration),
			});
		}
	}

	Ok(candidates)
}

/// Groups of scenes within `tolerance` of each other, computed on the blocking pool
#[instrument(skip(repository), err)]
pub async fn find_scene_duplicates(
	repository: &dyn Repository,
	tolerance: Tolerance,
) -> Result<Vec<Vec<SceneId>>, DuplicatesError> {
	let candidates = scene_candidates(repository).await?;
	let count = candidates.len();

	let buckets = spawn_blocking(move || find_duplicates(&candidates, tolerance)).await?;

	debug!(candidates = count, buckets = buckets.len(), "Duplicate search done;");

	Ok(buckets)
}
