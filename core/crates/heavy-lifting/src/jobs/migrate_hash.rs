use crate::{
	generate::{file_exists, Generator},
	model::{HashAlgorithm, MediaInfo},
};

use mk_core_job_system::{JobContext, JobExec, JobResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::oneshot};
use tracing::{debug, info, instrument, warn};

use super::{deliver, NonCriticalJobError};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MigrateHashOutput {
	pub renamed: u64,
	/// Videos missing one of the two hashes, their artifacts can't be matched
	pub skipped: u64,
	pub non_critical_errors: Vec<NonCriticalJobError>,
}

/// Renames video artifacts after the naming algorithm changed to `naming`
pub struct MigrateHashJob {
	generator: Generator,
	naming: HashAlgorithm,
	output_tx: oneshot::Sender<MigrateHashOutput>,
}

impl MigrateHashJob {
	#[must_use]
	pub fn new(
		generator: Generator,
		naming: HashAlgorithm,
	) -> (Self, oneshot::Receiver<MigrateHashOutput>) {
		let (output_tx, output_rx) = oneshot::channel();

		(
			Self {
				generator,
				naming,
				output_tx,
			},
			output_rx,
		)
	}

	const fn previous_naming(&self) -> HashAlgorithm {
		match self.naming {
			HashAlgorithm::Oshash => HashAlgorithm::Md5,
			HashAlgorithm::Md5 => HashAlgorithm::Oshash,
		}
	}
}

#[async_trait]
impl JobExec for MigrateHashJob {
	#[instrument(skip_all, fields(job_id = ctx.id(), naming = ?self.naming), err)]
	async fn execute(self: Box<Self>, ctx: JobContext) -> JobResult {
		let previous = self.previous_naming();
		let paths = self.generator.paths();
		let mut output = MigrateHashOutput::default();

		let videos = self
			.generator
			.repository
			.all_files()
			.await?
			.into_iter()
			.filter(|file| matches!(file.media, Some(MediaInfo::Video(_))))
			.collect::<Vec<_>>();

		ctx.progress().set_total(videos.len() as u64);

		for file in videos {
			if ctx.is_cancelled() {
				break;
			}

			let (Some(old), Some(new)) = (file.hash_for(previous), file.hash_for(self.naming))
			else {
				output.skipped += 1;
				ctx.progress().increment();
				continue;
			};

			if old == new {
				ctx.progress().increment();
				continue;
			}

			for (from, to) in paths
				.video_artifacts(old)
				.into_iter()
				.zip(paths.video_artifacts(new))
			{
				if !file_exists(&from).await {
					continue;
				}

				if file_exists(&to).await {
					debug!(from = %from.display(), to = %to.display(), "Target already exists, keeping it;");
					continue;
				}

				// Readers of the artifact must let go before it moves
				self.generator.locks.cancel(&from);

				match fs::rename(&from, &to).await {
					Ok(()) => {
						debug!(from = %from.display(), to = %to.display(), "Renamed artifact;");
						output.renamed += 1;
					}
					Err(e) => {
						warn!(from = %from.display(), ?e, "Failed to rename artifact;");
						output.non_critical_errors.push(NonCriticalJobError::RenameArtifact {
							from,
							to,
							reason: e.to_string(),
						});
					}
				}
			}

			ctx.progress().increment();
		}

		info!(
			renamed = output.renamed,
			skipped = output.skipped,
			errors = output.non_critical_errors.len(),
			"Hash migration finished;"
		);

		let Self { output_tx, .. } = *self;
		deliver(output_tx, output);

		Ok(())
	}
}
