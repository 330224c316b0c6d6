use crate::{
	config::{GenerateOptions, ScanConfig},
	generate::{artifact_hash, Artifact, GenerateError, Generator},
	model::{File, FileId, HashAlgorithm, Image, ImageId, Scene, SceneId},
	repository::{Repository, RepositoryError},
};

use mk_core_job_system::{JobContext, JobExec, JobResult};
use mk_task_system::{Dispatched, QueueConfig, TaskQueue};

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

use super::{deliver, queue_config, GenerationSummary, NonCriticalJobError};

/// Objects to generate for, everything when not given
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateSelection {
	pub scene_ids: Vec<SceneId>,
	pub image_ids: Vec<ImageId>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GenerateOutput {
	/// Tasks handed to the queue, per artifact kind
	pub queued: BTreeMap<Artifact, u64>,
	pub generation: GenerationSummary,
	pub non_critical_errors: Vec<NonCriticalJobError>,
}

/// Queues generation for stored scenes and images, regardless of any scan
pub struct GenerateJob {
	generator: Generator,
	options: GenerateOptions,
	naming: HashAlgorithm,
	queue_config: QueueConfig,
	selection: Option<GenerateSelection>,
	force_transcodes: bool,
	output_tx: oneshot::Sender<GenerateOutput>,
}

impl GenerateJob {
	#[must_use]
	pub fn new(
		options: GenerateOptions,
		config: &ScanConfig,
		generator: Generator,
	) -> (Self, oneshot::Receiver<GenerateOutput>) {
		let (output_tx, output_rx) = oneshot::channel();

		let job = Self {
			generator,
			options,
			naming: config.naming_algorithm,
			queue_config: queue_config(config),
			selection: None,
			force_transcodes: false,
			output_tx,
		};

		(job, output_rx)
	}

	#[must_use]
	pub fn with_selection(mut self, selection: GenerateSelection) -> Self {
		self.selection = Some(selection);
		self
	}

	/// Transcode even videos that could be streamed as they are
	#[must_use]
	pub const fn with_forced_transcodes(mut self, force: bool) -> Self {
		self.force_transcodes = force;
		self
	}

	fn repository(&self) -> &dyn Repository {
		&*self.generator.repository
	}

	async fn scenes(&self) -> Result<Vec<Scene>, RepositoryError> {
		let Some(selection) = &self.selection else {
			return self.repository().all_scenes().await;
		};

		let mut scenes = Vec::with_capacity(selection.scene_ids.len());
		for id in &selection.scene_ids {
			if let Some(scene) = self.repository().find_scene(*id).await? {
				scenes.push(scene);
			}
		}
		Ok(scenes)
	}

	async fn images(&self) -> Result<Vec<Image>, RepositoryError> {
		let Some(selection) = &self.selection else {
			return self.repository().all_images().await;
		};

		let mut images = Vec::with_capacity(selection.image_ids.len());
		for id in &selection.image_ids {
			if let Some(image) = self.repository().find_image(*id).await? {
				images.push(image);
			}
		}
		Ok(images)
	}

	async fn queue_all(
		&self,
		ctx: &JobContext,
		queue: &TaskQueue<GenerateError>,
		output: &mut GenerateOutput,
	) -> JobResult {
		let mut count = |artifact: Artifact, dispatched: Dispatched| {
			if matches!(
				dispatched,
				Dispatched::Queued | Dispatched::RanInline(_) | Dispatched::FailedInline
			) {
				*output.queued.entry(artifact).or_default() += 1;
			}
		};
		let mut skipped = Vec::new();

		for scene in self.scenes().await? {
			if ctx.is_cancelled() {
				break;
			}

			let Some(file) = self.primary_file(scene.primary_file_id()).await? else {
				skipped.push(skip("scene", scene.id, "scene has no file"));
				continue;
			};

			let hash = match artifact_hash(&file, self.naming) {
				Ok(hash) => hash,
				Err(e) => {
					skipped.push(skip("scene", scene.id, e));
					continue;
				}
			};

			for (artifact, task) in self.generator.scene_tasks(
				&self.options,
				&scene,
				&file,
				&hash,
				self.force_transcodes,
			) {
				count(artifact, queue.dispatch(task).await?);
			}
		}

		for image in self.images().await? {
			if ctx.is_cancelled() {
				break;
			}

			let Some(file) = self.primary_file(image.primary_file_id()).await? else {
				skipped.push(skip("image", image.id, "image has no file"));
				continue;
			};

			let Some(checksum) = file.fingerprints.md5() else {
				skipped.push(skip("image", image.id, "image has no md5 checksum"));
				continue;
			};

			for (artifact, task) in self.generator.image_tasks(&self.options, &file, checksum) {
				count(artifact, queue.dispatch(task).await?);
			}
		}

		output.non_critical_errors.extend(skipped);

		Ok(())
	}

	async fn primary_file(&self, file_id: Option<FileId>) -> Result<Option<File>, RepositoryError> {
		match file_id {
			Some(id) => self.repository().find_file(id).await,
			None => Ok(None),
		}
	}
}

fn skip(kind: &str, id: u64, reason: impl fmt::Display) -> NonCriticalJobError {
	let reason = reason.to_string();
	debug!(%kind, id, %reason, "Skipping generation;");
	NonCriticalJobError::Skipped {
		kind: kind.to_string(),
		id,
		reason,
	}
}

#[async_trait]
impl JobExec for GenerateJob {
	#[instrument(skip_all, fields(job_id = ctx.id(), overwrite = self.generator.overwrite), err)]
	async fn execute(self: Box<Self>, ctx: JobContext) -> JobResult {
		let queue = TaskQueue::<GenerateError>::new(
			self.queue_config,
			ctx.interrupter().clone(),
			Arc::new(ctx.progress().clone()),
		)?;

		ctx.progress().set_total(0);

		let mut output = GenerateOutput::default();
		let res = self.queue_all(&ctx, &queue, &mut output).await;

		info!(queued = ?output.queued, "Generation tasks queued;");

		output.generation = GenerationSummary::from(queue.close().await);
		res?;

		let Self { output_tx, .. } = *self;
		deliver(output_tx, output);

		Ok(())
	}
}
