use crate::{
	config::{ScanConfig, ScanInput},
	generate::{GenerateError, Generator},
	model::GalleryId,
	repository::Repository,
	scanner::{filter::PathFilter, ScanReport, Scanner},
};

use mk_core_job_system::{JobContext, JobExec, JobResult};
use mk_task_system::{QueueConfig, TaskQueue};

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};

use super::{
	deliver, queue_config, remove_empty_galleries, GenerationSummary, LibraryChange, ScanNotifier,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScanOutput {
	pub scan: ScanReport,
	pub generation: GenerationSummary,
	/// Folder galleries left without images, removed unless the cleanup is a dry run
	pub removed_galleries: Vec<GalleryId>,
}

/// Scans the library, queueing generation for what it creates, then drops empty galleries
pub struct ScanJob {
	scanner: Scanner,
	roots: Vec<PathBuf>,
	queue_config: QueueConfig,
	repository: Arc<dyn Repository>,
	notifier: ScanNotifier,
	dry_run_cleanup: bool,
	output_tx: oneshot::Sender<ScanOutput>,
}

impl ScanJob {
	/// Scans `input.paths`, or every library when empty
	#[must_use]
	pub fn new(
		input: ScanInput,
		config: ScanConfig,
		generator: Generator,
		notifier: ScanNotifier,
	) -> (Self, oneshot::Receiver<ScanOutput>) {
		let ScanInput {
			paths,
			generate,
			min_mod_time,
		} = input;

		let roots = if paths.is_empty() {
			config
				.libraries
				.iter()
				.map(|library| library.path.clone())
				.collect()
		} else {
			paths
		};

		let (output_tx, output_rx) = oneshot::channel();

		let job = Self {
			queue_config: queue_config(&config),
			repository: Arc::clone(&generator.repository),
			scanner: Scanner::new(PathFilter::new(config, min_mod_time), generator, generate),
			roots,
			notifier,
			dry_run_cleanup: false,
			output_tx,
		};

		(job, output_rx)
	}

	/// Only list the empty galleries instead of removing them
	#[must_use]
	pub const fn with_dry_run_cleanup(mut self, dry_run: bool) -> Self {
		self.dry_run_cleanup = dry_run;
		self
	}
}

#[async_trait]
impl JobExec for ScanJob {
	#[instrument(skip_all, fields(job_id = ctx.id(), roots = self.roots.len()), err)]
	async fn execute(self: Box<Self>, ctx: JobContext) -> JobResult {
		let Self {
			scanner,
			roots,
			queue_config,
			repository,
			notifier,
			dry_run_cleanup,
			output_tx,
		} = *self;

		let queue = TaskQueue::<GenerateError>::new(
			queue_config,
			ctx.interrupter().clone(),
			Arc::new(ctx.progress().clone()),
		)?;

		let res = scanner.run(&roots, &queue, ctx.progress()).await;

		// Tasks already handed to workers finish even if the scan itself failed
		let generation = GenerationSummary::from(queue.close().await);

		let mut output = ScanOutput {
			scan: res?,
			generation,
			removed_galleries: Vec::new(),
		};

		if ctx.is_cancelled() {
			info!(
				discarded = output.generation.discarded,
				"Scan cancelled, skipping gallery cleanup;"
			);
			deliver(output_tx, output);
			return Ok(());
		}

		notifier.notify(LibraryChange::Scan);

		match remove_empty_galleries(&*repository, dry_run_cleanup).await {
			Ok(removed) => {
				output.removed_galleries = removed.into_iter().map(|gallery| gallery.id).collect();
			}
			Err(e) => warn!(?e, "Failed to remove empty galleries after scan;"),
		}

		deliver(output_tx, output);

		Ok(())
	}
}
