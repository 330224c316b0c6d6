//! Job bodies run by the job manager: each one owns a task queue for its generation work and
//! hands its output back through a oneshot channel once done.

use crate::{
	config::ScanConfig,
	generate::{GenerateError, NonCriticalGenerateError},
};

use mk_task_system::{QueueConfig, QueueSummary, DEFAULT_QUEUE_CAPACITY};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{trace, warn};

mod clean;
mod generate;
mod migrate_hash;
mod scan;

pub use clean::{remove_empty_galleries, CleanJob, CleanOutput};
pub use generate::{GenerateJob, GenerateOutput, GenerateSelection};
pub use migrate_hash::{MigrateHashJob, MigrateHashOutput};
pub use scan::{ScanJob, ScanOutput};

const NOTIFIER_CAPACITY: usize = 16;

/// Failures on single files or artifacts, recorded on the job output
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NonCriticalJobError {
	#[error("failed to remove file '{}': {reason}", .path.display())]
	RemoveFile { path: PathBuf, reason: String },
	#[error("failed to remove folder '{}': {reason}", .path.display())]
	RemoveFolder { path: PathBuf, reason: String },
	#[error("failed to remove artifact '{}': {reason}", .path.display())]
	RemoveArtifact { path: PathBuf, reason: String },
	#[error("failed to rename artifact '{}' to '{}': {reason}", .from.display(), .to.display())]
	RenameArtifact {
		from: PathBuf,
		to: PathBuf,
		reason: String,
	},
	#[error("skipped {kind} <id={id}>: {reason}")]
	Skipped {
		kind: String,
		id: u64,
		reason: String,
	},
}

/// What happened to the generation tasks of a job
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GenerationSummary {
	pub completed: u64,
	pub canceled: u64,
	pub not_required: u64,
	pub discarded: u64,
	pub panicked: usize,
	pub peak_concurrency: usize,
	pub errors: Vec<NonCriticalGenerateError>,
}

impl From<QueueSummary<GenerateError>> for GenerationSummary {
	fn from(summary: QueueSummary<GenerateError>) -> Self {
		let QueueSummary {
			completed,
			canceled,
			not_required,
			discarded,
			errors,
			panicked,
			peak_concurrency,
		} = summary;

		Self {
			completed,
			canceled,
			not_required,
			discarded,
			panicked: panicked.len(),
			peak_concurrency,
			errors: errors
				.into_iter()
				.filter_map(|(task_id, e)| match e {
					// Formats the encoder can't handle are expected, not worth reporting
					GenerateError::UnsupportedFormat(path) => {
						trace!(%task_id, path = %path.display(), "Unsupported format skipped");
						None
					}
					e => Some(NonCriticalGenerateError::Task {
						task: task_id.to_string(),
						reason: e.to_string(),
					}),
				})
				.collect(),
		}
	}
}

/// Which job finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryChange {
	Scan,
	Clean,
}

/// Fan-out of library change notifications, every subscriber gets each one
#[derive(Debug, Clone)]
pub struct ScanNotifier {
	tx: broadcast::Sender<LibraryChange>,
}

impl Default for ScanNotifier {
	fn default() -> Self {
		Self::new()
	}
}

impl ScanNotifier {
	#[must_use]
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(NOTIFIER_CAPACITY);
		Self { tx }
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<LibraryChange> {
		self.tx.subscribe()
	}

	/// Never blocks, returns how many subscribers were notified
	pub fn notify(&self, change: LibraryChange) -> usize {
		self.tx.send(change).unwrap_or_else(|_| {
			trace!(?change, "No library change subscribers");
			0
		})
	}
}

/// Queue settings shared by every job of a scan configuration
#[must_use]
pub fn queue_config(config: &ScanConfig) -> QueueConfig {
	QueueConfig {
		workers: config.parallel_tasks,
		capacity: DEFAULT_QUEUE_CAPACITY,
		sequential: config.sequential_scanning,
	}
}

fn deliver<T>(output_tx: oneshot::Sender<T>, output: T) {
	if output_tx.send(output).is_err() {
		warn!("Job output receiver dropped before the job finished;");
	}
}
