use mk_core::{Engine, Submitted};
use mk_core_heavy_lifting::ScanInput;
use mk_core_job_system::{JobEvent, JobId, Status};

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
	Human,
	Json,
}

pub struct Context {
	pub engine: Arc<Engine>,
	pub format: OutputFormat,
}

impl Context {
	pub const fn new(engine: Arc<Engine>, format: OutputFormat) -> Self {
		Self { engine, format }
	}

	/// Prints `output` as pretty json, or through `human`
	pub fn print<T: Serialize>(&self, output: &T, human: impl FnOnce(&T)) -> Result<()> {
		match self.format {
			OutputFormat::Human => human(output),
			OutputFormat::Json => println!("{}", serde_json::to_string_pretty(output)?),
		}

		Ok(())
	}

	/// Waits for a submitted job, reporting its progress on stderr, and takes its output
	pub async fn finish<T>(&self, (id, output_rx): Submitted<T>) -> Result<T> {
		let progress = self.report_progress(id).await?;

		let job = self.engine.wait_for(id).await?;
		if let Some(progress) = progress {
			progress.abort();
		}

		let Some(job) = job else {
			bail!("job {id} vanished before it ended");
		};

		if let Some(error) = &job.error {
			bail!("{job} failed: {error}");
		}

		if job.status == Status::Cancelled {
			bail!("{job}");
		}

		output_rx
			.await
			.map_err(|_| anyhow!("{job} ended without an output"))
	}

	/// The store only lives as long as the process, so every command other than `scan` walks the
	/// libraries first
	pub async fn load_library(&self) -> Result<()> {
		let output = self.finish(self.engine.scan(ScanInput::default()).await?).await?;

		debug!(
			created = output.scan.created,
			rejected = output.scan.rejected,
			"Library loaded;"
		);

		Ok(())
	}

	async fn report_progress(&self, id: JobId) -> Result<Option<JoinHandle<()>>> {
		if matches!(self.format, OutputFormat::Json) {
			return Ok(None);
		}

		let subscription = self.engine.subscribe().await?;

		Ok(Some(tokio::spawn(async move {
			let mut last = None;

			while let Some(event) = subscription.recv().await {
				let JobEvent::UpdatedJob(job) = event else {
					continue;
				};

				if job.id != id {
					continue;
				}

				#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
				let percent = job.progress.map(|p| (p * 100.0) as u8);
				if percent != last {
					if let Some(percent) = percent {
						eprintln!("[{percent:>3}%] {}", job.description);
					}
					last = percent;
				}
			}
		})))
	}
}
