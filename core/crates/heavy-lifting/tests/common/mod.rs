#![allow(dead_code)]

use mk_core_heavy_lifting::{
	config::{GenerateOptions, Library, ScanConfig, ScanInput},
	encoder::{Args, Encoder, EncoderError},
	generate::Generator,
	jobs::{ScanJob, ScanNotifier, ScanOutput},
	model::VideoInfo,
	paths::GeneratedPaths,
	repository::MemoryRepository,
};
use mk_core_job_system::{Job, JobManager, JobManagerConfig};
use mk_read_lock::{ReadLease, ReadLockManager};
use mk_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::{sync::Notify, time::timeout};

pub const DEADLINE: Duration = Duration::from_secs(20);

/// Stands in for ffmpeg: frames are real tiny jpegs, everything else a few bytes
#[derive(Debug, Default)]
pub struct FakeEncoder {
	pub duration: f64,
	pub delay: Option<Duration>,
	pub probes: AtomicUsize,
	pub runs: AtomicUsize,
	pub started: Notify,
	/// Every input is reported as unreadable
	pub unsupported: bool,
	/// Video outputs seeking before their input fail, the way ffmpeg does on broken indexes
	pub reject_input_seeking: bool,
	pub failures: AtomicUsize,
}

impl FakeEncoder {
	pub fn new(duration: f64) -> Self {
		Self {
			duration,
			..Default::default()
		}
	}

	pub fn slow(duration: f64, delay: Duration) -> Self {
		Self {
			duration,
			delay: Some(delay),
			..Default::default()
		}
	}

	pub fn unsupported(duration: f64) -> Self {
		Self {
			duration,
			unsupported: true,
			..Default::default()
		}
	}

	pub fn rejecting_input_seeking(duration: f64) -> Self {
		Self {
			duration,
			reject_input_seeking: true,
			..Default::default()
		}
	}

	fn rejects(&self, args: &Args, output: &Path) -> bool {
		let position = |flag: &str| args.iter().position(|arg| arg == flag);

		self.reject_input_seeking
			&& output.extension().is_some_and(|ext| ext == "mp4")
			&& matches!((position("-ss"), position("-i")), (Some(ss), Some(i)) if ss < i)
	}
}

#[async_trait]
impl Encoder for FakeEncoder {
	async fn probe(&self, _path: &Path) -> Result<VideoInfo, EncoderError> {
		self.probes.fetch_add(1, Ordering::Relaxed);

		Ok(VideoInfo {
			format: "mp4".to_string(),
			duration: self.duration,
			video_codec: "h264".to_string(),
			audio_codec: "aac".to_string(),
			width: 1920,
			height: 1080,
			frame_rate: 30.0,
			frame_count: 300,
			bit_rate: 1_000_000,
			..Default::default()
		})
	}

	async fn generate(
		&self,
		lease: &ReadLease,
		args: &Args,
		output: &Path,
	) -> Result<(), EncoderError> {
		self.started.notify_one();

		if self.unsupported {
			return Err(EncoderError::UnsupportedFormat);
		}

		if self.rejects(args, output) {
			self.failures.fetch_add(1, Ordering::Relaxed);
			return Err(EncoderError::Failed {
				status: "exit status: 1".to_string(),
				stderr: "Invalid data found when processing input".to_string(),
			});
		}

		if let Some(delay) = self.delay {
			tokio::select! {
				() = tokio::time::sleep(delay) => {}
				() = lease.cancelled() => {
					return Err(EncoderError::Killed(lease.path().to_path_buf()));
				}
			}
		}

		self.runs.fetch_add(1, Ordering::Relaxed);

		if output.extension().is_some_and(|ext| ext == "jpg") {
			RgbImage::from_pixel(32, 18, Rgb([180, 90, 30]))
				.save(output)
				.map_err(|e| EncoderError::Failed {
					status: "1".to_string(),
					stderr: e.to_string(),
				})?;
		} else {
			std::fs::write(output, b"fake media").map_err(|e| FileIOError::from((output, e)))?;
		}

		Ok(())
	}

	async fn generate_output(
		&self,
		_lease: &ReadLease,
		_args: &Args,
	) -> Result<Vec<u8>, EncoderError> {
		if self.unsupported {
			return Err(EncoderError::UnsupportedFormat);
		}

		self.runs.fetch_add(1, Ordering::Relaxed);
		Ok(b"fake frame".to_vec())
	}
}

pub struct Fixture {
	pub dir: TempDir,
	pub library: PathBuf,
	pub repository: Arc<MemoryRepository>,
	pub encoder: Arc<FakeEncoder>,
	pub locks: ReadLockManager,
	pub paths: Arc<GeneratedPaths>,
	pub manager: JobManager,
	pub notifier: ScanNotifier,
}

impl Fixture {
	pub async fn new(encoder: FakeEncoder) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let library = dir.path().join("library");
		std::fs::create_dir_all(&library).unwrap();

		let paths = GeneratedPaths::new(dir.path().join("generated"));
		paths.ensure_dirs().await.unwrap();

		Self {
			library,
			repository: Arc::new(MemoryRepository::new()),
			encoder: Arc::new(encoder),
			locks: ReadLockManager::new(),
			paths: Arc::new(paths),
			manager: JobManager::new(JobManagerConfig {
				update_throttle: Duration::from_millis(10),
				..Default::default()
			}),
			notifier: ScanNotifier::new(),
			dir,
		}
	}

	pub fn config(&self) -> ScanConfig {
		ScanConfig {
			libraries: vec![Library::new(&self.library)],
			generated_path: self.paths.root().to_path_buf(),
			..Default::default()
		}
	}

	pub fn generator(&self) -> Generator {
		Generator::new(
			Arc::clone(&self.encoder) as Arc<dyn Encoder>,
			self.locks.clone(),
			Arc::clone(&self.paths),
			Arc::clone(&self.repository) as _,
		)
	}

	/// Writes a file under the library, creating its directories
	pub fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
		let path = self.library.join(relative);
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, contents).unwrap();
		path
	}

	pub async fn scan(&self, config: ScanConfig, generate: GenerateOptions) -> (Job, ScanOutput) {
		let (job, output_rx) = ScanJob::new(
			ScanInput {
				generate,
				..Default::default()
			},
			config,
			self.generator(),
			self.notifier.clone(),
		);

		let id = self.manager.add("Scanning library", job).await.unwrap();
		let job = self.wait(id).await;

		(job, output_rx.await.unwrap())
	}

	pub async fn wait(&self, id: u64) -> Job {
		timeout(DEADLINE, self.manager.wait_for(id))
			.await
			.unwrap()
			.unwrap()
			.unwrap()
	}
}

pub fn covers_and_phashes() -> GenerateOptions {
	GenerateOptions {
		covers: true,
		phashes: true,
		..Default::default()
	}
}
