use mk_core::{Engine, EngineConfig, Error, GenerateRequest};
use mk_core_heavy_lifting::{
	config::{GenerateOptions, Library, ScanInput},
	encoder::{Args, Encoder, EncoderError},
	jobs::{GenerateSelection, LibraryChange},
	model::VideoInfo,
	repository::{Reader, Repository},
	MemoryRepository,
};
use mk_core_job_system::Status;
use mk_read_lock::ReadLease;
use mk_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::time::timeout;
use tracing_test::traced_test;

const DEADLINE: Duration = Duration::from_secs(20);

struct StubEncoder;

#[async_trait]
impl Encoder for StubEncoder {
	async fn probe(&self, _path: &Path) -> Result<VideoInfo, EncoderError> {
		Ok(VideoInfo {
			format: "mp4".to_string(),
			duration: 10.0,
			video_codec: "h264".to_string(),
			audio_codec: "aac".to_string(),
			width: 1280,
			height: 720,
			frame_rate: 25.0,
			frame_count: 250,
			..Default::default()
		})
	}

	async fn generate(
		&self,
		_lease: &ReadLease,
		_args: &Args,
		output: &Path,
	) -> Result<(), EncoderError> {
		std::fs::write(output, b"artifact").map_err(|e| FileIOError::from((output, e)))?;
		Ok(())
	}

	async fn generate_output(
		&self,
		_lease: &ReadLease,
		_args: &Args,
	) -> Result<Vec<u8>, EncoderError> {
		Ok(b"artifact".to_vec())
	}
}

struct TestEngine {
	_dir: TempDir,
	data_dir: PathBuf,
	library: PathBuf,
	repository: Arc<MemoryRepository>,
	engine: Engine,
}

async fn engine() -> TestEngine {
	let dir = tempfile::tempdir().unwrap();
	let data_dir = dir.path().join("data");
	let library = dir.path().join("library");
	std::fs::create_dir_all(&library).unwrap();

	let repository = Arc::new(MemoryRepository::new());
	let engine = Engine::with_encoder(
		&data_dir,
		Arc::clone(&repository) as Arc<dyn Repository>,
		Arc::new(StubEncoder),
	)
	.await
	.unwrap();

	engine
		.update_config(|config| config.libraries = vec![Library::new(&library)])
		.await
		.unwrap();

	TestEngine {
		_dir: dir,
		data_dir,
		library,
		repository,
		engine,
	}
}

impl TestEngine {
	fn write(&self, name: &str, len: usize) -> PathBuf {
		let path = self.library.join(name);
		std::fs::write(&path, vec![7; len]).unwrap();
		path
	}

	async fn finished(&self, id: u64) {
		let job = timeout(DEADLINE, self.engine.wait_for(id))
			.await
			.unwrap()
			.unwrap()
			.unwrap();

		assert_eq!(job.status, Status::Finished, "{job}");
	}
}

#[tokio::test]
#[traced_test]
async fn first_start_writes_the_config() {
	let test = engine().await;

	let saved = EngineConfig::load(&test.data_dir).await.unwrap();

	assert_eq!(saved, test.engine.config());
	assert_eq!(saved.libraries, vec![Library::new(&test.library)]);
	assert!(test.data_dir.join("generated").join("tmp").is_dir());
}

#[tokio::test]
#[traced_test]
async fn scan_then_generate_through_the_engine() {
	let test = engine().await;
	let mut changes = test.engine.scan_subscribe();

	test.write("a.mp4", 4096);
	test.write("b.mp4", 8192);

	let (id, output_rx) = test.engine.scan(ScanInput::default()).await.unwrap();
	test.finished(id).await;

	let output = output_rx.await.unwrap();
	assert_eq!(output.scan.created, 2);
	assert_eq!(output.scan.tasks_queued, 0);
	assert_eq!(changes.recv().await.unwrap(), LibraryChange::Scan);

	let scene_id = test.repository.all_scenes().await.unwrap()[0].id;

	let (id, output_rx) = test
		.engine
		.generate(GenerateRequest {
			options: GenerateOptions {
				covers: true,
				..Default::default()
			},
			selection: Some(GenerateSelection {
				scene_ids: vec![scene_id],
				image_ids: Vec::new(),
			}),
			..Default::default()
		})
		.await
		.unwrap();
	test.finished(id).await;

	let output = output_rx.await.unwrap();
	assert_eq!(output.generation.completed, 1);
}

#[tokio::test]
#[traced_test]
async fn clean_drops_vanished_files() {
	let test = engine().await;

	let path = test.write("a.mp4", 4096);
	test.write("b.mp4", 8192);

	let (id, _) = test.engine.scan(ScanInput::default()).await.unwrap();
	test.finished(id).await;

	std::fs::remove_file(&path).unwrap();

	let (id, output_rx) = test.engine.clean(false).await.unwrap();
	test.finished(id).await;

	assert_eq!(output_rx.await.unwrap().removed_files, vec![path]);
	assert_eq!(test.repository.all_files().await.unwrap().len(), 1);
	assert_eq!(test.repository.all_scenes().await.unwrap().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn killed_streams_end() {
	let test = engine().await;

	test.write("a.mp4", 4096);

	let (id, _) = test.engine.scan(ScanInput::default()).await.unwrap();
	test.finished(id).await;

	let scene_id = test.repository.all_scenes().await.unwrap()[0].id;

	let mut stream = test.engine.open_scene_stream(scene_id, None).await.unwrap();
	assert_eq!(test.engine.kill_running_streams(scene_id).await.unwrap(), 1);

	assert!(timeout(DEADLINE, stream.next()).await.unwrap().is_none());

	let stream = test.engine.open_scene_stream(scene_id, None).await.unwrap();
	let bytes = stream
		.map(|chunk| chunk.unwrap().len())
		.fold(0, |total, len| async move { total + len })
		.await;
	assert_eq!(bytes, 4096);
}

#[tokio::test]
#[traced_test]
async fn streaming_an_unknown_scene_fails() {
	let test = engine().await;

	assert!(matches!(
		test.engine.open_scene_stream(42, None).await,
		Err(Error::SceneNotFound(42))
	));
}

#[tokio::test]
#[traced_test]
async fn unhashed_library_has_no_duplicates() {
	let test = engine().await;

	test.write("a.mp4", 4096);
	let (id, _) = test.engine.scan(ScanInput::default()).await.unwrap();
	test.finished(id).await;

	assert!(test.engine.find_duplicates(8, -1.0).await.unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn changing_the_generated_path_moves_new_artifacts() {
	let test = engine().await;
	let elsewhere = test.data_dir.join("elsewhere");

	test.engine
		.update_config(|config| config.generated_path = elsewhere.clone())
		.await
		.unwrap();

	assert_eq!(test.engine.generated_paths().root(), elsewhere);
	assert!(elsewhere.join("tmp").is_dir());
	assert_eq!(
		EngineConfig::load(&test.data_dir).await.unwrap().generated_path,
		elsewhere
	);
}
