use mk_core_heavy_lifting::{
	config::GenerateOptions,
	duplicates::find_scene_duplicates,
	generate::Artifact,
	jobs::{
		CleanJob, GenerateJob, GenerateOutput, GenerateSelection, LibraryChange, MigrateHashJob,
	},
	model::HashAlgorithm,
	repository::Reader,
	scanner::filter::PathFilter,
	streams::kill_running_streams,
};
use mk_core_job_system::{Job, Status};
use mk_phash::Tolerance;

use std::{collections::BTreeMap, sync::atomic::Ordering};

use pretty_assertions::assert_eq;
use tracing_test::traced_test;

mod common;

use common::{covers_and_phashes, FakeEncoder, Fixture};

fn video_bytes(seed: u8) -> Vec<u8> {
	vec![seed; 2048 + usize::from(seed)]
}

fn covers() -> GenerateOptions {
	GenerateOptions {
		covers: true,
		..Default::default()
	}
}

#[tokio::test]
#[traced_test]
async fn clean_removes_missing_files_with_their_objects() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let gone = fixture.write("gone.mp4", &video_bytes(1));
	let kept = fixture.write("kept.mp4", &video_bytes(2));
	fixture.scan(fixture.config(), covers()).await;

	let gone_hash = fixture
		.repository
		.find_file_by_path(&gone)
		.await
		.unwrap()
		.unwrap()
		.fingerprints
		.oshash()
		.unwrap()
		.to_string();
	assert!(fixture.paths.cover(&gone_hash).exists());

	std::fs::remove_file(&gone).unwrap();

	let mut changes = fixture.notifier.subscribe();

	let (job, output_rx) = CleanJob::new(
		PathFilter::new(fixture.config(), None),
		fixture.generator(),
		false,
		fixture.notifier.clone(),
	);
	let id = fixture.manager.add("Cleaning library", job).await.unwrap();
	let job = fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.removed_files, vec![gone.clone()]);
	assert_eq!(output.removed_artifacts, 1);
	assert!(output.non_critical_errors.is_empty());
	assert_eq!(changes.recv().await.unwrap(), LibraryChange::Clean);

	assert!(!fixture.paths.cover(&gone_hash).exists());
	assert!(fixture
		.repository
		.find_file_by_path(&gone)
		.await
		.unwrap()
		.is_none());

	let scenes = fixture.repository.all_scenes().await.unwrap();
	assert_eq!(scenes.len(), 1);

	let kept_file = fixture
		.repository
		.find_file_by_path(&kept)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(scenes[0].file_ids, vec![kept_file.id]);
}

#[tokio::test]
#[traced_test]
async fn dry_run_clean_changes_nothing() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let excluded = fixture.write("samples/clip.mp4", &video_bytes(1));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	let mut config = fixture.config();
	config.excludes = vec!["/samples/".to_string()];

	let (job, output_rx) = CleanJob::new(
		PathFilter::new(config, None),
		fixture.generator(),
		true,
		fixture.notifier.clone(),
	);
	let id = fixture.manager.add("Cleaning library", job).await.unwrap();
	fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert!(output.dry_run);
	assert_eq!(output.removed_files, vec![excluded.clone()]);
	assert!(fixture
		.repository
		.find_file_by_path(&excluded)
		.await
		.unwrap()
		.is_some());
	assert_eq!(fixture.repository.all_scenes().await.unwrap().len(), 1);
}

async fn generate_covers(fixture: &Fixture) -> (Job, GenerateOutput) {
	let (job, output_rx) = GenerateJob::new(covers(), &fixture.config(), fixture.generator());
	let id = fixture.manager.add("Generating", job).await.unwrap();
	let job = fixture.wait(id).await;

	(job, output_rx.await.unwrap())
}

#[tokio::test]
#[traced_test]
async fn generate_job_only_queues_missing_artifacts() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	fixture.write("a.mp4", &video_bytes(1));
	fixture.write("b.mp4", &video_bytes(2));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	let (job, first) = generate_covers(&fixture).await;
	assert_eq!(job.status, Status::Finished);
	assert_eq!(first.queued, BTreeMap::from([(Artifact::Cover, 2)]));
	assert_eq!(first.generation.completed, 2);

	for file in fixture.repository.all_files().await.unwrap() {
		assert!(fixture
			.paths
			.cover(file.fingerprints.oshash().unwrap())
			.exists());
	}

	let (_, second) = generate_covers(&fixture).await;
	assert!(second.queued.is_empty());
	assert_eq!(second.generation.not_required, 2);
}

#[tokio::test]
#[traced_test]
async fn unreadable_inputs_are_skipped_without_errors() {
	let fixture = Fixture::new(FakeEncoder::unsupported(60.0)).await;

	let path = fixture.write("a.mkv", &video_bytes(1));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	let (job, output) = generate_covers(&fixture).await;

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.queued, BTreeMap::from([(Artifact::Cover, 1)]));
	assert_eq!(output.generation.completed, 0);
	assert!(output.generation.errors.is_empty());

	let file = fixture
		.repository
		.find_file_by_path(&path)
		.await
		.unwrap()
		.unwrap();
	assert!(!fixture
		.paths
		.cover(file.fingerprints.oshash().unwrap())
		.exists());
}

#[tokio::test]
#[traced_test]
async fn previews_fall_back_when_the_encoder_rejects_seeking() {
	let fixture = Fixture::new(FakeEncoder::rejecting_input_seeking(60.0)).await;

	let path = fixture.write("a.mp4", &video_bytes(1));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	let (job, output_rx) = GenerateJob::new(
		GenerateOptions {
			previews: true,
			..Default::default()
		},
		&fixture.config(),
		fixture.generator(),
	);
	let id = fixture.manager.add("Generating", job).await.unwrap();
	let job = fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.generation.completed, 1);
	assert!(output.generation.errors.is_empty());
	assert_eq!(fixture.encoder.failures.load(Ordering::Relaxed), 1);

	let file = fixture
		.repository
		.find_file_by_path(&path)
		.await
		.unwrap()
		.unwrap();
	assert!(fixture
		.paths
		.video_preview(file.fingerprints.oshash().unwrap())
		.exists());
	assert_eq!(
		std::fs::read_dir(fixture.paths.root().join("tmp"))
			.unwrap()
			.count(),
		0
	);
}

#[tokio::test]
#[traced_test]
async fn generate_job_honors_the_selection() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	fixture.write("a.mp4", &video_bytes(1));
	fixture.write("b.mp4", &video_bytes(2));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	let scene_id = fixture.repository.all_scenes().await.unwrap()[0].id;

	let (job, output_rx) = GenerateJob::new(covers(), &fixture.config(), fixture.generator());
	let job = job.with_selection(GenerateSelection {
		scene_ids: vec![scene_id, 9999],
		image_ids: Vec::new(),
	});

	let id = fixture.manager.add("Generating", job).await.unwrap();
	fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert_eq!(output.queued, BTreeMap::from([(Artifact::Cover, 1)]));
}

#[tokio::test]
#[traced_test]
async fn migrating_hashes_renames_artifacts() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let path = fixture.write("a.mp4", &video_bytes(1));

	let mut config = fixture.config();
	config.calculate_md5 = true;
	fixture.scan(config, covers()).await;

	let file = fixture
		.repository
		.find_file_by_path(&path)
		.await
		.unwrap()
		.unwrap();
	let oshash_cover = fixture.paths.cover(file.fingerprints.oshash().unwrap());
	let md5_cover = fixture.paths.cover(file.fingerprints.md5().unwrap());
	assert!(oshash_cover.exists());

	let (job, output_rx) = MigrateHashJob::new(fixture.generator(), HashAlgorithm::Md5);
	let id = fixture.manager.add("Migrating hashes", job).await.unwrap();
	let job = fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.renamed, 1);
	assert_eq!(output.skipped, 0);
	assert!(!oshash_cover.exists());
	assert!(md5_cover.exists());
}

#[tokio::test]
#[traced_test]
async fn videos_without_both_hashes_are_not_migrated() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	fixture.write("a.mp4", &video_bytes(1));
	fixture.scan(fixture.config(), covers()).await;

	let (job, output_rx) = MigrateHashJob::new(fixture.generator(), HashAlgorithm::Md5);
	let id = fixture.manager.add("Migrating hashes", job).await.unwrap();
	fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert_eq!(output.renamed, 0);
	assert_eq!(output.skipped, 1);
}

#[tokio::test]
#[traced_test]
async fn identical_videos_are_duplicates() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	fixture.write("a.mp4", &video_bytes(1));
	fixture.write("b.mp4", &video_bytes(2));
	fixture.scan(fixture.config(), covers_and_phashes()).await;

	let mut scene_ids = fixture
		.repository
		.all_scenes()
		.await
		.unwrap()
		.into_iter()
		.map(|scene| scene.id)
		.collect::<Vec<_>>();
	scene_ids.sort_unstable();

	let mut groups = find_scene_duplicates(
		&*fixture.repository,
		Tolerance {
			distance: 0,
			duration_diff: 1.0,
		},
	)
	.await
	.unwrap();

	assert_eq!(groups.len(), 1);
	groups[0].sort_unstable();
	assert_eq!(groups[0], scene_ids);
}

#[tokio::test]
#[traced_test]
async fn killing_streams_cancels_leases_on_the_scene_files() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let path = fixture.write("a.mp4", &video_bytes(1));
	let other = fixture.write("b.mp4", &video_bytes(2));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	let file = fixture
		.repository
		.find_file_by_path(&path)
		.await
		.unwrap()
		.unwrap();
	let scene = fixture
		.repository
		.find_scenes_by_file(file.id)
		.await
		.unwrap()
		.remove(0);

	let stream = fixture.locks.acquire_read(&path);
	let transcode = fixture
		.locks
		.acquire_read(fixture.paths.transcode(file.fingerprints.oshash().unwrap()));
	let unrelated = fixture.locks.acquire_read(&other);

	let cancelled = kill_running_streams(&fixture.generator(), HashAlgorithm::Oshash, scene.id)
		.await
		.unwrap();

	assert_eq!(cancelled, 2);
	assert!(stream.is_cancelled());
	assert!(transcode.is_cancelled());
	assert!(!unrelated.is_cancelled());
}

#[tokio::test]
#[traced_test]
async fn unknown_scene_streams_are_an_error() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	assert!(
		kill_running_streams(&fixture.generator(), HashAlgorithm::Oshash, 42)
			.await
			.is_err()
	);
}

#[tokio::test]
#[traced_test]
async fn scans_notify_subscribers() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;
	let mut changes = fixture.notifier.subscribe();

	fixture.write("a.mp4", &video_bytes(1));
	fixture.scan(fixture.config(), GenerateOptions::default()).await;

	assert_eq!(changes.recv().await.unwrap(), LibraryChange::Scan);
}
