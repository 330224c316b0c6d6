use mk_core_heavy_lifting::{
	config::{GenerateOptions, ScanInput},
	jobs::ScanJob,
	model::{Caption, CaptionType, MediaInfo},
	paths::DEFAULT_THUMBNAIL_WIDTH,
	repository::Reader,
	scanner::NonCriticalScanError,
};
use mk_core_job_system::Status;

use std::{
	io::Cursor,
	path::{Path, PathBuf},
	sync::atomic::Ordering,
	time::Duration,
};

use image::{DynamicImage, ImageOutputFormat, RgbImage};
use pretty_assertions::assert_eq;
use tokio::time::timeout;
use tracing_test::traced_test;

mod common;

use common::{covers_and_phashes, FakeEncoder, Fixture, DEADLINE};

/// Distinct sizes give distinct oshashes
fn video_bytes(seed: u8) -> Vec<u8> {
	vec![seed; 1024 + usize::from(seed)]
}

fn png(width: u32, height: u32) -> Vec<u8> {
	let mut bytes = Vec::new();
	DynamicImage::ImageRgb8(RgbImage::new(width, height))
		.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
		.unwrap();
	bytes
}

async fn thumbnail_of(fixture: &Fixture, path: &Path) -> PathBuf {
	let file = fixture
		.repository
		.find_file_by_path(path)
		.await
		.unwrap()
		.unwrap();

	fixture
		.paths
		.image_thumbnail(file.fingerprints.md5().unwrap(), DEFAULT_THUMBNAIL_WIDTH)
}

fn count_entries(dir: &Path) -> usize {
	std::fs::read_dir(dir).map_or(0, Iterator::count)
}

#[tokio::test]
#[traced_test]
async fn empty_library_finishes_without_work() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let (job, output) = fixture
		.scan(fixture.config(), covers_and_phashes())
		.await;

	assert_eq!(job.status, Status::Finished);
	assert_eq!(job.error, None);
	assert_eq!(output.scan.walked, 0);
	assert_eq!(output.scan.created, 0);
	assert_eq!(output.scan.tasks_queued, 0);
	assert_eq!(output.generation.completed, 0);
	assert!(fixture.repository.all_files().await.unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn rescans_only_work_on_new_files() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;
	let generate = GenerateOptions {
		covers: true,
		previews: true,
		phashes: true,
		..Default::default()
	};

	fixture.write("a.mp4", &video_bytes(1));

	let (job, first) = fixture.scan(fixture.config(), generate).await;
	assert_eq!(job.status, Status::Finished);
	assert_eq!(first.scan.created, 1);
	assert_eq!(first.scan.tasks_queued, 3);

	fixture.write("b.mp4", &video_bytes(2));
	fixture.write("nested/c.mp4", &video_bytes(3));

	let (_, second) = fixture.scan(fixture.config(), generate).await;
	assert_eq!(second.scan.walked, 3);
	assert_eq!(second.scan.created, 2);
	assert_eq!(second.scan.unchanged, 1);
	assert_eq!(second.scan.tasks_queued, 6);

	let (_, third) = fixture.scan(fixture.config(), generate).await;
	assert_eq!(third.scan.created, 0);
	assert_eq!(third.scan.updated, 0);
	assert_eq!(third.scan.unchanged, 3);
	assert_eq!(third.scan.handled, 0);
	assert_eq!(third.scan.tasks_queued, 0);

	assert_eq!(fixture.repository.all_files().await.unwrap().len(), 3);
	assert_eq!(fixture.repository.all_scenes().await.unwrap().len(), 3);

	for file in fixture.repository.all_files().await.unwrap() {
		let hash = file.fingerprints.oshash().unwrap();
		assert!(fixture.paths.cover(hash).exists(), "{}", file.path.display());
		assert!(file.fingerprints.phash().is_some());
	}
}

#[tokio::test]
#[traced_test]
async fn rescans_with_every_artifact_leave_unchanged_files_alone() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;
	let generate = GenerateOptions {
		covers: true,
		previews: true,
		image_previews: true,
		sprites: true,
		phashes: true,
		interactive_heatmaps: true,
		clip_previews: true,
		thumbnails: true,
		transcodes: true,
	};

	fixture.write("a.mp4", &video_bytes(1));
	fixture.write("interactive.mp4", &video_bytes(2));
	fixture.write(
		"interactive.funscript",
		br#"{"actions":[{"at":0,"pos":0},{"at":500,"pos":100},{"at":1000,"pos":0}]}"#,
	);
	fixture.write("album/big.png", &png(1000, 500));

	let (job, first) = fixture.scan(fixture.config(), generate).await;
	assert_eq!(job.status, Status::Finished);
	assert_eq!(first.scan.created, 3);
	assert!(first.scan.tasks_queued > 0);
	assert!(first.generation.errors.is_empty(), "{:?}", first.generation.errors);

	let runs = fixture.encoder.runs.load(Ordering::Relaxed);

	let (job, second) = fixture.scan(fixture.config(), generate).await;
	assert_eq!(job.status, Status::Finished);
	assert_eq!(second.scan.unchanged, 3);
	assert_eq!(second.scan.handled, 0);
	assert_eq!(second.scan.tasks_queued, 0);
	assert_eq!(second.generation.completed, 0);
	assert!(second.generation.errors.is_empty());
	assert_eq!(fixture.encoder.runs.load(Ordering::Relaxed), runs);
}

#[tokio::test]
#[traced_test]
async fn changed_files_are_updated() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let path = fixture.write("a.mp4", &video_bytes(1));
	fixture.scan(fixture.config(), covers_and_phashes()).await;

	let before = fixture
		.repository
		.find_file_by_path(&path)
		.await
		.unwrap()
		.unwrap();
	assert!(before.fingerprints.phash().is_some());

	fixture.write("a.mp4", &video_bytes(9));

	let (_, output) = fixture
		.scan(fixture.config(), GenerateOptions::default())
		.await;
	assert_eq!(output.scan.updated, 1);
	assert_eq!(output.scan.created, 0);

	let after = fixture
		.repository
		.find_file_by_path(&path)
		.await
		.unwrap()
		.unwrap();

	assert_eq!(after.id, before.id);
	assert_eq!(after.size, 1024 + 9);
	assert_ne!(after.fingerprints.oshash(), before.fingerprints.oshash());
	assert_eq!(after.fingerprints.phash(), None);
	assert_eq!(fixture.repository.all_scenes().await.unwrap().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn filtered_paths_are_rejected() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let valid = fixture.write("valid.mp4", &video_bytes(1));
	fixture.write("notes.txt", b"not a video");
	fixture.write("empty.mp4", b"");
	fixture.write("trash/old.mp4", &video_bytes(2));
	fixture.write(".generated/cover.mp4", &video_bytes(3));

	let mut config = fixture.config();
	config.excludes = vec!["/trash/".to_string()];
	config.image_excludes = vec!["/trash/".to_string()];
	config.generated_path = fixture.library.join(".generated");

	let (job, output) = fixture.scan(config, GenerateOptions::default()).await;

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.scan.walked, 1);
	assert_eq!(output.scan.rejected, 4);

	let files = fixture.repository.all_files().await.unwrap();
	assert_eq!(files.len(), 1);
	assert_eq!(files[0].path, valid);
}

#[tokio::test]
#[traced_test]
async fn cancelling_a_scan_kills_running_generation() {
	let fixture = Fixture::new(FakeEncoder::slow(60.0, Duration::from_secs(600))).await;

	for seed in 0..20 {
		fixture.write(&format!("video_{seed:02}.mp4"), &video_bytes(seed));
	}

	let (job, output_rx) = ScanJob::new(
		ScanInput {
			generate: GenerateOptions {
				covers: true,
				..Default::default()
			},
			..Default::default()
		},
		fixture.config(),
		fixture.generator(),
		fixture.notifier.clone(),
	);

	let id = fixture.manager.add("Scanning library", job).await.unwrap();

	timeout(DEADLINE, fixture.encoder.started.notified())
		.await
		.unwrap();

	// The single worker is stuck on the first cover, the others wait in the queue
	timeout(DEADLINE, async {
		while fixture.repository.all_files().await.unwrap().len() < 20 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();

	fixture.manager.cancel_all().await.unwrap();

	let job = fixture.wait(id).await;
	let output = output_rx.await.unwrap();

	assert_eq!(job.status, Status::Cancelled);
	assert_eq!(fixture.encoder.runs.load(Ordering::Relaxed), 0);
	assert_eq!(output.generation.completed, 0);
	assert!(output.generation.discarded > 0);
	assert!(output.removed_galleries.is_empty());
	assert_eq!(count_entries(&fixture.paths.root().join("tmp")), 0);

	for file in fixture.repository.all_files().await.unwrap() {
		let cover = fixture.paths.cover(file.fingerprints.oshash().unwrap());
		assert!(!cover.exists(), "{}", cover.display());
	}
}

#[tokio::test]
#[traced_test]
async fn folder_images_share_a_gallery_and_get_thumbnails() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let big = fixture.write("album/big.png", &png(1000, 500));
	let small = fixture.write("album/small.png", &png(10, 10));

	let mut config = fixture.config();
	config.create_galleries_from_folders = true;

	let (job, output) = fixture
		.scan(
			config,
			GenerateOptions {
				thumbnails: true,
				..Default::default()
			},
		)
		.await;

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.scan.created, 2);
	// The small image is served as it is
	assert_eq!(output.scan.tasks_queued, 1);

	let galleries = fixture.repository.all_galleries().await.unwrap();
	assert_eq!(galleries.len(), 1);
	assert_eq!(galleries[0].title, "album");
	assert!(galleries[0].folder_id.is_some());

	let images = fixture.repository.all_images().await.unwrap();
	assert_eq!(images.len(), 2);
	assert!(images
		.iter()
		.all(|image| image.gallery_ids == [galleries[0].id]));

	let big_thumbnail = thumbnail_of(&fixture, &big).await;
	assert_eq!(image::image_dimensions(&big_thumbnail).unwrap(), (640, 320));
	assert!(!thumbnail_of(&fixture, &small).await.exists());
}

#[tokio::test]
#[traced_test]
async fn captions_are_attached_to_their_video() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let video = fixture.write("movie.mp4", &video_bytes(1));
	fixture.write("movie.en.srt", b"1\n00:00:01,000 --> 00:00:02,000\nhello\n");
	fixture.write("orphan.vtt", b"WEBVTT\n");

	let (_, output) = fixture
		.scan(fixture.config(), GenerateOptions::default())
		.await;

	assert_eq!(output.scan.captions, 1);
	assert_eq!(output.scan.walked, 1);

	let file = fixture
		.repository
		.find_file_by_path(&video)
		.await
		.unwrap()
		.unwrap();

	let Some(MediaInfo::Video(info)) = file.media else {
		panic!("video without metadata");
	};

	assert_eq!(
		info.captions,
		vec![Caption {
			filename: "movie.en.srt".to_string(),
			language_code: "en".to_string(),
			caption_type: CaptionType::Srt,
		}]
	);
}

#[tokio::test]
#[traced_test]
async fn failing_file_does_not_stop_the_scan() {
	let fixture = Fixture::new(FakeEncoder::new(60.0)).await;

	let bad = fixture.write("bad.mp4", &video_bytes(1));
	let good = fixture.write("good.mp4", &video_bytes(2));
	fixture.repository.poison_path(&bad);

	let (job, output) = fixture
		.scan(fixture.config(), covers_and_phashes())
		.await;

	assert_eq!(job.status, Status::Finished);
	assert_eq!(output.scan.created, 1);
	assert!(output.scan.non_critical_errors.iter().any(|e| matches!(
		e,
		NonCriticalScanError::File { path, .. } if *path == bad
	)));

	assert!(fixture
		.repository
		.find_file_by_path(&bad)
		.await
		.unwrap()
		.is_none());
	assert!(fixture
		.repository
		.find_file_by_path(&good)
		.await
		.unwrap()
		.is_some());
	assert_eq!(fixture.repository.all_scenes().await.unwrap().len(), 1);
}
