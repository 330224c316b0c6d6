use mk_read_lock::{ByteRange, ReadLockManager};

use std::time::Duration;

use futures::StreamExt;
use tempfile::tempdir;
use tokio::{fs, task::JoinSet, time::timeout};
use tracing_test::traced_test;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn cancel_reaches_every_reader_and_new_leases_work_afterwards() {
	let manager = ReadLockManager::new();
	let path = "/media/videos/scene.mp4";

	let mut readers = JoinSet::new();
	for _ in 0..2 {
		let lease = manager.acquire_read(path);
		readers.spawn(async move {
			lease.cancelled().await;
			lease.id()
		});
	}

	assert_eq!(manager.active_leases(path), 2);

	// Fire and forget, returns before the readers wake up
	assert_eq!(manager.cancel(path), 2);

	let mut exited = 0;
	while let Some(res) = timeout(Duration::from_secs(5), readers.join_next())
		.await
		.expect("readers must observe cancellation")
	{
		res.unwrap();
		exited += 1;
	}
	assert_eq!(exited, 2);

	let fresh = manager.acquire_read(path);
	assert!(!fresh.is_cancelled());
	assert_eq!(manager.active_leases(path), 1);
}

#[tokio::test]
#[traced_test]
async fn stream_serves_the_requested_range() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("clip.bin");
	fs::write(&path, b"0123456789").await.unwrap();

	let manager = ReadLockManager::new();
	let mut stream = manager
		.open_stream(&path, Some(ByteRange::new(2, Some(5))))
		.await
		.unwrap();

	assert_eq!(manager.active_leases(&path), 1);

	let mut out = Vec::new();
	while let Some(chunk) = stream.next().await {
		out.extend_from_slice(&chunk.unwrap());
	}
	assert_eq!(out, b"2345");

	drop(stream);
	assert_eq!(manager.active_leases(&path), 0);
}

#[tokio::test]
#[traced_test]
async fn cancelled_stream_ends_early() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("big.bin");
	fs::write(&path, vec![7_u8; 1024 * 1024]).await.unwrap();

	let manager = ReadLockManager::new();
	let mut stream = manager.open_stream(&path, None).await.unwrap();

	let first = stream.next().await.unwrap().unwrap();
	assert!(!first.is_empty());

	manager.cancel(&path);

	let rest = timeout(Duration::from_secs(5), stream.next())
		.await
		.expect("stream must end promptly");
	assert!(rest.is_none());
}

#[tokio::test]
#[traced_test]
async fn missing_file_does_not_leak_a_lease() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("nope.mp4");

	let manager = ReadLockManager::new();
	assert!(manager.open_stream(&path, None).await.is_err());
	assert_eq!(manager.active_leases(&path), 0);
}
