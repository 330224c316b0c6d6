use std::{
	future::Future,
	io,
	path::Path,
	pin::Pin,
	task::{Context, Poll},
};

use mk_utils::error::FileIOError;

use tokio::{
	fs::File,
	io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf, SeekFrom, Take},
};
use tokio_util::{io::ReaderStream, sync::WaitForCancellationFutureOwned};
use tracing::{instrument, trace};

use super::{ReadLease, ReadLockError, ReadLockManager};

// default capacity 64KiB
const DEFAULT_CAPACITY: usize = 65536;

/// Byte stream of a file (or a range of it) that ends as soon as its lease is cancelled
pub type LeasedStream = ReaderStream<LeasedReader<Take<File>>>;

/// Inclusive byte range, as found on HTTP `Range` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
	pub start: u64,
	pub end: Option<u64>,
}

impl ByteRange {
	#[must_use]
	pub const fn new(start: u64, end: Option<u64>) -> Self {
		Self { start, end }
	}

	/// Clamps the range to a file of `len` bytes, returning `(start, length)`
	pub fn resolve(self, len: u64) -> Result<(u64, u64), ReadLockError> {
		let not_satisfiable = || ReadLockError::RangeNotSatisfiable {
			start: self.start,
			end: self.end,
			len,
		};

		if len == 0 {
			return Err(not_satisfiable());
		}

		let last = self.end.map_or(len - 1, |end| end.min(len - 1));
		if self.start > last {
			return Err(not_satisfiable());
		}

		Ok((self.start, last - self.start + 1))
	}
}

pin_project_lite::pin_project! {
	/// Wraps a reader so it reports end of file once its [`ReadLease`] is cancelled
	pub struct LeasedReader<R> {
		#[pin]
		inner: R,
		cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
		finished: bool,
		lease: ReadLease,
	}
}

impl<R> LeasedReader<R> {
	pub(crate) fn new(inner: R, lease: ReadLease) -> Self {
		Self {
			inner,
			cancelled: Box::pin(lease.token().clone().cancelled_owned()),
			finished: false,
			lease,
		}
	}

	#[must_use]
	pub const fn lease(&self) -> &ReadLease {
		&self.lease
	}
}

impl<R: AsyncRead> AsyncRead for LeasedReader<R> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		let this = self.project();

		if *this.finished {
			return Poll::Ready(Ok(()));
		}

		if this.cancelled.as_mut().poll(cx).is_ready() {
			trace!(lease_id = this.lease.id(), "Lease cancelled, ending stream");
			*this.finished = true;
			return Poll::Ready(Ok(()));
		}

		this.inner.poll_read(cx, buf)
	}
}

impl ReadLockManager {
	/// Opens `path` for streaming, holding a read lease for as long as the stream lives.
	///
	/// Meant for byte-range HTTP responses: once someone calls [`cancel`](Self::cancel) on the
	/// same path the stream ends, so the remote client sees the response finish instead of
	/// hanging on a file that is about to disappear.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
	pub async fn open_stream(
		&self,
		path: impl AsRef<Path> + Send,
		range: Option<ByteRange>,
	) -> Result<LeasedStream, ReadLockError> {
		let path = path.as_ref();

		let lease = self.acquire_read(path);

		let mut file = File::open(path)
			.await
			.map_err(|e| FileIOError::from((path, e, "Failed to open file to stream")))?;

		let len = file
			.metadata()
			.await
			.map_err(|e| FileIOError::from((path, e, "Failed to read metadata to stream")))?
			.len();

		let (start, length) = match range {
			Some(range) => range.resolve(len)?,
			None => (0, len),
		};

		if start > 0 {
			file.seek(SeekFrom::Start(start))
				.await
				.map_err(|e| FileIOError::from((path, e, "Failed to seek file to stream")))?;
		}

		Ok(ReaderStream::with_capacity(
			lease.reader(file.take(length)),
			DEFAULT_CAPACITY,
		))
	}
}
