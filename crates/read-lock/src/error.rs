use mk_utils::error::FileIOError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadLockError {
	#[error("range not satisfiable: <start={start}, end={end:?}, len={len}>")]
	RangeNotSatisfiable {
		start: u64,
		end: Option<u64>,
		len: u64,
	},

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
