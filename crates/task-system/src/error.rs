use std::{error::Error, fmt};

use thiserror::Error;
use tokio::runtime::TryCurrentError;

/// Blanket error bound every task error type must satisfy
pub trait RunError: Error + fmt::Debug + Send + Sync + 'static {}

impl<T: Error + fmt::Debug + Send + Sync + 'static> RunError for T {}

#[derive(Debug, Error)]
pub enum SystemError {
	#[error("task queue capacity must be greater than zero")]
	ZeroCapacity,
	#[error("task queue workers must be started inside a tokio runtime: {0}")]
	NoRuntime(#[from] TryCurrentError),
	#[error("task queue is already closed")]
	QueueClosed,
}
