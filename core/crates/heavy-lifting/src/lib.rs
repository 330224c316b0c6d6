//! Media library heavy lifting: scanning the library into files and the objects built on them,
//! generating artifacts for those, and the jobs driving both.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod duplicates;
pub mod encoder;
pub mod generate;
pub mod jobs;
pub mod model;
pub mod paths;
pub mod repository;
pub mod scanner;
pub mod streams;

pub use config::{GenerateOptions, Library, MediaKind, PreviewOptions, ScanConfig, ScanInput};
pub use encoder::{Encoder, EncoderError, FfmpegEncoder};
pub use generate::{GenerateError, Generator, NonCriticalGenerateError};
pub use paths::GeneratedPaths;
pub use repository::{MemoryRepository, Repository, RepositoryError};
pub use scanner::{NonCriticalScanError, ScanError};

use duplicates::DuplicatesError;

#[derive(Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Scan(#[from] ScanError),
	#[error(transparent)]
	Generate(#[from] GenerateError),
	#[error(transparent)]
	Repository(#[from] RepositoryError),
	#[error(transparent)]
	Duplicates(#[from] DuplicatesError),
}

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NonCriticalError {
	#[error(transparent)]
	Scan(#[from] NonCriticalScanError),
	#[error(transparent)]
	Generate(#[from] NonCriticalGenerateError),
	#[error(transparent)]
	Job(#[from] jobs::NonCriticalJobError),
}
