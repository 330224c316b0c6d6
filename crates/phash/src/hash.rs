use std::{f64::consts::PI, fmt, str::FromStr};

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SAMPLE_SIZE: u32 = 64;
const HASH_SIZE: usize = 8;

#[derive(Debug, Error)]
#[error("invalid perceptual hash <value='{0}'>")]
pub struct ParseHashError(String);

/// 64 bit DCT based perceptual hash, similar images land within a few bits of each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
	#[must_use]
	pub const fn distance(self, other: Self) -> u32 {
		(self.0 ^ other.0).count_ones()
	}

	/// Grayscale 64x64 downsample, 2D DCT, then one bit per low frequency coefficient telling
	/// whether it's above the median of the 8x8 top-left block
	#[must_use]
	pub fn from_image(img: &DynamicImage) -> Self {
		let resized = img.resize_exact(SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle);

		let size = SAMPLE_SIZE as usize;
		let mut pixels = vec![0_f64; size * size];
		for (x, y, pixel) in resized.pixels() {
			let [r, g, b, _] = pixel.0;
			pixels[y as usize * size + x as usize] =
				0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
		}

		let coefficients = low_frequency_dct(&pixels, size);

		let mut sorted = coefficients;
		sorted.sort_by(f64::total_cmp);
		let median = sorted[coefficients.len() / 2];

		let len = coefficients.len();
		let hash = coefficients
			.iter()
			.enumerate()
			.filter(|(_, coefficient)| **coefficient > median)
			.fold(0_u64, |hash, (idx, _)| hash | (1 << (len - idx - 1)));

		Self(hash)
	}
}

/// Top-left `HASH_SIZE` x `HASH_SIZE` block of the unnormalized 2D DCT-II of a square image
fn low_frequency_dct(pixels: &[f64], size: usize) -> [f64; HASH_SIZE * HASH_SIZE] {
	#[allow(clippy::cast_precision_loss)]
	let n = size as f64;

	let cosines = (0..HASH_SIZE)
		.map(|k| {
			(0..size)
				.map(|j| {
					#[allow(clippy::cast_precision_loss)]
					let (j, k) = (j as f64, k as f64);
					(PI / n * (j + 0.5) * k).cos()
				})
				.collect::<Vec<_>>()
		})
		.collect::<Vec<_>>();

	// Rows first, only the coefficients we keep
	let mut rows = vec![0_f64; size * HASH_SIZE];
	for y in 0..size {
		let row = &pixels[y * size..(y + 1) * size];
		for (k, cosine) in cosines.iter().enumerate() {
			rows[y * HASH_SIZE + k] = row.iter().zip(cosine).map(|(p, c)| p * c).sum();
		}
	}

	let mut out = [0_f64; HASH_SIZE * HASH_SIZE];
	for u in 0..HASH_SIZE {
		for (k, cosine) in cosines.iter().enumerate() {
			out[k * HASH_SIZE + u] = (0..size).map(|y| rows[y * HASH_SIZE + u] * cosine[y]).sum();
		}
	}

	out
}

impl fmt::Display for PerceptualHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

impl FromStr for PerceptualHash {
	type Err = ParseHashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		u64::from_str_radix(s, 16)
			.map(Self)
			.map_err(|_| ParseHashError(s.to_string()))
	}
}
