use tracing::debug;

use super::PerceptualHash;

/// One hashed video, `duration` in seconds (`0` or less when unknown)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<Id> {
	pub id: Id,
	pub phash: PerceptualHash,
	pub duration: f64,
}

/// Tolerances for [`find_duplicates`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
	/// Maximum Hamming distance between two hashes
	pub distance: u32,
	/// Maximum duration difference in seconds, any negative value ignores durations
	pub duration_diff: f64,
}

impl Tolerance {
	/// Duration is only compared when both sides know theirs
	fn accepts<Id>(&self, a: &Candidate<Id>, b: &Candidate<Id>) -> bool {
		let duration_distance = if a.duration > 0.0 && b.duration > 0.0 {
			(a.duration - b.duration).abs()
		} else {
			0.0
		};

		(self.duration_diff < 0.0 || duration_distance <= self.duration_diff)
			&& a.phash.distance(b.phash) <= self.distance
	}
}

/// Groups near identical videos.
///
/// Builds the neighbour relation with an all pairs comparison and returns the connected
/// components that have more than one member, each one listing distinct ids in visiting order.
/// Entries sharing an id (several files of the same scene) are never neighbours of each other.
///
/// O(n²): fine for tens of thousands of videos, hundreds of thousands would need an index
/// (a BK-tree for instance) to find neighbours.
pub fn find_duplicates<Id: Copy + PartialEq>(
	candidates: &[Candidate<Id>],
	tolerance: Tolerance,
) -> Vec<Vec<Id>> {
	let neighbours = candidates
		.iter()
		.enumerate()
		.map(|(i, candidate)| {
			candidates
				.iter()
				.enumerate()
				.filter(|(j, other)| {
					i != *j && candidate.id != other.id && tolerance.accepts(candidate, other)
				})
				.map(|(j, _)| j)
				.collect::<Vec<_>>()
		})
		.collect::<Vec<_>>();

	let mut bucket_of = vec![None; candidates.len()];
	let mut buckets = Vec::new();

	for (start, start_neighbours) in neighbours.iter().enumerate() {
		if start_neighbours.is_empty() || bucket_of[start].is_some() {
			continue;
		}

		let bucket = buckets.len();
		bucket_of[start] = Some(bucket);

		let mut members = vec![candidates[start].id];
		let mut to_visit = start_neighbours.iter().rev().copied().collect::<Vec<_>>();

		while let Some(idx) = to_visit.pop() {
			if bucket_of[idx].is_some() {
				continue;
			}
			bucket_of[idx] = Some(bucket);

			if !members.contains(&candidates[idx].id) {
				members.push(candidates[idx].id);
			}

			to_visit.extend(neighbours[idx].iter().rev().copied());
		}

		if members.len() > 1 {
			buckets.push(members);
		}
	}

	debug!(
		candidates = candidates.len(),
		buckets = buckets.len(),
		"Duplicate detection finished;"
	);

	buckets
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	const fn candidate(id: u32, phash: u64, duration: f64) -> Candidate<u32> {
		Candidate {
			id,
			phash: PerceptualHash(phash),
			duration,
		}
	}

	const STRICT: Tolerance = Tolerance {
		distance: 4,
		duration_diff: 1.0,
	};

	#[test]
	fn close_hashes_cluster_and_far_ones_are_left_out() {
		let candidates = [
			candidate(1, 0b0000, 600.0),
			candidate(2, 0b0001, 600.5),
			candidate(3, 0b0011, 600.0),
			candidate(4, u64::MAX, 600.0),
		];

		assert_eq!(find_duplicates(&candidates, STRICT), vec![vec![1, 2, 3]]);
	}

	#[test]
	fn clusters_are_transitive() {
		// 1 and 3 are 6 bits apart but both are close to 2
		let candidates = [
			candidate(1, 0b00_0000, 0.0),
			candidate(2, 0b00_0111, 0.0),
			candidate(3, 0b11_1111, 0.0),
		];

		assert_eq!(find_duplicates(&candidates, STRICT), vec![vec![1, 2, 3]]);
	}

	#[test]
	fn duration_tolerance_splits_and_can_be_ignored() {
		let candidates = [candidate(1, 0, 600.0), candidate(2, 0, 900.0)];

		assert!(find_duplicates(&candidates, STRICT).is_empty());

		let ignore_duration = Tolerance {
			duration_diff: -1.0,
			..STRICT
		};
		assert_eq!(find_duplicates(&candidates, ignore_duration), vec![vec![1, 2]]);
	}

	#[test]
	fn unknown_durations_count_as_equal() {
		let candidates = [candidate(1, 0, 0.0), candidate(2, 0, 900.0)];
		assert_eq!(find_duplicates(&candidates, STRICT), vec![vec![1, 2]]);
	}

	#[test]
	fn files_of_the_same_scene_are_not_duplicates() {
		let candidates = [candidate(7, 0, 10.0), candidate(7, 0, 10.0)];
		assert!(find_duplicates(&candidates, STRICT).is_empty());
	}

	#[test]
	fn independent_groups_are_reported_separately() {
		let candidates = [
			candidate(1, 0, 0.0),
			candidate(2, u64::MAX, 0.0),
			candidate(3, 1, 0.0),
			candidate(4, u64::MAX - 1, 0.0),
			candidate(5, 0x00ff_ff00_0000_0000, 0.0),
		];

		assert_eq!(
			find_duplicates(&candidates, STRICT),
			vec![vec![1, 3], vec![2, 4]]
		);
	}
}
