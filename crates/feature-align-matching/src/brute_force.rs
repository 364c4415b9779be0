//! Exact k-NN by linear scan.

use feature_align_core::Descriptors;
use rayon::prelude::*;

use crate::distance::{euclidean, hamming};
use crate::matcher::{CandidateGroup, Nearest};

fn scan<T: Sync>(
    query: &[T],
    train: &[T],
    width: usize,
    k: usize,
    dist: impl Fn(&[T], &[T]) -> f32 + Sync,
) -> Vec<CandidateGroup> {
    query
        .par_chunks_exact(width)
        .enumerate()
        .filter_map(|(qi, q)| {
            let mut nearest = Nearest::new(k);
            for (ti, t) in train.chunks_exact(width).enumerate() {
                nearest.push(dist(q, t), ti);
            }
            nearest.into_group(qi, |d| d)
        })
        .collect()
}

/// Exact neighbors; assumes both sets share one descriptor kind.
pub(crate) fn knn(query: &Descriptors, train: &Descriptors, k: usize) -> Vec<CandidateGroup> {
    match (query, train) {
        (Descriptors::Float { dim, data: q }, Descriptors::Float { data: t, .. }) => {
            scan(q, t, *dim, k, euclidean)
        }
        (Descriptors::Binary { bytes, data: q }, Descriptors::Binary { data: t, .. }) => {
            scan(q, t, *bytes, k, |a, b| hamming(a, b) as f32)
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn finds_two_nearest_float_rows() {
        let train = Descriptors::Float {
            dim: 2,
            data: vec![0.0, 0.0, 10.0, 0.0, 3.0, 4.0],
        };
        let query = Descriptors::Float {
            dim: 2,
            data: vec![9.0, 0.0, 0.0, 1.0],
        };
        let groups = knn(&query, &train, 2);
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].best.train_idx, 1);
        assert_abs_diff_eq!(groups[0].best.distance, 1.0, epsilon = 1e-6);
        assert_eq!(groups[0].second.map(|m| m.train_idx), Some(2));

        assert_eq!(groups[1].best.query_idx, 1);
        assert_eq!(groups[1].best.train_idx, 0);
        assert_eq!(groups[1].second.map(|m| m.train_idx), Some(2));
    }

    #[test]
    fn hamming_ties_prefer_lower_index() {
        let train = Descriptors::Binary {
            bytes: 1,
            data: vec![0b0000_0011, 0b0000_0101, 0b0000_0001],
        };
        let query = Descriptors::Binary {
            bytes: 1,
            data: vec![0b0000_0111],
        };
        let groups = knn(&query, &train, 2);
        assert_eq!(groups[0].best.train_idx, 0);
        assert_eq!(groups[0].best.distance, 1.0);
        assert_eq!(groups[0].second.map(|m| m.train_idx), Some(1));
    }

    #[test]
    fn single_train_row_has_no_second_neighbor() {
        let train = Descriptors::Binary {
            bytes: 1,
            data: vec![0xff],
        };
        let query = Descriptors::Binary {
            bytes: 1,
            data: vec![0x0f, 0xf0],
        };
        let groups = knn(&query, &train, 2);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.second.is_none()));
    }
}
