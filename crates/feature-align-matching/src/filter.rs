//! Match filtering: ratio test and percentile cut.
//!
//! Both filters return new vectors sorted by ascending distance. Equal
//! distances keep query order.

use serde::{Deserialize, Serialize};

use crate::matcher::{CandidateGroup, Match};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("ratio must be in (0, 1], got {0}")]
    InvalidRatio(f32),
    #[error("percentile must be in (0, 1], got {0}")]
    InvalidPercentile(f32),
}

/// How raw neighbor groups are reduced to good matches.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchFilter {
    /// Keep a match when it is clearly closer than the runner-up.
    Ratio { ratio: f32 },
    /// Keep the closest fraction of all matches.
    Percentile { keep: f32 },
}

impl Default for MatchFilter {
    fn default() -> Self {
        MatchFilter::Ratio { ratio: 0.9 }
    }
}

impl MatchFilter {
    pub fn validate(&self) -> Result<(), FilterError> {
        match *self {
            MatchFilter::Ratio { ratio } if !(ratio > 0.0 && ratio <= 1.0) => {
                Err(FilterError::InvalidRatio(ratio))
            }
            MatchFilter::Percentile { keep } if !(keep > 0.0 && keep <= 1.0) => {
                Err(FilterError::InvalidPercentile(keep))
            }
            _ => Ok(()),
        }
    }

    /// Neighbors per query the filter needs from the matcher.
    pub fn neighbors(&self) -> usize {
        match self {
            MatchFilter::Ratio { .. } => 2,
            MatchFilter::Percentile { .. } => 1,
        }
    }

    pub fn apply(&self, groups: &[CandidateGroup]) -> Vec<Match> {
        match *self {
            MatchFilter::Ratio { ratio } => ratio_test(groups, ratio),
            MatchFilter::Percentile { keep } => {
                let best: Vec<Match> = groups.iter().map(|g| g.best).collect();
                percentile_test(&best, keep)
            }
        }
    }
}

fn sort_by_distance(matches: &mut [Match]) {
    matches.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.query_idx.cmp(&b.query_idx))
    });
}

/// Keep groups whose best distance is below `ratio` times the second-best.
///
/// Groups without a second neighbor cannot pass.
pub fn ratio_test(groups: &[CandidateGroup], ratio: f32) -> Vec<Match> {
    let mut good: Vec<Match> = groups
        .iter()
        .filter_map(|g| {
            let second = g.second?;
            (g.best.distance < ratio * second.distance).then_some(g.best)
        })
        .collect();
    sort_by_distance(&mut good);
    good
}

// Resolution of configured fractions; `0.7_f32` is slightly below 0.7.
const FRACTION_STEPS: f64 = 1e6;

/// Number of items `floor(total * keep)` for a decimal fraction `keep`.
fn kept_count(total: usize, keep: f32) -> usize {
    let keep = (keep as f64 * FRACTION_STEPS).round() / FRACTION_STEPS;
    (total as f64 * keep + 1e-9).floor() as usize
}

/// Keep the first `floor(len * keep)` matches after sorting by distance.
pub fn percentile_test(matches: &[Match], keep: f32) -> Vec<Match> {
    let mut sorted = matches.to_vec();
    sort_by_distance(&mut sorted);
    sorted.truncate(kept_count(sorted.len(), keep));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(q: usize, t: usize, d: f32) -> Match {
        Match {
            query_idx: q,
            train_idx: t,
            distance: d,
        }
    }

    fn group(q: usize, best: f32, second: Option<f32>) -> CandidateGroup {
        CandidateGroup {
            best: m(q, q, best),
            second: second.map(|d| m(q, q + 100, d)),
        }
    }

    #[test]
    fn ratio_test_keeps_distinctive_matches_sorted() {
        let groups = vec![
            group(0, 10.0, Some(11.0)),
            group(1, 5.0, Some(20.0)),
            group(2, 2.0, Some(40.0)),
            group(3, 1.0, None),
            group(4, 9.0, Some(10.0)),
        ];
        let good = ratio_test(&groups, 0.9);
        let ids: Vec<usize> = good.iter().map(|m| m.query_idx).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn ratio_test_is_strict() {
        let good = ratio_test(&[group(0, 9.0, Some(10.0))], 0.9);
        assert!(good.is_empty());
    }

    #[test]
    fn ratio_result_ignores_input_order() {
        let mut groups = vec![
            group(0, 3.0, Some(10.0)),
            group(1, 1.0, Some(10.0)),
            group(2, 3.0, Some(10.0)),
            group(3, 2.0, Some(10.0)),
        ];
        let forward = ratio_test(&groups, 0.8);
        groups.reverse();
        let reversed = ratio_test(&groups, 0.8);
        assert_eq!(forward, reversed);
        assert!(forward.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn percentile_keeps_floor_of_fraction() {
        let matches: Vec<Match> = (0..20).map(|i| m(i, i, (20 - i) as f32)).collect();
        let kept = percentile_test(&matches, 0.15);
        assert_eq!(kept.len(), 3);
        let ids: Vec<usize> = kept.iter().map(|m| m.query_idx).collect();
        assert_eq!(ids, vec![19, 18, 17]);

        assert!(percentile_test(&matches[..6], 0.15).is_empty());
        assert_eq!(percentile_test(&matches, 1.0).len(), 20);
    }

    #[test]
    fn percentile_count_uses_the_decimal_fraction() {
        let ten: Vec<Match> = (0..10).map(|i| m(i, i, i as f32)).collect();
        assert_eq!(percentile_test(&ten, 0.7).len(), 7);
        assert_eq!(percentile_test(&ten, 0.9).len(), 9);
        assert_eq!(percentile_test(&ten, 0.3).len(), 3);

        let hundred: Vec<Match> = (0..100).map(|i| m(i, i, i as f32)).collect();
        assert_eq!(percentile_test(&hundred, 0.29).len(), 29);
        assert_eq!(percentile_test(&hundred, 0.57).len(), 57);
        assert_eq!(percentile_test(&hundred, 0.575).len(), 57);
        assert_eq!(kept_count(1000, 0.15), 150);
    }

    #[test]
    fn percentile_ties_keep_query_order() {
        let matches = vec![m(0, 0, 1.0), m(1, 1, 0.5), m(2, 2, 1.0), m(3, 3, 1.0)];
        let kept = percentile_test(&matches, 0.75);
        let ids: Vec<usize> = kept.iter().map(|m| m.query_idx).collect();
        assert_eq!(ids, vec![1, 0, 2]);
    }

    #[test]
    fn filter_dispatch_uses_best_neighbor_for_percentile() {
        let groups = vec![group(0, 4.0, Some(5.0)), group(1, 2.0, None)];
        let f = MatchFilter::Percentile { keep: 0.5 };
        assert_eq!(f.neighbors(), 1);
        assert_eq!(f.apply(&groups), vec![m(1, 1, 2.0)]);
    }

    #[test]
    fn out_of_range_parameters_fail_validation() {
        assert_eq!(
            MatchFilter::Ratio { ratio: 0.0 }.validate(),
            Err(FilterError::InvalidRatio(0.0))
        );
        assert_eq!(
            MatchFilter::Percentile { keep: 1.5 }.validate(),
            Err(FilterError::InvalidPercentile(1.5))
        );
        assert!(MatchFilter::Ratio { ratio: f32::NAN }.validate().is_err());
        assert!(MatchFilter::Ratio { ratio: 1.0 }.validate().is_ok());
    }
}
