//! k-nearest-neighbor descriptor matching.

use std::cmp::Ordering;

use feature_align_core::{DescriptorKind, Descriptors};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::brute_force;
use crate::kdforest::KdForest;

/// Seed used to build the kd-forest unless configured otherwise.
pub const DEFAULT_FOREST_SEED: u64 = 0x5eed_f0e5;

/// Correspondence between a query descriptor and a train descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    /// Euclidean distance for float descriptors, Hamming distance for binary ones.
    pub distance: f32,
}

/// Nearest and (when requested and available) second-nearest neighbor of one
/// query descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateGroup {
    pub best: Match,
    pub second: Option<Match>,
}

/// Search strategy for [`DescriptorMatcher`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherStrategy {
    /// Exact search over every train descriptor.
    #[default]
    BruteForce,
    /// Approximate best-bin-first search over `trees` randomized kd-trees,
    /// stopping after `checks` distance evaluations.
    KdForest { trees: usize, checks: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    pub strategy: MatcherStrategy,
    /// Seed for the randomized kd-trees; ignored by brute force.
    pub forest_seed: u64,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            strategy: MatcherStrategy::BruteForce,
            forest_seed: DEFAULT_FOREST_SEED,
        }
    }
}

impl MatcherParams {
    pub fn kd_forest(trees: usize, checks: usize) -> Self {
        Self {
            strategy: MatcherStrategy::KdForest { trees, checks },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if let MatcherStrategy::KdForest { trees, checks } = self.strategy {
            if trees == 0 || checks == 0 {
                return Err(MatchError::InvalidParams(format!(
                    "kd-forest needs trees > 0 and checks > 0 (got trees={trees}, checks={checks})"
                )));
            }
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("descriptor sets are incompatible (query {query:?}, train {train:?})")]
    KindMismatch {
        query: DescriptorKind,
        train: DescriptorKind,
    },
    #[error("k must be 1 or 2, got {0}")]
    UnsupportedK(usize),
    #[error("invalid matcher parameters: {0}")]
    InvalidParams(String),
}

#[inline]
fn closer(a: (f32, usize), b: (f32, usize)) -> bool {
    match a.0.total_cmp(&b.0) {
        Ordering::Less => true,
        Ordering::Equal => a.1 < b.1,
        Ordering::Greater => false,
    }
}

/// Running list of the `k <= 2` closest train rows for one query.
///
/// Equal distances are ordered by train index.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Nearest {
    k: usize,
    slots: [Option<(f32, usize)>; 2],
}

impl Nearest {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k: k.clamp(1, 2),
            slots: [None, None],
        }
    }

    pub(crate) fn push(&mut self, dist: f32, idx: usize) {
        let cand = (dist, idx);
        match self.slots[0] {
            None => self.slots[0] = Some(cand),
            Some(first) if closer(cand, first) => {
                if self.k == 2 {
                    self.slots[1] = Some(first);
                }
                self.slots[0] = Some(cand);
            }
            Some(_) if self.k == 2 => match self.slots[1] {
                Some(second) if !closer(cand, second) => {}
                _ => self.slots[1] = Some(cand),
            },
            Some(_) => {}
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.slots[..self.k].iter().all(Option::is_some)
    }

    /// Distance a new candidate has to beat once the list is full.
    pub(crate) fn bound(&self) -> f32 {
        match self.slots[self.k - 1] {
            Some((d, _)) => d,
            None => f32::INFINITY,
        }
    }

    pub(crate) fn into_group(
        self,
        query_idx: usize,
        metric: impl Fn(f32) -> f32,
    ) -> Option<CandidateGroup> {
        let to_match = |(d, j): (f32, usize)| Match {
            query_idx,
            train_idx: j,
            distance: metric(d),
        };
        let best = to_match(self.slots[0]?);
        let second = self.slots[1].map(to_match);
        Some(CandidateGroup { best, second })
    }
}

/// Matches one descriptor set against another.
#[derive(Clone, Debug, Default)]
pub struct DescriptorMatcher {
    params: MatcherParams,
}

impl DescriptorMatcher {
    pub fn new(params: MatcherParams) -> Result<Self, MatchError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn brute_force() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    /// Bind the matcher to one train set.
    ///
    /// The kd-forest is built here, so repeated queries against the same
    /// train set index it once.
    pub fn train<'a>(&self, train: &'a Descriptors) -> TrainedMatcher<'a> {
        let forest = match self.params.strategy {
            MatcherStrategy::KdForest { trees, .. } if !train.is_empty() => {
                Some(KdForest::build(train, trees, self.params.forest_seed))
            }
            _ => None,
        };
        TrainedMatcher {
            params: self.params.clone(),
            train,
            forest,
        }
    }

    /// For each `query` row, its `k` nearest `train` rows (`k` is 1 or 2).
    ///
    /// Groups come back in query order. If either set is empty the result is
    /// empty; with a single train row, `k = 2` groups have no second neighbor.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, query, train), fields(n = query.len(), m = train.len()))
    )]
    pub fn knn_match(
        &self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<CandidateGroup>, MatchError> {
        check_k(k)?;
        if query.is_empty() || train.is_empty() {
            return Ok(Vec::new());
        }
        self.train(train).knn_match(query, k)
    }
}

fn check_k(k: usize) -> Result<(), MatchError> {
    if k == 0 || k > 2 {
        return Err(MatchError::UnsupportedK(k));
    }
    Ok(())
}

/// A matcher with its train set indexed.
#[derive(Clone, Debug)]
pub struct TrainedMatcher<'a> {
    params: MatcherParams,
    train: &'a Descriptors,
    forest: Option<KdForest>,
}

impl TrainedMatcher<'_> {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    /// Same contract as [`DescriptorMatcher::knn_match`].
    pub fn knn_match(&self, query: &Descriptors, k: usize) -> Result<Vec<CandidateGroup>, MatchError> {
        check_k(k)?;
        let train = self.train;
        if query.is_empty() || train.is_empty() {
            return Ok(Vec::new());
        }
        if query.kind() != train.kind() {
            return Err(MatchError::KindMismatch {
                query: query.kind(),
                train: train.kind(),
            });
        }

        let groups = match (&self.forest, self.params.strategy) {
            (Some(forest), MatcherStrategy::KdForest { checks, .. }) => forest.knn(query, k, checks),
            _ => brute_force::knn(query, train, k),
        };
        debug!(
            "matched {} query descriptors against {} ({:?}, k={k})",
            query.len(),
            train.len(),
            self.params.strategy
        );
        Ok(groups)
    }
}
