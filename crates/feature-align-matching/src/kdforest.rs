//! Randomized kd-forest for approximate nearest-neighbor search.
//!
//! Each tree splits on a dimension drawn at random among the few with the
//! highest variance, at the mean value of that dimension. Queries descend
//! every tree once, then continue best-bin-first from a priority queue shared
//! by all trees until the check budget is spent. Binary descriptors are
//! indexed as 0/1 vectors, so squared distances in the forest are Hamming
//! distances.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use feature_align_core::Descriptors;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::distance::{squared_euclidean, unpack_bits};
use crate::matcher::{CandidateGroup, Nearest};

/// Candidate split dimensions per node.
const SPLIT_CANDIDATES: usize = 5;
/// Rows used to estimate mean and variance at a node.
const MEAN_SAMPLES: usize = 100;

#[derive(Clone, Debug)]
enum Node {
    Leaf(usize),
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug)]
struct KdTree {
    nodes: Vec<Node>,
    root: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Metric {
    Euclidean,
    Hamming,
}

/// Forest over the rows of one descriptor set.
#[derive(Clone, Debug)]
pub struct KdForest {
    dim: usize,
    rows: Vec<f32>,
    trees: Vec<KdTree>,
    metric: Metric,
}

struct TreeBuilder<'a> {
    rows: &'a [f32],
    dim: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn row(&self, i: usize) -> &[f32] {
        &self.rows[i * self.dim..(i + 1) * self.dim]
    }

    fn choose_split(&mut self, idx: &[usize]) -> (usize, f32) {
        let sample = &idx[..idx.len().min(MEAN_SAMPLES)];
        let n = sample.len() as f32;

        let mut mean = vec![0.0f32; self.dim];
        for &i in sample {
            for (m, v) in mean.iter_mut().zip(self.row(i)) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0f32; self.dim];
        for &i in sample {
            for ((s, v), m) in var.iter_mut().zip(self.row(i)).zip(&mean) {
                let d = v - m;
                *s += d * d;
            }
        }

        let mut dims: Vec<usize> = (0..self.dim).collect();
        dims.sort_by(|&a, &b| var[b].total_cmp(&var[a]).then(a.cmp(&b)));
        let top = SPLIT_CANDIDATES.min(self.dim);
        let dim = dims[self.rng.random_range(0..top)];
        (dim, mean[dim])
    }

    fn build(&mut self, idx: &mut [usize]) -> usize {
        if idx.len() == 1 {
            self.nodes.push(Node::Leaf(idx[0]));
            return self.nodes.len() - 1;
        }

        let (dim, value) = self.choose_split(idx);
        idx.sort_by(|&a, &b| {
            self.rows[a * self.dim + dim]
                .total_cmp(&self.rows[b * self.dim + dim])
                .then(a.cmp(&b))
        });
        let below = idx
            .iter()
            .take_while(|&&i| self.rows[i * self.dim + dim] < value)
            .count();
        // rows equal to the split value go right; degenerate splits fall back to halving
        let cut = if below > 0 && below < idx.len() {
            below
        } else {
            idx.len() / 2
        };
        let value = if below > 0 && below < idx.len() {
            value
        } else {
            self.rows[idx[cut] * self.dim + dim]
        };

        let (lo, hi) = idx.split_at_mut(cut);
        let left = self.build(lo);
        let right = self.build(hi);
        self.nodes.push(Node::Split {
            dim,
            value,
            left,
            right,
        });
        self.nodes.len() - 1
    }
}

#[derive(Clone, Copy, Debug)]
struct Branch {
    dist: f32,
    tree: usize,
    node: usize,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch {}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Branch {
    // reversed so BinaryHeap pops the closest branch first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then(other.tree.cmp(&self.tree))
            .then(other.node.cmp(&self.node))
    }
}

struct Search<'a> {
    forest: &'a KdForest,
    query: &'a [f32],
    nearest: Nearest,
    visited: Vec<bool>,
    checks: usize,
    max_checks: usize,
    heap: BinaryHeap<Branch>,
}

impl Search<'_> {
    fn descend(&mut self, tree: usize, mut node: usize, mindist: f32) {
        let forest = self.forest;
        let nodes = &forest.trees[tree].nodes;
        loop {
            match nodes[node] {
                Node::Leaf(i) => {
                    if self.visited[i] || (self.checks >= self.max_checks && self.nearest.is_full()) {
                        return;
                    }
                    self.visited[i] = true;
                    self.checks += 1;
                    let d = squared_euclidean(self.query, forest.row(i));
                    self.nearest.push(d, i);
                    return;
                }
                Node::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    let diff = self.query[dim] - value;
                    let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                    // a path may cut the same dimension twice, so bounds combine by max
                    let far_dist = mindist.max(diff * diff);
                    if far_dist <= self.nearest.bound() {
                        self.heap.push(Branch {
                            dist: far_dist,
                            tree,
                            node: far,
                        });
                    }
                    node = near;
                }
            }
        }
    }

    fn run(mut self, query_idx: usize, metric: Metric) -> Option<CandidateGroup> {
        for tree in 0..self.forest.trees.len() {
            self.descend(tree, self.forest.trees[tree].root, 0.0);
        }
        while let Some(branch) = self.heap.pop() {
            if self.checks >= self.max_checks && self.nearest.is_full() {
                break;
            }
            if branch.dist > self.nearest.bound() {
                break;
            }
            self.descend(branch.tree, branch.node, branch.dist);
        }
        self.nearest.into_group(query_idx, |d| match metric {
            Metric::Euclidean => d.sqrt(),
            Metric::Hamming => d,
        })
    }
}

impl KdForest {
    /// Index the rows of `train` in `trees` randomized trees.
    pub fn build(train: &Descriptors, trees: usize, seed: u64) -> Self {
        let (dim, rows, metric) = match train {
            Descriptors::Float { dim, data } => (*dim, data.clone(), Metric::Euclidean),
            Descriptors::Binary { bytes, data } => (bytes * 8, unpack_bits(data), Metric::Hamming),
        };
        let n = if dim == 0 { 0 } else { rows.len() / dim };

        let trees = (0..trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let mut idx: Vec<usize> = (0..n).collect();
                idx.shuffle(&mut rng);
                let mut builder = TreeBuilder {
                    rows: &rows,
                    dim,
                    rng,
                    nodes: Vec::with_capacity(2 * n),
                };
                let root = if n == 0 { 0 } else { builder.build(&mut idx) };
                KdTree {
                    nodes: builder.nodes,
                    root,
                }
            })
            .collect();

        Self {
            dim,
            rows,
            trees,
            metric,
        }
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.rows.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.rows[i * self.dim..(i + 1) * self.dim]
    }

    fn search(&self, query_idx: usize, q: &[f32], k: usize, checks: usize) -> Option<CandidateGroup> {
        let search = Search {
            forest: self,
            query: q,
            nearest: Nearest::new(k),
            visited: vec![false; self.len()],
            checks: 0,
            max_checks: checks,
            heap: BinaryHeap::new(),
        };
        search.run(query_idx, self.metric)
    }

    /// Approximate `k` nearest neighbors for every row of `query`.
    pub fn knn(&self, query: &Descriptors, k: usize, checks: usize) -> Vec<CandidateGroup> {
        if self.is_empty() {
            return Vec::new();
        }
        match query {
            Descriptors::Float { dim, data } if *dim == self.dim => data
                .par_chunks_exact(*dim)
                .enumerate()
                .filter_map(|(qi, q)| self.search(qi, q, k, checks))
                .collect(),
            Descriptors::Binary { bytes, data } if bytes * 8 == self.dim => data
                .par_chunks_exact(*bytes)
                .enumerate()
                .filter_map(|(qi, q)| self.search(qi, &unpack_bits(q), k, checks))
                .collect(),
            _ => Vec::new(),
        }
    }
}
