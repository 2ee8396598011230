//! CART (Classification and Regression Tree) builder
//!
//! Histogram-binned greedy construction over per-row gradient/hessian
//! pairs. Boosting rounds feed logistic-loss gradients; forest trees feed
//! `g = -y`, `h = 1` with no regularisation, which makes the split gain a
//! squared-error reduction and every leaf `-G / H` a class-1 fraction.

use crate::deterministic::{LcgRng, SplitTieBreaker};
use crate::errors::TrainerError;
use exovision_ai_core::gbdt::{Node, Tree};
use exovision_ai_core::FEATURE_COUNT;

/// Splits must improve the objective by more than this.
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Feature matrix quantised into per-column bins.
///
/// Bin `b` of a feature holds values `<= edges[b]` (and above the previous
/// edge); the last bin is unbounded above. Splitting after bin `b` is
/// therefore the serving rule `value <= edges[b]`.
#[derive(Clone, Debug)]
pub struct BinnedMatrix {
    edges: Vec<Vec<f64>>,
    bins: Vec<[u16; FEATURE_COUNT]>,
}

impl BinnedMatrix {
    pub fn new(features: &[[f64; FEATURE_COUNT]], max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, usize::from(u16::MAX));
        let edges: Vec<Vec<f64>> = (0..FEATURE_COUNT)
            .map(|f| quantile_edges(features.iter().map(|row| row[f]).collect(), max_bins))
            .collect();

        let bins = features
            .iter()
            .map(|row| {
                let mut binned = [0u16; FEATURE_COUNT];
                for (f, slot) in binned.iter_mut().enumerate() {
                    *slot = edges[f].partition_point(|&edge| edge < row[f]) as u16;
                }
                binned
            })
            .collect();

        Self { edges, bins }
    }

    pub fn rows(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_count(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    pub fn bin(&self, row: usize, feature: usize) -> usize {
        usize::from(self.bins[row][feature])
    }

    /// Split threshold separating bins `..=bin` from the rest.
    pub fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.edges[feature][bin]
    }
}

fn quantile_edges(mut values: Vec<f64>, max_bins: usize) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values.dedup();

    if values.len() <= 1 {
        return Vec::new();
    }
    if values.len() <= max_bins {
        values.pop();
        return values;
    }

    let n = values.len();
    let mut edges: Vec<f64> = (1..max_bins).map(|k| values[k * n / max_bins - 1]).collect();
    edges.dedup();
    edges
}

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// L2 regularisation on leaf values
    pub lambda: f64,
    /// Features drawn per split; `None` considers all of them
    pub features_per_split: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_leaf: 1,
            lambda: 1.0,
            features_per_split: None,
        }
    }
}

/// A fitted tree plus the gain each feature contributed to it.
#[derive(Clone, Debug)]
pub struct GrownTree {
    pub tree: Tree,
    pub gains: [f64; FEATURE_COUNT],
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    bin: usize,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

#[derive(Clone, Copy, Default)]
struct BinStats {
    gradient: f64,
    hessian: f64,
    count: usize,
}

/// Build a regression tree over binned features
pub struct CartBuilder<'a> {
    matrix: &'a BinnedMatrix,
    gradients: &'a [f64],
    hessians: &'a [f64],
    config: TreeConfig,
    rng: LcgRng,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        matrix: &'a BinnedMatrix,
        gradients: &'a [f64],
        hessians: &'a [f64],
        config: TreeConfig,
        rng: LcgRng,
    ) -> Result<Self, TrainerError> {
        if gradients.len() != matrix.rows() || hessians.len() != matrix.rows() {
            return Err(TrainerError::Training(format!(
                "{} rows but {} gradients and {} hessians",
                matrix.rows(),
                gradients.len(),
                hessians.len()
            )));
        }

        Ok(Self {
            matrix,
            gradients,
            hessians,
            config,
            rng,
        })
    }

    /// Grow a tree over `rows` (duplicates allowed, as in a bootstrap).
    pub fn build(mut self, rows: &[usize]) -> GrownTree {
        let mut nodes = Vec::new();
        let mut gains = [0.0; FEATURE_COUNT];
        self.build_node(rows, 0, &mut nodes, &mut gains);

        GrownTree {
            tree: Tree::new(nodes, 1.0),
            gains,
        }
    }

    fn build_node(
        &mut self,
        rows: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        gains: &mut [f64; FEATURE_COUNT],
    ) -> i32 {
        let current = nodes.len();
        let (sum_g, sum_h) = self.sums(rows);
        let min_leaf = self.config.min_samples_leaf.max(1);

        let split = if depth >= self.config.max_depth || rows.len() < 2 * min_leaf {
            None
        } else {
            self.find_best_split(rows, sum_g, sum_h, current)
        };

        let Some(split) = split else {
            nodes.push(Node::leaf(current as i32, self.leaf_value(sum_g, sum_h)));
            return current as i32;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&row| self.matrix.bin(row, split.feature_idx) <= split.bin);

        // Reserve the slot so children land after their parent
        nodes.push(Node::internal(
            current as i32,
            split.feature_idx as i32,
            self.matrix.threshold(split.feature_idx, split.bin),
            -1,
            -1,
        ));
        gains[split.feature_idx] += split.gain;

        let left = self.build_node(&left_rows, depth + 1, nodes, gains);
        let right = self.build_node(&right_rows, depth + 1, nodes, gains);
        nodes[current].left = left;
        nodes[current].right = right;

        current as i32
    }

    fn find_best_split(
        &mut self,
        rows: &[usize],
        sum_g: f64,
        sum_h: f64,
        node_id: usize,
    ) -> Option<SplitCandidate> {
        let features = match self.config.features_per_split {
            Some(k) if k < FEATURE_COUNT => self.rng.sample_indices(FEATURE_COUNT, k),
            _ => (0..FEATURE_COUNT).collect(),
        };
        let min_leaf = self.config.min_samples_leaf.max(1);
        let parent_score = self.score(sum_g, sum_h);
        let mut best: Option<SplitCandidate> = None;

        for feature_idx in features {
            let bin_count = self.matrix.bin_count(feature_idx);
            if bin_count < 2 {
                continue;
            }

            let mut histogram = vec![BinStats::default(); bin_count];
            for &row in rows {
                let stats = &mut histogram[self.matrix.bin(row, feature_idx)];
                stats.gradient += self.gradients[row];
                stats.hessian += self.hessians[row];
                stats.count += 1;
            }

            let mut left = BinStats::default();
            for (bin, stats) in histogram.iter().take(bin_count - 1).enumerate() {
                left.gradient += stats.gradient;
                left.hessian += stats.hessian;
                left.count += stats.count;

                let right_count = rows.len() - left.count;
                if left.count < min_leaf {
                    continue;
                }
                if right_count < min_leaf {
                    break;
                }

                let gain = self.score(left.gradient, left.hessian)
                    + self.score(sum_g - left.gradient, sum_h - left.hessian)
                    - parent_score;
                let candidate = SplitCandidate {
                    feature_idx,
                    bin,
                    gain,
                    tie_breaker: SplitTieBreaker::new(feature_idx, bin, node_id),
                };

                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        // Deterministic tie-breaking
                        if gain > current.gain
                            || (gain == current.gain && candidate.tie_breaker < current.tie_breaker)
                        {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
        }

        best.filter(|split| split.gain > MIN_SPLIT_GAIN)
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &row| {
            (g + self.gradients[row], h + self.hessians[row])
        })
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denominator = h + self.config.lambda;
        if denominator > 0.0 {
            g * g / denominator
        } else {
            0.0
        }
    }

    /// Optimal leaf value: -G / (H + lambda)
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denominator = h + self.config.lambda;
        if denominator <= 0.0 {
            return 0.0;
        }
        let value = -g / denominator;
        // Normalise -0.0 so artifacts print the same either way
        if value == 0.0 {
            0.0
        } else {
            value
        }
    }
}
