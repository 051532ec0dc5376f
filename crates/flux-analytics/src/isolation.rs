use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// 单棵树的最大子采样数
const MAX_SAMPLE_SIZE: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug)]
enum Node {
    Leaf { size: usize },
    Split { value: f64, left: Box<Node>, right: Box<Node> },
}

/// 一维孤立森林
///
/// 异常分数 s(x) = 2^(-E[h(x)] / c(n))，越接近 1 越异常。
/// 使用固定种子，相同输入得到相同分数。
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    pub fn fit(data: &[f64], n_trees: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = data.len().min(MAX_SAMPLE_SIZE).max(1);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let sample: Vec<f64> = data
                    .choose_multiple(&mut rng, sample_size)
                    .copied()
                    .collect();
                build(&sample, 0, height_limit, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    pub fn score(&self, value: f64) -> f64 {
        let normalizer = average_path_length(self.sample_size);
        if normalizer <= 0.0 {
            return 0.5;
        }
        let avg_path = self
            .trees
            .iter()
            .map(|tree| path_length(tree, value, 0))
            .sum::<f64>()
            / self.trees.len() as f64;

        2f64.powf(-avg_path / normalizer)
    }

    pub fn scores(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.score(*v)).collect()
    }
}

fn build(sample: &[f64], depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
    if depth >= height_limit || sample.len() <= 1 {
        return Node::Leaf { size: sample.len() };
    }

    let min = sample.iter().copied().fold(f64::INFINITY, f64::min);
    let max = sample.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min >= max {
        return Node::Leaf { size: sample.len() };
    }

    let value = rng.gen_range(min..max);
    let (left, right): (Vec<f64>, Vec<f64>) = sample.iter().partition(|v| **v < value);

    Node::Split {
        value,
        left: Box::new(build(&left, depth + 1, height_limit, rng)),
        right: Box::new(build(&right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &Node, value: f64, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            value: split,
            left,
            right,
        } => {
            if value < *split {
                path_length(left, value, depth + 1)
            } else {
                path_length(right, value, depth + 1)
            }
        }
    }
}

/// 二叉搜索树中不成功查找的平均路径长度 c(n)
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outlier_scores_higher() {
        let mut data: Vec<f64> = (0..100).map(|i| 50.0 + (i % 10) as f64 * 0.1).collect();
        data.push(500.0);

        let forest = IsolationForest::fit(&data, 100, 7);
        let normal = forest.score(50.5);
        let outlier = forest.score(500.0);

        assert!(outlier > normal);
        assert!(outlier > 0.6);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let data: Vec<f64> = (0..50).map(|i| (i * 7 % 13) as f64).collect();

        let a = IsolationForest::fit(&data, 20, 1).scores(&data);
        let b = IsolationForest::fit(&data, 20, 1).scores(&data);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_data() {
        let data = vec![3.0; 20];
        let forest = IsolationForest::fit(&data, 10, 0);
        let score = forest.score(3.0);
        assert!(score > 0.0 && score <= 1.0);
    }
}
