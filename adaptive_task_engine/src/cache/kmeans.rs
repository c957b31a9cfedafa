//! Small dense k-means used to group cache keys by access pattern.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Rescale each dimension to zero mean and unit variance in place.
/// Constant dimensions become all zeros.
pub fn standardize(rows: &mut [Vec<f64>]) {
    let Some(width) = rows.first().map(Vec::len) else {
        return;
    };
    let n = rows.len() as f64;
    for dim in 0..width {
        let mean = rows.iter().map(|r| r[dim]).sum::<f64>() / n;
        let variance = rows.iter().map(|r| (r[dim] - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        for row in rows.iter_mut() {
            row[dim] = if std_dev > f64::EPSILON {
                (row[dim] - mean) / std_dev
            } else {
                0.0
            };
        }
    }
}

/// Lloyd's algorithm with k-means++ seeding from a fixed seed.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl KMeans {
    pub fn new(clusters: usize) -> Self {
        Self {
            clusters,
            max_iterations: 100,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Label every row with a cluster id in `0..k`, where `k` is
    /// `min(clusters, rows)`. Empty input yields no labels.
    pub fn fit_predict(&self, rows: &[Vec<f64>]) -> Vec<usize> {
        let k = self.clusters.min(rows.len());
        if k == 0 {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centers = seed_centers(rows, k, &mut rng);
        let mut labels = vec![usize::MAX; rows.len()];

        for _ in 0..self.max_iterations {
            let mut changed = false;
            for (label, row) in labels.iter_mut().zip(rows) {
                let nearest = nearest_center(row, &centers);
                if *label != nearest {
                    *label = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let width = rows[0].len();
            let mut sums = vec![vec![0.0; width]; k];
            let mut counts = vec![0usize; k];
            for (row, &label) in rows.iter().zip(&labels) {
                counts[label] += 1;
                for (acc, value) in sums[label].iter_mut().zip(row) {
                    *acc += value;
                }
            }
            for (cluster, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // an emptied cluster keeps its previous center
                if count > 0 {
                    centers[cluster] = sum.into_iter().map(|s| s / count as f64).collect();
                }
            }
        }

        labels
    }
}

fn seed_centers(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centers = Vec::with_capacity(k);
    centers.push(rows[rng.gen_range(0..rows.len())].clone());

    while centers.len() < k {
        let distances: Vec<f64> = rows
            .iter()
            .map(|row| {
                centers
                    .iter()
                    .map(|c| squared_distance(row, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = rows.len() - 1;
            for (i, d) in distances.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.gen_range(0..rows.len())
        };
        centers.push(rows[next].clone());
    }

    centers
}

fn nearest_center(row: &[f64], centers: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let d = squared_distance(row, center);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize() {
        let mut rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        standardize(&mut rows);
        assert_eq!(rows, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_separates_obvious_groups() {
        let rows = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 10.0],
            vec![10.0, 10.1],
        ];
        let labels = KMeans::new(2).fit_predict(&rows);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![(i % 7) as f64, (i % 3) as f64]).collect();
        let a = KMeans::new(3).fit_predict(&rows);
        let b = KMeans::new(3).fit_predict(&rows);
        assert_eq!(a, b);
        assert!(a.iter().all(|&l| l < 3));
    }

    #[test]
    fn test_identical_points_and_empty_input() {
        let rows = vec![vec![1.0, 1.0]; 4];
        let labels = KMeans::new(3).fit_predict(&rows);
        assert_eq!(labels.len(), 4);
        assert!(KMeans::new(3).fit_predict(&[]).is_empty());
    }
}
