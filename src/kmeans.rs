use log::{debug, info};
use ndarray::prelude::*;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// 聚类结果
#[derive(Debug, Clone)]
pub struct Clustering {
    /// 聚类中心，每行一个
    pub centroids: Array2<f32>,
    /// 每个向量所属的聚类中心序号
    pub assignments: Vec<usize>,
    /// 所有向量到所属聚类中心的距离平方和
    pub distsum: f32,
    /// 每个聚类中心包含的向量数量
    pub centroid_frequency: Vec<usize>,
}

/// 聚类算法
pub trait Clusterer: Send + Sync {
    /// 将 `data` 的每一行聚为 `k` 类
    ///
    /// # Arguments
    ///
    /// * `data` - 输入向量，每行一个
    /// * `k` - 聚类中心数量
    /// * `max_iter` - 最大迭代次数
    /// * `attempts` - 重复次数，保留距离和最小的一次
    fn cluster(
        &self,
        data: ArrayView2<f32>,
        k: usize,
        max_iter: usize,
        attempts: usize,
    ) -> Result<Clustering>;
}

pub fn imbalance_factor(hist: &[usize]) -> f32 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f32;
        tot += h;
        uf += h.powf(2.0);
    }
    uf * hist.len() as f32 / tot.powf(2.0)
}

/// 欧氏距离的平方
#[inline]
pub fn l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 寻找最近的聚类中心，距离相同时取序号最小的
pub fn nearest_centroid(point: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f32) {
    let mut best = 0;
    let mut min_distance = f32::MAX;
    for (j, centroid) in centroids.rows().into_iter().enumerate() {
        let distance = match (point.as_slice(), centroid.as_slice()) {
            (Some(p), Some(c)) => l2_sqr(p, c),
            _ => point.iter().zip(centroid.iter()).map(|(x, y)| (x - y) * (x - y)).sum(),
        };
        if distance < min_distance {
            min_distance = distance;
            best = j;
        }
    }
    (best, min_distance)
}

/// 将每个点分配给最近的聚类中心，并返回聚类中心的序号和总距离
fn update_assignments(data: ArrayView2<f32>, centroids: ArrayView2<f32>) -> (Vec<usize>, f32) {
    let (assignments, distances): (Vec<_>, Vec<_>) = (0..data.nrows())
        .into_par_iter()
        .map(|i| nearest_centroid(data.row(i), centroids))
        .unzip();
    (assignments, distances.iter().sum())
}

/// 重新计算聚类中心，没有分配到向量的中心保持不变
fn update_centroids(
    data: ArrayView2<f32>,
    assignments: &[usize],
    centroids: &mut Array2<f32>,
) -> Vec<usize> {
    let k = centroids.nrows();
    let mut sums = Array2::<f32>::zeros(centroids.raw_dim());
    let mut frequency = vec![0; k];
    for (row, &c) in data.rows().into_iter().zip(assignments) {
        let mut sum = sums.row_mut(c);
        sum += &row;
        frequency[c] += 1;
    }
    for (c, &count) in frequency.iter().enumerate() {
        if count > 0 {
            let mean = &sums.row(c) / count as f32;
            centroids.row_mut(c).assign(&mean);
        }
    }
    frequency
}

/// Lloyd 算法的 k-means，使用 k-means++ 初始化
///
/// 相同的种子和输入总是得到相同的结果
#[derive(Debug, Clone, Default)]
pub struct LloydKMeans {
    pub seed: u64,
}

impl LloydKMeans {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// k-means++ 初始化：按到已选中心距离的平方加权随机选择下一个中心
    fn init_plusplus(data: ArrayView2<f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
        let n = data.nrows();
        let mut centroids = Array2::zeros((k, data.ncols()));
        let first = rng.random_range(0..n);
        centroids.row_mut(0).assign(&data.row(first));

        let mut dists: Vec<f32> = (0..n)
            .map(|i| {
                let d = data.row(i).to_owned() - centroids.row(0);
                d.dot(&d)
            })
            .collect();

        for c in 1..k {
            let total: f32 = dists.iter().sum();
            let picked = if total > 0.0 {
                let mut r = rng.random::<f32>() * total;
                let mut picked = n - 1;
                for (i, &d) in dists.iter().enumerate() {
                    if r < d {
                        picked = i;
                        break;
                    }
                    r -= d;
                }
                picked
            } else {
                rng.random_range(0..n)
            };
            centroids.row_mut(c).assign(&data.row(picked));

            let centroid = centroids.row(c);
            for (i, d) in dists.iter_mut().enumerate() {
                let diff = data.row(i).to_owned() - centroid;
                *d = d.min(diff.dot(&diff));
            }
        }
        centroids
    }

    fn run(&self, data: ArrayView2<f32>, k: usize, max_iter: usize, attempt: usize) -> Clustering {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(attempt as u64));
        let mut centroids = Self::init_plusplus(data, k, &mut rng);

        let mut previous: Option<Vec<usize>> = None;
        for nr in 0..max_iter {
            let (assignments, distsum) = update_assignments(data, centroids.view());
            if previous.as_ref() == Some(&assignments) {
                debug!("第 {nr} 轮收敛，距离和：{distsum:.4}");
                break;
            }
            let frequency = update_centroids(data, &assignments, &mut centroids);
            debug!(
                "第 {} 轮 - 不平衡度：{:.2} | 距离和：{:.4}",
                nr,
                imbalance_factor(&frequency),
                distsum
            );
            previous = Some(assignments);
        }

        let (assignments, distsum) = update_assignments(data, centroids.view());
        let mut centroid_frequency = vec![0; k];
        for &c in &assignments {
            centroid_frequency[c] += 1;
        }
        Clustering { centroids, assignments, distsum, centroid_frequency }
    }
}

impl Clusterer for LloydKMeans {
    fn cluster(
        &self,
        data: ArrayView2<f32>,
        k: usize,
        max_iter: usize,
        attempts: usize,
    ) -> Result<Clustering> {
        let n = data.nrows();
        if n == 0 {
            return Err(Error::EmptyInput("没有可聚类的描述符"));
        }
        if k == 0 {
            return Err(Error::Configuration("聚类中心数量必须大于 0".to_string()));
        }
        if n < k {
            return Err(Error::Configuration(format!("描述符数量 {n} 少于聚类中心数量 {k}")));
        }

        info!("对 {n} 组向量进行聚类，中心点数量 = {k}");
        let mut best: Option<Clustering> = None;
        for attempt in 0..attempts.max(1) {
            let result = self.run(data, k, max_iter, attempt);
            info!(
                "第 {} 次聚类完成，距离和：{:.4}，不平衡度：{:.2}",
                attempt + 1,
                result.distsum,
                imbalance_factor(&result.centroid_frequency)
            );
            if best.as_ref().is_none_or(|b| result.distsum < b.distsum) {
                best = Some(result);
            }
        }
        best.ok_or(Error::EmptyInput("没有聚类结果"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 围绕给定中心生成带噪声的点
    fn blobs(centers: &[[f32; 2]], per: usize, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = Array2::zeros((centers.len() * per, 2));
        for (i, mut row) in data.rows_mut().into_iter().enumerate() {
            let c = centers[i % centers.len()];
            row[0] = c[0] + rng.random_range(-0.5..0.5);
            row[1] = c[1] + rng.random_range(-0.5..0.5);
        }
        data
    }

    #[test]
    fn test_nearest_centroid_tie_breaks_low() {
        let centroids = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 5.0]];
        let (idx, dist) = nearest_centroid(array![0.0, 0.0].view(), centroids.view());
        assert_eq!(idx, 0);
        assert_eq!(dist, 1.0);
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let data = blobs(&[[0.0, 0.0], [20.0, 20.0], [-20.0, 20.0]], 30, 7);
        let result = LloydKMeans::new(42).cluster(data.view(), 3, 100, 3).unwrap();

        assert_eq!(result.centroids.dim(), (3, 2));
        assert_eq!(result.assignments.len(), 90);
        let mut freq = result.centroid_frequency.clone();
        freq.sort();
        assert_eq!(freq, vec![30, 30, 30]);
        // 同一个簇的点应该分到同一类
        for i in 0..90 {
            assert_eq!(result.assignments[i], result.assignments[i % 3]);
        }
    }

    #[test]
    fn test_kmeans_deterministic_with_seed() {
        let data = blobs(&[[0.0, 0.0], [5.0, 5.0]], 20, 1);
        let a = LloydKMeans::new(3).cluster(data.view(), 4, 50, 2).unwrap();
        let b = LloydKMeans::new(3).cluster(data.view(), 4, 50, 2).unwrap();
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.assignments, b.assignments);
    }

    #[test]
    fn test_kmeans_assignments_match_nearest() {
        let data = blobs(&[[0.0, 0.0], [3.0, 0.0], [0.0, 3.0]], 10, 9);
        let result = LloydKMeans::new(0).cluster(data.view(), 5, 20, 1).unwrap();
        for (row, &c) in data.rows().into_iter().zip(&result.assignments) {
            assert_eq!(nearest_centroid(row, result.centroids.view()).0, c);
        }
    }

    #[test]
    fn test_kmeans_single_cluster() {
        let data = Array2::from_elem((8, 3), 66.0);
        let result = LloydKMeans::new(0).cluster(data.view(), 1, 10, 1).unwrap();
        assert_eq!(result.centroids, Array2::from_elem((1, 3), 66.0));
        assert_eq!(result.distsum, 0.0);
    }

    #[test]
    fn test_kmeans_rejects_bad_input() {
        let empty = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            LloydKMeans::new(0).cluster(empty.view(), 2, 10, 1),
            Err(Error::EmptyInput(_))
        ));
        let small = Array2::<f32>::zeros((2, 4));
        assert!(matches!(
            LloydKMeans::new(0).cluster(small.view(), 3, 10, 1),
            Err(Error::Configuration(_))
        ));
    }
}
