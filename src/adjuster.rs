use log::debug;

use crate::entry::KeyPoint;

/// 通过比例控制调节检测器阈值，使特征点数量落在 [min, max] 区间内
#[derive(Debug, Clone)]
pub struct ThresholdAdjuster {
    pub min: usize,
    pub max: usize,
    pub iterations: usize,
    pub learn_rate: f64,
    /// 阈值的允许范围
    pub bounds: (f64, f64),
}

/// 调节结果
#[derive(Debug, Clone)]
pub struct Adjusted {
    /// 产生 `keypoints` 的阈值
    pub threshold: f64,
    /// 继续调节时应使用的阈值，命中时与 `threshold` 相同
    pub next_threshold: f64,
    pub keypoints: Vec<KeyPoint>,
    pub hit_target: bool,
    pub iterations: usize,
}

impl ThresholdAdjuster {
    fn in_band(&self, n: usize) -> bool {
        n >= self.min && n <= self.max
    }

    /// 区间中点
    pub fn mid(&self) -> usize {
        self.min + (self.max.saturating_sub(self.min)) / 2
    }

    /// 从 `initial` 开始调节阈值
    ///
    /// 超过迭代次数仍未命中时 `hit_target` 为 false，但仍然返回最后一次的检测结果
    ///
    /// # Arguments
    ///
    /// * `initial` - 初始阈值
    /// * `detect` - 使用给定阈值进行检测
    pub fn adjust<F>(&self, initial: f64, mut detect: F) -> Adjusted
    where
        F: FnMut(f64) -> Vec<KeyPoint>,
    {
        let (lo, hi) = self.bounds;
        let mid = self.mid() as f64;

        let mut learn_rate = self.learn_rate;
        let mut alpha = learn_rate;
        let mut threshold = initial;
        let mut prev_threshold = initial;
        let mut prev_points: Option<usize> = None;

        let mut used = threshold;
        let mut keypoints = vec![];
        let mut iterations = 0;

        for i in 0..self.iterations {
            iterations = i + 1;
            used = threshold;
            keypoints = detect(threshold);
            let n = keypoints.len();
            debug!("第 {i} 轮调节：阈值 = {threshold:.2}，特征点数量 = {n}");

            if self.in_band(n) {
                return Adjusted {
                    threshold,
                    next_threshold: threshold,
                    keypoints,
                    hit_target: true,
                    iterations,
                };
            }

            let overshoot = match prev_points {
                Some(p) => (n < self.min && p > self.max) || (n > self.max && p < self.min),
                None => false,
            };

            if overshoot {
                // 越过了目标区间，取两次阈值的中点并降低学习率
                let before = prev_threshold;
                prev_threshold = threshold;
                threshold -= (threshold - before) / 2.0;
                learn_rate /= 2.0;
            } else {
                if i > 0 {
                    let delta = threshold - prev_threshold;
                    if delta != 0.0 {
                        alpha = (learn_rate / delta).abs();
                    }
                }
                prev_threshold = threshold;
                threshold = (threshold + alpha * (n as f64 - mid)).clamp(lo, hi);
            }

            prev_points = Some(n);
        }

        Adjusted {
            threshold: used,
            next_threshold: threshold,
            keypoints,
            hit_target: false,
            iterations,
        }
    }
}
