//! 把描述符量化为词袋直方图

use log::trace;
use ndarray::prelude::*;

use crate::entry::{Features, KeyPoint, WordHistogram};
use crate::error::Result;
use crate::vocabulary::Vocabulary;

/// 对所有描述符做最近邻量化并计数
///
/// 直方图总数等于描述符行数
pub fn encode(descriptors: ArrayView2<f32>, vocab: &Vocabulary) -> Result<WordHistogram> {
    let mut hist = WordHistogram::new(vocab.words());
    for word in vocab.quantize(descriptors)? {
        hist.increment(word);
    }
    Ok(hist)
}

/// 按像素的掩码，行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    rows: usize,
    cols: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![false; rows * cols] }
    }

    /// 只包含 [x0, x1) x [y0, y1) 矩形的掩码
    pub fn rect(rows: usize, cols: usize, x: (usize, usize), y: (usize, usize)) -> Self {
        let mut mask = Self::new(rows, cols);
        for row in y.0..y.1.min(rows) {
            for col in x.0..x.1.min(cols) {
                mask.data[row * cols + col] = true;
            }
        }
        mask
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x < self.cols && y < self.rows {
            self.data[y * self.cols + x] = value;
        }
    }

    /// 掩码之外的坐标都视为不接受
    pub fn accepts(&self, x: f32, y: f32) -> bool {
        if x < 0.0 || y < 0.0 {
            return false;
        }
        let (col, row) = (x.round() as usize, y.round() as usize);
        col < self.cols && row < self.rows && self.data[row * self.cols + col]
    }
}

/// 只统计位置被掩码接受的特征点
pub fn encode_masked(
    features: &Features,
    vocab: &Vocabulary,
    mask: &Mask,
) -> Result<WordHistogram> {
    let words = vocab.quantize(features.descriptors())?;
    let mut hist = WordHistogram::new(vocab.words());
    for (kp, word) in features.keypoints().iter().zip(words) {
        if mask.accepts(kp.x, kp.y) {
            hist.increment(word);
        }
    }
    Ok(hist)
}

/// 圆形区域直方图的半径调节参数
#[derive(Debug, Clone)]
pub struct CircularWindow {
    pub min_words: usize,
    pub max_words: usize,
    pub alpha: f64,
    pub max_iterations: usize,
    /// 半径的允许范围
    pub radius_bounds: (f64, f64),
}

impl CircularWindow {
    pub fn new(min_words: usize, max_words: usize, radius_bounds: (f64, f64)) -> Self {
        Self { min_words, max_words, alpha: 0.25, max_iterations: 100, radius_bounds }
    }

    fn mid(&self) -> f64 {
        let span = self.max_words.saturating_sub(self.min_words) as f64;
        (span / 2.0).round() + self.min_words as f64
    }
}

/// 圆形区域内的直方图
#[derive(Debug, Clone)]
pub struct CircularHistogram {
    pub histogram: WordHistogram,
    /// 圆内特征点的序号
    pub points: Vec<usize>,
}

/// 半径调节结果
///
/// `radius` 总是返回最后一次调节后的半径，可以作为下一个窗口的初始半径
#[derive(Debug, Clone)]
pub struct CircularOutcome {
    pub radius: f64,
    pub iterations: usize,
    /// 没有命中目标区间时为 None
    pub window: Option<CircularHistogram>,
}

impl CircularOutcome {
    pub fn hit_target(&self) -> bool {
        self.window.is_some()
    }
}

/// 调整圆的半径，使圆内 (距离 <= 半径) 的特征点数量落在 [min_words, max_words]
///
/// # Arguments
///
/// * `keypoints` - 所有特征点
/// * `labels` - 每个特征点预先量化好的单词
/// * `words` - 单词数量，即直方图长度
/// * `center` - 圆心 (x, y)，x 为列坐标
/// * `radius` - 初始半径
pub fn encode_circular(
    window: &CircularWindow,
    keypoints: &[KeyPoint],
    labels: &[usize],
    words: usize,
    center: (f32, f32),
    radius: f64,
) -> CircularOutcome {
    let (lo, hi) = window.radius_bounds;
    let mid = window.mid();
    let dist2: Vec<f64> = keypoints.iter().map(|kp| kp.dist2(center.0, center.1) as f64).collect();

    let mut radius = radius.clamp(lo, hi);
    for i in 0..window.max_iterations {
        let r2 = radius * radius;
        let count = dist2.iter().filter(|&&d| d <= r2).count();
        let (cx, cy) = center;
        trace!("圆心 ({cx:.0}, {cy:.0}) 第 {i} 轮：半径 = {radius:.2}，特征点数量 = {count}");

        if count >= window.min_words && count <= window.max_words {
            let points: Vec<usize> = (0..dist2.len()).filter(|&j| dist2[j] <= r2).collect();
            let mut histogram = WordHistogram::new(words);
            for &j in &points {
                if let Some(&word) = labels.get(j) {
                    histogram.increment(word);
                }
            }
            return CircularOutcome {
                radius,
                iterations: i + 1,
                window: Some(CircularHistogram { histogram, points }),
            };
        }
        radius = (radius + window.alpha * (mid - count as f64)).clamp(lo, hi);
    }

    CircularOutcome { radius, iterations: window.max_iterations, window: None }
}
