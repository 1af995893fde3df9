//! 特征点检测与描述符计算
//!
//! 检测器和描述符都通过 trait 使用，数据库只依赖这两个接口

mod extractor;
mod fast;
mod harris;

pub use extractor::GradientExtractor;
pub use fast::FastDetector;
pub use harris::HarrisDetector;

use image::GrayImage;

use crate::entry::{Features, KeyPoint};

/// 可以通过单个阈值调节灵敏度的特征点检测器
///
/// 阈值越高，检测到的特征点越少
pub trait Detector: Send + Sync {
    fn detect(&self, image: &GrayImage, threshold: f64) -> Vec<KeyPoint>;

    fn default_threshold(&self) -> f64;

    /// 阈值的允许范围 (min, max)
    fn threshold_bounds(&self) -> (f64, f64);
}

pub trait Extractor: Send + Sync {
    /// 描述符维度
    fn dimension(&self) -> usize;

    /// 计算描述符，无法计算描述符的特征点会被丢弃
    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>) -> Features;
}

/// 3x3 非极大值抑制，`scores` 按行优先存储
fn non_max_suppression(
    candidates: Vec<(usize, usize, f32)>,
    scores: &[f32],
    width: usize,
) -> Vec<(usize, usize, f32)> {
    candidates
        .into_iter()
        .filter(|&(x, y, score)| {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = (x as isize + dx) as usize;
                    let ny = (y as isize + dy) as usize;
                    let other = scores[ny * width + nx];
                    // 相等时保留行优先顺序中靠前的点
                    if other > score || (other == score && (dy < 0 || (dy == 0 && dx < 0))) {
                        return false;
                    }
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use image::{GrayImage, Luma};

    /// 黑色背景上的若干个白色方块，每个方块有 4 个角点
    pub fn squares(width: u32, height: u32, squares: &[(u32, u32, u32)]) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let inside = squares
                .iter()
                .any(|&(sx, sy, size)| x >= sx && x < sx + size && y >= sy && y < sy + size);
            Luma([if inside { 220 } else { 20 }])
        })
    }
}
