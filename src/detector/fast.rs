use image::GrayImage;
use imageproc::corners::{corners_fast9, corners_fast12};

use super::{Detector, non_max_suppression};
use crate::entry::KeyPoint;

/// FAST 角点检测器，阈值为灰度差
#[derive(Debug, Clone)]
pub struct FastDetector {
    /// 连续亮点或暗点的最小数量，只支持 9 和 12
    pub arc_length: usize,
    pub nonmax_suppression: bool,
}

impl Default for FastDetector {
    fn default() -> Self {
        Self { arc_length: 9, nonmax_suppression: true }
    }
}

impl FastDetector {
    pub fn new(arc_length: usize) -> Self {
        let arc_length = if arc_length >= 12 { 12 } else { 9 };
        Self { arc_length, ..Default::default() }
    }
}

impl Detector for FastDetector {
    fn detect(&self, image: &GrayImage, threshold: f64) -> Vec<KeyPoint> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        if w <= 6 || h <= 6 {
            return vec![];
        }

        let thresh = threshold.round().clamp(1.0, 255.0) as u8;
        let corners = match self.arc_length {
            12 => corners_fast12(image, thresh),
            _ => corners_fast9(image, thresh),
        };

        let mut scores = vec![0.0; w * h];
        let mut candidates = Vec::with_capacity(corners.len());
        for c in corners {
            let (x, y) = (c.x as usize, c.y as usize);
            // 非极大值抑制需要完整的 3x3 邻域
            if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
                continue;
            }
            scores[y * w + x] = c.score;
            candidates.push((x, y, c.score));
        }

        if self.nonmax_suppression {
            candidates = non_max_suppression(candidates, &scores, w);
        }

        candidates
            .into_iter()
            .map(|(x, y, score)| KeyPoint::new(x as f32, y as f32, 7.0, score))
            .collect()
    }

    fn default_threshold(&self) -> f64 {
        20.0
    }

    fn threshold_bounds(&self) -> (f64, f64) {
        (1.0, 255.0)
    }
}
