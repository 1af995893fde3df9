use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use super::{Detector, non_max_suppression};
use crate::entry::KeyPoint;

/// 响应值的缩放系数，让阈值和 Hessian 阈值处于相近的量级
const RESPONSE_SCALE: f32 = 1e4;

/// Harris 角点检测器
#[derive(Debug, Clone)]
pub struct HarrisDetector {
    /// 响应函数中的经验常数 k
    pub k: f32,
    /// 特征点邻域直径
    pub size: f32,
}

impl Default for HarrisDetector {
    fn default() -> Self {
        Self { k: 0.04, size: 9.0 }
    }
}

impl HarrisDetector {
    /// 计算每个像素的角点响应，边界 2 像素内为 0
    pub fn response(&self, image: &GrayImage) -> Vec<f32> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let mut response = vec![0.0; w * h];
        if w < 5 || h < 5 {
            return response;
        }

        // 阶跃边缘上 Sobel 响应是中心差分的 8 倍
        let scale = 1.0 / (8.0 * 255.0);
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        // 梯度的二阶矩
        let mut ixx = vec![0.0f32; w * h];
        let mut iyy = vec![0.0f32; w * h];
        let mut ixy = vec![0.0f32; w * h];
        for (i, (dx, dy)) in gx.as_raw().iter().zip(gy.as_raw()).enumerate() {
            let (dx, dy) = (*dx as f32 * scale, *dy as f32 * scale);
            ixx[i] = dx * dx;
            iyy[i] = dy * dy;
            ixy[i] = dx * dy;
        }

        for y in 2..h - 2 {
            for x in 2..w - 2 {
                let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
                for wy in y - 1..=y + 1 {
                    for wx in x - 1..=x + 1 {
                        sxx += ixx[wy * w + wx];
                        syy += iyy[wy * w + wx];
                        sxy += ixy[wy * w + wx];
                    }
                }
                let det = sxx * syy - sxy * sxy;
                let trace = sxx + syy;
                response[y * w + x] = (det - self.k * trace * trace) * RESPONSE_SCALE;
            }
        }
        response
    }
}

impl Detector for HarrisDetector {
    fn detect(&self, image: &GrayImage, threshold: f64) -> Vec<KeyPoint> {
        let w = image.width() as usize;
        let response = self.response(image);
        let threshold = threshold as f32;

        let candidates = response
            .iter()
            .enumerate()
            .filter(|&(_, &r)| r > threshold)
            .map(|(i, &r)| (i % w, i / w, r))
            .collect();

        non_max_suppression(candidates, &response, w)
            .into_iter()
            .map(|(x, y, r)| KeyPoint::new(x as f32, y as f32, self.size, r))
            .collect()
    }

    fn default_threshold(&self) -> f64 {
        1000.0
    }

    fn threshold_bounds(&self) -> (f64, f64) {
        (1.0, 15000.0)
    }
}
