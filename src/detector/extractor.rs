use image::{GrayImage, ImageBuffer, Luma};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use ndarray::prelude::*;

use super::Extractor;
use crate::entry::{Features, KeyPoint};

type Gradient = ImageBuffer<Luma<i16>, Vec<i16>>;

/// 类似 SURF 的梯度描述符
///
/// 以特征点为中心取 (cells * cell_size) 见方的区域，划分为 cells x cells 个子块，
/// 每个子块统计 (Σdx, Σdy, Σ|dx|, Σ|dy|)，最后做 L2 归一化
#[derive(Debug, Clone)]
pub struct GradientExtractor {
    pub cells: usize,
    pub cell_size: usize,
}

impl Default for GradientExtractor {
    fn default() -> Self {
        Self { cells: 4, cell_size: 4 }
    }
}

impl GradientExtractor {
    fn half(&self) -> usize {
        self.cells * self.cell_size / 2
    }

    /// 计算描述符需要的像素都在图片内
    fn fits(&self, kp: &KeyPoint, w: usize, h: usize) -> bool {
        let (x, y) = (kp.x.round(), kp.y.round());
        let margin = (self.half() + 1) as f32;
        x >= margin && y >= margin && x + margin < w as f32 && y + margin < h as f32
    }

    fn describe(&self, gx: &Gradient, gy: &Gradient, kp: &KeyPoint, out: &mut [f32]) {
        let half = self.half();
        let x0 = kp.x.round() as u32 - half as u32;
        let y0 = kp.y.round() as u32 - half as u32;

        out.fill(0.0);
        for py in 0..self.cells * self.cell_size {
            for px in 0..self.cells * self.cell_size {
                let (x, y) = (x0 + px as u32, y0 + py as u32);
                let dx = gx.get_pixel(x, y)[0] as f32;
                let dy = gy.get_pixel(x, y)[0] as f32;
                let cell = (py / self.cell_size) * self.cells + px / self.cell_size;
                let v = &mut out[cell * 4..cell * 4 + 4];
                v[0] += dx;
                v[1] += dy;
                v[2] += dx.abs();
                v[3] += dy.abs();
            }
        }

        let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            out.iter_mut().for_each(|v| *v /= norm);
        }
    }
}

impl Extractor for GradientExtractor {
    fn dimension(&self) -> usize {
        self.cells * self.cells * 4
    }

    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>) -> Features {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let keypoints: Vec<_> = keypoints.into_iter().filter(|kp| self.fits(kp, w, h)).collect();

        let mut descriptors = Array2::zeros((keypoints.len(), self.dimension()));
        if !keypoints.is_empty() {
            let gx = horizontal_sobel(image);
            let gy = vertical_sobel(image);
            for (kp, mut row) in keypoints.iter().zip(descriptors.rows_mut()) {
                if let Some(out) = row.as_slice_mut() {
                    self.describe(&gx, &gy, kp, out);
                }
            }
        }

        Features::new(image.height(), image.width(), keypoints, descriptors)
            .unwrap_or_else(|_| Features::empty(image.height(), image.width(), self.dimension()))
    }
}
