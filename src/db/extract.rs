use std::path::Path;

use image::GrayImage;
use image::imageops::crop_imm;
use log::debug;

use crate::adjuster::ThresholdAdjuster;
use crate::config::FeatureConfig;
use crate::detector::{Detector, Extractor};
use crate::entry::Features;
use crate::error::Result;
use crate::raster;

/// 一张图片的特征提取结果
#[derive(Debug, Clone)]
pub struct Extracted {
    pub features: Features,
    /// 调节器最后得到的阈值，可以作为下一次提取的初始阈值
    pub threshold: f64,
    pub hit_target: bool,
}

/// 检测、调节阈值和计算描述符
pub(crate) struct Extraction<'a> {
    pub detector: &'a dyn Detector,
    pub extractor: &'a dyn Extractor,
    pub config: &'a FeatureConfig,
}

impl Extraction<'_> {
    pub fn initial_threshold(&self) -> f64 {
        self.config.threshold.unwrap_or_else(|| self.detector.default_threshold())
    }

    fn adjuster(&self) -> ThresholdAdjuster {
        let c = &self.config.adjuster;
        ThresholdAdjuster {
            min: c.min,
            max: c.max,
            iterations: c.iterations,
            learn_rate: c.learn_rate,
            bounds: self.detector.threshold_bounds(),
        }
    }

    pub fn extract_file(&self, path: &Path, threshold: f64) -> Result<Extracted> {
        let mut image = raster::open_gray(path)?;
        if self.config.auto_levels {
            image = raster::auto_levels(&image, self.config.auto_levels_clip);
        }
        Ok(self.extract(&image, threshold))
    }

    pub fn extract(&self, image: &GrayImage, threshold: f64) -> Extracted {
        let step = self.config.adjuster.grid_step;
        let tiled = self.config.adjuster.grid && image.width() >= step && image.height() >= step;
        if !tiled {
            return self.extract_window(image, threshold);
        }

        // 只使用完整的窗口，阈值在窗口之间传递
        let mut parts = vec![];
        let mut threshold = threshold;
        let mut hit_target = true;
        for y in (0..=image.height() - step).step_by(step as usize) {
            for x in (0..=image.width() - step).step_by(step as usize) {
                let window = crop_imm(image, x, y, step, step).to_image();
                let mut part = self.extract_window(&window, threshold);
                let count = part.features.len();
                debug!("窗口 ({x}, {y})：阈值 = {:.2}，特征点数量 = {count}", part.threshold);
                part.features.shift(x as f32, y as f32);
                threshold = part.threshold;
                hit_target &= part.hit_target;
                parts.push(part.features);
            }
        }

        let (height, width, dim) = (image.height(), image.width(), self.extractor.dimension());
        let features = Features::concat(height, width, dim, parts)
            .unwrap_or_else(|_| Features::empty(height, width, dim));
        Extracted { features, threshold, hit_target }
    }

    fn extract_window(&self, image: &GrayImage, threshold: f64) -> Extracted {
        if !self.config.adjuster.enabled {
            let keypoints = self.detector.detect(image, threshold);
            return Extracted {
                features: self.extractor.compute(image, keypoints),
                threshold,
                hit_target: true,
            };
        }

        let adjusted = self.adjuster().adjust(threshold, |t| self.detector.detect(image, t));
        Extracted {
            features: self.extractor.compute(image, adjusted.keypoints),
            threshold: adjusted.next_threshold,
            hit_target: adjusted.hit_target,
        }
    }
}
