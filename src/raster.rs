use std::path::Path;

use image::{GrayImage, RgbImage};

use crate::error::{Error, Result};

pub fn open_gray(path: &Path) -> Result<GrayImage> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| Error::Image { path: path.to_path_buf(), source })
}

pub fn open_rgb(path: &Path) -> Result<RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| Error::Image { path: path.to_path_buf(), source })
}

/// 自动色阶：两端各裁掉 `clip` 百分比的像素后线性拉伸到 0..=255
pub fn auto_levels(image: &GrayImage, clip: f32) -> GrayImage {
    let total = image.as_raw().len();
    if total == 0 {
        return image.clone();
    }

    let mut hist = [0usize; 256];
    for &v in image.as_raw() {
        hist[v as usize] += 1;
    }

    let limit = (total as f32 * clip / 100.0) as usize;
    let mut low = 0;
    let mut acc = 0;
    for (v, &count) in hist.iter().enumerate() {
        acc += count;
        if acc > limit {
            low = v;
            break;
        }
    }
    let mut high = 255;
    acc = 0;
    for (v, &count) in hist.iter().enumerate().rev() {
        acc += count;
        if acc > limit {
            high = v;
            break;
        }
    }

    if high <= low {
        return image.clone();
    }

    let scale = 255.0 / (high - low) as f32;
    let mut output = image.clone();
    for p in output.iter_mut() {
        let v = (*p as f32 - low as f32) * scale;
        *p = v.clamp(0.0, 255.0).round() as u8;
    }
    output
}

/// 计算 R、G、B 三个通道的直方图并依次拼接，长度为 3 * bins
pub fn color_histogram(image: &RgbImage, bins: u32) -> Vec<f32> {
    let bins = bins as usize;
    let mut hist = vec![0.0; 3 * bins];
    for pixel in image.pixels() {
        for (c, &v) in pixel.0.iter().enumerate() {
            hist[c * bins + v as usize * bins / 256] += 1.0;
        }
    }
    hist
}
