//! 滑动窗口投票
//!
//! 在图片上按固定间隔取圆心，用圆内的特征点生成直方图并分类，
//! 再把分类结果投票到半径内的所有像素上

use std::path::Path;

use image::{Rgb, RgbImage};
use log::{debug, info};
use rayon::prelude::*;

use crate::classifier::InputMode;
use crate::db::RecognitionDb;
use crate::encoder::{CircularHistogram, CircularWindow, encode_circular};
use crate::entry::{Features, LabelId};
use crate::error::{Error, Result};

/// 每个类别一张投票图，按行优先存储，计数饱和而不溢出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMaps {
    rows: usize,
    cols: usize,
    votes: Vec<Vec<u8>>,
}

impl VoteMaps {
    pub fn new(rows: usize, cols: usize, classes: usize) -> Self {
        Self { rows, cols, votes: vec![vec![0; rows * cols]; classes] }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn classes(&self) -> usize {
        self.votes.len()
    }

    /// 像素 (x, y) 上 `class` 的票数，x 为列
    pub fn get(&self, class: LabelId, x: usize, y: usize) -> u8 {
        if x >= self.cols || y >= self.rows {
            return 0;
        }
        self.votes.get(class as usize).map_or(0, |map| map[y * self.cols + x])
    }

    /// 给圆内 (距离 <= 半径) 的所有像素投一票
    pub fn paint(&mut self, class: LabelId, center: (f32, f32), radius: f64) {
        let Some(map) = self.votes.get_mut(class as usize) else {
            return;
        };
        let (cx, cy) = (center.0 as f64, center.1 as f64);
        let r2 = radius * radius;
        let x0 = (cx - radius).floor().max(0.0) as usize;
        let y0 = (cy - radius).floor().max(0.0) as usize;
        let x1 = ((cx + radius).ceil().max(0.0) as usize).min(self.cols.saturating_sub(1));
        let y1 = ((cy + radius).ceil().max(0.0) as usize).min(self.rows.saturating_sub(1));
        if self.cols == 0 || self.rows == 0 {
            return;
        }
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                if dx * dx + dy * dy <= r2 {
                    let v = &mut map[y * self.cols + x];
                    *v = v.saturating_add(1);
                }
            }
        }
    }

    /// 合并两组投票图
    pub fn merge(mut self, other: VoteMaps) -> Self {
        for (a, b) in self.votes.iter_mut().zip(other.votes) {
            for (x, y) in a.iter_mut().zip(b) {
                *x = x.saturating_add(y);
            }
        }
        self
    }

    /// 每个像素得票最多的类别，票数相同时取序号小的，没有票的像素为 None
    pub fn winners(&self) -> Vec<Option<LabelId>> {
        (0..self.rows * self.cols)
            .map(|i| {
                let mut best: Option<(LabelId, u8)> = None;
                for (class, map) in self.votes.iter().enumerate() {
                    let v = map[i];
                    if v > 0 && best.is_none_or(|(_, b)| v > b) {
                        best = Some((class as LabelId, v));
                    }
                }
                best.map(|(class, _)| class)
            })
            .collect()
    }

    /// 把获胜类别的颜色以 25% 的比例混合到原图上
    pub fn render(&self, image: &RgbImage, colors: &[[u8; 3]]) -> RgbImage {
        let mut out = image.clone();
        let winners = self.winners();
        let cols = (out.width() as usize).min(self.cols);
        let rows = (out.height() as usize).min(self.rows);
        for y in 0..rows {
            for x in 0..cols {
                let winner = winners[y * self.cols + x];
                let Some(color) = winner.and_then(|c| colors.get(c as usize)) else {
                    continue;
                };
                let Rgb(src) = *out.get_pixel(x as u32, y as u32);
                let blended = std::array::from_fn(|i| {
                    (0.25 * color[i] as f32 + 0.75 * src[i] as f32).round() as u8
                });
                out.put_pixel(x as u32, y as u32, Rgb(blended));
            }
        }
        out
    }
}

/// 一个命中目标区间的窗口
struct Window {
    center: (f32, f32),
    radius: f64,
    circle: CircularHistogram,
}

/// 对一张图片的特征点做滑动窗口投票
///
/// # Arguments
///
/// * `db` - 已经训练好词袋分类器的数据库
/// * `features` - 图片的特征点，图片大小取自 `features`
/// * `step` - 圆心间隔，单位为像素
pub fn vote(db: &RecognitionDb, features: &Features, step: usize) -> Result<VoteMaps> {
    if step == 0 {
        return Err(Error::Configuration("step 必须大于 0".to_string()));
    }
    if db.config().classifier.input != InputMode::Words {
        return Err(Error::Configuration("滑动窗口投票只支持词袋直方图".to_string()));
    }
    let vocab = db.vocabulary().ok_or(Error::MissingVocabulary)?;
    let labels = vocab.quantize(features.descriptors())?;

    let (rows, cols) = (features.height() as usize, features.width() as usize);
    let diagonal = ((rows * rows + cols * cols) as f64).sqrt().max(1.0);
    let band = &db.config().features.adjuster;
    let window = CircularWindow::new(band.min, band.max, (1.0, diagonal));

    // 初始半径取第一个训练条目宽度的一半，之后在圆心之间传递
    let mut radius = db
        .entries()
        .iter()
        .find_map(|e| e.features.as_ref())
        .map_or(cols as f64 / 2.0, |f| f.width() as f64 / 2.0);

    let mut windows = vec![];
    let mut skipped = 0;
    for y in (0..=rows).step_by(step) {
        for x in (0..=cols).step_by(step) {
            let center = (x as f32, y as f32);
            let keypoints = features.keypoints();
            let outcome =
                encode_circular(&window, keypoints, &labels, vocab.words(), center, radius);
            radius = outcome.radius;
            match outcome.window {
                Some(circle) => windows.push(Window { center, radius, circle }),
                None => skipped += 1,
            }
        }
    }
    debug!("滑动窗口：{} 个窗口命中，{} 个窗口跳过", windows.len(), skipped);

    let predictions = windows
        .par_iter()
        .map(|w| db.predict_histogram(&w.circle.histogram).map(|label| (label, w)))
        .collect::<Result<Vec<_>>>()?;

    let classes = db.labels().len();
    let maps = predictions
        .par_iter()
        .fold(
            || VoteMaps::new(rows, cols, classes),
            |mut maps, (label, w)| {
                maps.paint(*label, w.center, w.radius);
                maps
            },
        )
        .reduce(|| VoteMaps::new(rows, cols, classes), VoteMaps::merge);

    info!("投票完成：{} 个窗口，{} 个类别", predictions.len(), classes);
    Ok(maps)
}

/// 提取图片特征后投票
pub fn vote_image(db: &RecognitionDb, path: &Path, step: usize) -> Result<VoteMaps> {
    let extracted = db.extract_image(path, None)?;
    vote(db, &extracted.features, step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::entry::KeyPoint;
    use ndarray::Array2;

    fn features(height: u32, width: u32, points: &[(f32, f32, f32)]) -> Features {
        let kps = points.iter().map(|&(x, y, _)| KeyPoint::new(x, y, 7.0, 1.0)).collect();
        let des = Array2::from_shape_fn((points.len(), 2), |(i, _)| points[i].2);
        Features::new(height, width, kps, des).unwrap()
    }

    fn trained_db() -> RecognitionDb {
        let mut config = DatabaseConfig::default();
        config.dictionary.words = 2;
        config.dictionary.iterations = 20;
        config.features.adjuster.min = 1;
        config.features.adjuster.max = 1000;
        let mut db = RecognitionDb::new("vote", config).unwrap();
        let a: Vec<_> = (0..4).map(|i| (i as f32, 0.0, 0.0)).collect();
        let b: Vec<_> = (0..4).map(|i| (i as f32, 0.0, 5.0)).collect();
        db.register_features("a", "a", features(4, 4, &a)).unwrap();
        db.register_features("b", "b", features(4, 4, &b)).unwrap();
        db.prepare().unwrap();
        db
    }

    #[test]
    fn test_paint_disk_and_saturation() {
        let mut maps = VoteMaps::new(5, 5, 1);
        maps.paint(0, (2.0, 2.0), 1.0);
        assert_eq!(maps.get(0, 2, 2), 1);
        assert_eq!(maps.get(0, 3, 2), 1);
        assert_eq!(maps.get(0, 3, 3), 0);
        for _ in 0..300 {
            maps.paint(0, (0.0, 0.0), 0.5);
        }
        assert_eq!(maps.get(0, 0, 0), u8::MAX);
    }

    #[test]
    fn test_winners_tie_and_empty() {
        let mut maps = VoteMaps::new(1, 3, 2);
        maps.paint(0, (0.0, 0.0), 1.0);
        maps.paint(1, (1.0, 0.0), 0.0);
        maps.paint(1, (1.0, 0.0), 0.0);
        // (0,0): 0 有一票 (1,0): 0 一票 1 两票 (2,0): 没有票
        assert_eq!(maps.winners(), vec![Some(0), Some(1), None]);

        let mut tie = VoteMaps::new(1, 1, 2);
        tie.paint(1, (0.0, 0.0), 1.0);
        tie.paint(0, (0.0, 0.0), 1.0);
        assert_eq!(tie.winners(), vec![Some(0)]);
    }

    #[test]
    fn test_vote_localizes_classes() {
        let db = trained_db();
        // 左半边为 a，右半边为 b
        let points: Vec<_> =
            (0..20).map(|x| (x as f32, 1.0, if x < 10 { 0.0 } else { 5.0 })).collect();
        let image = features(4, 20, &points);
        let maps = vote(&db, &image, 5).unwrap();

        let a = db.labels().id("a").unwrap();
        let b = db.labels().id("b").unwrap();
        let winners = maps.winners();
        let at = |x: usize, y: usize| winners[y * maps.cols() + x];
        assert_eq!(at(5, 0), Some(a));
        assert_eq!(at(0, 1), Some(a));
        assert_eq!(at(10, 1), Some(b));
        assert_eq!(at(15, 2), Some(b));
        assert_eq!(at(2, 3), None);
    }

    #[test]
    fn test_render_blends() {
        let mut maps = VoteMaps::new(1, 2, 1);
        maps.paint(0, (0.0, 0.0), 0.0);
        let image = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        let out = maps.render(&image, &[[200, 0, 100]]);
        assert_eq!(out.get_pixel(0, 0), &Rgb([125, 75, 100]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_vote_rejects_zero_step() {
        let db = trained_db();
        let image = features(4, 4, &[(1.0, 1.0, 0.0)]);
        assert!(matches!(vote(&db, &image, 0), Err(Error::Configuration(_))));
    }
}
