use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::prelude::*;

use crate::error::{Error, Result};

pub type LabelId = u32;

/// 图像上的一个特征点，x 为列坐标，y 为行坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// 特征点邻域直径
    pub size: f32,
    /// 方向，-1 表示无方向
    pub angle: f32,
    /// 检测器响应强度
    pub response: f32,
    pub octave: i32,
    pub class_id: i32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32, size: f32, response: f32) -> Self {
        Self { x, y, size, angle: -1.0, response, octave: 0, class_id: -1 }
    }

    /// 到 (cx, cy) 的欧氏距离的平方
    pub fn dist2(&self, cx: f32, cy: f32) -> f32 {
        (self.x - cx).powi(2) + (self.y - cy).powi(2)
    }
}

/// 一张图片的特征提取结果
///
/// 描述符矩阵的行数始终等于特征点数量
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    height: u32,
    width: u32,
    keypoints: Vec<KeyPoint>,
    descriptors: Array2<f32>,
}

impl Features {
    pub fn new(
        height: u32,
        width: u32,
        keypoints: Vec<KeyPoint>,
        descriptors: Array2<f32>,
    ) -> Result<Self> {
        if descriptors.nrows() != keypoints.len() {
            return Err(Error::DimensionMismatch {
                what: "描述符行数",
                expected: keypoints.len(),
                actual: descriptors.nrows(),
            });
        }
        Ok(Self { height, width, keypoints, descriptors })
    }

    /// 没有任何特征点的结果，仍然保留描述符维度
    pub fn empty(height: u32, width: u32, dim: usize) -> Self {
        Self { height, width, keypoints: vec![], descriptors: Array2::zeros((0, dim)) }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> ArrayView2<'_, f32> {
        self.descriptors.view()
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.descriptors.ncols()
    }

    /// 平移所有特征点，用于把子窗口的结果映射回原图
    pub fn shift(&mut self, dx: f32, dy: f32) {
        for kp in &mut self.keypoints {
            kp.x += dx;
            kp.y += dy;
        }
    }

    /// 按顺序拼接多个子窗口的特征，结果尺寸为 (height, width)
    pub fn concat(height: u32, width: u32, dim: usize, parts: Vec<Features>) -> Result<Self> {
        let total = parts.iter().map(Features::len).sum();
        let mut keypoints = Vec::with_capacity(total);
        let mut descriptors = Array2::zeros((total, dim));
        let mut row = 0;
        for part in parts {
            if part.is_empty() {
                continue;
            }
            if part.dim() != dim {
                return Err(Error::DimensionMismatch {
                    what: "描述符维度",
                    expected: dim,
                    actual: part.dim(),
                });
            }
            let n = part.len();
            descriptors.slice_mut(s![row..row + n, ..]).assign(&part.descriptors);
            keypoints.extend(part.keypoints);
            row += n;
        }
        Ok(Self { height, width, keypoints, descriptors })
    }
}

/// 词袋直方图，长度在初始化后固定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordHistogram(Vec<u32>);

impl WordHistogram {
    pub fn new(words: usize) -> Self {
        Self(vec![0; words])
    }

    /// 越界的序号会被忽略
    pub fn increment(&mut self, word: usize) {
        if let Some(v) = self.0.get_mut(word) {
            *v += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|&v| v as u64).sum()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn to_f32(&self) -> Array1<f32> {
        self.0.iter().map(|&v| v as f32).collect()
    }
}

impl From<Vec<u32>> for WordHistogram {
    fn from(v: Vec<u32>) -> Self {
        Self(v)
    }
}

/// 数据库中的一个带标签的图片
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub label: LabelId,
    pub comment: Option<String>,
    /// 图片路径，直接提供特征的条目没有图片
    pub image: Option<PathBuf>,
    pub features: Option<Features>,
    /// 调节器最后使用的阈值
    pub threshold: Option<f64>,
    pub word_hist: Option<WordHistogram>,
    pub color_hist: Option<Vec<f32>>,
}

impl Entry {
    pub fn new(name: impl Into<String>, label: LabelId, image: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            label,
            comment: None,
            image,
            features: None,
            threshold: None,
            word_hist: None,
            color_hist: None,
        }
    }

    pub fn with_features(name: impl Into<String>, label: LabelId, features: Features) -> Self {
        let mut entry = Self::new(name, label, None);
        entry.features = Some(features);
        entry
    }

    pub fn keypoint_count(&self) -> usize {
        self.features.as_ref().map_or(0, Features::len)
    }

    pub fn features(&self) -> Result<&Features> {
        self.features.as_ref().ok_or_else(|| Error::MissingFeatures(self.name.clone()))
    }
}

/// 标签名与标签 ID 的双向映射，ID 按首次出现的顺序从 0 开始分配
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    names: Vec<String>,
    colors: Vec<[u8; 3]>,
    ids: HashMap<String, LabelId>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回标签的 ID，不存在则新建
    pub fn intern(&mut self, name: &str) -> LabelId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as LabelId;
        self.names.push(name.to_owned());
        self.colors.push([0xFF; 3]);
        self.ids.insert(name.to_owned(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<LabelId> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: LabelId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 设置标签的显示颜色，未设置的标签为白色
    pub fn set_color(&mut self, id: LabelId, color: [u8; 3]) -> bool {
        match self.colors.get_mut(id as usize) {
            Some(slot) => {
                *slot = color;
                true
            }
            None => false,
        }
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_table_first_seen_order() {
        let mut table = LabelTable::new();
        assert_eq!(table.intern("grass"), 0);
        assert_eq!(table.intern("rock"), 1);
        assert_eq!(table.intern("grass"), 0);
        assert_eq!(table.intern("sand"), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.name(1), Some("rock"));
        assert_eq!(table.id("sand"), Some(2));
        assert_eq!(table.name(3), None);
    }

    #[test]
    fn test_label_colors_default_white() {
        let mut table = LabelTable::new();
        table.intern("a");
        table.intern("b");
        assert!(table.set_color(0, [255, 0, 0]));
        assert!(!table.set_color(5, [0, 0, 0]));
        assert_eq!(table.colors(), &[[255, 0, 0], [255, 255, 255]]);
    }

    #[test]
    fn test_features_row_count_mismatch() {
        let kps = vec![KeyPoint::new(1.0, 2.0, 8.0, 1.0)];
        let err = Features::new(10, 10, kps, Array2::zeros((2, 4))).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn test_features_concat_and_shift() {
        let mut a = Features::new(
            4,
            4,
            vec![KeyPoint::new(1.0, 1.0, 4.0, 1.0)],
            array![[1.0, 2.0]],
        )
        .unwrap();
        let b = Features::new(
            4,
            4,
            vec![KeyPoint::new(0.0, 3.0, 4.0, 1.0), KeyPoint::new(2.0, 2.0, 4.0, 1.0)],
            array![[3.0, 4.0], [5.0, 6.0]],
        )
        .unwrap();
        a.shift(4.0, 0.0);

        let merged = Features::concat(4, 8, 2, vec![a, Features::empty(4, 4, 2), b]).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.keypoints()[0].x, 5.0);
        assert_eq!(merged.descriptors(), array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    }

    #[test]
    fn test_word_histogram_ignores_out_of_range() {
        let mut hist = WordHistogram::new(3);
        hist.increment(0);
        hist.increment(2);
        hist.increment(2);
        hist.increment(7);
        assert_eq!(hist.as_slice(), &[1, 0, 2]);
        assert_eq!(hist.total(), 3);
    }
}
