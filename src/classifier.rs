//! 分类器：由直方图和标签训练，对单个直方图预测标签

use std::collections::BTreeMap;

use log::debug;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, LabelId};
use crate::error::{Error, Result};
use crate::kmeans::nearest_centroid;

/// 训练和预测使用的直方图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// 词袋直方图
    #[default]
    Words,
    /// 颜色直方图
    Color,
}

/// 训练好的模型
pub trait Model: Send + Sync {
    fn predict(&self, x: ArrayView1<f32>) -> LabelId;
}

pub trait Classifier: Send + Sync {
    /// # Arguments
    ///
    /// * `x` - 设计矩阵，每行一个条目
    /// * `y` - 每行对应的标签
    fn train(&self, x: ArrayView2<f32>, y: &[LabelId]) -> Result<Box<dyn Model>>;
}

/// 分类算法及其参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierKind {
    NearestNeighbor { k: usize },
    NearestCentroid,
}

impl Default for ClassifierKind {
    fn default() -> Self {
        ClassifierKind::NearestNeighbor { k: 1 }
    }
}

impl ClassifierKind {
    pub fn build(&self) -> Box<dyn Classifier> {
        match *self {
            ClassifierKind::NearestNeighbor { k } => Box::new(NearestNeighbor { k }),
            ClassifierKind::NearestCentroid => Box::new(NearestCentroid),
        }
    }
}

fn check_training_set(x: ArrayView2<f32>, y: &[LabelId]) -> Result<()> {
    if x.nrows() == 0 {
        return Err(Error::EmptyInput("没有训练数据"));
    }
    if x.nrows() != y.len() {
        return Err(Error::DimensionMismatch {
            what: "标签数量",
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    Ok(())
}

fn check_width(expected: usize, x: ArrayView1<f32>) -> bool {
    if x.len() != expected {
        debug!("输入维度 {} 与训练维度 {} 不一致", x.len(), expected);
        return false;
    }
    true
}

/// k 近邻，投票数相同时取标签 ID 最小的
#[derive(Debug, Clone)]
pub struct NearestNeighbor {
    pub k: usize,
}

struct NearestNeighborModel {
    k: usize,
    samples: Array2<f32>,
    labels: Vec<LabelId>,
}

impl Classifier for NearestNeighbor {
    fn train(&self, x: ArrayView2<f32>, y: &[LabelId]) -> Result<Box<dyn Model>> {
        if self.k == 0 {
            return Err(Error::Configuration("k 必须大于 0".to_string()));
        }
        check_training_set(x, y)?;
        Ok(Box::new(NearestNeighborModel {
            k: self.k.min(x.nrows()),
            samples: x.to_owned(),
            labels: y.to_vec(),
        }))
    }
}

impl Model for NearestNeighborModel {
    fn predict(&self, x: ArrayView1<f32>) -> LabelId {
        if !check_width(self.samples.ncols(), x) {
            return self.labels[0];
        }
        let mut distances: Vec<(f32, usize)> = self
            .samples
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let d = &row - &x;
                (d.dot(&d), i)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut votes = BTreeMap::new();
        for &(_, i) in distances.iter().take(self.k) {
            *votes.entry(self.labels[i]).or_insert(0usize) += 1;
        }
        // BTreeMap 按标签升序，只在票数严格更多时替换
        let mut best = (self.labels[distances[0].1], 0);
        for (label, count) in votes {
            if count > best.1 {
                best = (label, count);
            }
        }
        best.0
    }
}

/// 最近类中心
#[derive(Debug, Clone)]
pub struct NearestCentroid;

struct NearestCentroidModel {
    classes: Vec<LabelId>,
    centroids: Array2<f32>,
}

impl Classifier for NearestCentroid {
    fn train(&self, x: ArrayView2<f32>, y: &[LabelId]) -> Result<Box<dyn Model>> {
        check_training_set(x, y)?;

        let mut sums: BTreeMap<LabelId, (Array1<f32>, usize)> = BTreeMap::new();
        for (row, &label) in x.rows().into_iter().zip(y) {
            let (sum, count) = sums.entry(label).or_insert_with(|| (Array1::zeros(x.ncols()), 0));
            *sum += &row;
            *count += 1;
        }

        let classes: Vec<LabelId> = sums.keys().copied().collect();
        let mut centroids = Array2::zeros((classes.len(), x.ncols()));
        for (mut centroid, (sum, count)) in centroids.rows_mut().into_iter().zip(sums.values()) {
            centroid.assign(&(sum / *count as f32));
        }
        Ok(Box::new(NearestCentroidModel { classes, centroids }))
    }
}

impl Model for NearestCentroidModel {
    fn predict(&self, x: ArrayView1<f32>) -> LabelId {
        if !check_width(self.centroids.ncols(), x) {
            return self.classes[0];
        }
        self.classes[nearest_centroid(x, self.centroids.view()).0]
    }
}

/// 条目在当前输入模式下的特征向量
pub fn feature_row(entry: &Entry, mode: InputMode) -> Result<Array1<f32>> {
    match mode {
        InputMode::Words => entry.word_hist.as_ref().map(|h| h.to_f32()),
        InputMode::Color => entry.color_hist.as_ref().map(|h| Array1::from(h.clone())),
    }
    .ok_or_else(|| Error::MissingHistogram(entry.name.clone()))
}

/// 按条目顺序构造设计矩阵，所有直方图的长度都必须等于 `width`
pub fn design_matrix(
    entries: &[&Entry],
    mode: InputMode,
    width: usize,
) -> Result<(Array2<f32>, Vec<LabelId>)> {
    if entries.is_empty() {
        return Err(Error::EmptyInput("数据库中没有条目"));
    }
    let mut x = Array2::zeros((entries.len(), width));
    let mut y = Vec::with_capacity(entries.len());
    for (entry, mut row) in entries.iter().zip(x.rows_mut()) {
        let features = feature_row(entry, mode)?;
        if features.len() != width {
            return Err(Error::DimensionMismatch {
                what: "直方图长度",
                expected: width,
                actual: features.len(),
            });
        }
        row.assign(&features);
        y.push(entry.label);
    }
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::WordHistogram;

    fn toy() -> (Array2<f32>, Vec<LabelId>) {
        let x = array![[0.0, 0.0], [1.0, 0.0], [10.0, 10.0], [11.0, 10.0], [10.0, 11.0]];
        (x, vec![0, 0, 1, 1, 1])
    }

    #[test]
    fn test_nearest_neighbor_predicts() {
        let (x, y) = toy();
        for k in [1, 3] {
            let model = NearestNeighbor { k }.train(x.view(), &y).unwrap();
            assert_eq!(model.predict(array![0.5, 0.5].view()), 0);
            assert_eq!(model.predict(array![9.0, 9.0].view()), 1);
        }
    }

    #[test]
    fn test_nearest_neighbor_tie_goes_to_lowest_label() {
        let x = array![[1.0], [-1.0]];
        let model = NearestNeighbor { k: 2 }.train(x.view(), &[3, 1]).unwrap();
        assert_eq!(model.predict(array![0.0].view()), 1);
    }

    #[test]
    fn test_nearest_centroid_predicts() {
        let (x, y) = toy();
        let model = NearestCentroid.train(x.view(), &y).unwrap();
        assert_eq!(model.predict(array![2.0, 2.0].view()), 0);
        assert_eq!(model.predict(array![8.0, 12.0].view()), 1);
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let x = Array2::<f32>::zeros((0, 2));
        assert!(matches!(NearestCentroid.train(x.view(), &[]), Err(Error::EmptyInput(_))));
        let (x, _) = toy();
        assert!(matches!(
            NearestCentroid.train(x.view(), &[0, 1]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            NearestNeighbor { k: 0 }.train(x.view(), &[0; 5]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_design_matrix_width_check() {
        let mut a = Entry::new("a", 0, None);
        a.word_hist = Some(WordHistogram::from(vec![1, 2, 3]));
        let mut b = Entry::new("b", 1, None);
        b.word_hist = Some(WordHistogram::from(vec![4, 5, 6]));

        let (x, y) = design_matrix(&[&a, &b], InputMode::Words, 3).unwrap();
        assert_eq!(x, array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(y, vec![0, 1]);

        b.word_hist = Some(WordHistogram::from(vec![4, 5]));
        assert!(matches!(
            design_matrix(&[&a, &b], InputMode::Words, 3),
            Err(Error::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
        assert!(matches!(
            design_matrix(&[&a], InputMode::Color, 3),
            Err(Error::MissingHistogram(_))
        ));
    }

    #[test]
    fn test_classifier_kind_serde() {
        let kind: ClassifierKind =
            serde_json::from_str(r#"{"kind": "nearest_neighbor", "k": 3}"#).unwrap();
        assert_eq!(kind, ClassifierKind::NearestNeighbor { k: 3 });
        let kind: ClassifierKind = serde_json::from_str(r#"{"kind": "nearest_centroid"}"#).unwrap();
        assert_eq!(kind, ClassifierKind::NearestCentroid);
    }
}
