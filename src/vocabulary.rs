use log::info;
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::entry::{Entry, WordHistogram};
use crate::error::{Error, Result};
use crate::kmeans::{Clusterer, nearest_centroid};

/// 视觉词典，每行是一个视觉单词（聚类中心）
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    centroids: Array2<f32>,
}

impl Vocabulary {
    pub fn new(centroids: Array2<f32>) -> Self {
        Self { centroids }
    }

    /// 单词数量
    pub fn words(&self) -> usize {
        self.centroids.nrows()
    }

    /// 描述符维度
    pub fn dim(&self) -> usize {
        self.centroids.ncols()
    }

    pub fn centroids(&self) -> ArrayView2<'_, f32> {
        self.centroids.view()
    }

    /// 最近的单词序号，距离相同时取序号最小的
    pub fn nearest(&self, descriptor: ArrayView1<f32>) -> usize {
        nearest_centroid(descriptor, self.centroids.view()).0
    }

    /// 为每一行描述符查找最近的单词
    pub fn quantize(&self, descriptors: ArrayView2<f32>) -> Result<Vec<usize>> {
        if descriptors.nrows() > 0 && descriptors.ncols() != self.dim() {
            return Err(Error::DimensionMismatch {
                what: "描述符维度",
                expected: self.dim(),
                actual: descriptors.ncols(),
            });
        }
        Ok((0..descriptors.nrows())
            .into_par_iter()
            .map(|i| self.nearest(descriptors.row(i)))
            .collect())
    }
}

/// 将所有条目的描述符聚类为词典
pub struct VocabularyBuilder<'a> {
    pub clusterer: &'a dyn Clusterer,
    pub words: usize,
    pub max_iter: usize,
    pub attempts: usize,
}

impl VocabularyBuilder<'_> {
    /// 按条目顺序拼接所有描述符
    pub fn assemble(entries: &[Entry]) -> Result<Array2<f32>> {
        let mut dim = None;
        let mut total = 0;
        for entry in entries {
            let Some(features) = entry.features.as_ref().filter(|f| !f.is_empty()) else {
                continue;
            };
            match dim {
                None => dim = Some(features.dim()),
                Some(d) if d != features.dim() => {
                    return Err(Error::DimensionMismatch {
                        what: "描述符维度",
                        expected: d,
                        actual: features.dim(),
                    });
                }
                _ => {}
            }
            total += features.len();
        }

        let dim = dim.ok_or(Error::EmptyInput("所有条目都没有描述符"))?;
        let mut all = Array2::zeros((total, dim));
        let mut row = 0;
        for features in entries.iter().filter_map(|e| e.features.as_ref()) {
            let n = features.len();
            if n == 0 {
                continue;
            }
            all.slice_mut(s![row..row + n, ..]).assign(&features.descriptors());
            row += n;
        }
        Ok(all)
    }

    /// 构建词典，并用聚类结果直接生成每个条目的直方图
    ///
    /// 聚类结果按拼接时的条目顺序依次分配回各条目
    pub fn build(&self, entries: &[Entry]) -> Result<(Vocabulary, Vec<WordHistogram>)> {
        if entries.is_empty() {
            return Err(Error::EmptyInput("数据库中没有条目"));
        }
        let all = Self::assemble(entries)?;
        info!("使用 {} 个描述符构建 {} 个单词的词典", all.nrows(), self.words);

        let clustering =
            self.clusterer.cluster(all.view(), self.words, self.max_iter, self.attempts)?;

        let mut assignments = clustering.assignments.iter();
        let histograms = entries
            .iter()
            .map(|entry| {
                let mut hist = WordHistogram::new(self.words);
                for word in assignments.by_ref().take(entry.keypoint_count()) {
                    hist.increment(*word);
                }
                hist
            })
            .collect();

        Ok((Vocabulary::new(clustering.centroids), histograms))
    }
}
