use std::path::PathBuf;

use thiserror::Error;

use crate::entry::LabelId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// 检测器、词典或分类器参数缺失或无效
    #[error("配置错误: {0}")]
    Configuration(String),
    /// 没有可处理的条目或描述符
    #[error("没有可处理的输入: {0}")]
    EmptyInput(&'static str),
    #[error("{what} 维度不一致: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch { what: &'static str, expected: usize, actual: usize },
    #[error("数据库没有词典 (no dictionary)")]
    MissingVocabulary,
    #[error("数据库没有分类器 (no classifier)")]
    MissingClassifier,
    #[error("条目 {0} 没有特征点数据")]
    MissingFeatures(String),
    #[error("条目 {0} 没有直方图数据")]
    MissingHistogram(String),
    #[error("条目 {0} 没有对应的图片")]
    MissingImage(String),
    #[error("未知的标签 ID: {0}")]
    UnknownLabel(LabelId),
    #[error("无法读取图片 {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 单个条目的错误，可以跳过该条目继续处理
    pub fn is_per_entry(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. }
                | Error::MissingFeatures(_)
                | Error::MissingHistogram(_)
                | Error::MissingImage(_)
                | Error::Image { .. }
        )
    }
}
