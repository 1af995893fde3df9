//! 特征点、颜色直方图和词典的磁盘缓存
//!
//! 读取失败或形状不符都不是错误，调用方会重新计算并覆盖缓存

mod format;

pub use format::*;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::entry::Features;
use crate::vocabulary::Vocabulary;

/// 缓存的内容类型，决定文件扩展名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Features,
    ColorHistogram,
    Dictionary,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Features => "key",
            ArtifactKind::ColorHistogram => "col",
            ArtifactKind::Dictionary => "dic",
        }
    }
}

/// 缓存查询结果
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    /// 没有缓存文件
    Miss,
    /// 缓存文件无法读取或形状与当前配置不符
    Stale,
}

impl<T> Lookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureCache {
    dir: PathBuf,
}

impl FeatureCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 缓存文件路径：`<dir>/<name>.<ext>`
    pub fn path(&self, name: &str, kind: ArtifactKind) -> PathBuf {
        self.dir.join(format!("{name}.{}", kind.extension()))
    }

    fn load<T, F>(&self, name: &str, kind: ArtifactKind, read: F) -> Lookup<T>
    where
        F: FnOnce(&mut BufReader<File>) -> io::Result<Option<T>>,
    {
        let path = self.path(name, kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Lookup::Miss,
            Err(e) => {
                debug!("无法打开缓存 {}: {}", path.display(), e);
                return Lookup::Stale;
            }
        };
        match read(&mut BufReader::new(file)) {
            Ok(Some(v)) => Lookup::Hit(v),
            Ok(None) => {
                debug!("缓存 {} 已过期", path.display());
                Lookup::Stale
            }
            Err(e) => {
                debug!("缓存 {} 已损坏: {}", path.display(), e);
                Lookup::Stale
            }
        }
    }

    /// 先写入临时文件再重命名，写入失败只记录警告
    fn store<F>(&self, name: &str, kind: ArtifactKind, write: F)
    where
        F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    {
        let path = self.path(name, kind);
        let tmp = self.dir.join(format!("{name}.{}.tmp", kind.extension()));
        let result = fs::create_dir_all(&self.dir)
            .and_then(|_| File::create(&tmp))
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                write(&mut writer)?;
                writer.flush()
            })
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = result {
            warn!("无法写入缓存 {}: {}", path.display(), e);
            let _ = fs::remove_file(&tmp);
        }
    }

    /// 读取词典，行数与 `words` 不同时视为过期
    pub fn load_vocabulary(&self, name: &str, words: usize) -> Lookup<Vocabulary> {
        self.load(name, ArtifactKind::Dictionary, |r| {
            let vocab = read_vocabulary(r)?;
            Ok((vocab.words() == words).then_some(vocab))
        })
    }

    pub fn store_vocabulary(&self, name: &str, vocab: &Vocabulary) {
        self.store(name, ArtifactKind::Dictionary, |w| write_vocabulary(w, vocab))
    }

    /// 读取特征，描述符维度与 `dim` 不同时视为过期
    pub fn load_features(&self, name: &str, dim: usize) -> Lookup<Features> {
        self.load(name, ArtifactKind::Features, |r| {
            let features = read_features(r)?;
            Ok((features.dim() == dim).then_some(features))
        })
    }

    /// 没有特征点的结果不会被缓存
    pub fn store_features(&self, name: &str, features: &Features) {
        if features.is_empty() {
            return;
        }
        self.store(name, ArtifactKind::Features, |w| write_features(w, features))
    }

    /// 读取颜色直方图，长度与 `width` 不同时视为过期
    pub fn load_color_histogram(&self, name: &str, width: usize) -> Lookup<Vec<f32>> {
        self.load(name, ArtifactKind::ColorHistogram, |r| {
            let hist = read_color_histogram(r)?;
            Ok((hist.len() == width).then_some(hist))
        })
    }

    pub fn store_color_histogram(&self, name: &str, hist: &[f32]) {
        self.store(name, ArtifactKind::ColorHistogram, |w| write_color_histogram(w, hist))
    }
}
