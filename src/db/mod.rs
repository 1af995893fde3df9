//! 识别数据库
//!
//! 按 提取特征 -> 构建词典 -> 生成直方图 -> 训练分类器 的顺序处理一组带标签的图片。
//! 单个条目的错误只会跳过该条目，词典维度等后续步骤依赖的错误会直接返回

mod evaluation;
mod extract;

pub use evaluation::*;
pub use extract::Extracted;

use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator};
use log::{debug, info, warn};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::cache::{FeatureCache, Lookup};
use crate::classifier::{Classifier, InputMode, Model, design_matrix};
use crate::config::{ConfDir, DatabaseConfig, SetupFile};
use crate::detector::{Detector, Extractor, GradientExtractor};
use crate::encoder::encode;
use crate::entry::{Entry, Features, LabelId, LabelTable, WordHistogram};
use crate::error::{Error, Result};
use crate::kmeans::{Clusterer, LloydKMeans};
use crate::raster;
use crate::utils::{pb_style, timed};
use crate::vocabulary::{Vocabulary, VocabularyBuilder};
use extract::Extraction;

/// 数据库所处的阶段，只会按顺序前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DbState {
    Unconfigured,
    FeaturesPopulated,
    VocabularyBuilt,
    HistogramsEncoded,
    ClassifierTrained,
    Ready,
}

/// 特征提取统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureReport {
    pub extracted: usize,
    pub cached: usize,
    pub failed: usize,
    /// 调节器没有命中目标区间的条目数量
    pub missed_target: usize,
}

enum Outcome {
    Present,
    Cached(Features),
    Extracted(Extracted),
    Failed(Error),
}

/// 由文件的相对路径生成条目名，去掉扩展名并把目录分隔符替换为 `_`
pub fn entry_name(file: &Path) -> String {
    file.with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("_")
}

pub struct RecognitionDb {
    name: String,
    config: DatabaseConfig,
    cache: Option<FeatureCache>,
    labels: LabelTable,
    entries: Vec<Entry>,
    vocabulary: Option<Vocabulary>,
    model: Option<Box<dyn Model>>,
    state: DbState,
    detector: Box<dyn Detector>,
    extractor: Box<dyn Extractor>,
    clusterer: Box<dyn Clusterer>,
    classifier: Box<dyn Classifier>,
    timings: TimingReport,
}

impl RecognitionDb {
    /// 创建一个空数据库，检测器和分类器由配置决定
    pub fn new(name: impl Into<String>, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            detector: config.features.detector.build(),
            extractor: Box::new(GradientExtractor::default()),
            clusterer: Box::new(LloydKMeans::new(config.dictionary.seed)),
            classifier: config.classifier.method.build(),
            config,
            cache: None,
            labels: LabelTable::new(),
            entries: vec![],
            vocabulary: None,
            model: None,
            state: DbState::Unconfigured,
            timings: TimingReport::default(),
        })
    }

    /// 按配置文件创建数据库并注册所有条目
    ///
    /// # Arguments
    ///
    /// * `conf_dir` - 配置目录，缓存位于 `database/<name><append>`
    /// * `setup` - 数据库配置文件
    pub fn open(conf_dir: &ConfDir, setup: &SetupFile) -> Result<Self> {
        conf_dir.create_dirs(setup)?;
        let cache_dir = conf_dir.database(&setup.name, &setup.append_to_db_dir);
        let mut db = Self::new(&setup.name, setup.settings.clone())?.with_cache(cache_dir);

        let image_dir = setup.image_dir(conf_dir);
        for spec in &setup.entries {
            let name = entry_name(&spec.file);
            db.register(name, &spec.label, Some(image_dir.join(&spec.file)))?;
            if let Some(entry) = db.entries.last_mut() {
                entry.comment = spec.comment.clone();
            }
        }
        for display in &setup.display {
            match db.labels.id(&display.label) {
                Some(id) => {
                    db.labels.set_color(id, display.color);
                }
                None => warn!("显示颜色对应的标签 {} 不存在", display.label),
            }
        }
        info!("打开数据库 {}，共 {} 个条目，{} 个类别", db.name, db.entries.len(), db.labels.len());
        if let Some(cache) = &db.cache {
            debug!("缓存目录: {}", cache.dir().display());
        }
        Ok(db)
    }

    pub fn with_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache = Some(FeatureCache::new(dir));
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_clusterer(mut self, clusterer: Box<dyn Clusterer>) -> Self {
        self.clusterer = clusterer;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn label_name(&self, id: LabelId) -> Result<&str> {
        self.labels.name(id).ok_or(Error::UnknownLabel(id))
    }

    pub fn vocabulary(&self) -> Option<&Vocabulary> {
        self.vocabulary.as_ref()
    }

    pub fn state(&self) -> DbState {
        self.state
    }

    pub fn timings(&self) -> &TimingReport {
        &self.timings
    }

    pub fn cache(&self) -> Option<&FeatureCache> {
        self.cache.as_ref()
    }

    fn reset(&mut self) {
        self.vocabulary = None;
        self.model = None;
        self.state = DbState::Unconfigured;
    }

    fn push(&mut self, mut entry: Entry, label: &str) -> Result<LabelId> {
        if self.entry(&entry.name).is_some() {
            return Err(Error::Configuration(format!("条目名重复: {}", entry.name)));
        }
        entry.label = self.labels.intern(label);
        let id = entry.label;
        self.entries.push(entry);
        self.reset();
        Ok(id)
    }

    /// 注册一张图片，返回其标签 ID
    pub fn register(
        &mut self,
        name: impl Into<String>,
        label: &str,
        image: Option<PathBuf>,
    ) -> Result<LabelId> {
        self.push(Entry::new(name, 0, image), label)
    }

    /// 注册一个已经提取好特征的条目
    pub fn register_features(
        &mut self,
        name: impl Into<String>,
        label: &str,
        features: Features,
    ) -> Result<LabelId> {
        self.push(Entry::with_features(name, 0, features), label)
    }

    fn extraction(&self) -> Extraction<'_> {
        Extraction {
            detector: self.detector.as_ref(),
            extractor: self.extractor.as_ref(),
            config: &self.config.features,
        }
    }

    fn feature_cache(&self) -> Option<&FeatureCache> {
        self.cache.as_ref().filter(|_| self.config.features.cache)
    }

    fn load_or_extract(&self, entry: &Entry, threshold: f64) -> Outcome {
        if entry.features.is_some() {
            return Outcome::Present;
        }
        let cache = self.feature_cache();
        if let Some(Lookup::Hit(features)) =
            cache.map(|c| c.load_features(&entry.name, self.extractor.dimension()))
        {
            return Outcome::Cached(features);
        }
        let Some(path) = &entry.image else {
            return Outcome::Failed(Error::MissingImage(entry.name.clone()));
        };
        match self.extraction().extract_file(path, threshold) {
            Ok(extracted) => {
                if let Some(cache) = cache {
                    cache.store_features(&entry.name, &extracted.features);
                }
                Outcome::Extracted(extracted)
            }
            Err(e) => Outcome::Failed(e),
        }
    }

    fn apply(entry: &mut Entry, outcome: Outcome, report: &mut FeatureReport) {
        match outcome {
            Outcome::Present => {}
            Outcome::Cached(features) => {
                entry.features = Some(features);
                report.cached += 1;
            }
            Outcome::Extracted(extracted) => {
                if !extracted.hit_target {
                    warn!(
                        "{}: 阈值调节未命中目标区间，使用 {} 个特征点",
                        entry.name,
                        extracted.features.len()
                    );
                    report.missed_target += 1;
                }
                entry.threshold = Some(extracted.threshold);
                entry.features = Some(extracted.features);
                report.extracted += 1;
            }
            Outcome::Failed(e) => {
                match &entry.comment {
                    Some(comment) => warn!("跳过条目 {} ({}): {}", entry.name, comment, e),
                    None => warn!("跳过条目 {}: {}", entry.name, e),
                }
                report.failed += 1;
            }
        }
    }

    /// 为所有还没有特征的条目提取特征
    ///
    /// 开启调节器记忆时按顺序处理，上一个条目的阈值作为下一个条目的初始阈值
    pub fn populate_features(&mut self) -> Result<FeatureReport> {
        if self.entries.is_empty() {
            return Err(Error::EmptyInput("数据库中没有条目"));
        }
        let start = Instant::now();
        let initial = self.extraction().initial_threshold();
        let pb = ProgressBar::new(self.entries.len() as u64).with_style(pb_style());
        pb.set_message("提取特征");

        let outcomes: Vec<Outcome> = if self.config.features.adjuster.memory {
            let mut threshold = initial;
            let mut outcomes = Vec::with_capacity(self.entries.len());
            for entry in self.entries.iter().progress_with(pb) {
                let outcome = self.load_or_extract(entry, threshold);
                if let Outcome::Extracted(extracted) = &outcome {
                    threshold = extracted.threshold;
                }
                outcomes.push(outcome);
            }
            outcomes
        } else {
            self.entries
                .par_iter()
                .progress_with(pb)
                .map(|entry| self.load_or_extract(entry, initial))
                .collect()
        };

        let mut report = FeatureReport::default();
        for (entry, outcome) in self.entries.iter_mut().zip(outcomes) {
            Self::apply(entry, outcome, &mut report);
        }
        self.timings.features = start.elapsed();
        info!(
            "特征提取完成：提取 {}，缓存 {}，失败 {}，未命中目标 {}，用时 {:.2}s",
            report.extracted,
            report.cached,
            report.failed,
            report.missed_target,
            self.timings.features.as_secs_f32()
        );

        if self.entries.iter().all(|e| e.features.is_none()) {
            return Err(Error::EmptyInput("所有条目都没有特征点"));
        }
        self.state = self.state.max(DbState::FeaturesPopulated);
        Ok(report)
    }

    /// 构建词典并生成所有条目的词袋直方图
    ///
    /// 开启词典缓存时，单词数量相同的缓存会被直接使用，否则重新构建并覆盖缓存
    pub fn populate_vocabulary(&mut self) -> Result<()> {
        let words = self.config.dictionary.words;
        let cache = self.cache.as_ref().filter(|_| self.config.dictionary.cache);
        self.model = None;

        if let Some(cache) = cache {
            let dim = self
                .entries
                .iter()
                .find_map(|e| e.features.as_ref().filter(|f| !f.is_empty()).map(Features::dim))
                .unwrap_or_else(|| self.extractor.dimension());
            match cache.load_vocabulary(&self.name, words) {
                Lookup::Hit(vocab) if vocab.dim() == dim => {
                    info!("从缓存加载词典：{} 个单词", vocab.words());
                    self.vocabulary = Some(vocab);
                    self.state = DbState::VocabularyBuilt;
                    return self.encode_histograms();
                }
                Lookup::Miss => {}
                _ => info!("词典缓存已过期，重新构建"),
            }
        }

        let start = Instant::now();
        let builder = VocabularyBuilder {
            clusterer: self.clusterer.as_ref(),
            words,
            max_iter: self.config.dictionary.iterations,
            attempts: self.config.dictionary.attempts,
        };
        let (vocab, histograms) = builder.build(&self.entries)?;
        for (entry, hist) in self.entries.iter_mut().zip(histograms) {
            entry.word_hist = entry.features.is_some().then_some(hist);
        }
        if let Some(cache) = cache {
            cache.store_vocabulary(&self.name, &vocab);
        }
        self.vocabulary = Some(vocab);
        self.timings.dictionary = start.elapsed();
        info!("词典构建完成，用时 {:.2}s", self.timings.dictionary.as_secs_f32());
        self.state = DbState::HistogramsEncoded;
        Ok(())
    }

    /// 使用当前词典重新生成所有条目的词袋直方图
    pub fn encode_histograms(&mut self) -> Result<()> {
        let vocab = self.vocabulary.as_ref().ok_or(Error::MissingVocabulary)?;
        let start = Instant::now();
        let pb = ProgressBar::new(self.entries.len() as u64).with_style(pb_style());
        pb.set_message("生成直方图");

        let histograms: Vec<Option<WordHistogram>> = self
            .entries
            .par_iter()
            .progress_with(pb)
            .map(|entry| {
                let features = entry.features.as_ref()?;
                encode(features.descriptors(), vocab)
                    .inspect_err(|e| warn!("跳过条目 {}: {}", entry.name, e))
                    .ok()
            })
            .collect();
        for (entry, hist) in self.entries.iter_mut().zip(histograms) {
            entry.word_hist = hist;
        }
        self.timings.word_histograms = start.elapsed();
        self.state = DbState::HistogramsEncoded;
        Ok(())
    }

    fn color_width(&self) -> usize {
        3 * self.config.histograms.color_bins as usize
    }

    /// 不经过缓存计算颜色直方图，用于其他数据库的条目和新图片
    fn color_histogram_of(&self, entry: &Entry) -> Result<Vec<f32>> {
        let width = self.color_width();
        if let Some(hist) = entry.color_hist.as_ref().filter(|h| h.len() == width) {
            return Ok(hist.clone());
        }
        let path = entry.image.as_ref().ok_or_else(|| Error::MissingImage(entry.name.clone()))?;
        Ok(raster::color_histogram(&raster::open_rgb(path)?, self.config.histograms.color_bins))
    }

    /// 本数据库条目的颜色直方图，缓存以条目名为键
    fn cached_color_histogram(&self, entry: &Entry) -> Result<Vec<f32>> {
        let width = self.color_width();
        if let Some(hist) = entry.color_hist.as_ref().filter(|h| h.len() == width) {
            return Ok(hist.clone());
        }
        let cache = self.cache.as_ref().filter(|_| self.config.histograms.color_cache);
        if let Some(Lookup::Hit(hist)) = cache.map(|c| c.load_color_histogram(&entry.name, width)) {
            return Ok(hist);
        }
        let hist = self.color_histogram_of(entry)?;
        if let Some(cache) = cache {
            cache.store_color_histogram(&entry.name, &hist);
        }
        Ok(hist)
    }

    /// 为所有条目计算颜色直方图，返回失败的条目数量
    pub fn populate_color_histograms(&mut self) -> Result<usize> {
        if self.entries.is_empty() {
            return Err(Error::EmptyInput("数据库中没有条目"));
        }
        let start = Instant::now();
        let pb = ProgressBar::new(self.entries.len() as u64).with_style(pb_style());
        pb.set_message("颜色直方图");

        let histograms: Vec<Result<Vec<f32>>> = self
            .entries
            .par_iter()
            .progress_with(pb)
            .map(|e| self.cached_color_histogram(e))
            .collect();

        let mut failed = 0;
        for (entry, hist) in self.entries.iter_mut().zip(histograms) {
            match hist {
                Ok(hist) => entry.color_hist = Some(hist),
                Err(e) if !e.is_per_entry() => return Err(e),
                Err(e) => {
                    warn!("跳过条目 {}: {}", entry.name, e);
                    entry.color_hist = None;
                    failed += 1;
                }
            }
        }
        self.timings.color_histograms = start.elapsed();
        Ok(failed)
    }

    fn input_width(&self) -> Result<usize> {
        match self.config.classifier.input {
            InputMode::Words => {
                Ok(self.vocabulary.as_ref().ok_or(Error::MissingVocabulary)?.words())
            }
            InputMode::Color => Ok(self.color_width()),
        }
    }

    /// 用当前输入模式的直方图训练分类器，没有直方图的条目会被跳过
    pub fn train_classifier(&mut self) -> Result<()> {
        let mode = self.config.classifier.input;
        let width = self.input_width()?;
        let start = Instant::now();

        let usable: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| match mode {
                InputMode::Words => e.word_hist.is_some(),
                InputMode::Color => e.color_hist.is_some(),
            })
            .collect();
        if usable.len() < self.entries.len() {
            warn!("{} 个条目没有直方图，不参与训练", self.entries.len() - usable.len());
        }

        let (x, y) = design_matrix(&usable, mode, width)?;
        let model = self.classifier.train(x.view(), &y)?;
        self.model = Some(model);

        let elapsed = start.elapsed();
        match mode {
            InputMode::Words => self.timings.train_words = elapsed,
            InputMode::Color => self.timings.train_color = elapsed,
        }
        info!("分类器训练完成：{} 个样本，{} 维", x.nrows(), width);
        self.state = self.state.max(DbState::ClassifierTrained);
        Ok(())
    }

    /// 按输入模式依次执行所有步骤
    pub fn prepare(&mut self) -> Result<()> {
        self.timings.entries = self.entries.len();
        match self.config.classifier.input {
            InputMode::Words => {
                self.populate_features()?;
                self.populate_vocabulary()?;
            }
            InputMode::Color => {
                self.populate_color_histograms()?;
            }
        }
        self.train_classifier()?;
        self.state = DbState::Ready;
        Ok(())
    }

    fn trained_model(&self) -> Result<&dyn Model> {
        if self.config.classifier.input == InputMode::Words && self.vocabulary.is_none() {
            return Err(Error::MissingVocabulary);
        }
        self.model.as_deref().ok_or(Error::MissingClassifier)
    }

    fn input_row(&self, entry: &Entry) -> Result<Array1<f32>> {
        let row = match self.config.classifier.input {
            InputMode::Words => {
                let vocab = self.vocabulary.as_ref().ok_or(Error::MissingVocabulary)?;
                encode(entry.features()?.descriptors(), vocab)?.to_f32()
            }
            InputMode::Color => Array1::from(self.color_histogram_of(entry)?),
        };
        let width = self.input_width()?;
        if row.len() != width {
            return Err(Error::DimensionMismatch {
                what: "直方图长度",
                expected: width,
                actual: row.len(),
            });
        }
        Ok(row)
    }

    /// 使用本数据库的词典和分类器对条目分类
    pub fn classify(&self, entry: &Entry) -> Result<LabelId> {
        let model = self.trained_model()?;
        let row = self.input_row(entry)?;
        Ok(model.predict(row.view()))
    }

    /// 对已经量化好的词袋直方图分类
    pub fn predict_histogram(&self, hist: &WordHistogram) -> Result<LabelId> {
        let model = self.trained_model()?;
        if self.config.classifier.input != InputMode::Words {
            return Err(Error::Configuration("分类器不是使用词袋直方图训练的".to_string()));
        }
        let width = self.input_width()?;
        if hist.len() != width {
            return Err(Error::DimensionMismatch {
                what: "直方图长度",
                expected: width,
                actual: hist.len(),
            });
        }
        Ok(model.predict(hist.to_f32().view()))
    }

    /// 用本数据库的检测器和调节器处理一张新图片
    ///
    /// `threshold` 为 None 时使用配置的初始阈值
    pub fn extract_image(&self, path: &Path, threshold: Option<f64>) -> Result<Extracted> {
        let extraction = self.extraction();
        let threshold = threshold.unwrap_or_else(|| extraction.initial_threshold());
        extraction.extract_file(path, threshold)
    }

    /// 对一张新图片分类，同时返回调节后的阈值供下一张图片使用
    pub fn classify_image(&self, path: &Path, threshold: Option<f64>) -> Result<(LabelId, f64)> {
        self.trained_model()?;
        let name = entry_name(Path::new(path.file_name().unwrap_or(path.as_os_str())));
        let mut entry = Entry::new(name, 0, Some(path.to_path_buf()));
        let mut next = threshold.unwrap_or_else(|| self.extraction().initial_threshold());
        if self.config.classifier.input == InputMode::Words {
            let extracted = self.extract_image(path, Some(next))?;
            next = extracted.threshold;
            entry.features = Some(extracted.features);
        }
        Ok((self.classify(&entry)?, next))
    }

    /// 使用本数据库对 `source` 的所有条目分类并统计结果
    ///
    /// 单个条目分类失败时记为分类错误
    pub fn classify_against(&self, source: &RecognitionDb) -> Result<Evaluation> {
        self.trained_model()?;
        if source.entries.is_empty() {
            return Err(Error::EmptyInput("被分类的数据库中没有条目"));
        }

        let pb = ProgressBar::new(source.entries.len() as u64).with_style(pb_style());
        pb.set_message(format!("{} vs {}", source.name, self.name));
        let (results, elapsed) = timed(|| {
            source
                .entries
                .par_iter()
                .progress_with(pb)
                .map(|entry| {
                    let (predicted, duration) = timed(|| self.classify(entry));
                    let predicted = match predicted.and_then(|id| self.label_name(id)) {
                        Ok(name) => Some(name.to_owned()),
                        Err(e) => {
                            warn!("无法分类条目 {}: {}", entry.name, e);
                            None
                        }
                    };
                    EntryResult {
                        name: entry.name.clone(),
                        truth: source.labels.name(entry.label).unwrap_or_default().to_owned(),
                        predicted,
                        duration,
                    }
                })
                .collect::<Vec<_>>()
        });

        let mode = self.config.classifier.input;
        let evaluation = Evaluation::new(&source.name, &self.name, mode, results, elapsed);
        info!(
            "{} vs {}：{}/{} ({:.2} %)，用时 {:.2}s",
            source.name,
            self.name,
            evaluation.total_matched(),
            evaluation.total(),
            evaluation.accuracy(),
            elapsed.as_secs_f32()
        );
        Ok(evaluation)
    }

    /// 按条目顺序导出词袋直方图矩阵，没有直方图的条目为全零行
    pub fn export_histograms(&self) -> Result<Array2<f32>> {
        let vocab = self.vocabulary.as_ref().ok_or(Error::MissingVocabulary)?;
        let mut data = Array2::zeros((self.entries.len(), vocab.words()));
        for (entry, mut row) in self.entries.iter().zip(data.rows_mut()) {
            if let Some(hist) = &entry.word_hist {
                row.assign(&hist.to_f32());
            }
        }
        Ok(data)
    }
}
