use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierKind, InputMode};
use crate::cli::*;
use crate::detector::{Detector, FastDetector, HarrisDetector};
use crate::error::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "visword", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// visword 配置文件目录
    #[arg(short, long, default_value_t = ConfDir::default())]
    pub conf_dir: ConfDir,
    /// 并行线程数量，默认为 CPU 核心数
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图片目录并生成数据库配置文件
    Init(InitCommand),
    /// 提取特征、构建词典并训练分类器
    Train(TrainCommand),
    /// 使用训练数据库对测试数据库进行分类并输出统计
    Evaluate(EvaluateCommand),
    /// 对单独的图片进行分类
    Classify(ClassifyCommand),
    /// 使用滑动窗口对图片的每个像素投票
    Vote(VoteCommand),
    /// 导出词袋直方图
    Export(ExportCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl Default for ConfDir {
    fn default() -> Self {
        let path = ProjectDirs::from("", "visword", "visword")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".visword"));
        Self { path }
    }
}

impl fmt::Display for ConfDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回配置文件的路径
    ///
    /// 已存在的文件路径直接使用，否则视为 `setup/<name>.json`
    pub fn setup(&self, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        if path.is_file() {
            return path;
        }
        self.path.join("setup").join(format!("{name}.json"))
    }

    /// 返回数据库图片目录
    pub fn images(&self, db: &str) -> PathBuf {
        self.path.join("images").join(db)
    }

    /// 返回数据库缓存目录
    pub fn database(&self, db: &str, append: &str) -> PathBuf {
        self.path.join("database").join(format!("{db}{append}"))
    }

    /// 返回日志目录
    pub fn logs(&self, db: &str, append: &str) -> PathBuf {
        self.path.join("logs").join(format!("{db}{append}"))
    }

    /// 创建缓存和日志目录
    pub fn create_dirs(&self, setup: &SetupFile) -> Result<()> {
        fs::create_dir_all(self.database(&setup.name, &setup.append_to_db_dir))?;
        fs::create_dir_all(self.logs(&setup.name, &setup.append_to_log_dir))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Fast,
    #[default]
    Harris,
}

impl DetectorKind {
    pub fn build(&self) -> Box<dyn Detector> {
        match self {
            DetectorKind::Fast => Box::new(FastDetector::default()),
            DetectorKind::Harris => Box::new(HarrisDetector::default()),
        }
    }
}

/// 阈值调节器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjusterConfig {
    pub enabled: bool,
    pub min: usize,
    pub max: usize,
    pub iterations: usize,
    pub learn_rate: f64,
    /// 使用上一个条目的最终阈值作为下一个条目的初始阈值
    pub memory: bool,
    /// 将图片切分为 grid_step x grid_step 的窗口分别调节
    pub grid: bool,
    pub grid_step: u32,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min: 400,
            max: 600,
            iterations: 10,
            learn_rate: 0.75,
            memory: false,
            grid: false,
            grid_step: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub detector: DetectorKind,
    /// 初始阈值，未设置时使用检测器的默认值
    pub threshold: Option<f64>,
    pub auto_levels: bool,
    /// 自动色阶两端裁掉的像素百分比
    pub auto_levels_clip: f32,
    pub cache: bool,
    pub adjuster: AdjusterConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            threshold: None,
            auto_levels: true,
            auto_levels_clip: 1.5,
            cache: false,
            adjuster: AdjusterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryConfig {
    pub words: usize,
    pub iterations: usize,
    pub attempts: usize,
    pub seed: u64,
    pub cache: bool,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self { words: 40, iterations: 1000, attempts: 1, seed: 42, cache: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// 每个颜色通道的直方图区间数量
    pub color_bins: u32,
    pub color_cache: bool,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self { color_bins: 256, color_cache: true }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub input: InputMode,
    pub method: ClassifierKind,
}

/// 单个数据库的全部配置，创建数据库后不再修改
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub features: FeatureConfig,
    pub dictionary: DictionaryConfig,
    pub histograms: HistogramConfig,
    pub classifier: ClassifierConfig,
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| -> Result<()> { Err(Error::Configuration(msg)) };
        let adjuster = &self.features.adjuster;
        if adjuster.min > adjuster.max {
            let (min, max) = (adjuster.min, adjuster.max);
            return err(format!("adjuster.min ({min}) 大于 adjuster.max ({max})"));
        }
        if !(adjuster.learn_rate > 0.0) {
            return err(format!("adjuster.learn_rate 必须为正数: {}", adjuster.learn_rate));
        }
        if adjuster.grid_step == 0 {
            return err("adjuster.grid_step 必须大于 0".to_string());
        }
        if !(0.0..50.0).contains(&self.features.auto_levels_clip) {
            return err(format!("auto_levels_clip 超出范围: {}", self.features.auto_levels_clip));
        }
        if !(1..=1_000_000).contains(&self.dictionary.words) {
            return err(format!("dictionary.words 超出范围: {}", self.dictionary.words));
        }
        if !(1..=1_000_000).contains(&self.dictionary.iterations) {
            return err(format!("dictionary.iterations 超出范围: {}", self.dictionary.iterations));
        }
        if self.dictionary.attempts == 0 {
            return err("dictionary.attempts 必须大于 0".to_string());
        }
        if !(1..=256).contains(&self.histograms.color_bins) {
            return err(format!("histograms.color_bins 超出范围: {}", self.histograms.color_bins));
        }
        if let ClassifierKind::NearestNeighbor { k: 0 } = self.classifier.method {
            return err("classifier.method.k 必须大于 0".to_string());
        }
        Ok(())
    }
}

/// 配置文件中的一个条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub label: String,
    /// 相对于图片目录的路径
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// 标签的显示颜色
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySpec {
    pub label: String,
    pub color: [u8; 3],
}

/// 数据库配置文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupFile {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub append_to_db_dir: String,
    #[serde(default)]
    pub append_to_log_dir: String,
    /// 图片目录，未设置时为 `<conf_dir>/images/<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<PathBuf>,
    #[serde(default)]
    pub settings: DatabaseConfig,
    #[serde(default)]
    pub entries: Vec<EntrySpec>,
    #[serde(default)]
    pub display: Vec<DisplaySpec>,
}

impl SetupFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1".to_string(),
            append_to_db_dir: String::new(),
            append_to_log_dir: String::new(),
            image_dir: None,
            settings: DatabaseConfig::default(),
            entries: vec![],
            display: vec![],
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("读取配置文件: {}", path.display());
        let text = fs::read_to_string(path)?;
        let setup: SetupFile = serde_json::from_str(&text)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        if setup.name.is_empty() {
            return Err(Error::Configuration(format!("{}: 缺少数据库名称", path.display())));
        }
        setup.settings.validate()?;
        Ok(setup)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// 图片所在目录
    pub fn image_dir(&self, conf_dir: &ConfDir) -> PathBuf {
        self.image_dir.clone().unwrap_or_else(|| conf_dir.images(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: DatabaseConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DatabaseConfig::default());
        assert_eq!(config.features.adjuster.min, 400);
        assert_eq!(config.features.adjuster.max, 600);
        assert_eq!(config.features.adjuster.iterations, 10);
        assert_eq!(config.features.adjuster.grid_step, 512);
        assert_eq!(config.dictionary.words, 40);
        assert_eq!(config.dictionary.iterations, 1000);
        assert_eq!(config.histograms.color_bins, 256);
        assert!(config.histograms.color_cache);
        assert!(!config.features.cache);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "features": { "detector": "fast", "adjuster": { "min": 50, "max": 80 } },
            "classifier": { "input": "color", "method": { "kind": "nearest_centroid" } }
        }"#;
        let config: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.features.detector, DetectorKind::Fast);
        assert_eq!(config.features.adjuster.min, 50);
        assert_eq!(config.features.adjuster.learn_rate, 0.75);
        assert_eq!(config.classifier.input, InputMode::Color);
        assert_eq!(config.classifier.method, ClassifierKind::NearestCentroid);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = DatabaseConfig::default();
        config.histograms.color_bins = 300;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = DatabaseConfig::default();
        config.features.adjuster.min = 700;
        assert!(config.validate().is_err());

        let mut config = DatabaseConfig::default();
        config.dictionary.words = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_setup_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("setup").join("demo.json");
        let mut setup = SetupFile::new("demo");
        setup.entries.push(EntrySpec {
            label: "grass".into(),
            file: "grass.1.png".into(),
            comment: None,
        });
        setup.display.push(DisplaySpec { label: "grass".into(), color: [0, 255, 0] });
        setup.save(&path).unwrap();

        let loaded = SetupFile::load(&path).unwrap();
        assert_eq!(loaded, setup);
    }

    #[test]
    fn test_conf_dir_layout() {
        let conf = ConfDir::from_str("/tmp/conf").unwrap();
        assert_eq!(conf.images("a"), PathBuf::from("/tmp/conf/images/a"));
        assert_eq!(conf.database("a", ".v2"), PathBuf::from("/tmp/conf/database/a.v2"));
        assert_eq!(conf.logs("a", ""), PathBuf::from("/tmp/conf/logs/a"));
        assert_eq!(conf.setup("missing"), PathBuf::from("/tmp/conf/setup/missing.json"));
    }
}
