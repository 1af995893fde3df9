use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array2;
use rstest::*;
use tempfile::TempDir;

use visword::cache::ArtifactKind;
use visword::classifier::{ClassifierKind, InputMode};
use visword::db::DbState;
use visword::detector::Detector;
use visword::{DatabaseConfig, Error, Features, KeyPoint, RecognitionDb};

/// 在 `center` 附近生成 n 个二维描述符
fn features(center: f32, n: usize) -> Features {
    let kps = (0..n).map(|i| KeyPoint::new(10.0 + i as f32, 10.0, 7.0, 1.0)).collect();
    let des = Array2::from_shape_fn((n, 2), |(i, j)| center + 0.01 * (i * 2 + j) as f32);
    Features::new(32, 32, kps, des).unwrap()
}

fn config(method: ClassifierKind) -> DatabaseConfig {
    let mut config = DatabaseConfig::default();
    config.dictionary.words = 4;
    config.dictionary.iterations = 50;
    config.classifier.method = method;
    config
}

fn two_class_db(name: &str, config: DatabaseConfig) -> RecognitionDb {
    let mut db = RecognitionDb::new(name, config).unwrap();
    db.register_features("grass_1", "grass", features(0.0, 6)).unwrap();
    db.register_features("rock_1", "rock", features(10.0, 5)).unwrap();
    db.register_features("grass_2", "grass", features(0.2, 7)).unwrap();
    db.register_features("rock_2", "rock", features(10.2, 4)).unwrap();
    db
}

#[rstest]
#[case::nearest_neighbor(ClassifierKind::NearestNeighbor { k: 1 })]
#[case::nearest_centroid(ClassifierKind::NearestCentroid)]
fn self_classification_is_perfect(#[case] method: ClassifierKind) -> Result<()> {
    let mut db = two_class_db("train", config(method));
    db.prepare()?;
    assert_eq!(db.state(), DbState::Ready);
    assert_eq!(db.vocabulary().map(|v| v.words()), Some(4));

    for entry in db.entries() {
        let hist = entry.word_hist.as_ref().unwrap();
        assert_eq!(hist.total() as usize, entry.keypoint_count());
        assert_eq!(db.classify(entry)?, entry.label);
    }

    let eval = db.classify_against(&db)?;
    assert_eq!(eval.total(), 4);
    assert_eq!(eval.matches, eval.truths);
    assert_eq!(eval.accuracy(), 100.0);
    Ok(())
}

#[test]
fn classify_another_database() -> Result<()> {
    // 每个类别一个单词
    let mut config = config(ClassifierKind::default());
    config.dictionary.words = 2;
    let mut train = two_class_db("train", config.clone());
    train.prepare()?;

    let mut test = RecognitionDb::new("test", config)?;
    test.register_features("grass_9", "grass", features(0.1, 5))?;
    test.register_features("rock_9", "rock", features(10.1, 5))?;
    test.register_features("sand_9", "sand", features(0.1, 5))?;

    let eval = train.classify_against(&test)?;
    assert_eq!(eval.source, "test");
    assert_eq!(eval.target, "train");
    assert_eq!(eval.matched("grass"), 1);
    assert_eq!(eval.matched("rock"), 1);
    // sand 不在训练集中，只能分类错误
    assert_eq!(eval.matched("sand"), 0);
    assert_eq!(eval.truth("sand"), 1);
    assert_eq!(eval.total_matched(), 2);
    assert_eq!(eval.total(), 3);
    Ok(())
}

#[test]
fn missing_stages_are_reported() -> Result<()> {
    let mut db = two_class_db("train", config(ClassifierKind::default()));
    let entry = db.entries()[0].clone();
    assert!(matches!(db.classify(&entry), Err(Error::MissingVocabulary)));

    db.populate_features()?;
    db.populate_vocabulary()?;
    assert!(matches!(db.classify(&entry), Err(Error::MissingClassifier)));
    assert!(matches!(db.classify_against(&db), Err(Error::MissingClassifier)));
    Ok(())
}

#[test]
fn stale_vocabulary_cache_is_rebuilt() -> Result<()> {
    let dir = TempDir::new()?;

    let mut config = config(ClassifierKind::default());
    config.dictionary.cache = true;
    let mut db = RecognitionDb::new("cached", config.clone())?.with_cache(dir.path());
    db.register_features("a", "a", features(0.0, 6))?;
    db.register_features("b", "b", features(10.0, 6))?;
    db.populate_vocabulary()?;
    let path = db.cache().unwrap().path("cached", ArtifactKind::Dictionary);
    assert!(path.is_file());

    // 单词数量相同时直接使用缓存
    let mut same = RecognitionDb::new("cached", config.clone())?.with_cache(dir.path());
    same.register_features("a", "a", features(0.0, 6))?;
    same.populate_vocabulary()?;
    assert_eq!(same.vocabulary(), db.vocabulary());

    // 单词数量不同时重新构建并覆盖缓存
    config.dictionary.words = 3;
    let mut other = RecognitionDb::new("cached", config)?.with_cache(dir.path());
    other.register_features("a", "a", features(0.0, 6))?;
    other.register_features("b", "b", features(10.0, 6))?;
    other.populate_vocabulary()?;
    assert_eq!(other.vocabulary().map(|v| v.words()), Some(3));
    let cache = other.cache().unwrap();
    assert!(cache.load_vocabulary("cached", 3).hit().is_some());
    Ok(())
}

/// 黑色背景上的白色方块
fn save_squares(path: &Path, squares: &[(u32, u32, u32)]) {
    GrayImage::from_fn(64, 64, |x, y| {
        let inside =
            squares.iter().any(|&(sx, sy, s)| x >= sx && x < sx + s && y >= sy && y < sy + s);
        Luma([if inside { 220 } else { 20 }])
    })
    .save(path)
    .unwrap();
}

const SQUARES: [&str; 4] = ["big.1", "big.2", "small.1", "small.2"];

/// 两类方块图片，文件名见 `SQUARES`
fn save_square_set(dir: &Path) {
    save_squares(&dir.join("big.1.png"), &[(20, 20, 24)]);
    save_squares(&dir.join("big.2.png"), &[(18, 22, 22)]);
    save_squares(&dir.join("small.1.png"), &[(12, 12, 8), (40, 12, 8), (12, 40, 8), (40, 40, 8)]);
    save_squares(&dir.join("small.2.png"), &[(14, 14, 8), (42, 14, 8), (14, 42, 8), (42, 42, 8)]);
}

fn square_db(images: &Path, cache: &Path) -> Result<RecognitionDb> {
    let mut config = config(ClassifierKind::default());
    config.features.cache = true;
    config.features.threshold = Some(500.0);
    config.features.adjuster.enabled = false;
    let mut db = RecognitionDb::new("squares", config)?.with_cache(cache);
    for name in SQUARES {
        let label = name.split('.').next().unwrap();
        db.register(name, label, Some(images.join(format!("{name}.png"))))?;
    }
    Ok(db)
}

#[test]
fn images_are_extracted_and_cached() -> Result<()> {
    let images = TempDir::new()?;
    let cache = TempDir::new()?;
    save_square_set(images.path());

    let mut db = square_db(images.path(), cache.path())?;
    db.register("missing", "big", Some(images.path().join("missing.png")))?;

    let report = db.populate_features()?;
    assert_eq!(report.extracted, 4);
    assert_eq!(report.failed, 1);
    for name in ["big.1", "small.2"] {
        let entry = db.entry(name).unwrap();
        assert!(entry.keypoint_count() > 0);
        assert_eq!(entry.threshold, Some(500.0));
        assert!(db.cache().unwrap().path(name, ArtifactKind::Features).is_file());
    }

    db.populate_vocabulary()?;
    db.train_classifier()?;
    let eval = db.classify_against(&db)?;
    assert_eq!(eval.total(), 5);
    assert!(eval.results.iter().any(|r| r.name == "missing" && r.predicted.is_none()));
    Ok(())
}

#[test]
fn cached_features_are_reused() -> Result<()> {
    let images = TempDir::new()?;
    let cache = TempDir::new()?;
    save_square_set(images.path());

    let mut first = square_db(images.path(), cache.path())?;
    let report = first.populate_features()?;
    assert_eq!((report.extracted, report.cached), (4, 0));

    let mut second = square_db(images.path(), cache.path())?;
    let report = second.populate_features()?;
    assert_eq!(report.cached, 4);
    assert_eq!(report.extracted, 0);
    assert_eq!(report.failed, 0);
    for name in SQUARES {
        let (a, b) = (first.entry(name).unwrap(), second.entry(name).unwrap());
        assert_eq!(a.keypoint_count(), b.keypoint_count());
        assert_eq!(a.features()?.descriptors(), b.features()?.descriptors());
        // 从缓存读取时不经过调节器
        assert_eq!(b.threshold, None);
    }
    Ok(())
}

/// 记录每次调用的阈值，始终检测不到特征点
#[derive(Default)]
struct RecordingDetector {
    calls: Arc<Mutex<Vec<f64>>>,
}

impl Detector for RecordingDetector {
    fn detect(&self, _image: &GrayImage, threshold: f64) -> Vec<KeyPoint> {
        self.calls.lock().unwrap().push(threshold);
        vec![]
    }

    fn default_threshold(&self) -> f64 {
        1000.0
    }

    fn threshold_bounds(&self) -> (f64, f64) {
        (1.0, 15000.0)
    }
}

#[test]
fn adjuster_memory_carries_threshold() -> Result<()> {
    let images = TempDir::new()?;
    save_square_set(images.path());

    let mut config = config(ClassifierKind::default());
    config.features.adjuster.min = 10;
    config.features.adjuster.max = 20;
    config.features.adjuster.iterations = 2;
    config.features.adjuster.memory = true;
    let detector = RecordingDetector::default();
    let calls = detector.calls.clone();
    let mut db = RecognitionDb::new("memory", config)?.with_detector(Box::new(detector));
    for name in SQUARES {
        db.register(name, "square", Some(images.path().join(format!("{name}.png"))))?;
    }

    let report = db.populate_features()?;
    assert_eq!(report.extracted, 4);
    assert_eq!(report.missed_target, 4);

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 4 * 2);
    assert_eq!(calls[0], 1000.0);
    for (i, entry) in db.entries().iter().enumerate().take(3) {
        let next = entry.threshold.unwrap();
        assert_ne!(next, 1000.0);
        // 下一个条目的第一次检测使用上一个条目最终的阈值
        assert_eq!(calls[(i + 1) * 2], next);
    }
    Ok(())
}

#[test]
fn color_mode_uses_color_histograms() -> Result<()> {
    let images = TempDir::new()?;
    let colors = [("red", [200, 30, 30]), ("blue", [30, 30, 200])];
    let mut config = DatabaseConfig::default();
    config.classifier.input = InputMode::Color;
    config.histograms.color_bins = 16;
    config.histograms.color_cache = false;

    let mut db = RecognitionDb::new("colors", config)?;
    for (label, rgb) in colors {
        for i in 0..2 {
            let path = images.path().join(format!("{label}.{i}.png"));
            let shade = Rgb([rgb[0] + i * 10, rgb[1], rgb[2] + i * 10]);
            RgbImage::from_pixel(16, 16, shade).save(&path)?;
            db.register(format!("{label}.{i}"), label, Some(path))?;
        }
    }
    db.prepare()?;
    assert!(db.vocabulary().is_none());
    assert_eq!(db.entries()[0].color_hist.as_ref().map(Vec::len), Some(48));

    let eval = db.classify_against(&db)?;
    assert_eq!(eval.accuracy(), 100.0);

    let (label, _) = db.classify_image(&images.path().join("blue.1.png"), None)?;
    assert_eq!(db.labels().name(label), Some("blue"));
    Ok(())
}

#[test]
fn color_cache_is_not_shared_with_other_databases() -> Result<()> {
    let images = TempDir::new()?;
    let cache = TempDir::new()?;
    let red = images.path().join("red.png");
    let blue = images.path().join("blue.png");
    RgbImage::from_pixel(16, 16, Rgb([200, 30, 30])).save(&red)?;
    RgbImage::from_pixel(16, 16, Rgb([30, 30, 200])).save(&blue)?;

    let mut config = DatabaseConfig::default();
    config.classifier.input = InputMode::Color;
    config.histograms.color_bins = 16;
    config.histograms.color_cache = true;

    let mut train = RecognitionDb::new("train", config.clone())?.with_cache(cache.path());
    train.register("img.1", "red", Some(red))?;
    train.register("img.2", "blue", Some(blue.clone()))?;
    train.prepare()?;
    let red_hist = train.entry("img.1").unwrap().color_hist.clone();

    // 同名条目，图片却是蓝色
    config.histograms.color_cache = false;
    let mut test = RecognitionDb::new("test", config)?;
    test.register("img.1", "blue", Some(blue))?;

    let eval = train.classify_against(&test)?;
    assert_eq!(eval.results[0].predicted.as_deref(), Some("blue"));
    let cached = train.cache().unwrap().load_color_histogram("img.1", 48).hit();
    assert_eq!(cached, red_hist);

    test.populate_color_histograms()?;
    let eval = train.classify_against(&test)?;
    assert_eq!(eval.accuracy(), 100.0);
    Ok(())
}
