use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;

use crate::classifier::InputMode;

/// 单个条目的分类结果
#[derive(Debug, Clone, Serialize)]
pub struct EntryResult {
    pub name: String,
    pub truth: String,
    /// 分类失败时为 None
    pub predicted: Option<String>,
    pub duration: Duration,
}

impl EntryResult {
    pub fn is_match(&self) -> bool {
        self.predicted.as_deref() == Some(self.truth.as_str())
    }
}

/// 用一个数据库对另一个数据库分类的统计结果
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    /// 被分类的数据库
    pub source: String,
    /// 提供词典和分类器的数据库
    pub target: String,
    pub mode: InputMode,
    pub results: Vec<EntryResult>,
    /// 每个类别分类正确的数量
    pub matches: BTreeMap<String, usize>,
    /// 每个类别的条目数量
    pub truths: BTreeMap<String, usize>,
    pub elapsed: Duration,
}

impl Evaluation {
    pub fn new(
        source: &str,
        target: &str,
        mode: InputMode,
        results: Vec<EntryResult>,
        elapsed: Duration,
    ) -> Self {
        let mut matches = BTreeMap::new();
        let mut truths = BTreeMap::new();
        for r in &results {
            if r.is_match() {
                *matches.entry(r.truth.clone()).or_insert(0) += 1;
            }
            *truths.entry(r.truth.clone()).or_insert(0) += 1;
        }
        Self {
            source: source.to_owned(),
            target: target.to_owned(),
            mode,
            results,
            matches,
            truths,
            elapsed,
        }
    }

    pub fn matched(&self, class: &str) -> usize {
        self.matches.get(class).copied().unwrap_or(0)
    }

    pub fn truth(&self, class: &str) -> usize {
        self.truths.get(class).copied().unwrap_or(0)
    }

    pub fn total_matched(&self) -> usize {
        self.matches.values().sum()
    }

    /// 总数使用条目数量
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn accuracy(&self) -> f64 {
        percent(self.total_matched(), self.total())
    }

    pub fn class_accuracy(&self, class: &str) -> f64 {
        percent(self.matched(class), self.truth(class))
    }

    /// 写入汇总表的表头：`Name, <class>..., Total`
    pub fn write_summary_header<W: Write>(w: &mut W, classes: &[String]) -> io::Result<()> {
        write!(w, "Name")?;
        for class in classes {
            write!(w, ", {class}")?;
        }
        writeln!(w, ", Total")
    }

    /// 写入一行汇总，每格为 `matched/total (xx.xx %)`
    pub fn write_summary_row<W: Write>(
        &self,
        w: &mut W,
        name: &str,
        classes: &[String],
    ) -> io::Result<()> {
        write!(w, "{name}")?;
        for class in classes {
            write!(w, ", {}", cell(self.matched(class), self.truth(class)))?;
        }
        writeln!(w, ", {}", cell(self.total_matched(), self.total()))
    }
}

fn percent(matched: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { 100.0 * matched as f64 / total as f64 }
}

fn cell(matched: usize, total: usize) -> String {
    format!("{matched}/{total} ({:.2} %)", percent(matched, total))
}

/// 各阶段耗时
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingReport {
    pub features: Duration,
    pub dictionary: Duration,
    pub word_histograms: Duration,
    pub train_words: Duration,
    pub train_color: Duration,
    pub color_histograms: Duration,
    pub verify_words: Duration,
    pub verify_color: Duration,
    pub entries: usize,
    pub test_entries: usize,
}

impl TimingReport {
    pub fn write_header<W: Write>(w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "Name, Features, Dictionary, Word Histograms, Train Words, Train Color, \
             Color Histograms, Verify Words, Verify Color, Entries, Test Entries"
        )
    }

    /// 时间以秒为单位
    pub fn write_row<W: Write>(&self, w: &mut W, name: &str) -> io::Result<()> {
        let times = [
            self.features,
            self.dictionary,
            self.word_histograms,
            self.train_words,
            self.train_color,
            self.color_histograms,
            self.verify_words,
            self.verify_color,
        ];
        write!(w, "{name}")?;
        for t in times {
            write!(w, ", {:.3}", t.as_secs_f64())?;
        }
        writeln!(w, ", {}, {}", self.entries, self.test_entries)
    }
}
