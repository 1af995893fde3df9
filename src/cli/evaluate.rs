use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::classifier::InputMode;
use crate::cli::{SubCommandExtend, log_timings, open_db};
use crate::config::Opts;
use crate::db::{Evaluation, TimingReport};

#[derive(Parser, Debug, Clone)]
pub struct EvaluateCommand {
    /// 训练数据库的配置文件，可以有多个
    #[arg(required = true)]
    pub train: Vec<String>,
    /// 测试数据库的配置文件
    #[arg(short, long)]
    pub test: String,
    /// 分类统计的输出文件，每次运行追加写入
    #[arg(long, value_name = "FILE")]
    pub verify_csv: Option<PathBuf>,
    /// 各阶段耗时的输出文件，每次运行追加写入
    #[arg(long, value_name = "FILE")]
    pub timing_csv: Option<PathBuf>,
}

/// 以追加方式打开 CSV，文件为空时先写入表头
fn open_csv(
    path: &Path,
    header: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    let mut w = BufWriter::new(file);
    if empty {
        header(&mut w)?;
    }
    Ok(w)
}

impl SubCommandExtend for EvaluateCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let (_, mut test_db) = open_db(opts, &self.test)?;
        let (mut test_features, mut test_colors) = (false, false);

        for setup in &self.train {
            let (_, mut db) = open_db(opts, setup)?;
            db.prepare()?;
            log_timings(&db);

            let mode = db.config().classifier.input;
            match mode {
                InputMode::Words if !test_features => {
                    test_db.populate_features()?;
                    test_features = true;
                }
                InputMode::Color if !test_colors => {
                    test_db.populate_color_histograms()?;
                    test_colors = true;
                }
                _ => {}
            }

            let verify = db.classify_against(&db)?;
            let test = db.classify_against(&test_db)?;
            print_evaluation(&verify);
            print_evaluation(&test);

            let mut timings: TimingReport = db.timings().clone();
            timings.test_entries = test_db.entries().len();
            match mode {
                InputMode::Words => timings.verify_words = test.elapsed,
                InputMode::Color => timings.verify_color = test.elapsed,
            }

            let classes = db.labels().names().to_vec();
            if let Some(path) = &self.verify_csv {
                let mut w = open_csv(path, |w| Evaluation::write_summary_header(w, &classes))?;
                verify.write_summary_row(&mut w, &format!("{} (self)", db.name()), &classes)?;
                let name = format!("{} vs {}", db.name(), test_db.name());
                test.write_summary_row(&mut w, &name, &classes)?;
                w.flush()?;
            }
            if let Some(path) = &self.timing_csv {
                let mut w = open_csv(path, |w| TimingReport::write_header(w))?;
                timings.write_row(&mut w, db.name())?;
                w.flush()?;
            }
        }
        Ok(())
    }
}

fn print_evaluation(eval: &Evaluation) {
    info!("{} vs {}", eval.source, eval.target);
    for (class, truth) in &eval.truths {
        let (matched, accuracy) = (eval.matched(class), eval.class_accuracy(class));
        info!("  {:<16} {}/{} ({:.2} %)", class, matched, truth, accuracy);
    }
    info!("  {:<16} {}/{} ({:.2} %)", "Total", eval.total_matched(), eval.total(), eval.accuracy());
}
