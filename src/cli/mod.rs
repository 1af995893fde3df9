mod classify;
mod evaluate;
mod export;
mod init;
mod train;
mod vote;

pub use classify::*;
pub use evaluate::*;
pub use export::*;
pub use init::*;
pub use train::*;
pub use vote::*;

use log::info;

use crate::config::{Opts, SetupFile};
use crate::db::RecognitionDb;
use crate::utils::format_duration;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

/// 读取配置文件并打开数据库
fn open_db(opts: &Opts, setup: &str) -> anyhow::Result<(SetupFile, RecognitionDb)> {
    let setup = SetupFile::load(&opts.conf_dir.setup(setup))?;
    let db = RecognitionDb::open(&opts.conf_dir, &setup)?;
    Ok((setup, db))
}

fn log_timings(db: &RecognitionDb) {
    let t = db.timings();
    info!("特征提取:   {}", format_duration(t.features));
    info!("构建词典:   {}", format_duration(t.dictionary));
    info!("词袋直方图: {}", format_duration(t.word_histograms));
    info!("颜色直方图: {}", format_duration(t.color_histograms));
    info!("训练分类器: {}", format_duration(t.train_words + t.train_color));
}
