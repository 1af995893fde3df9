use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::{SubCommandExtend, open_db};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 数据库配置文件
    pub setup: String,
    /// 输出文件
    #[arg(short, long, default_value = "histograms.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let (_, mut db) = open_db(opts, &self.setup)?;
        db.populate_features()?;
        db.populate_vocabulary()?;
        let data = db.export_histograms()?;
        write_npy(&self.output, &data)?;
        info!("导出成功: {} x {}", data.nrows(), data.ncols());
        Ok(())
    }
}
