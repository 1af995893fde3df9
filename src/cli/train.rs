use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, log_timings, open_db};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    /// 数据库配置文件，可以是路径或 setup 目录下的名称
    pub setup: String,
}

impl SubCommandExtend for TrainCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let (_, mut db) = open_db(opts, &self.setup)?;
        db.prepare()?;
        log_timings(&db);

        let total = db.entries().len();
        let matched = db
            .entries()
            .iter()
            .filter(|e| db.classify(e).is_ok_and(|label| label == e.label))
            .count();
        info!("训练完成，训练集分类正确 {}/{}", matched, total);
        Ok(())
    }
}
