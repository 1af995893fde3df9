use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, open_db};
use crate::config::Opts;
use crate::entry::LabelId;
use crate::raster::open_rgb;
use crate::voter::vote_image;

#[derive(Parser, Debug, Clone)]
pub struct VoteCommand {
    /// 训练数据库的配置文件
    pub setup: String,
    /// 需要定位的图片
    pub image: PathBuf,
    /// 窗口圆心的间隔
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub step: usize,
    /// 结果图片的保存路径
    #[arg(short, long, default_value = "vote.png")]
    pub output: PathBuf,
}

impl SubCommandExtend for VoteCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let (_, mut db) = open_db(opts, &self.setup)?;
        db.prepare()?;

        let maps = vote_image(&db, &self.image, self.step)?;
        let winners = maps.winners();
        for id in 0..maps.classes() as LabelId {
            let pixels = winners.iter().filter(|w| **w == Some(id)).count();
            info!("{:<16} {} 像素", db.label_name(id)?, pixels);
        }

        let image = open_rgb(&self.image)?;
        maps.render(&image, db.labels().colors()).save(&self.output)?;
        info!("结果已保存: {}", self.output.display());
        Ok(())
    }
}
