use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::warn;
use serde::Serialize;

use crate::cli::{SubCommandExtend, open_db};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ClassifyCommand {
    /// 训练数据库的配置文件
    pub setup: String,
    /// 需要分类的图片
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Serialize)]
struct Prediction {
    image: PathBuf,
    label: Option<String>,
}

impl SubCommandExtend for ClassifyCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let (_, mut db) = open_db(opts, &self.setup)?;
        db.prepare()?;

        // 阈值在图片之间传递
        let mut threshold = None;
        let mut result = vec![];
        for image in &self.images {
            let label = match db.classify_image(image, threshold) {
                Ok((label, next)) => {
                    threshold = Some(next);
                    Some(db.label_name(label)?.to_owned())
                }
                Err(e) => {
                    warn!("无法分类 {}: {}", image.display(), e);
                    None
                }
            };
            result.push(Prediction { image: image.clone(), label });
        }
        print_result(&result, self.format)
    }
}

fn print_result(result: &[Prediction], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for p in result {
                println!("{}\t{}", p.image.display(), p.label.as_deref().unwrap_or("-"));
            }
        }
    }
    Ok(())
}
