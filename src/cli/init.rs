use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressIterator};
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::config::{EntrySpec, Opts, SetupFile};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct InitCommand {
    /// 图片所在目录
    pub dir: PathBuf,
    /// 输出的配置文件路径
    #[arg(short, long)]
    pub output: PathBuf,
    /// 数据库名称，默认为目录名
    #[arg(short, long)]
    pub name: Option<String>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
}

/// 文件名第一个 `.` 之前的部分作为标签
pub fn label_of(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

impl SubCommandExtend for InitCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let re_suf = Regex::new(&format!("(?i)^({})$", self.suffix.replace(',', "|")))
            .context("无法解析后缀名")?;

        info!("开始扫描目录: {}", self.dir.display());
        let pb = ProgressBar::no_length().with_style(pb_style());
        let mut entries = vec![];
        for entry in WalkDir::new(&self.dir).sort_by_file_name().into_iter().progress_with(pb) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension() else { continue };
            if !re_suf.is_match(&ext.to_string_lossy()) {
                continue;
            }
            let file = path.strip_prefix(&self.dir).unwrap_or(path).to_path_buf();
            let label = label_of(&entry.file_name().to_string_lossy()).to_owned();
            entries.push(EntrySpec { label, file, comment: None });
        }
        info!("扫描完成，共 {} 张图片", entries.len());

        let name = match &self.name {
            Some(name) => name.clone(),
            None => self
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "visword".to_string()),
        };
        let mut setup = SetupFile::new(name);
        setup.image_dir = Some(self.dir.clone());
        setup.entries = entries;
        setup.save(&self.output)?;
        info!("配置文件已写入: {}", self.output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_of() {
        assert_eq!(label_of("grass.001.png"), "grass");
        assert_eq!(label_of("rock"), "rock");
        assert_eq!(label_of(".hidden"), "");
    }
}
