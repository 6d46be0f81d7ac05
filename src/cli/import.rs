use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use indicatif::ProgressBar;
use log::{error, info};

use crate::cli::SubCommandExtend;
use crate::config::{Config, Opts};
use crate::embed::HttpEmbedder;
use crate::import::{ImportReport, StoreErrorPolicy};
use crate::utils::pb_style;
use crate::IMDBBuilder;

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    /// 图片所在目录，会递归扫描其中的所有文件
    pub dir: PathBuf,
    /// 将图片复制到 import-image-base 下按内容哈希存放，并跳过重复图片
    #[arg(long)]
    pub copy: bool,
    /// 写入数据库失败时的处理方式
    #[arg(long, value_enum, default_value_t = StoreErrorPolicy::Abort)]
    pub on_store_error: StoreErrorPolicy,
}

impl SubCommandExtend for ImportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let config = Config::load(&opts.conf_dir)?;
        if self.copy && config.import_image_base.is_none() {
            return Err(anyhow!("--copy 需要在配置文件中设置 import-image-base"));
        }
        if !self.dir.is_dir() {
            return Err(anyhow!("目录不存在: {}", self.dir.display()));
        }

        let embedder = HttpEmbedder::new(&config)?;
        let db = IMDBBuilder::new(config).open().await?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        let mut report = ImportReport::default();
        let result = db
            .import_dir(&embedder, &self.dir, self.copy, self.on_store_error, &mut report, &pb)
            .await;

        pb.finish_with_message("图片导入完成");
        info!("{}", report);
        println!("{}", report);

        if let Err(e) = result {
            error!("导入中止: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}
