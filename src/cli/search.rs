use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::{Config, Opts};
use crate::embed::HttpEmbedder;
use crate::filter::{Extension, Filter};
use crate::{IMDBBuilder, SearchResult};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 搜索使用的文字描述
    #[arg(required_unless_present = "image", conflicts_with = "image")]
    pub prompt: Option<String>,
    /// 使用图片搜索相似图片
    #[arg(short, long, value_name = "PATH")]
    pub image: Option<PathBuf>,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 20)]
    pub count: usize,
    /// 最小宽度
    #[arg(long, value_name = "WIDTH", default_value_t = 0)]
    pub min_width: u32,
    /// 最小高度
    #[arg(long, value_name = "HEIGHT", default_value_t = 0)]
    pub min_height: u32,
    /// 只搜索指定格式的图片，可多次指定
    #[arg(short, long, value_name = "EXT")]
    pub extension: Vec<Extension>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SearchCommand {
    pub fn filter(&self) -> Filter {
        Filter::new()
            .min_width(self.min_width)
            .min_height(self.min_height)
            .extensions(self.extension.iter().copied())
    }
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let config = Config::load(&opts.conf_dir)?;
        let embedder = HttpEmbedder::new(&config)?;
        let db = IMDBBuilder::new(config).open().await?;
        let filter = self.filter();

        let result = match (&self.prompt, &self.image) {
            (Some(prompt), _) => db.search_text(&embedder, prompt, &filter, self.count).await?,
            (None, Some(image)) => {
                let data = tokio::fs::read(image).await?;
                db.search_image(&embedder, &data, &filter, self.count).await?
            }
            (None, None) => return Err(anyhow!("需要指定文字或图片")),
        };

        print_result(&result, self)
    }
}

fn print_result(result: &[SearchResult], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for r in result {
                println!(
                    "{:.5}\t{}x{}\t{}\t{}\t{}",
                    r.score, r.width, r.height, r.filesize, r.date, r.filename
                );
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
