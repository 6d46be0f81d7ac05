use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{Config, Opts};
use crate::IMDBBuilder;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let config = Config::load(&opts.conf_dir)?;
        let db = IMDBBuilder::new(config).open().await?;
        let config = db.config();

        println!("images      : {}", db.count().await?);
        println!("model       : {}", config.clip_model);
        println!("dimension   : {}", config.feature_dim);
        println!("storage type: {}", config.storage_type.as_str());
        println!("database    : {}", config.database.display());
        Ok(())
    }
}
