use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use crate::cli::SubCommandExtend;
use crate::config::Config;
use crate::embed::HttpEmbedder;
use crate::{IMDBBuilder, Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 未指定数量时返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 20)]
    pub count: usize,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let config = Config::load(&opts.conf_dir)?;
        let embedder = HttpEmbedder::new(&config)?;
        let db = IMDBBuilder::new(config).open().await?;

        // 创建应用状态
        let state = server::AppState::new(db, embedder, self.count);

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
