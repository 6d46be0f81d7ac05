use std::sync::Arc;

use crate::IMDB;
use crate::embed::HttpEmbedder;

/// 应用状态
pub struct AppState {
    /// 图片数据库
    pub db: IMDB,
    /// 特征提取服务
    pub embedder: HttpEmbedder,
    /// 默认返回的结果数量
    pub count: usize,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: IMDB, embedder: HttpEmbedder, count: usize) -> Arc<Self> {
        Arc::new(AppState { db, embedder, count })
    }
}
