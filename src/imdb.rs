use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use futures::TryStreamExt;
use log::{debug, info};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::Config;
use crate::db::{Database, FeatureRecord, ImageRecord, crud, init_db};
use crate::embed::ImageEmbedder;
use crate::error::{SearchError, StoreError};
use crate::filter::Filter;
use crate::metrics;
use crate::scanner::Scanner;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchResult {
    /// 余弦相似度
    pub score: f32,
    /// 文件名，不含目录
    pub name: String,
    /// 完整路径
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub filesize: i64,
    pub date: String,
    pub extension: String,
}

impl SearchResult {
    fn new(score: f32, record: ImageRecord) -> Self {
        let name = Path::new(&record.filename)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| record.filename.clone());
        Self {
            score,
            name,
            filename: record.filename,
            width: record.width,
            height: record.height,
            filesize: record.filesize,
            date: record.date,
            extension: record.extension,
        }
    }

    /// 用于展示的多行文本
    pub fn caption(&self) -> String {
        format!(
            "Score = {:.5}\n{}\n{}x{}, filesize={}, {}\n",
            self.score, self.name, self.width, self.height, self.filesize, self.date
        )
    }
}

pub struct IMDBBuilder {
    config: Config,
    batch_size: Option<usize>,
}

impl IMDBBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, batch_size: None }
    }

    /// 覆盖配置文件中的批大小
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub async fn open(self) -> Result<IMDB, StoreError> {
        let db = init_db(&self.config.database).await?;
        let scanner = Scanner::new(
            self.config.feature_dim,
            self.config.storage_type,
            self.batch_size.unwrap_or(self.config.batch_size),
        );
        Ok(IMDB { db, config: self.config, scanner })
    }
}

/// 图片特征数据库
pub struct IMDB {
    pub(crate) db: Database,
    pub(crate) config: Config,
    scanner: Scanner,
}

impl IMDB {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 数据库中的图片数量
    pub async fn count(&self) -> Result<u64, StoreError> {
        Ok(crud::count_image(&self.db).await?)
    }

    /// 根据路径检查图片是否已添加
    pub async fn check_filename(&self, filename: &str) -> Result<bool, StoreError> {
        Ok(crud::check_filename(&self.db, filename).await?)
    }

    /// 扫描满足条件的所有图片，返回相似度最高的 `top_n` 个 `(路径, 相似度)`
    pub async fn rank(
        &self,
        query: &[f32],
        filter: &Filter,
        top_n: usize,
    ) -> Result<Vec<(String, f32)>, SearchError> {
        let mut qb = crud::scan_features(filter);
        let stream = qb.build_query_as::<FeatureRecord>().fetch(&self.db).map_err(StoreError::from);
        self.scanner.scan(query, stream, top_n).await
    }

    /// 批量查询排序结果的元数据，查询时已不存在的图片会被丢弃
    pub async fn hydrate(&self, ranked: Vec<(String, f32)>) -> Result<Vec<SearchResult>, StoreError> {
        if ranked.is_empty() {
            return Ok(vec![]);
        }
        let filenames = ranked.iter().map(|(filename, _)| filename.clone()).collect::<Vec<_>>();
        let mut records = crud::get_images_by_filenames(&self.db, &filenames)
            .await?
            .into_iter()
            .map(|record| (record.filename.clone(), record))
            .collect::<HashMap<_, _>>();

        Ok(ranked
            .into_iter()
            .filter_map(|(filename, score)| match records.remove(&filename) {
                Some(record) => Some(SearchResult::new(score, record)),
                None => {
                    debug!("图片已不存在: {}", filename);
                    None
                }
            })
            .collect())
    }

    /// 使用特征向量搜索图片
    pub async fn search(
        &self,
        query: &[f32],
        filter: &Filter,
        top_n: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let instant = Instant::now();
        let ranked = self.rank(query, filter, top_n).await?;
        let result = self.hydrate(ranked).await?;
        let elapsed = instant.elapsed().as_secs_f32();
        info!("搜索完成，{} 个结果，耗时 {:.3}s", result.len(), elapsed);
        metrics::observe_search(elapsed, result.first().map(|r| r.score));
        Ok(result)
    }

    /// 使用文字搜索图片
    pub async fn search_text<E: ImageEmbedder>(
        &self,
        embedder: &E,
        prompt: &str,
        filter: &Filter,
        top_n: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        metrics::inc_search("text");
        let query = embedder.embed_text(prompt).await?;
        self.search(&query, filter, top_n).await
    }

    /// 使用示例图片搜索相似图片
    pub async fn search_image<E: ImageEmbedder>(
        &self,
        embedder: &E,
        data: &[u8],
        filter: &Filter,
        top_n: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        metrics::inc_search("image");
        let query = embedder.embed_image(data).await?.vector;
        self.search(&query, filter, top_n).await
    }
}
