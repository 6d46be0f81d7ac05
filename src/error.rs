use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 配置文件错误，启动时即失败
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("无法读取配置文件 {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("配置文件格式错误: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("未知的模型 {0}，请通过 feature-dim 指定特征维数")]
    UnknownModel(String),
    #[error("模型 {model} 的特征维数为 {expected}，与 feature-dim = {actual} 不一致")]
    DimensionConflict { model: String, expected: usize, actual: usize },
    #[error("{0} 必须大于 0")]
    Zero(&'static str),
    #[error("无效的路径 {path}: {source}")]
    Path { path: PathBuf, source: io::Error },
}

/// 数据库读写错误，不在内部重试
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("数据库迁移失败: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// 特征提取错误
#[derive(Debug, Error)]
pub enum EmbedError {
    /// 图片无法解码
    #[error("无法解码图片: {0}")]
    Decode(String),
    /// 特征服务返回了错误
    #[error("特征服务错误: {0}")]
    Service(String),
    #[error("请求特征服务失败: {0}")]
    Request(#[from] reqwest::Error),
}

/// 导入单张图片时的失败，跳过类的情况见 [`crate::import::SkipReason`]
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("文件读写失败: {0}")]
    Io(#[from] io::Error),
    #[error("特征维数不一致：期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("复制模式需要在配置文件中设置 import-image-base")]
    NoImportBase,
}

impl ImportError {
    /// 是否为数据库错误
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("无效的查询向量: {0}")]
    InvalidQuery(String),
}

impl From<sqlx::Error> for SearchError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.into())
    }
}
