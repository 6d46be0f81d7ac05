use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{ImportReport, SearchResult};

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub prompt: Option<String>,
    #[form_data(limit = "unlimited")]
    pub file: Option<Bytes>,
    pub count: Option<usize>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    pub extension: Vec<String>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 文字描述，与 file 二选一
    pub prompt: Option<String>,
    /// 作为查询的图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: Option<String>,
    /// 返回的结果数量
    pub count: Option<usize>,
    /// 最小宽度
    pub min_width: Option<u32>,
    /// 最小高度
    pub min_height: Option<u32>,
    /// 允许的图片格式，可以重复多次
    pub extension: Vec<String>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 按相似度降序排列的结果
    pub result: Vec<SearchResult>,
}

/// 上传请求参数
#[derive(TryFromMultipart)]
pub struct UploadRequest {
    #[form_data(limit = "unlimited")]
    pub file: Vec<FieldData<Bytes>>,
}

/// 上传表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// 上传的图片文件，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 上传响应
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// 新添加的图片路径
    pub imported: Vec<String>,
    /// 导入统计
    #[schema(value_type = Object)]
    pub report: ImportReport,
}
