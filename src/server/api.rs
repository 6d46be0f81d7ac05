use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::filter::{Extension, Filter};
use crate::import::{ImportOutcome, ImportReport};
use crate::metrics;

/// 使用文字或图片搜索
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let extensions = data
        .extension
        .iter()
        .map(|ext| ext.parse::<Extension>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::bad_request(anyhow!(e)))?;
    let filter = Filter::new()
        .min_width(data.min_width.unwrap_or(0))
        .min_height(data.min_height.unwrap_or(0))
        .extensions(extensions);
    let count = data.count.unwrap_or(state.count);

    let start = Instant::now();

    let result = match (&data.prompt, &data.file) {
        (Some(prompt), _) if !prompt.is_empty() => {
            info!("正在搜索文字: {}", prompt);
            state.db.search_text(&state.embedder, prompt, &filter, count).await?
        }
        (_, Some(file)) => {
            info!("正在搜索上传图片");
            state.db.search_image(&state.embedder, file, &filter, count).await?
        }
        _ => return Err(AppError::bad_request(anyhow!("需要提供 prompt 或 file"))),
    };

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 上传图片并添加到数据库
///
/// 图片总是以复制模式导入，需要配置 import-image-base
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = UploadResponse),
    )
)]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    if state.db.config().import_image_base.is_none() {
        return Err(AppError::bad_request(anyhow!("服务器未配置 import-image-base")));
    }

    let mut imported = vec![];
    let mut report = ImportReport::default();
    for file in &data.file {
        let tmp = tempfile::NamedTempFile::new()?;
        tokio::fs::write(tmp.path(), &file.contents).await?;

        let outcome = state.db.import_image(&state.embedder, tmp.path(), true).await;
        report.record(&outcome);
        let name = file.metadata.file_name.as_deref().unwrap_or("<unnamed>");
        match outcome {
            ImportOutcome::Imported(record) => {
                info!("已添加上传图片 {}: {}", name, record.filename);
                imported.push(record.filename);
            }
            ImportOutcome::Skipped(reason) => info!("跳过上传图片 ({}): {}", reason, name),
            ImportOutcome::Failed(e) => return Err(anyhow!(e).into()),
        }
    }

    Ok(Json(UploadResponse { imported, report }))
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics", responses((status = 200, body = String)))]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
